//! Raw upstream JSON shapes (§9: "no duck-typed records" — unknown fields
//! are dropped here rather than threaded through as `serde_json::Value`).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::model::{Author, Illust, IllustType};

#[derive(Debug, Clone, Deserialize)]
pub struct RawUser {
    pub id: i64,
    pub name: String,
    pub account: String,
    #[serde(default)]
    pub profile_image_urls: RawProfileImageUrls,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProfileImageUrls {
    #[serde(default)]
    pub medium: String,
}

/// One entry of a `following`-listing page: an author plus whatever
/// illust previews the upstream inlined. The Scanner only needs the
/// author identity; the previews are discarded.
#[derive(Debug, Clone, Deserialize)]
pub struct UserPreview {
    pub user: RawUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTag {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawImageUrls {
    #[serde(default)]
    pub square_medium: Option<String>,
    #[serde(default)]
    pub medium: Option<String>,
    #[serde(default)]
    pub large: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSinglePageMeta {
    pub original_image_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMetaPage {
    pub image_urls: RawMetaPageImageUrls,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMetaPageImageUrls {
    pub original: String,
}

/// One work as the upstream listing endpoints return it. `visible == false`
/// or an absent `title` both signal a placeholder (§4.4 placeholder
/// detection) — the upstream has been observed to use either shape.
#[derive(Debug, Clone, Deserialize)]
pub struct RawIllust {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub caption: String,
    pub user: RawUser,
    pub create_date: DateTime<Utc>,
    pub page_count: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub total_bookmarks: u64,
    #[serde(default)]
    pub total_view: u64,
    #[serde(default)]
    pub sanity_level: u32,
    #[serde(default)]
    pub x_restrict: u32,
    #[serde(rename = "type", default = "default_type")]
    pub illust_type: String,
    #[serde(default)]
    pub tags: Vec<RawTag>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub image_urls: RawImageUrls,
    #[serde(default)]
    pub meta_single_page: Option<RawSinglePageMeta>,
    #[serde(default)]
    pub meta_pages: Vec<RawMetaPage>,
    #[serde(default)]
    pub visible: Option<bool>,
}

fn default_type() -> String {
    "illust".into()
}

impl RawIllust {
    /// True when the upstream returned a structurally-valid but
    /// content-less record — no title, explicitly marked not visible, or no
    /// usable artifact URL at all (§4.4).
    pub fn is_placeholder(&self) -> bool {
        if self.visible == Some(false) {
            return true;
        }
        if self.title.is_none() {
            return true;
        }
        if self.meta_single_page.is_none() && self.meta_pages.is_empty() {
            return true;
        }
        false
    }

    /// Converts a non-placeholder raw record into the canonical [`Illust`],
    /// tagging it with the provenance flags and `bookmark_order` the
    /// Scanner computed for this pass.
    pub fn into_illust(
        self,
        is_bookmarked: bool,
        is_following_author: bool,
        bookmark_order: Option<u64>,
    ) -> Illust {
        let illust_type = match self.illust_type.as_str() {
            "manga" => IllustType::Manga,
            "ugoira" => IllustType::Ugoira,
            _ => IllustType::Illust,
        };

        let (page_urls, ugoira_zip_url) = match illust_type {
            IllustType::Ugoira => (
                Vec::new(),
                self.meta_single_page
                    .as_ref()
                    .map(|m| m.original_image_url.clone()),
            ),
            IllustType::Illust | IllustType::Manga => {
                if !self.meta_pages.is_empty() {
                    (
                        self.meta_pages
                            .iter()
                            .map(|p| p.image_urls.original.clone())
                            .collect(),
                        None,
                    )
                } else {
                    let single = self
                        .meta_single_page
                        .as_ref()
                        .map(|m| m.original_image_url.clone())
                        .into_iter()
                        .collect();
                    (single, None)
                }
            }
        };

        let mut image_urls = BTreeMap::new();
        if let Some(url) = self.image_urls.square_medium {
            image_urls.insert("square_medium".to_string(), url);
        }
        if let Some(url) = self.image_urls.medium {
            image_urls.insert("medium".to_string(), url);
        }
        if let Some(url) = self.image_urls.large {
            image_urls.insert("large".to_string(), url);
        }

        Illust {
            illust_id: self.id,
            title: self.title.unwrap_or_default(),
            caption: self.caption,
            user: Author {
                user_id: self.user.id,
                name: self.user.name,
                account: self.user.account,
                profile_image_url: self.user.profile_image_urls.medium,
            },
            create_date: self.create_date,
            page_count: self.page_count,
            width: self.width,
            height: self.height,
            bookmark_count: self.total_bookmarks,
            view_count: self.total_view,
            sanity_level: self.sanity_level,
            x_restrict: self.x_restrict,
            illust_type,
            tags: self.tags.into_iter().map(|t| t.name).collect(),
            image_urls,
            tools: self.tools,
            download_time: None,
            original_url: format!("https://www.pixiv.net/artworks/{}", self.id),
            is_bookmarked,
            is_following_author,
            bookmark_order,
            is_access_limited: false,
            page_urls,
            ugoira_zip_url,
        }
    }
}
