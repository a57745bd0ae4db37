//! Artifact URL and filename resolution (§4.5).

use crate::download::DownloadError;
use crate::model::{Illust, IllustType};

/// One file the downloader needs to fetch and persist for a work.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub url: String,
    pub file_name: String,
}

/// Resolves the full artifact list for an illust, in the exact naming
/// convention §4.5 specifies:
/// - single-page: one file, `<illust_id>.<ext>`
/// - multi-page: `<illust_id>.p<k>.<ext>` for k in 0..N-1
/// - ugoira: one `<illust_id>.zip`
pub fn resolve_artifacts(illust: &Illust) -> Result<Vec<Artifact>, DownloadError> {
    match illust.illust_type {
        IllustType::Ugoira => {
            let url = illust.ugoira_zip_url.clone().ok_or_else(|| {
                DownloadError::invalid_url(format!(
                    "ugoira illust {} has no zip url",
                    illust.illust_id
                ))
            })?;
            Ok(vec![Artifact {
                file_name: format!("{}.zip", illust.illust_id),
                url,
            }])
        }
        IllustType::Illust | IllustType::Manga => {
            if illust.page_urls.is_empty() {
                return Err(DownloadError::invalid_url(format!(
                    "illust {} has no page urls",
                    illust.illust_id
                )));
            }
            if illust.page_urls.len() == 1 {
                let ext = extension_of(&illust.page_urls[0])?;
                Ok(vec![Artifact {
                    file_name: format!("{}.{}", illust.illust_id, ext),
                    url: illust.page_urls[0].clone(),
                }])
            } else {
                illust
                    .page_urls
                    .iter()
                    .enumerate()
                    .map(|(k, url)| {
                        let ext = extension_of(url)?;
                        Ok(Artifact {
                            file_name: format!("{}.p{}.{}", illust.illust_id, k, ext),
                            url: url.clone(),
                        })
                    })
                    .collect()
            }
        }
    }
}

fn extension_of(url: &str) -> Result<&str, DownloadError> {
    url.rsplit('.')
        .next()
        .filter(|ext| !ext.is_empty() && !ext.contains('/'))
        .ok_or_else(|| DownloadError::invalid_url(url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn base_illust(id: i64) -> Illust {
        Illust {
            illust_id: id,
            title: "t".into(),
            caption: String::new(),
            user: crate::model::Author {
                user_id: 1,
                name: "a".into(),
                account: "a".into(),
                profile_image_url: "https://example.invalid/a.png".into(),
            },
            create_date: chrono::Utc::now(),
            page_count: 1,
            width: 1,
            height: 1,
            bookmark_count: 0,
            view_count: 0,
            sanity_level: 2,
            x_restrict: 0,
            illust_type: IllustType::Illust,
            tags: vec![],
            image_urls: BTreeMap::new(),
            tools: vec![],
            download_time: None,
            original_url: "https://www.pixiv.net/artworks/1".into(),
            is_bookmarked: true,
            is_following_author: false,
            bookmark_order: None,
            is_access_limited: false,
            page_urls: vec![],
            ugoira_zip_url: None,
        }
    }

    #[test]
    fn single_page_gets_bare_filename() {
        let mut illust = base_illust(42);
        illust.page_urls = vec!["https://i.pximg.net/img-original/42_p0.jpg".into()];
        let artifacts = resolve_artifacts(&illust).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].file_name, "42.jpg");
    }

    #[test]
    fn multi_page_gets_indexed_filenames() {
        let mut illust = base_illust(7);
        illust.page_count = 2;
        illust.page_urls = vec![
            "https://i.pximg.net/img-original/7_p0.png".into(),
            "https://i.pximg.net/img-original/7_p1.png".into(),
        ];
        let artifacts = resolve_artifacts(&illust).unwrap();
        assert_eq!(artifacts[0].file_name, "7.p0.png");
        assert_eq!(artifacts[1].file_name, "7.p1.png");
    }

    #[test]
    fn ugoira_gets_zip_filename() {
        let mut illust = base_illust(9);
        illust.illust_type = IllustType::Ugoira;
        illust.ugoira_zip_url = Some("https://i.pximg.net/img-zip-ugoira/9.zip".into());
        let artifacts = resolve_artifacts(&illust).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].file_name, "9.zip");
    }

    #[test]
    fn missing_page_urls_is_an_error() {
        let illust = base_illust(1);
        assert!(resolve_artifacts(&illust).is_err());
    }
}
