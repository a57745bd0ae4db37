//! Upstream API client (§6.4): paginated bookmark/following listings and
//! the raw JSON shapes they return.
//!
//! Grounded on the teacher's `parser` boundary — untyped input goes through
//! one explicitly-typed parsing layer before anything downstream touches it
//! (§9 "no duck-typed records") — generalized from parsing a single URL
//! string into parsing a page of upstream JSON. The trait split mirrors the
//! dropped `queue::repository::QueueRepository` seam: a thin `async-trait`
//! interface so the Scanner can be tested against a stub instead of the
//! real upstream.

mod client;
mod types;

pub use client::{Page, PixivApi, UpstreamApi, UpstreamError};
pub use types::{
    RawIllust, RawImageUrls, RawMetaPage, RawMetaPageImageUrls, RawProfileImageUrls, RawSinglePageMeta,
    RawTag, RawUser, UserPreview,
};
