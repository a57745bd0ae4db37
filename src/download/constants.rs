//! Constants for the download module.

/// Fallback connect timeout used when a config snapshot's `timeout` key is
/// absent. The configured value (§6.2, default 30s) always wins once a
/// `ConfigSnapshot` is available.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// The `Referer` header the upstream image host requires (§4.5, §6.4).
pub const IMAGE_REFERER: &str = "https://app-api.pixiv.net/";

pub const DEFAULT_USER_AGENT: &str = "PixivAndroidApp/5.0.234 (Android 11; Pixel 5)";
