//! Config Snapshot (C1): an immutable parameter set read once per round.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("config invalid: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    Bookmarks,
    Following,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Restrict {
    Public,
    Private,
}

/// A validated, immutable view of the configuration for a single round.
/// Constructed only through [`ConfigSnapshot::load`], so any live instance
/// is guaranteed to satisfy the §6.2 recognized-keys contract.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub enabled: bool,
    pub user_id: String,
    pub refresh_token: String,
    pub output_dir: PathBuf,
    #[serde(default = "default_mode")]
    pub mode: ScanMode,
    #[serde(default = "default_restrict")]
    pub restrict: Restrict,
    #[serde(default)]
    pub max_downloads: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_sync_interval_minutes")]
    pub sync_interval_minutes: u64,
    #[serde(default = "default_cooldown_after_limit_minutes")]
    pub cooldown_after_limit_minutes: u64,
    #[serde(default = "default_cooldown_after_error_minutes")]
    pub cooldown_after_error_minutes: u64,
    #[serde(default = "default_high_speed_queue_size")]
    pub high_speed_queue_size: u32,
    #[serde(default = "default_low_speed_interval_seconds")]
    pub low_speed_interval_seconds: u64,
    #[serde(default = "default_interval_jitter_ms")]
    pub interval_jitter_ms: u64,
}

fn default_mode() -> ScanMode {
    ScanMode::Both
}
fn default_restrict() -> Restrict {
    Restrict::Public
}
fn default_timeout() -> u64 {
    30
}
fn default_sync_interval_minutes() -> u64 {
    30
}
fn default_cooldown_after_limit_minutes() -> u64 {
    60
}
fn default_cooldown_after_error_minutes() -> u64 {
    15
}
fn default_high_speed_queue_size() -> u32 {
    5
}
fn default_low_speed_interval_seconds() -> u64 {
    3
}
fn default_interval_jitter_ms() -> u64 {
    500
}

impl ConfigSnapshot {
    /// Loads and validates a TOML config file. Never panics; every failure
    /// mode, including an unwritable `output_dir`, surfaces as a typed
    /// [`ConfigError`] the caller turns into the `config` error kind (§7).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let snapshot: ConfigSnapshot =
            toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.user_id.trim().is_empty() {
            return Err(ConfigError::Invalid("user_id must not be empty".into()));
        }
        if self.refresh_token.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "refresh_token must not be empty".into(),
            ));
        }
        std::fs::create_dir_all(&self.output_dir).map_err(|source| ConfigError::Read {
            path: self.output_dir.display().to_string(),
            source,
        })?;
        let probe = self.output_dir.join(".write_test");
        std::fs::write(&probe, b"ok").map_err(|_| {
            ConfigError::Invalid(format!(
                "output_dir {} is not writable",
                self.output_dir.display()
            ))
        })?;
        let _ = std::fs::remove_file(&probe);
        Ok(())
    }

    /// `0` means unlimited per-round downloads (an Open Question resolved in
    /// the design notes).
    pub fn max_downloads_is_unlimited(&self) -> bool {
        self.max_downloads == 0
    }

    pub fn img_dir(&self) -> PathBuf {
        self.output_dir.join("img")
    }
    pub fn metadata_dir(&self) -> PathBuf {
        self.output_dir.join("metadata")
    }
    pub fn data_dir(&self) -> PathBuf {
        self.output_dir.join("data")
    }
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("pixiv.db")
    }
    pub fn queue_path(&self) -> PathBuf {
        self.data_dir().join("task_queue.json")
    }
    pub fn cursor_path(&self) -> PathBuf {
        self.data_dir().join("scan_cursor.json")
    }
    pub fn status_path(&self) -> PathBuf {
        self.data_dir().join("status.json")
    }
    pub fn last_run_path(&self) -> PathBuf {
        self.data_dir().join("last_run.txt")
    }
    pub fn force_run_flag_path(&self) -> PathBuf {
        self.data_dir().join("force_run.flag")
    }
    pub fn token_path(&self) -> PathBuf {
        self.data_dir().join("token.json")
    }
}
