//! Durable JSON persistence for the queue, cursor, and status documents.
//!
//! Every writer in the core goes through `write_json`, which never leaves a
//! half-written file at the final path: the new content lands in a temp
//! file in the same directory first, then an atomic rename replaces the
//! target. A reader that opens the target path either sees the previous
//! complete document or the new complete document, never a partial one,
//! which is invariant 6.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtomicWriteError {
    #[error("failed to serialize document for {path}: {source}")]
    Serialize {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write temp file for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Serializes `value` as pretty JSON and atomically replaces `path`.
///
/// The temp file is created alongside `path` (same directory) so the final
/// rename is a same-filesystem operation, which is what makes it atomic on
/// POSIX filesystems.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AtomicWriteError> {
    let path_str = path.display().to_string();
    let body = serde_json::to_vec_pretty(value).map_err(|source| AtomicWriteError::Serialize {
        path: path_str.clone(),
        source,
    })?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|source| AtomicWriteError::Io {
        path: path_str.clone(),
        source,
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| AtomicWriteError::Io {
        path: path_str.clone(),
        source,
    })?;
    use std::io::Write;
    tmp.write_all(&body)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|source| AtomicWriteError::Io {
            path: path_str.clone(),
            source,
        })?;
    tmp.persist(path)
        .map_err(|e| AtomicWriteError::Io {
            path: path_str.clone(),
            source: e.error,
        })?;
    Ok(())
}

/// Reads and deserializes a document written by `write_json`. Returns
/// `Ok(None)` when the file does not exist yet (first run).
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, AtomicWriteError> {
    let path_str = path.display().to_string();
    match std::fs::read(path) {
        Ok(bytes) => {
            let value = serde_json::from_slice(&bytes).map_err(|source| {
                AtomicWriteError::Serialize {
                    path: path_str.clone(),
                    source,
                }
            })?;
            Ok(Some(value))
        }
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(AtomicWriteError::Io {
            path: path_str,
            source,
        }),
    }
}
