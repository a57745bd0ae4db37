//! Error type for Task Queue operations (C4).

use thiserror::Error;

use crate::atomic_write::AtomicWriteError;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue item not found: illust_id {0}")]
    ItemNotFound(i64),

    #[error("failed to persist task queue: {0}")]
    Persist(#[from] AtomicWriteError),
}
