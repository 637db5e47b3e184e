//! Error taxonomy for the stockroom core.
//!
//! Transient failures and authoritative rejections on the write path are
//! reported as tagged outcomes (`SubmitOutcome`), not as errors. What ends up
//! in `StockError` is either a pre-flight validation failure, a collection
//! that could not be loaded from anywhere, or local plumbing trouble.

use thiserror::Error;

use crate::models::EntityKind;

/// Why a remote round trip produced nothing usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Transient {
    #[error("remote call timed out after {0} ms")]
    Timeout(u64),

    #[error("remote call failed: {0}")]
    Remote(String),

    #[error("remote returned an empty collection")]
    Empty,
}

#[derive(Debug, Error)]
pub enum StockError {
    #[error(transparent)]
    Transient(#[from] Transient),

    /// Pre-flight rejection; nothing was sent to the remote store.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The remote store received the request and said no.
    #[error("rejected by remote store: {0}")]
    Rejected(String),

    #[error("{entity} unavailable: no cached copy and {reason}")]
    Unrecoverable {
        entity: EntityKind,
        reason: Transient,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StockError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

pub type Result<T, E = StockError> = std::result::Result<T, E>;
