/// Error types for recall-engine operations.
///
/// This module provides the error hierarchy shared by every component. All
/// fallible operations return `Result<T, RecallError>` so callers can
/// pattern-match on failure kinds instead of parsing error strings.
use thiserror::Error;

/// The unified error type for recall-engine operations.
///
/// Each index or store is independently resilient: a failure inside one
/// index update during `Engine::add` is logged and does not roll back
/// successful updates already applied to other indexes, because the
/// canonical item is already durable in `VolumeStore` by the time any
/// secondary index runs.
#[derive(Error, Debug)]
pub enum RecallError {
    /// Disk fault, locked file, or corrupted snapshot. Fatal for the
    /// operation that raised it; the engine remains usable for other scopes.
    #[error("io error: {0}")]
    Io(String),

    /// A snapshot or WAL was unreadable beyond recovery. Callers proceed
    /// with the most-recent-consistent state; a background reconciliation
    /// task can rebuild the missing entries from `VolumeStore`.
    #[error("index corruption in {index}: {reason}")]
    IndexCorruption {
        /// Name of the index/store that detected corruption.
        index: String,
        /// Human-readable description of what was wrong.
        reason: String,
    },

    /// A language-model operation was refused by the `BudgetManager`.
    /// Non-fatal: callers degrade to a cheaper path (extraction falls back
    /// to RULES, retrieval skips the `LlmFilter` stage, and so on).
    #[error("budget exceeded for operation '{operation}': {reason}")]
    BudgetExceeded {
        /// The operation that was refused (e.g. "extraction", "rerank").
        operation: String,
        /// Why the budget check failed.
        reason: String,
    },

    /// The remote provider returned HTTP 429 and retries were exhausted.
    #[error("rate limited by provider after {attempts} attempts")]
    RateLimited {
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// Caller attempted to mutate a protected scope (e.g. clearing the
    /// `default` tenant without `confirm=true`).
    #[error("scope denied: {reason}")]
    ScopeDenied {
        /// Why the scope operation was denied.
        reason: String,
    },

    /// `get`/`update`/`delete` on an unknown id. Never raised as a panic;
    /// handlers turn this into `{success: false, message}` at the boundary.
    #[error("not found: {what} '{id}'")]
    NotFound {
        /// What kind of entity was not found (item, entity, episode, ...).
        what: String,
        /// The id that was looked up.
        id: String,
    },

    /// Malformed request body or missing required field.
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<std::io::Error> for RecallError {
    fn from(err: std::io::Error) -> Self {
        RecallError::Io(err.to_string())
    }
}

/// Result type alias used throughout the crate.
pub type RecallResult<T> = Result<T, RecallError>;
