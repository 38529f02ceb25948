//! Closed error taxonomy for the sync engine.
//!
//! Every failure that crosses a component boundary is one of these kinds.
//! The enum drives three decisions: whether the rate gate retries
//! ([`SyncError::is_retryable`]), what gets written to the `sync_errors`
//! table ([`SyncError::kind`]), and how a job run terminates.

use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Upstream throttled the request (HTTP 429 or provider-specific signal).
    #[error("upstream rate limited")]
    RateLimited,

    /// Transport failure, 5xx, or timeout talking to the upstream feed.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A required column or field disappeared from an upstream payload.
    #[error("upstream schema drift: {0}")]
    SchemaDrift(String),

    /// Rows failed domain validation. Counted per batch, raised only when
    /// rejection is excessive enough to indicate an upstream change.
    #[error("validation rejected: {0}")]
    ValidationRejected(String),

    /// Constraint or schema failure in the store. Carries the index of the
    /// first failed chunk so callers can report partial progress.
    #[error("write conflict in chunk {chunk}: {message}")]
    WriteConflict { chunk: usize, message: String },

    /// The job's cancel signal fired and the syncer observed it.
    #[error("cancelled")]
    Cancelled,

    /// The per-call total deadline elapsed before the operation finished.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A recognized environment variable failed to parse.
    #[error("config error: {0}")]
    ConfigError(String),

    /// Upstream answered successfully but with no rows.
    #[error("upstream returned no data")]
    Empty,

    #[error("{0}")]
    Unknown(String),
}

impl SyncError {
    /// Stable tag persisted in the `sync_errors` table.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::RateLimited => "RateLimited",
            SyncError::UpstreamUnavailable(_) => "UpstreamUnavailable",
            SyncError::SchemaDrift(_) => "SchemaDrift",
            SyncError::ValidationRejected(_) => "ValidationRejected",
            SyncError::WriteConflict { .. } => "WriteConflict",
            SyncError::Cancelled => "Cancelled",
            SyncError::DeadlineExceeded => "DeadlineExceeded",
            SyncError::ConfigError(_) => "ConfigError",
            SyncError::Empty => "Empty",
            SyncError::Unknown(_) => "Unknown",
        }
    }

    /// Only throttling and availability failures are worth another attempt;
    /// everything else re-raises immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::RateLimited | SyncError::UpstreamUnavailable(_)
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            SyncError::UpstreamUnavailable(e.to_string())
        } else if e.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            SyncError::RateLimited
        } else {
            SyncError::Unknown(e.to_string())
        }
    }
}

impl From<polars::prelude::PolarsError> for SyncError {
    fn from(e: polars::prelude::PolarsError) -> Self {
        SyncError::Unknown(e.to_string())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                SyncError::WriteConflict {
                    chunk: 0,
                    message: e.to_string(),
                }
            }
            _ => SyncError::Unknown(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(SyncError::RateLimited.is_retryable());
        assert!(SyncError::UpstreamUnavailable("conn reset".into()).is_retryable());
        assert!(!SyncError::SchemaDrift("missing col".into()).is_retryable());
        assert!(!SyncError::Empty.is_retryable());
        assert!(!SyncError::Unknown("boom".into()).is_retryable());
    }

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(SyncError::RateLimited.kind(), "RateLimited");
        assert_eq!(
            SyncError::WriteConflict {
                chunk: 2,
                message: "dup".into()
            }
            .kind(),
            "WriteConflict"
        );
        assert_eq!(SyncError::Cancelled.kind(), "Cancelled");
    }
}
