//! Error taxonomy shared by the engines and the HTTP surface.

use crate::codec::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Failed to parse request: {0}")]
    Parse(String),

    #[error("Could not acquire lock after {0}ms, try again later")]
    LockUnavailable(u64),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("{0}")]
    Internal(String),
}

impl TrackerError {
    /// Stable machine-readable kind reported to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            TrackerError::InvalidAction(_) => "invalid_action",
            TrackerError::Parse(_) => "parse_error",
            TrackerError::LockUnavailable(_) => "lock_unavailable",
            TrackerError::Codec(_) | TrackerError::Store(_) | TrackerError::Internal(_) => {
                "generic_internal"
            }
        }
    }

    /// Whether the caller may retry the same request later unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TrackerError::LockUnavailable(_))
    }
}

impl From<rusqlite::Error> for TrackerError {
    fn from(e: rusqlite::Error) -> Self {
        TrackerError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(e: serde_json::Error) -> Self {
        TrackerError::Internal(format!("JSON error: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_wire_names() {
        assert_eq!(TrackerError::InvalidAction("x".into()).kind(), "invalid_action");
        assert_eq!(TrackerError::Parse("x".into()).kind(), "parse_error");
        assert_eq!(TrackerError::LockUnavailable(5000).kind(), "lock_unavailable");
        assert_eq!(TrackerError::Store("disk".into()).kind(), "generic_internal");
        assert_eq!(
            TrackerError::Codec(CodecError::NonNumericTag("abc".into())).kind(),
            "generic_internal"
        );
    }

    #[test]
    fn only_lock_contention_is_retryable() {
        assert!(TrackerError::LockUnavailable(10).is_retryable());
        assert!(!TrackerError::Internal("boom".into()).is_retryable());
        assert!(!TrackerError::Parse("bad".into()).is_retryable());
    }
}
