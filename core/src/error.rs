use std::time::Duration;

use serde::Serialize;
use store_api::StoreError;
use thiserror::Error;

/// Failures surfaced by sweeper operations.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("retention window {0:?} reaches before the supported date range")]
    InvalidWindow(Duration),

    #[error("sweeper has been disposed")]
    Disposed,

    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Coarse classification used by logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Expected to clear up on the next scheduled sweep.
    Transient,
    StoreUnavailable,
    MalformedData,
    Internal,
}

impl ErrorKind {
    pub fn self_heals(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

impl SweepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SweepError::Timeout(_) => ErrorKind::Transient,
            SweepError::Store(err) => match err {
                StoreError::Transient(_) | StoreError::NotFound(_) => ErrorKind::Transient,
                StoreError::Unavailable(_) | StoreError::Io(_) => ErrorKind::StoreUnavailable,
                StoreError::InvalidQuery(_)
                | StoreError::BatchTooLarge { .. }
                | StoreError::Serialization(_) => ErrorKind::MalformedData,
            },
            SweepError::InvalidWindow(_) | SweepError::Disposed | SweepError::Panicked(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Result type for sweeper operations.
pub type SweepResult<T> = std::result::Result<T, SweepError>;

#[cfg(test)]
mod tests {
    use super::*;
    use store_api::DocRef;

    #[test]
    fn classification() {
        assert_eq!(
            SweepError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            SweepError::from(StoreError::NotFound(DocRef::new("clubs", "c1"))).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            SweepError::from(StoreError::Unavailable("down".into())).kind(),
            ErrorKind::StoreUnavailable
        );
        assert_eq!(
            SweepError::from(StoreError::BatchTooLarge { size: 600, limit: 500 }).kind(),
            ErrorKind::MalformedData
        );
        assert_eq!(SweepError::Disposed.kind(), ErrorKind::Internal);
        assert_eq!(
            SweepError::InvalidWindow(Duration::MAX).kind(),
            ErrorKind::Internal
        );
        assert!(ErrorKind::Transient.self_heals());
        assert!(!ErrorKind::StoreUnavailable.self_heals());
    }

    #[test]
    fn store_errors_display_transparently() {
        let err = SweepError::from(StoreError::NotFound(DocRef::new("clubs", "c1")));
        assert_eq!(err.to_string(), "document not found: clubs/c1");
    }
}
