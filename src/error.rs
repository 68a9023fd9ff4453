//! Error taxonomy for the tracking core.

use thiserror::Error;
use uuid::Uuid;

use crate::storage::database::{is_busy, DatabaseError};

/// Errors raised by the write and read paths.
#[derive(Debug, Error)]
pub enum TrackingError {
    /// The request can never succeed as sent.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced rider, device, group or context does not exist.
    #[error("Unknown {kind}: {id}")]
    UnknownEntity { kind: &'static str, id: Uuid },

    /// Lock or transaction conflict; the whole unit may be retried.
    #[error("Contention: {0}")]
    Contention(String),

    /// Contention outlasted the retry budget.
    #[error("Gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<TrackingError>,
    },

    /// Stored state contradicts itself; only the affected context is skipped.
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    #[error("Cycle detected in group hierarchy at {0}")]
    CycleDetected(Uuid),

    #[error("Achievement {0} was already redeemed")]
    AlreadyRedeemed(Uuid),

    #[error(transparent)]
    Database(DatabaseError),
}

impl TrackingError {
    /// Whether upstream may resend the same measurement later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrackingError::Contention(_) | TrackingError::RetriesExhausted { .. }
        ) || matches!(self, TrackingError::Database(DatabaseError::Busy(_)))
    }

    /// Whether the request is permanently invalid.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TrackingError::Validation(_)
                | TrackingError::UnknownEntity { .. }
                | TrackingError::CycleDetected(_)
                | TrackingError::AlreadyRedeemed(_)
        )
    }

    /// Contention that a retry loop should absorb.
    pub(crate) fn is_contention(&self) -> bool {
        matches!(self, TrackingError::Contention(_))
            || matches!(self, TrackingError::Database(DatabaseError::Busy(_)))
    }
}

impl From<DatabaseError> for TrackingError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Busy(msg) => TrackingError::Contention(msg),
            other => TrackingError::Database(other),
        }
    }
}

impl From<rusqlite::Error> for TrackingError {
    fn from(err: rusqlite::Error) -> Self {
        if is_busy(&err) {
            return TrackingError::Contention(err.to_string());
        }
        TrackingError::Database(DatabaseError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_sqlite_error_is_contention() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            Some("database table is locked".to_string()),
        );
        let err = TrackingError::from(busy);
        assert!(matches!(err, TrackingError::Contention(_)));
        assert!(err.is_retryable());
        assert!(!err.is_validation());
    }

    #[test]
    fn test_exhausted_is_retryable_but_distinct() {
        let err = TrackingError::RetriesExhausted {
            attempts: 5,
            source: Box::new(TrackingError::Contention("busy".to_string())),
        };
        assert!(err.is_retryable());
        assert!(!err.is_contention());
        assert!(err.to_string().contains("5 attempts"));
    }

    #[test]
    fn test_validation_classes() {
        let id = Uuid::new_v4();
        assert!(TrackingError::UnknownEntity { kind: "rider", id }.is_validation());
        assert!(TrackingError::Validation("delta".to_string()).is_validation());
        assert!(!TrackingError::InconsistentState("x".to_string()).is_validation());
    }
}
