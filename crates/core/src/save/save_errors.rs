//! Save coordination error types.
//!
//! Writer failures and timeouts are reported through `SaveResult`. These
//! errors cover the cases where a caller's operation never reached a writer
//! settlement at all.

use thiserror::Error;

/// Errors returned to `save` callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SaveError {
    /// The queued operation was cancelled via `cancel_pending`.
    #[error("Pending save for '{resource_id}' was cancelled")]
    Cancelled { resource_id: String },

    /// The coordinator was shut down before the operation ran.
    #[error("Save coordinator is shut down")]
    ShutDown,

    /// The operation was dropped without a settlement.
    #[error("Save for '{resource_id}' was dropped before it settled")]
    Dropped { resource_id: String },
}

impl SaveError {
    /// Creates a Cancelled error.
    pub fn cancelled(resource_id: impl Into<String>) -> Self {
        Self::Cancelled {
            resource_id: resource_id.into(),
        }
    }

    /// Creates a Dropped error.
    pub fn dropped(resource_id: impl Into<String>) -> Self {
        Self::Dropped {
            resource_id: resource_id.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SaveError::cancelled("svc-1");
        assert_eq!(err.to_string(), "Pending save for 'svc-1' was cancelled");
        assert!(err.is_cancelled());

        let err = SaveError::dropped("svc-2");
        assert_eq!(
            err.to_string(),
            "Save for 'svc-2' was dropped before it settled"
        );
        assert!(!err.is_cancelled());

        assert_eq!(SaveError::ShutDown.to_string(), "Save coordinator is shut down");
    }
}
