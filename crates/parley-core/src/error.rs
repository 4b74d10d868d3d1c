//! Error types for Parley.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A single violated input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Name of the offending field.
    pub field: &'static str,
    /// Human readable reason.
    pub message: String,
}

/// Every field violation found while validating one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a violation.
    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// All recorded violations, in the order found.
    #[must_use]
    pub fn fields(&self) -> &[FieldError] {
        &self.0
    }

    /// Whether `field` was flagged.
    #[must_use]
    pub fn has(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    /// `Ok(())` if empty, otherwise `Err(self)`.
    ///
    /// # Errors
    ///
    /// Returns the collected violations if there is at least one.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", e.field, e.message)?;
        }
        Ok(())
    }
}

/// Failures reported by a [`Store`](crate::store::Store).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not be reached; the operation was not applied.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The operation did not complete in time; it may or may not have been applied.
    #[error("Store operation timed out after {0:?}")]
    TimedOut(Duration),
}

/// Errors returned by the presence and messaging operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Participant name failed validation.
    #[error("Invalid name: {0}")]
    InvalidName(ValidationErrors),

    /// A live participant already uses this name.
    #[error("Name already taken: {0}")]
    NameTaken(String),

    /// No live participant with this name.
    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    /// Message fields failed validation.
    #[error("Invalid message: {0}")]
    InvalidMessage(ValidationErrors),

    /// Sender is not an active participant.
    #[error("Unknown sender: {0}")]
    UnknownSender(String),

    /// Private recipient is not an active participant.
    #[error("Unknown recipient: {0}")]
    UnknownRecipient(String),

    /// History limit below one.
    #[error("Invalid limit: {0} (must be at least 1)")]
    InvalidLimit(i64),

    /// The backing store failed or timed out.
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
}

impl RelayError {
    /// Short stable label, used for metrics and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidName(_) => "invalid_name",
            Self::NameTaken(_) => "name_taken",
            Self::UnknownParticipant(_) => "unknown_participant",
            Self::InvalidMessage(_) => "invalid_message",
            Self::UnknownSender(_) => "unknown_sender",
            Self::UnknownRecipient(_) => "unknown_recipient",
            Self::InvalidLimit(_) => "invalid_limit",
            Self::StoreUnavailable(_) => "store_unavailable",
        }
    }

    /// Field level details, empty for non-validation errors.
    #[must_use]
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::InvalidName(errors) | Self::InvalidMessage(errors) => errors.fields(),
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_display() {
        let mut errors = ValidationErrors::new();
        errors.push("to", "must not be empty");
        errors.push("text", "must not be empty");

        assert!(errors.has("to"));
        assert!(!errors.has("type"));
        assert_eq!(
            errors.to_string(),
            "to: must not be empty; text: must not be empty"
        );
    }

    #[test]
    fn test_store_error_converts() {
        let err: RelayError = StoreError::Unavailable("down".into()).into();
        assert_eq!(err.kind(), "store_unavailable");
        assert!(err.field_errors().is_empty());
    }
}
