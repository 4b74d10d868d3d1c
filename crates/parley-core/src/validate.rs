//! Input validation.
//!
//! Each operation has its own validator. Validators never stop at the first
//! problem: every violated field is reported together.

use crate::error::ValidationErrors;
use crate::message::{MessageKind, BROADCAST};

/// Maximum participant name length, in characters.
pub const MAX_NAME_LENGTH: usize = 64;

/// Maximum message body length, in characters.
pub const MAX_TEXT_LENGTH: usize = 4096;

/// Validate a participant name for `join`.
///
/// # Errors
///
/// Returns every violation found.
pub fn validate_name(name: &str) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    check_name(&mut errors, "name", name);
    if name == BROADCAST {
        errors.push("name", format!("'{BROADCAST}' is reserved"));
    }
    errors.into_result()
}

/// Validate the fields of a message draft, returning the parsed kind.
///
/// Only user kinds (`message`, `private_message`) are accepted.
///
/// # Errors
///
/// Returns every violation found.
pub fn validate_post(
    from: &str,
    to: &str,
    text: &str,
    kind: &str,
) -> Result<MessageKind, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if from.trim().is_empty() {
        errors.push("from", "must not be empty");
    }
    if to.trim().is_empty() {
        errors.push("to", "must not be empty");
    }
    if text.trim().is_empty() {
        errors.push("text", "must not be empty");
    } else if text.chars().count() > MAX_TEXT_LENGTH {
        errors.push("text", format!("must be at most {MAX_TEXT_LENGTH} characters"));
    }

    let parsed = match kind.parse::<MessageKind>() {
        Ok(k) if k != MessageKind::Status => Some(k),
        _ => {
            errors.push("type", "must be one of [message, private_message]");
            None
        }
    };

    match parsed {
        Some(kind) if errors.is_empty() => Ok(kind),
        _ => Err(errors),
    }
}

fn check_name(errors: &mut ValidationErrors, field: &'static str, name: &str) {
    if name.trim().is_empty() {
        errors.push(field, "must not be empty");
        return;
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        errors.push(field, format!("must be at most {MAX_NAME_LENGTH} characters"));
    }
    if name.chars().any(char::is_control) {
        errors.push(field, "must not contain control characters");
    }
}
