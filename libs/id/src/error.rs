//! Error types for name parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating names and keys.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    /// The name is empty.
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    /// The name exceeds the maximum length.
    #[error("{kind} '{value}' is longer than {max} characters")]
    TooLong {
        kind: &'static str,
        value: String,
        max: usize,
    },

    /// The name contains a character outside `[a-z0-9.-]`.
    #[error("{kind} '{value}' contains invalid character '{character}'")]
    InvalidCharacter {
        kind: &'static str,
        value: String,
        character: char,
    },

    /// The name does not start and end with an alphanumeric character.
    #[error("{kind} '{value}' must start and end with an alphanumeric character")]
    InvalidBoundary { kind: &'static str, value: String },

    /// A reconciliation key is missing the `/` separator.
    #[error("key '{0}' missing '/' separator")]
    MissingSeparator(String),

    /// A derived name is missing the required prefix.
    #[error("derived name missing prefix: expected '{expected}', got '{actual}'")]
    MissingPrefix {
        expected: &'static str,
        actual: String,
    },

    /// The input format is invalid.
    #[error("invalid format: {message}")]
    InvalidFormat { message: String },
}

impl NameError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, NameError::Empty { .. })
    }

    /// Returns true if the input was not shaped like a key or derived name.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            NameError::MissingSeparator(_)
                | NameError::MissingPrefix { .. }
                | NameError::InvalidFormat { .. }
        )
    }
}
