//! Key error model.

use thiserror::Error;

/// Result type used when building or parsing keys.
pub type KeyResult<T> = Result<T, KeyError>;

/// Failure to build a [`QualifiedName`](crate::QualifiedName).
///
/// Keys double as backoff and delivery identifiers, so anything that would
/// make the canonical string form ambiguous is rejected up front.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The object name was empty.
    #[error("name must not be empty")]
    EmptyName,

    /// A namespace or name contained the `/` separator.
    #[error("{field} must not contain '/': {value:?}")]
    Separator { field: &'static str, value: String },

    /// The string form could not be parsed.
    #[error("malformed qualified name: {0:?}")]
    Malformed(String),
}

impl KeyError {
    pub fn separator(field: &'static str, value: impl Into<String>) -> Self {
        Self::Separator {
            field,
            value: value.into(),
        }
    }

    pub fn malformed(value: impl Into<String>) -> Self {
        Self::Malformed(value.into())
    }
}
