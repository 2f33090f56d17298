//! Error types for sp500-core.

use thiserror::Error;

/// Rejected user input: a subscriber address or request body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("email must not be empty")]
    EmptyEmail,

    #[error("email is {len} characters long; at most 254 are allowed")]
    EmailTooLong { len: usize },

    #[error("invalid email '{email}': {reason}")]
    MalformedEmail { email: String, reason: &'static str },
}

/// Errors raised while loading [`Config`](crate::config::Config).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable was set to a value that cannot be used.
    #[error("invalid value for {key}: '{value}' ({expected})")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}
