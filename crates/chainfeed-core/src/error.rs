//! Configuration error types.

use thiserror::Error;

/// Invalid receiver configuration. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field} URL '{url}': {reason}")]
    InvalidUrl {
        field: &'static str,
        url: String,
        reason: String,
    },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{0}")]
    Other(String),
}
