//! Error types shared across memload crates

use thiserror::Error;

/// Result type alias for memload operations
pub type Result<T> = std::result::Result<T, MemloadError>;

/// Run-level errors: anything that stops a run before or outside per-file processing
#[derive(Error, Debug)]
pub enum MemloadError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid endpoint '{address}': {reason}")]
    InvalidEndpoint { address: String, reason: String },

    #[error("Invalid file pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },
}

impl MemloadError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = MemloadError::InvalidEndpoint {
            address: "localhost".to_string(),
            reason: "missing port".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid endpoint 'localhost': missing port");

        let err = MemloadError::config("workers must be at least 1");
        assert_eq!(err.to_string(), "Configuration error: workers must be at least 1");
    }
}
