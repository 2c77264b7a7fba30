//! # Error Types
//!
//! Custom error types for Shadow Uplink using `thiserror`.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Shadow Uplink
#[derive(Debug, Error)]
pub enum UplinkError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shadow document serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A queued record violates the line format (fewer than 3 tokens)
    #[error(
        "Malformed record {path:?} at line {line}: expected at least 3 fields, found {tokens}"
    )]
    DataFormat {
        path: PathBuf,
        line: usize,
        tokens: usize,
    },

    /// A queued record is not valid UTF-8 text
    #[error("Malformed record {path:?}: body is not valid UTF-8")]
    Encoding { path: PathBuf },

    /// The channel is offline and cannot buffer outbound updates
    #[error("Telemetry channel disabled: offline request queue unavailable")]
    ChannelDisabled,

    /// Any other telemetry channel failure
    #[error("Telemetry channel error: {0}")]
    Channel(String),
}

impl UplinkError {
    /// Whether this error means the queue holds data the worker cannot process
    /// without operator intervention.
    pub fn is_data_format(&self) -> bool {
        matches!(
            self,
            UplinkError::DataFormat { .. } | UplinkError::Encoding { .. }
        )
    }
}

/// Result type alias for Shadow Uplink
pub type Result<T> = std::result::Result<T, UplinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_format_message() {
        let err = UplinkError::DataFormat {
            path: PathBuf::from("data/1670000000.txt"),
            line: 3,
            tokens: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("1670000000.txt"));
        assert!(msg.contains("line 3"));
        assert!(msg.contains("found 2"));
        assert!(err.is_data_format());
    }

    #[test]
    fn test_encoding_is_data_format() {
        let err = UplinkError::Encoding {
            path: PathBuf::from("data/1.txt"),
        };
        assert!(err.to_string().contains("not valid UTF-8"));
        assert!(err.is_data_format());
    }

    #[test]
    fn test_channel_disabled_is_not_data_format() {
        assert!(!UplinkError::ChannelDisabled.is_data_format());
        assert!(!UplinkError::Channel("boom".into()).is_data_format());
    }
}
