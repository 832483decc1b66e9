//! Error types for the creeper event model.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding or encoding events.
#[derive(Error, Debug)]
pub enum Error {
    /// JSON parsing or encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A field carried a value outside its valid range.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// The event carries no record to decode.
    #[error("event {did}@{time_us} has no record payload")]
    MissingPayload {
        /// Originating account.
        did: String,
        /// Upstream sequence time of the event.
        time_us: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Error Display formatting tests
    // =========================================================================

    #[test]
    fn test_invalid_field_display() {
        let err = Error::InvalidField {
            field: "time_us",
            reason: "out of range".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("time_us"));
        assert!(msg.contains("out of range"));
    }

    #[test]
    fn test_missing_payload_display() {
        let err = Error::MissingPayload {
            did: "did:plc:abc".to_string(),
            time_us: 42,
        };
        let msg = err.to_string();
        assert!(msg.contains("did:plc:abc@42"));
        assert!(msg.contains("no record payload"));
    }

    // =========================================================================
    // Error From conversions
    // =========================================================================

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not valid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
        assert!(err.to_string().contains("JSON error"));
    }

    #[test]
    fn test_result_type_err() {
        let result: Result<i32> = Err(Error::InvalidField {
            field: "did",
            reason: "empty".to_string(),
        });
        assert!(result.is_err());
    }
}
