//! Codec errors for value encoding and decoding
//!
//! Every variant carries enough context to tell a malformed wire payload apart
//! from a caller handing the encoder something it cannot represent.

use thiserror::Error;

/// Errors raised while encoding or decoding values
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// Input bytes are not a valid encoding
    #[error("Decode error at byte {offset}: {reason}")]
    Decode { offset: usize, reason: String },

    /// Value has no base encoding and no plugin accepted it
    #[error("Unsupported type '{type_name}': no codec plugin can encode it")]
    UnsupportedType { type_name: String },

    /// Typed buffer fields are inconsistent (length vs shape, unknown dtype, ...)
    #[error("Invalid typed buffer: {reason}")]
    InvalidBuffer { reason: String },

    /// Buffer was read back as an element type it does not hold
    #[error("DType mismatch: expected {expected}, buffer holds {actual}")]
    DTypeMismatch { expected: String, actual: String },

    /// Value nests deeper than the encoding can carry back
    #[error("Value nests deeper than {limit} levels")]
    TooDeep { limit: usize },

    /// A codec plugin failed to encode or restore its payload
    #[error("Plugin '{plugin}' failed: {reason}")]
    Plugin { plugin: String, reason: String },
}

impl CodecError {
    /// Create a decode error with the failing byte offset
    pub fn decode(offset: usize, reason: impl Into<String>) -> Self {
        Self::Decode {
            offset,
            reason: reason.into(),
        }
    }

    /// Create an unsupported type error
    pub fn unsupported_type(type_name: impl Into<String>) -> Self {
        Self::UnsupportedType {
            type_name: type_name.into(),
        }
    }

    /// Create an invalid buffer error
    pub fn invalid_buffer(reason: impl Into<String>) -> Self {
        Self::InvalidBuffer {
            reason: reason.into(),
        }
    }

    /// Create a plugin failure
    pub fn plugin(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Plugin {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }

    /// True when the failure came from the wire side rather than the caller
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            CodecError::Decode { .. } | CodecError::InvalidBuffer { .. }
        )
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        // serde_json reports line/column; the payload is single-line so column is the offset
        CodecError::decode(err.column().saturating_sub(1), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(CodecError::decode(3, "bad").is_decode_error());
        assert!(CodecError::invalid_buffer("short").is_decode_error());
        assert!(!CodecError::unsupported_type("Foo").is_decode_error());
    }

    #[test]
    fn test_error_formatting() {
        let err = CodecError::unsupported_type("my_crate::Widget");
        assert_eq!(
            err.to_string(),
            "Unsupported type 'my_crate::Widget': no codec plugin can encode it"
        );

        let err = CodecError::decode(7, "expected value");
        assert!(err.to_string().contains("byte 7"));
    }

    #[test]
    fn test_from_serde_json() {
        let err: CodecError = serde_json::from_str::<serde_json::Value>("{\"a\": }")
            .unwrap_err()
            .into();
        assert!(matches!(err, CodecError::Decode { .. }));
    }
}
