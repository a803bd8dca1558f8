//! Error types for type-vocabulary operations

/// Result type for type-vocabulary operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when manipulating types and values
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum Error {
    /// A value does not match the element type of its destination
    #[error("value type mismatch: expected {expected}, got {actual}")]
    ValueTypeMismatch { expected: String, actual: String },

    /// A reduction operator applied to a scalar kind it does not support
    #[error("reduction {op} unsupported on {kind}")]
    UnsupportedReduction { op: String, kind: String },

    /// Byte buffer too small for the element type it should hold
    #[error("encode buffer too small: need {need} bytes, have {have}")]
    EncodeOverflow { need: usize, have: usize },

    /// Malformed environment variable value
    #[error("invalid value for {var}: {value}")]
    InvalidEnvValue { var: String, value: String },
}
