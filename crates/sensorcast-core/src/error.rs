//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur while building domain values from configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Sensor name is empty or contains a reserved character
    #[error("Invalid sensor name '{name}': {reason}")]
    InvalidSensorName { name: String, reason: String },

    /// Sensor spec does not have the `sensors:path:decoder` shape
    #[error("Malformed sensor spec '{spec}': {reason}")]
    MalformedSpec { spec: String, reason: String },

    /// Decoder kind is not one of the built-in decoders
    #[error("Unknown decoder '{name}' (expected one of: {expected})")]
    UnknownDecoder { name: String, expected: String },

    /// The decoder produces fewer readings per unit than the sensor spec lists sensors
    #[error("Decoder '{decoder}' yields {arity} reading(s) per unit but spec lists {sensors} sensors")]
    DecoderArity {
        decoder: String,
        arity: usize,
        sensors: usize,
    },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
