//! Validation Error Types

use thiserror::Error;

/// Errors during payload normalization and range checking
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// None of the known aliases carried a usable value
    #[error("No canonical value found for {data_type}")]
    NoCanonicalValue { data_type: String },

    /// Value out of the physiological range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}
