use thiserror::Error;

/// Error type for invalid inputs, parameters and configuration.
///
/// Numeric domain problems inside a single period are never reported through this type;
/// they are absorbed by the guarded helpers in [`crate::numerics`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PemcafeError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),
    #[error("Malformed input: required field `{field}` is missing (record {record})")]
    MissingField { field: String, record: usize },
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl PemcafeError {
    /// True for errors raised while reading measurement records.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            PemcafeError::MalformedInput(_) | PemcafeError::MissingField { .. }
        )
    }
}

/// Convenience type for `Result<T, PemcafeError>`.
pub type PemcafeResult<T> = Result<T, PemcafeError>;
