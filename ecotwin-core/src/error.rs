//! Errors surfaced by the twin core.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A reading was negative or not a finite number. Nothing was mutated.
    #[error("invalid value for {field}: {value} (must be a finite number >= 0)")]
    InvalidValue { field: &'static str, value: f64 },

    /// A scenario factor was negative or not a finite number. Nothing was recorded.
    #[error("invalid scenario factor {factor}: {value} (must be a finite number >= 0)")]
    InvalidFactor { factor: &'static str, value: f64 },

    /// The history backend could not be read or rejected a write.
    #[error("history storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Raised by prediction strategies; relayed unchanged by the core.
    #[error("insufficient history: need {required} samples, have {available}")]
    InsufficientHistory { required: usize, available: usize },
}

impl Error {
    pub(crate) fn storage(e: impl std::fmt::Display) -> Self {
        Error::StorageUnavailable(e.to_string())
    }
}

pub(crate) fn ensure_reading(field: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(Error::InvalidValue { field, value })
    }
}

pub(crate) fn ensure_factor(factor: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(Error::InvalidFactor { factor, value })
    }
}
