use thiserror::Error;

/// Failures at the crate boundary: reading inputs, parsing config, validating requests.
///
/// The numeric core never returns these; insufficient historical data is reported
/// through [`crate::historical::InsufficientData`] instead.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid compound code: {0:?}")]
    InvalidCompound(String),

    #[error("unknown weather condition: {0:?} (expected dry, damp, wet or extreme)")]
    InvalidCondition(String),

    #[error("{field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
}

pub type Result<T> = std::result::Result<T, PlannerError>;
