use thiserror::Error;

pub type Result<T> = std::result::Result<T, MixtureError>;

/// Failures are either setup-time configuration errors or contract violations
/// on the shapes of the tensors handed in by the caller. None of them is retried.
#[derive(Debug, Error)]
pub enum MixtureError {

    /// A mixture needs at least one classifier head.
    #[error("a mixture requires at least one classifier")]
    NoClassifiers,

    #[error("expected {expected} classifier outputs, got {actual}")]
    ClassifierCount { expected : usize, actual : usize },

    /// Shapes are (rows, columns).
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch { expected : (usize, usize), actual : (usize, usize) },

    #[error("got {actual} labels for a batch of {expected} rows")]
    LabelCount { expected : usize, actual : usize },

    #[error("label {label} out of range for {nclasses} classes")]
    LabelOutOfRange { label : usize, nclasses : usize },

    /// update_switch or classifiers_predictions was called without features
    /// before any forward pass.
    #[error("no cached classifier predictions; run forward first")]
    EmptyCache,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

}
