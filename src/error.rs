use thiserror::Error;

#[derive(Error, Debug)]
pub enum MsaError {
    #[error("Invalid mask: {0}")]
    InvalidMask(String),

    #[error("Invalid --step specification '{spec}': {reason}")]
    InvalidRangeSpec { spec: String, reason: String },

    #[error("Decomposition failed: {0}")]
    DecompositionFailed(String),

    #[error("Unknown mode '{0}'. Must be one of: pca, fastica, lda")]
    UnknownMode(String),

    #[error("Invalid similarity matrix: {0}")]
    InvalidSimilarityMatrix(String),

    #[error("Geometry mismatch: expected {expected:?}, found {found:?}")]
    GeometryMismatch {
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },

    #[error("Image index {index} out of range for {path} ({count} images)")]
    IndexOutOfRange {
        path: String,
        index: usize,
        count: usize,
    },

    #[error("Stack format error: {0}")]
    Format(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl MsaError {
    pub(crate) fn range_spec(spec: &str, reason: impl Into<String>) -> Self {
        MsaError::InvalidRangeSpec {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MsaError>;
