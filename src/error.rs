//! Error types shared across the crate
use ndarray::ShapeError;
use ndarray_stats::errors::MinMaxError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PropGenError>;

#[derive(Debug, Error)]
pub enum PropGenError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),

    #[error("{context}: expected {expected} values, found {found}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("malformed dataset {path}: {reason}")]
    Dataset { path: PathBuf, reason: String },

    #[error("label {label} is out of range for {num_classes} classes")]
    LabelOutOfRange { label: usize, num_classes: usize },

    #[error("target label {0} equals the true label")]
    TargetIsTrueLabel(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("image value {value} at feature {index} lies outside [{lower}, {upper}]")]
    ImageOutOfRange {
        index: usize,
        value: f64,
        lower: f64,
        upper: f64,
    },

    #[error("cannot parse epsilon {0:?}")]
    Epsilon(String),

    #[error("class scores cannot be ranked: {0}")]
    Scores(#[from] MinMaxError),
}

impl PropGenError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
