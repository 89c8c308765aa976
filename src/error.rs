//! Error types for the blockwise kernel pipeline

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KmatrixError>;

#[derive(Error, Debug)]
pub enum KmatrixError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to load record '{path}': {reason}")]
    RecordLoad { path: String, reason: String },

    #[error("Similarity computation failed: {0}")]
    SimilarityComputation(String),

    #[error("Missing block ({i}, {j}): not found in the block store")]
    MissingBlock { i: usize, j: usize },

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Glob pattern error: {0}")]
    Pattern(#[from] glob::PatternError),
}
