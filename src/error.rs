use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the training and evaluation pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A persisted artifact was explicitly requested but does not exist.
    /// The caller must decide whether to retrain from scratch; there is no
    /// automatic fallback.
    #[error("artifact not found: {}", path.display())]
    ArtifactNotFound { path: PathBuf },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("feature dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("cannot compute feature statistics: {0}")]
    Statistics(String),

    /// The classifier's linear system could not be solved.
    #[error("solver failure: {0}")]
    Solver(String),

    /// Fatal failure while training one class's model. Other classes are
    /// unaffected.
    #[error("training failed for class {class}: {reason}")]
    Training { class: usize, reason: String },

    #[error("malformed model data: {0}")]
    ModelFormat(String),
}
