//! Error type shared by every stage of the prefilter.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PrefilterError>;

#[derive(Debug, Error)]
/// Errors returned by table building, encoding, matching and output.
pub enum PrefilterError {
    /// Opening, mapping, reading or writing a file failed.
    #[error("I/O error on {}: {source}", path.display())]
    File {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// I/O error without an associated path (in-memory sinks, flushes).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A table or index file does not have the expected layout.
    #[error("Invalid table file: {0}")]
    Format(String),
    /// Bytemuck cast failed (size or alignment of a mapped region).
    #[error("Cast error: {0}")]
    Cast(String),
    /// Rejected configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// More records were claimed than the counting pass allowed for.
    #[error("record cursor {claimed} exceeds pre-computed capacity {capacity}")]
    Capacity {
        /// Cursor value after the offending claim (or at the barrier).
        claimed: usize,
        /// Exact record count computed by the counting pass.
        capacity: usize,
    },
    /// The delta encoder was fed input it cannot represent.
    #[error("Encoding error: {0}")]
    Encoding(String),
    /// A sequence record is unusable.
    #[error("Invalid sequence record: {0}")]
    Data(String),
    /// The worker pool could not be created.
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl PrefilterError {
    /// Attach a path to an I/O error.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PrefilterError::File {
            path: path.into(),
            source,
        }
    }
}
