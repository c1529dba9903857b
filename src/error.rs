use std::{io, path::PathBuf};

use thiserror::Error;

/// Invalid job input. Always fatal, raised before any URL is fetched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("chunk_size must be at least 1, got {0}")]
    InvalidChunkSize(i64),
    #[error("timeout_ms must be at least 1")]
    InvalidTimeout,
    #[error("concurrency must be at least 1")]
    InvalidConcurrency,
    #[error("malformed url '{url}': {reason}")]
    MalformedUrl { url: String, reason: String },
    #[error("invalid {field} selector '{selector}'")]
    InvalidSelector { field: &'static str, selector: String },
    #[error("malformed job input: {0}")]
    MalformedJob(String),
}

/// Errors that abort a whole job.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("page fetcher unavailable: {0}")]
    FetcherUnavailable(String),
    #[error("chunk {index} aborted: {reason}")]
    ChunkAborted { index: usize, reason: String },
    #[error("failed to access '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode or decode '{}': {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}
