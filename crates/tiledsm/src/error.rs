use std::path::PathBuf;

use thiserror::Error;

use crate::pool::TaskError;

/// Errors surfaced by a DSM production run.
#[derive(Debug, Error)]
pub enum DsmError {
    /// Nothing to work on: empty region list, or a region of interest
    /// that misses every input pair.
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// An input configuration failed structural validation.
    #[error("invalid configuration {source_name}: {reason}")]
    ConfigurationSchema { source_name: String, reason: String },

    /// Unknown worker-pool mode.
    #[error("unsupported worker pool mode '{0}' (expected 'sequential' or 'local')")]
    UnsupportedMode(String),

    #[error("worker pool: {0}")]
    WorkerPool(String),

    #[error(transparent)]
    Task(#[from] TaskError),

    /// A geometry collaborator (projection, epipolar model) failed.
    #[error("geometry: {0}")]
    Geometry(String),

    /// Delaunay construction over projected grid vertices failed.
    #[error("triangulation of epipolar grid for pair '{pair}': {reason}")]
    Triangulation { pair: String, reason: String },

    #[error("raster: {0}")]
    Raster(String),

    #[error("{}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),
}

impl DsmError {
    pub(crate) fn schema(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigurationSchema {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = DsmError> = std::result::Result<T, E>;
