//! Errors raised while loading or saving scenes.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or writing scene data.
#[derive(Error, Debug)]
pub enum SceneError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to load mesh {path:?}: {source}")]
    Mesh {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },

    #[error("mesh object {0} has no source file")]
    MissingMeshSource(u64),
}

/// Result type for scene operations.
pub type SceneResult<T> = Result<T, SceneError>;
