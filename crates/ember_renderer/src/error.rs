//! Render job errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors a render pass or the job controller can report.
///
/// A failed pass leaves the front buffer as it was.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("no snapshot: call set_config before rendering")]
    MissingSnapshot,

    #[error("BVH backend selected but the scene has no triangles or spheres")]
    EmptyBvhInput,

    #[error("a render is already in flight")]
    Busy,

    #[error("failed to spawn render thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("render worker thread is gone")]
    WorkerGone,

    #[error("failed to save {path:?}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
