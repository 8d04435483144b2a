//! Ember Renderer - CPU path tracing render engine.
//!
//! A Monte Carlo path tracer driven by an asynchronous job controller:
//!
//! - **Integrator**: per-pixel deterministic sampling and the stochastic material walk
//! - **Partitioning**: chunk generation and serial / worker-pool / rayon execution
//! - **Acceleration**: flattened `Pod` buffers behind a BVH
//! - **Job controller**: snapshot isolation, dirty-checking and double buffering
//!
//! # Example
//!
//! ```ignore
//! use ember_renderer::RenderJob;
//!
//! let job = RenderJob::new()?;
//! job.set_config(&file.renderer, &file.scene, &file.camera);
//! job.render_single_async();
//! ```

mod bvh;
mod chunk;
mod error;
mod executor;
mod job;
mod query;
mod renderer;
mod sampling;

pub use bvh::{Bvh, BvhNode, FlatScene, GpuSphere, GpuTriangle, LEAF_MAX_SIZE};
pub use chunk::{generate_chunks, grid_dims, render_chunk, shuffle_chunks, Chunk, ChunkResult};
pub use error::RenderError;
pub use executor::{execute, WorkerPool};
pub use job::{DisplaySink, PersistenceSink, RenderJob, Snapshot, SnapshotHashes};
pub use query::{BoxPruned, SceneQuery, World};
pub use renderer::{
    color_to_rgb, id_color, linear_to_gamma, reinhard_extended, render_pixel, sanitize_sample, trace_path, Frame,
};
pub use sampling::{gen_f32, pixel_rng, random_in_unit_disk, random_unit_vector};
