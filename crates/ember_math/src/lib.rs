//! Ember math - vectors, rays, intervals and bounding boxes.
//!
//! Vector types come straight from glam; this crate only adds the
//! ray tracing specific types on top.

// Re-export glam for convenience
pub use glam::*;

mod aabb;
mod interval;
mod ray;

pub use aabb::Aabb;
pub use interval::Interval;
pub use ray::Ray;

/// Padding applied to degenerate (zero-thickness) box axes.
pub const BOX_EPSILON: f32 = 0.0001;
