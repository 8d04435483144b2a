//! Ember Core - scene and material model for the Ember path tracer.
//!
//! This crate provides:
//!
//! - **Materials**: the unified stochastic `Material` and `MaterialLibrary`
//! - **Hittables**: spheres, axis-aligned rects, static meshes and nested scenes
//! - **Intersection**: per-primitive hit tests and the scene closest-hit scan
//! - **Configuration**: camera and renderer settings, JSON scene files
//!
//! # Example
//!
//! ```ignore
//! use ember_core::{SceneFile, Hit};
//!
//! let mut file = SceneFile::load("scenes/cornell.json")?;
//! file.scene.build_boxes();
//! file.scene.query_lights(file.renderer.environment.enabled);
//! ```

use std::hash::{Hash, Hasher};

use ember_math::Vec3;

pub mod camera;
pub mod error;
pub mod hittable;
pub mod material;
pub mod mesh;
pub mod rect;
pub mod scene;
pub mod scene_file;
pub mod settings;
pub mod sphere;
pub mod triangle;

// Re-export commonly used types
pub use camera::{Camera, CameraConfig};
pub use error::{SceneError, SceneResult};
pub use hittable::{Hit, HitRecord, Hittable, Surface};
pub use material::{Color, Material, MaterialLibrary, MaterialRegistry};
pub use mesh::StaticMesh;
pub use rect::{Rect, Xy, Xz, Yz};
pub use scene::{Scene, MAX_LIGHTS};
pub use scene_file::SceneFile;
pub use settings::{Backend, ChunkStrategy, DebugView, Environment, ExecutionStrategy, RendererConfig};
pub use sphere::{get_sphere_uv, intersect_sphere, Sphere};
pub use triangle::{intersect_triangle, triangle_normal, TriangleHit};

/// Hash a vector by its bit patterns.
pub fn hash_vec3<H: Hasher>(v: Vec3, state: &mut H) {
    v.x.to_bits().hash(state);
    v.y.to_bits().hash(state);
    v.z.to_bits().hash(state);
}

/// Hash any value with the default hasher.
pub fn hash_of<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
