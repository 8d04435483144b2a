//! Renderer settings.

use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use ember_math::Vec3;
use serde::{Deserialize, Serialize};

use crate::hash_vec3;

/// Which world query a render pass uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Linear closest-hit scan over the scene tree
    #[default]
    Reference,
    /// Linear scan that slab-tests each member's box first
    BoxPruned,
    /// Flattened triangle/sphere buffers behind a BVH
    Bvh,
}

/// How chunks are spread over threads within one pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// Whole image as one chunk on the calling thread
    Serial,
    /// Persistent threads pulling chunks from a shared queue; 0 = one per core
    WorkerPool { threads: usize },
    /// One rayon task per chunk
    #[default]
    Parallel,
}

/// How the image is cut into chunks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    None,
    VerticalStripes,
    HorizontalStripes,
    #[default]
    Grid,
}

/// Alternative outputs for inspecting the scene.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugView {
    #[default]
    None,
    Normals,
    ObjectId,
    TriangleId,
}

/// Sky gradient returned for rays that leave the scene.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    /// When false, misses contribute nothing and the scene needs its own lights
    pub enabled: bool,
    pub horizon: Vec3,
    pub zenith: Vec3,
    pub brightness: f32,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            enabled: true,
            horizon: Vec3::new(1.0, 1.0, 1.0),
            zenith: Vec3::new(0.5, 0.7, 1.0),
            brightness: 1.0,
        }
    }
}

impl Environment {
    /// Gradient color for a ray direction.
    pub fn sample(&self, direction: Vec3) -> Vec3 {
        if !self.enabled {
            return Vec3::ZERO;
        }
        let unit = direction.normalize_or_zero();
        let a = 0.5 * (unit.y + 1.0);
        self.horizon.lerp(self.zenith, a) * self.brightness
    }
}

impl Hash for Environment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.enabled.hash(state);
        hash_vec3(self.horizon, state);
        hash_vec3(self.zenith, state);
        self.brightness.to_bits().hash(state);
    }
}

/// Settings of the render pass itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub rays_per_pixel: u32,
    pub ray_bounces: u32,
    pub width: u32,
    pub height: u32,
    /// Keep buffers (and accumulated samples) between passes
    pub reuse_buffers: bool,
    /// Smallest radiance mapped to pure white by the tone mapper
    pub white_point: f32,
    pub backend: Backend,
    pub execution: ExecutionStrategy,
    pub chunk_strategy: ChunkStrategy,
    pub chunk_count: u32,
    pub shuffle_chunks: bool,
    pub environment: Environment,
    pub debug_view: DebugView,
    pub seed: u64,
    pub save_output: bool,
    pub output_path: PathBuf,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            rays_per_pixel: 8,
            ray_bounces: 8,
            width: 640,
            height: 360,
            reuse_buffers: true,
            white_point: 4.0,
            backend: Backend::Reference,
            execution: ExecutionStrategy::Parallel,
            chunk_strategy: ChunkStrategy::Grid,
            chunk_count: 16,
            shuffle_chunks: false,
            environment: Environment::default(),
            debug_view: DebugView::None,
            seed: 0,
            save_output: false,
            output_path: PathBuf::from("render.png"),
        }
    }
}

impl RendererConfig {
    /// Total number of pixels.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Only fields that change the pixels take part. Execution and chunking
/// settings and the output fields are left out.
impl Hash for RendererConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rays_per_pixel.hash(state);
        self.ray_bounces.hash(state);
        self.width.hash(state);
        self.height.hash(state);
        self.reuse_buffers.hash(state);
        self.white_point.to_bits().hash(state);
        self.backend.hash(state);
        self.environment.hash(state);
        self.debug_view.hash(state);
        self.seed.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash(config: &RendererConfig) -> u64 {
        let mut hasher = DefaultHasher::new();
        config.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_environment_gradient() {
        let env = Environment::default();
        assert!((env.sample(Vec3::Y) - env.zenith).length() < 1e-6);
        assert!((env.sample(Vec3::NEG_Y) - env.horizon).length() < 1e-6);

        let off = Environment {
            enabled: false,
            ..Default::default()
        };
        assert_eq!(off.sample(Vec3::Y), Vec3::ZERO);
    }

    #[test]
    fn test_output_path_does_not_dirty() {
        let a = RendererConfig::default();
        let mut b = a.clone();
        b.output_path = PathBuf::from("elsewhere.png");
        b.save_output = true;
        assert_eq!(hash(&a), hash(&b));

        b.rays_per_pixel += 1;
        assert_ne!(hash(&a), hash(&b));
    }

    #[test]
    fn test_scheduling_does_not_dirty() {
        let a = RendererConfig::default();
        let b = RendererConfig {
            execution: ExecutionStrategy::Serial,
            chunk_strategy: ChunkStrategy::VerticalStripes,
            chunk_count: 3,
            shuffle_chunks: !a.shuffle_chunks,
            ..a.clone()
        };
        assert_eq!(hash(&a), hash(&b));

        let c = RendererConfig {
            backend: Backend::Bvh,
            ..a.clone()
        };
        assert_ne!(hash(&a), hash(&c));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RendererConfig =
            serde_json::from_str(r#"{ "width": 32, "execution": { "kind": "worker_pool", "threads": 3 } }"#)
                .unwrap();

        assert_eq!(config.width, 32);
        assert_eq!(config.height, RendererConfig::default().height);
        assert_eq!(config.execution, ExecutionStrategy::WorkerPool { threads: 3 });
        assert_eq!(config.backend, Backend::Reference);
    }
}
