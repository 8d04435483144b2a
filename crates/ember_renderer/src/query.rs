//! Closest-hit queries against a prepared scene.

use ember_core::{Hit, HitRecord, Scene};
use ember_math::{Interval, Ray};

use crate::bvh::FlatScene;

/// Anything the integrator can shoot rays at.
pub trait SceneQuery: Sync {
    fn closest_hit<'a>(&'a self, ray: &Ray, ray_t: Interval) -> Option<HitRecord<'a>>;
}

/// Reference path: linear scan with no box pruning.
impl SceneQuery for Scene {
    fn closest_hit<'a>(&'a self, ray: &Ray, ray_t: Interval) -> Option<HitRecord<'a>> {
        self.hit(ray, ray_t)
    }
}

/// Linear scan that skips members whose cached box the ray misses.
#[derive(Clone, Copy)]
pub struct BoxPruned<'a>(pub &'a Scene);

impl SceneQuery for BoxPruned<'_> {
    fn closest_hit<'a>(&'a self, ray: &Ray, ray_t: Interval) -> Option<HitRecord<'a>> {
        self.0.hit_pruned(ray, ray_t)
    }
}

impl SceneQuery for FlatScene {
    fn closest_hit<'a>(&'a self, ray: &Ray, ray_t: Interval) -> Option<HitRecord<'a>> {
        self.hit(ray, ray_t)
    }
}

/// Backend picked for one pass.
#[derive(Clone, Copy)]
pub enum World<'a> {
    Reference(&'a Scene),
    BoxPruned(BoxPruned<'a>),
    Bvh(&'a FlatScene),
}

impl SceneQuery for World<'_> {
    fn closest_hit<'a>(&'a self, ray: &Ray, ray_t: Interval) -> Option<HitRecord<'a>> {
        match self {
            World::Reference(scene) => scene.closest_hit(ray, ray_t),
            World::BoxPruned(pruned) => pruned.closest_hit(ray, ray_t),
            World::Bvh(flat) => flat.closest_hit(ray, ray_t),
        }
    }
}
