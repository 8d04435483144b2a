//! Aggregate scene: an owned list of hittables plus a light cache.
//!
//! The scene is itself a hittable so scenes can nest. Cached state (member
//! bounds, the light list) is rebuilt by `build_boxes` and `query_lights`
//! and never serialized.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use ember_math::{Aabb, Interval, Ray, Vec3};
use serde::{Deserialize, Serialize};

use crate::hittable::{next_object_id, Hit, HitRecord, Hittable};
use crate::material::MaterialRegistry;
use crate::SceneError;

/// Hard cap on the number of cached lights.
pub const MAX_LIGHTS: usize = 64;

/// Round-robin cursor over the light cache.
///
/// Shared between render threads through `&Scene`, so it is atomic.
#[derive(Debug, Default)]
struct LightCursor(AtomicUsize);

impl LightCursor {
    fn advance(&self, len: usize) -> usize {
        self.0.fetch_add(1, Ordering::Relaxed) % len
    }

    fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

impl Clone for LightCursor {
    fn clone(&self) -> Self {
        Self(AtomicUsize::new(self.0.load(Ordering::Relaxed)))
    }
}

/// A collection of hittables that is hit as one object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scene {
    #[serde(skip, default = "next_object_id")]
    id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    objects: Vec<Hittable>,
    /// Index paths of emissive members, descending through nested scenes
    #[serde(skip)]
    lights: Vec<Vec<usize>>,
    #[serde(skip)]
    light_cursor: LightCursor,
    #[serde(skip)]
    bbox: Aabb,
}

impl Scene {
    /// Create an empty scene.
    pub fn new() -> Self {
        Self {
            id: next_object_id(),
            name: String::new(),
            objects: Vec::new(),
            lights: Vec::new(),
            light_cursor: LightCursor::default(),
            bbox: Aabb::EMPTY,
        }
    }

    /// Create an empty, named scene.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::new()
        }
    }

    /// Stable object id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Take ownership of `object` and append it.
    pub fn add(&mut self, object: impl Into<Hittable>) {
        self.objects.push(object.into());
    }

    /// Remove and drop the member at `index`.
    ///
    /// Panics if `index` is out of range.
    pub fn remove(&mut self, index: usize) {
        assert!(
            index < self.objects.len(),
            "remove index {} out of range for scene with {} objects",
            index,
            self.objects.len()
        );
        let removed = self.objects.remove(index);
        log::debug!("Removed {} from scene '{}'", removed.display_name(), self.name);
        // Indices past `index` shifted; the cache must be rebuilt
        self.lights.clear();
    }

    /// Get the number of top-level members.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Check if the scene has no members.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Top-level members.
    pub fn objects(&self) -> &[Hittable] {
        &self.objects
    }

    /// Mutable access to a member for editing.
    ///
    /// Call `build_boxes` again after changing geometry.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Hittable> {
        self.objects.get_mut(index)
    }

    /// Recompute every member's bounding box, then the scene's own.
    pub fn build_boxes(&mut self) {
        let mut bbox = Aabb::EMPTY;
        for object in &mut self.objects {
            object.build_boxes();
            bbox = Aabb::merge(&bbox, &object.bounding_box());
        }
        self.bbox = bbox;
    }

    /// Cached bounds (valid after `build_boxes`).
    pub fn bounding_box(&self) -> Aabb {
        self.bbox
    }

    /// Resolve every member's material id through `registry`.
    ///
    /// Panics on an id the registry does not know.
    pub fn update_materials(&mut self, registry: &dyn MaterialRegistry) {
        for object in &mut self.objects {
            object.update_materials(registry);
        }
    }

    /// Rebuild the light cache from emissive members, nested scenes included.
    ///
    /// Materials must already be resolved. Panics when no light is found
    /// unless `environment_fallback` allows an unlit scene.
    pub fn query_lights(&mut self, environment_fallback: bool) {
        self.light_cursor.reset();
        let mut lights = Vec::new();
        collect_lights(&self.objects, &mut Vec::new(), &mut lights);
        self.lights = lights;

        assert!(
            !self.lights.is_empty() || environment_fallback,
            "scene '{}' has no emissive objects and no environment fallback",
            self.name
        );
        log::debug!("Scene '{}' has {} lights", self.name, self.lights.len());
    }

    /// Number of cached lights.
    pub fn light_count(&self) -> usize {
        self.lights.len()
    }

    /// Next light in round-robin order.
    ///
    /// Panics if `query_lights` found no lights.
    pub fn get_random_light(&self) -> &Hittable {
        assert!(
            !self.lights.is_empty(),
            "get_random_light called on scene '{}' with an empty light cache",
            self.name
        );
        let slot = self.light_cursor.advance(self.lights.len());
        let path = &self.lights[slot];
        let mut object = &self.objects[path[0]];
        for &index in &path[1..] {
            // Paths only descend through nested scenes
            if let Hittable::Scene(inner) = object {
                object = &inner.objects[index];
            }
        }
        object
    }

    /// Combined geometry and material hash of every member.
    pub fn get_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash_geometry(&mut hasher);
        hasher.finish()
    }

    /// Closest hit over members whose cached box the ray touches.
    pub fn hit_pruned<'a>(&'a self, ray: &Ray, ray_t: Interval) -> Option<HitRecord<'a>> {
        let inv_dir = ray.inv_direction();
        let mut closest = None;
        let mut interval = ray_t;

        for object in &self.objects {
            if !object.bounding_box().hit_with_inv(ray.origin, inv_dir, interval) {
                continue;
            }
            let hit = match object {
                Hittable::Scene(nested) => nested.hit_pruned(ray, interval),
                other => other.hit(ray, interval),
            };
            if let Some(rec) = hit {
                interval = interval.with_max(rec.t);
                closest = Some(rec);
            }
        }

        closest
    }

    /// Load every mesh that has no triangles yet, recursively.
    pub fn load_meshes(&mut self, base_dir: &Path) -> Result<(), SceneError> {
        for object in &mut self.objects {
            object.load_meshes(base_dir)?;
        }
        Ok(())
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Hit for Scene {
    /// Linear closest-hit scan without box pruning.
    fn hit<'a>(&'a self, ray: &Ray, ray_t: Interval) -> Option<HitRecord<'a>> {
        let mut closest = None;
        let mut interval = ray_t;

        for object in &self.objects {
            if let Some(rec) = object.hit(ray, interval) {
                interval = interval.with_max(rec.t);
                closest = Some(rec);
            }
        }

        closest
    }

    fn compute_bounds(&self) -> Aabb {
        self.objects
            .iter()
            .fold(Aabb::EMPTY, |acc, object| Aabb::merge(&acc, &object.compute_bounds()))
    }

    fn origin(&self) -> Vec3 {
        if self.bbox.is_empty() {
            Vec3::ZERO
        } else {
            self.bbox.centroid()
        }
    }

    fn extent(&self) -> Vec3 {
        if self.bbox.is_empty() {
            Vec3::ZERO
        } else {
            self.bbox.extent()
        }
    }

    fn hash_geometry<H: Hasher>(&self, state: &mut H) {
        self.objects.len().hash(state);
        for object in &self.objects {
            object.hash_content(state);
        }
    }
}

/// Depth-first walk appending the index path of every emissive member.
fn collect_lights(objects: &[Hittable], prefix: &mut Vec<usize>, lights: &mut Vec<Vec<usize>>) {
    for (index, object) in objects.iter().enumerate() {
        prefix.push(index);
        match object {
            Hittable::Scene(inner) => collect_lights(&inner.objects, prefix, lights),
            _ => {
                if let Some(surface) = object.surface() {
                    // Touch the material so an unresolved one fails here, not mid-render
                    surface.resolved_material();
                }
                if object.is_light() {
                    if lights.len() < MAX_LIGHTS {
                        lights.push(prefix.clone());
                    } else {
                        log::warn!(
                            "Light cache full ({} lights), ignoring {}",
                            MAX_LIGHTS,
                            object.display_name()
                        );
                    }
                }
            }
        }
        prefix.pop();
    }
}
