//! Hittable variants, their shared surface data and the hit record.

use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ember_math::{Aabb, Interval, Ray, Vec3};
use serde::{Deserialize, Serialize};

use crate::material::{Material, MaterialRegistry};
use crate::mesh::StaticMesh;
use crate::rect::{Rect, Xy, Xz, Yz};
use crate::scene::Scene;
use crate::sphere::Sphere;
use crate::SceneError;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Hand out the next stable object id.
///
/// Ids are process-wide and monotonic. They are not persisted, so a loaded
/// scene gets fresh ids; clones keep the ids of their source.
pub fn next_object_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Record of a ray-object intersection.
#[derive(Clone, Debug)]
pub struct HitRecord<'a> {
    /// Point of intersection
    pub p: Vec3,
    /// Surface normal at intersection (always points against ray)
    pub normal: Vec3,
    /// Parameter t where the intersection occurs
    pub t: f32,
    /// UV surface coordinates
    pub u: f32,
    pub v: f32,
    /// Whether the ray hit the front face (outside) of the surface
    pub front_face: bool,
    /// Material at the intersection point
    pub material: &'a Material,
    /// Stable id of the object that was hit
    pub object_id: u64,
    /// Triangle index for mesh hits
    pub triangle: Option<u32>,
}

impl<'a> HitRecord<'a> {
    /// Build a record for a hit at `t` on `surface`.
    ///
    /// Panics if the surface's material was never resolved.
    pub fn new(ray: &Ray, t: f32, outward_normal: Vec3, uv: (f32, f32), surface: &'a Surface) -> Self {
        let mut rec = Self {
            p: ray.at(t),
            normal: outward_normal,
            t,
            u: uv.0,
            v: uv.1,
            front_face: true,
            material: surface.resolved_material(),
            object_id: surface.id(),
            triangle: None,
        };
        rec.set_face_normal(ray, outward_normal);
        rec
    }

    /// Set the face normal based on ray direction and outward normal.
    ///
    /// The normal is always stored pointing against the ray direction,
    /// so we need to track whether we hit the front or back face.
    pub fn set_face_normal(&mut self, ray: &Ray, outward_normal: Vec3) {
        self.front_face = ray.direction.dot(outward_normal) < 0.0;
        self.normal = if self.front_face {
            outward_normal
        } else {
            -outward_normal
        };
    }
}

/// Data every primitive carries besides its geometry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Surface {
    #[serde(skip, default = "next_object_id")]
    id: u64,
    /// Key into the material registry
    pub material_id: String,
    /// Resolved by `update_materials`, never at construction
    #[serde(skip)]
    material: Option<Arc<Material>>,
    /// Valid only after `build_boxes`
    #[serde(skip)]
    bbox: Aabb,
}

impl Surface {
    /// Create an unresolved surface bound to `material_id`.
    pub fn new(material_id: impl Into<String>) -> Self {
        Self {
            id: next_object_id(),
            material_id: material_id.into(),
            material: None,
            bbox: Aabb::EMPTY,
        }
    }

    /// Stable object id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The resolved material, if `update_materials` has run.
    pub fn material(&self) -> Option<&Arc<Material>> {
        self.material.as_ref()
    }

    /// The resolved material; an unresolved one is a programming error.
    pub fn resolved_material(&self) -> &Material {
        match self.material.as_deref() {
            Some(material) => material,
            None => panic!(
                "material '{}' of object {} was never resolved; call update_materials first",
                self.material_id, self.id
            ),
        }
    }

    /// Resolve the material id through `registry`.
    pub fn bind(&mut self, registry: &dyn MaterialRegistry) {
        match registry.lookup(&self.material_id) {
            Some(material) => self.material = Some(material),
            None => panic!(
                "object {} references unknown material '{}'",
                self.id, self.material_id
            ),
        }
    }

    /// Cached bounding box.
    pub fn bbox(&self) -> Aabb {
        self.bbox
    }

    pub(crate) fn set_bbox(&mut self, bbox: Aabb) {
        self.bbox = bbox;
    }

    /// Feed material id and (when resolved) material contents into `state`.
    pub fn hash_content<H: Hasher>(&self, state: &mut H) {
        self.material_id.hash(state);
        if let Some(material) = &self.material {
            material.hash(state);
        }
    }
}

/// Shared interface of every hittable variant.
pub trait Hit {
    /// Closest intersection within `ray_t`, if any.
    fn hit<'a>(&'a self, ray: &Ray, ray_t: Interval) -> Option<HitRecord<'a>>;

    /// Recompute the axis-aligned bounds from the current geometry.
    fn compute_bounds(&self) -> Aabb;

    /// Reference point of the primitive (center, pivot).
    fn origin(&self) -> Vec3;

    /// Size of the primitive along each world axis.
    fn extent(&self) -> Vec3;

    /// Feed the persistent geometry into `state` for dirty-checking.
    fn hash_geometry<H: Hasher>(&self, state: &mut H);
}

/// All primitive kinds a scene can hold.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Hittable {
    Sphere(Sphere),
    RectXy(Rect<Xy>),
    RectXz(Rect<Xz>),
    RectYz(Rect<Yz>),
    Mesh(StaticMesh),
    Scene(Scene),
}

macro_rules! dispatch {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            Hittable::Sphere($inner) => $body,
            Hittable::RectXy($inner) => $body,
            Hittable::RectXz($inner) => $body,
            Hittable::RectYz($inner) => $body,
            Hittable::Mesh($inner) => $body,
            Hittable::Scene($inner) => $body,
        }
    };
}

impl Hittable {
    /// Stable object id.
    pub fn id(&self) -> u64 {
        match self {
            Hittable::Scene(scene) => scene.id(),
            other => other.surface().map_or(0, Surface::id),
        }
    }

    /// Surface data; nested scenes have none of their own.
    pub fn surface(&self) -> Option<&Surface> {
        match self {
            Hittable::Sphere(s) => Some(&s.surface),
            Hittable::RectXy(r) => Some(&r.surface),
            Hittable::RectXz(r) => Some(&r.surface),
            Hittable::RectYz(r) => Some(&r.surface),
            Hittable::Mesh(m) => Some(&m.surface),
            Hittable::Scene(_) => None,
        }
    }

    fn surface_mut(&mut self) -> Option<&mut Surface> {
        match self {
            Hittable::Sphere(s) => Some(&mut s.surface),
            Hittable::RectXy(r) => Some(&mut r.surface),
            Hittable::RectXz(r) => Some(&mut r.surface),
            Hittable::RectYz(r) => Some(&mut r.surface),
            Hittable::Mesh(m) => Some(&mut m.surface),
            Hittable::Scene(_) => None,
        }
    }

    /// Human readable name used in logs, e.g. `sphere#12`.
    pub fn display_name(&self) -> String {
        let kind = match self {
            Hittable::Sphere(_) => "sphere",
            Hittable::RectXy(_) => "rect_xy",
            Hittable::RectXz(_) => "rect_xz",
            Hittable::RectYz(_) => "rect_yz",
            Hittable::Mesh(_) => "mesh",
            Hittable::Scene(_) => "scene",
        };
        format!("{}#{}", kind, self.id())
    }

    /// True if the resolved material emits light.
    pub fn is_light(&self) -> bool {
        self.surface()
            .and_then(Surface::material)
            .is_some_and(|m| m.is_emissive())
    }

    /// Cached bounding box (valid after `build_boxes`).
    pub fn bounding_box(&self) -> Aabb {
        match self {
            Hittable::Scene(scene) => scene.bounding_box(),
            other => other.surface().map_or(Aabb::EMPTY, Surface::bbox),
        }
    }

    /// Recompute cached bounds, running the mesh pre-render pass first.
    pub fn build_boxes(&mut self) {
        match self {
            Hittable::Scene(scene) => scene.build_boxes(),
            Hittable::Mesh(mesh) => {
                mesh.pre_render();
                let bbox = mesh.compute_bounds();
                mesh.surface.set_bbox(bbox);
            }
            other => {
                let bbox = other.compute_bounds();
                if let Some(surface) = other.surface_mut() {
                    surface.set_bbox(bbox);
                }
            }
        }
    }

    /// Resolve material ids through `registry`.
    pub fn update_materials(&mut self, registry: &dyn MaterialRegistry) {
        match self {
            Hittable::Scene(scene) => scene.update_materials(registry),
            other => {
                if let Some(surface) = other.surface_mut() {
                    surface.bind(registry);
                }
            }
        }
    }

    /// Load mesh source files that have not been loaded yet.
    pub fn load_meshes(&mut self, base_dir: &Path) -> Result<(), SceneError> {
        match self {
            Hittable::Mesh(mesh) if !mesh.is_loaded() => mesh.load(base_dir).map(|_| ()),
            Hittable::Scene(scene) => scene.load_meshes(base_dir),
            _ => Ok(()),
        }
    }

    /// Geometry + material hash used for dirty-checking.
    pub fn hash_content<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        if let Some(surface) = self.surface() {
            surface.hash_content(state);
        }
        dispatch!(self, inner => inner.hash_geometry(state));
    }
}

impl Hit for Hittable {
    fn hit<'a>(&'a self, ray: &Ray, ray_t: Interval) -> Option<HitRecord<'a>> {
        dispatch!(self, inner => inner.hit(ray, ray_t))
    }

    fn compute_bounds(&self) -> Aabb {
        dispatch!(self, inner => inner.compute_bounds())
    }

    fn origin(&self) -> Vec3 {
        dispatch!(self, inner => inner.origin())
    }

    fn extent(&self) -> Vec3 {
        dispatch!(self, inner => inner.extent())
    }

    fn hash_geometry<H: Hasher>(&self, state: &mut H) {
        dispatch!(self, inner => inner.hash_geometry(state))
    }
}

impl From<Sphere> for Hittable {
    fn from(sphere: Sphere) -> Self {
        Hittable::Sphere(sphere)
    }
}

impl From<Rect<Xy>> for Hittable {
    fn from(rect: Rect<Xy>) -> Self {
        Hittable::RectXy(rect)
    }
}

impl From<Rect<Xz>> for Hittable {
    fn from(rect: Rect<Xz>) -> Self {
        Hittable::RectXz(rect)
    }
}

impl From<Rect<Yz>> for Hittable {
    fn from(rect: Rect<Yz>) -> Self {
        Hittable::RectYz(rect)
    }
}

impl From<StaticMesh> for Hittable {
    fn from(mesh: StaticMesh) -> Self {
        Hittable::Mesh(mesh)
    }
}

impl From<Scene> for Hittable {
    fn from(scene: Scene) -> Self {
        Hittable::Scene(scene)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{Color, MaterialLibrary};

    fn library() -> MaterialLibrary {
        let mut library = MaterialLibrary::new();
        library.insert("grey", Material::diffuse(Color::splat(0.5)));
        library.insert("lamp", Material::light(Color::splat(5.0)));
        library
    }

    #[test]
    fn test_ids_are_monotonic() {
        let a = Surface::new("grey");
        let b = Surface::new("grey");
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_clone_keeps_id_and_shares_material() {
        let mut sphere: Hittable = Sphere::new(Vec3::ZERO, 1.0, "grey").into();
        sphere.update_materials(&library());

        let copy = sphere.clone();
        assert_eq!(copy.id(), sphere.id());
        let (a, b) = (sphere.surface().unwrap(), copy.surface().unwrap());
        assert!(Arc::ptr_eq(a.material().unwrap(), b.material().unwrap()));
    }

    #[test]
    #[should_panic(expected = "unknown material")]
    fn test_unknown_material_is_fatal() {
        let mut sphere: Hittable = Sphere::new(Vec3::ZERO, 1.0, "missing").into();
        sphere.update_materials(&library());
    }

    #[test]
    #[should_panic(expected = "never resolved")]
    fn test_hit_with_unresolved_material_is_fatal() {
        let sphere: Hittable = Sphere::new(Vec3::ZERO, 1.0, "grey").into();
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);
        let _ = sphere.hit(&ray, Interval::new(0.001, f32::INFINITY));
    }

    #[test]
    fn test_is_light_after_resolution() {
        let mut lamp: Hittable = Sphere::new(Vec3::ZERO, 1.0, "lamp").into();
        assert!(!lamp.is_light());
        lamp.update_materials(&library());
        assert!(lamp.is_light());
    }

    #[test]
    fn test_face_normal_orientation() {
        let mut lib_sphere: Hittable = Sphere::new(Vec3::ZERO, 1.0, "grey").into();
        lib_sphere.update_materials(&library());

        // From outside: front face, normal faces the ray origin
        let outside = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);
        let rec = lib_sphere.hit(&outside, Interval::new(0.001, f32::INFINITY)).unwrap();
        assert!(rec.front_face);
        assert!(rec.normal.dot(outside.direction) < 0.0);

        // From inside: back face, normal still opposes the ray
        let inside = Ray::new(Vec3::ZERO, Vec3::NEG_Z);
        let rec = lib_sphere.hit(&inside, Interval::new(0.001, f32::INFINITY)).unwrap();
        assert!(!rec.front_face);
        assert!(rec.normal.dot(inside.direction) < 0.0);
    }

    #[test]
    fn test_json_tagging() {
        let sphere: Hittable = Sphere::new(Vec3::new(1.0, 2.0, 3.0), 0.5, "grey").into();
        let json = serde_json::to_value(&sphere).unwrap();

        assert_eq!(json["type"], "sphere");
        assert_eq!(json["surface"]["material_id"], "grey");
        assert_eq!(json["radius"], 0.5);
    }
}
