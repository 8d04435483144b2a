//! Sphere primitive.

use std::f32::consts::PI;
use std::hash::{Hash, Hasher};

use ember_math::{Aabb, Interval, Ray, Vec3};
use serde::{Deserialize, Serialize};

use crate::hash_vec3;
use crate::hittable::{Hit, HitRecord, Surface};

/// A sphere given by center and radius.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sphere {
    pub surface: Surface,
    pub center: Vec3,
    pub radius: f32,
}

impl Sphere {
    /// Create a new sphere bound to `material_id`.
    pub fn new(center: Vec3, radius: f32, material_id: impl Into<String>) -> Self {
        Self {
            surface: Surface::new(material_id),
            center,
            radius: radius.max(0.0),
        }
    }
}

/// Get the UV coordinates for a point on the unit sphere.
pub fn get_sphere_uv(p: Vec3) -> (f32, f32) {
    // theta: angle down from +Y
    // phi: angle around Y axis from +X
    let theta = (-p.y).clamp(-1.0, 1.0).acos();
    let phi = (-p.z).atan2(p.x) + PI;

    (phi / (2.0 * PI), theta / PI)
}

/// Nearest root of `|O + tD - C|^2 = r^2` inside `ray_t`.
///
/// Returns the hit distance and the outward unit normal.
pub fn intersect_sphere(center: Vec3, radius: f32, ray: &Ray, ray_t: Interval) -> Option<(f32, Vec3)> {
    // Half-b form of the quadratic
    let oc = center - ray.origin;
    let a = ray.direction.length_squared();
    let h = ray.direction.dot(oc);
    let c = oc.length_squared() - radius * radius;

    if a <= 0.0 {
        return None;
    }

    let discriminant = h * h - a * c;
    if discriminant < 0.0 {
        return None;
    }

    let sqrtd = discriminant.sqrt();

    // Nearest root in range, falling back to the far one
    let mut root = (h - sqrtd) / a;
    if !ray_t.contains(root) {
        root = (h + sqrtd) / a;
        if !ray_t.contains(root) {
            return None;
        }
    }

    let outward_normal = if radius > 0.0 {
        (ray.at(root) - center) / radius
    } else {
        -ray.direction.normalize()
    };
    Some((root, outward_normal))
}

impl Hit for Sphere {
    fn hit<'a>(&'a self, ray: &Ray, ray_t: Interval) -> Option<HitRecord<'a>> {
        let (t, outward_normal) = intersect_sphere(self.center, self.radius, ray, ray_t)?;
        let uv = get_sphere_uv(outward_normal);
        Some(HitRecord::new(ray, t, outward_normal, uv, &self.surface))
    }

    fn compute_bounds(&self) -> Aabb {
        let rvec = Vec3::splat(self.radius);
        Aabb::from_points(self.center - rvec, self.center + rvec).padded()
    }

    fn origin(&self) -> Vec3 {
        self.center
    }

    fn extent(&self) -> Vec3 {
        Vec3::splat(self.radius * 2.0)
    }

    fn hash_geometry<H: Hasher>(&self, state: &mut H) {
        hash_vec3(self.center, state);
        self.radius.to_bits().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{Color, Material, MaterialLibrary};

    fn resolved(center: Vec3, radius: f32) -> Sphere {
        let mut library = MaterialLibrary::new();
        library.insert("grey", Material::diffuse(Color::splat(0.5)));
        let mut sphere = Sphere::new(center, radius, "grey");
        sphere.surface.bind(&library);
        sphere
    }

    #[test]
    fn test_sphere_hit() {
        let sphere = resolved(Vec3::new(0.0, 0.0, -1.0), 0.5);
        let ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0));

        let rec = sphere.hit(&ray, Interval::new(0.001, f32::INFINITY)).unwrap();
        assert!((rec.t - 0.5).abs() < 0.001);
        assert!((rec.normal - Vec3::Z).length() < 0.001);
    }

    #[test]
    fn test_sphere_hit_distance_minus_radius() {
        let center = Vec3::new(1.0, -2.0, 3.0);
        let radius = 0.75;
        let sphere = resolved(center, radius);

        for start in [
            Vec3::new(10.0, 4.0, -3.0),
            Vec3::new(-6.0, -2.0, 3.0),
            Vec3::new(1.0, 20.0, 3.5),
        ] {
            let distance = (center - start).length();
            let ray = Ray::new(start, (center - start).normalize());
            let rec = sphere.hit(&ray, Interval::new(0.001, f32::INFINITY)).unwrap();

            assert!((rec.t - (distance - radius)).abs() < 1e-4, "from {start:?}");
        }
    }

    #[test]
    fn test_sphere_far_root_from_inside() {
        let sphere = resolved(Vec3::ZERO, 2.0);
        let ray = Ray::new(Vec3::ZERO, Vec3::X);

        let rec = sphere.hit(&ray, Interval::new(0.001, f32::INFINITY)).unwrap();
        assert!((rec.t - 2.0).abs() < 1e-5);
        assert!(!rec.front_face);
    }

    #[test]
    fn test_sphere_miss() {
        let sphere = resolved(Vec3::new(0.0, 0.0, -1.0), 0.5);

        // Pointing away
        let ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0));
        assert!(sphere.hit(&ray, Interval::new(0.001, f32::INFINITY)).is_none());

        // Both roots beyond t_max
        let ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0));
        assert!(sphere.hit(&ray, Interval::new(0.001, 0.25)).is_none());
    }

    #[test]
    fn test_sphere_bounds() {
        let sphere = Sphere::new(Vec3::new(1.0, 2.0, 3.0), 1.0, "grey");
        let bbox = sphere.compute_bounds();

        assert_eq!(bbox.min, Vec3::new(0.0, 1.0, 2.0));
        assert_eq!(bbox.max, Vec3::new(2.0, 3.0, 4.0));
    }
}
