//! Axis-aligned rectangles in the XY, XZ and YZ planes.
//!
//! One generic type covers all three orientations; the plane marker picks
//! which world axes are the in-plane (u, v) axes and which one is fixed.

use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use ember_math::{Aabb, Interval, Ray, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::hittable::{Hit, HitRecord, Surface};

/// Direction components smaller than this count as parallel to the plane.
const PARALLEL_EPSILON: f32 = 1e-8;

/// Axis assignment of a rectangle's plane.
pub trait AxisPlane {
    /// World axis mapped to the rectangle's first in-plane coordinate
    const U: usize;
    /// World axis mapped to the second in-plane coordinate
    const V: usize;
    /// Fixed (normal) axis
    const K: usize;
}

/// Plane spanned by X and Y, fixed Z.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Xy;

/// Plane spanned by X and Z, fixed Y.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Xz;

/// Plane spanned by Y and Z, fixed X.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Yz;

impl AxisPlane for Xy {
    const U: usize = 0;
    const V: usize = 1;
    const K: usize = 2;
}

impl AxisPlane for Xz {
    const U: usize = 0;
    const V: usize = 2;
    const K: usize = 1;
}

impl AxisPlane for Yz {
    const U: usize = 1;
    const V: usize = 2;
    const K: usize = 0;
}

/// An axis-aligned rectangle given by two opposite in-plane corners and
/// the coordinate `k` on the fixed axis.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Rect<P> {
    pub surface: Surface,
    pub corner0: Vec2,
    pub corner1: Vec2,
    pub k: f32,
    #[serde(skip)]
    plane: PhantomData<P>,
}

impl<P: AxisPlane> Rect<P> {
    /// Create a new rectangle bound to `material_id`.
    pub fn new(corner0: Vec2, corner1: Vec2, k: f32, material_id: impl Into<String>) -> Self {
        Self {
            surface: Surface::new(material_id),
            corner0,
            corner1,
            k,
            plane: PhantomData,
        }
    }

    /// In-plane min/max corners regardless of the order they were given.
    pub fn span(&self) -> (Vec2, Vec2) {
        (self.corner0.min(self.corner1), self.corner0.max(self.corner1))
    }

    /// Lift an in-plane point to world space.
    pub fn to_world(&self, uv: Vec2) -> Vec3 {
        let mut p = Vec3::ZERO;
        p[P::U] = uv.x;
        p[P::V] = uv.y;
        p[P::K] = self.k;
        p
    }

    /// The four world-space corners in winding order.
    pub fn world_corners(&self) -> [Vec3; 4] {
        let (lo, hi) = self.span();
        [
            self.to_world(lo),
            self.to_world(Vec2::new(hi.x, lo.y)),
            self.to_world(hi),
            self.to_world(Vec2::new(lo.x, hi.y)),
        ]
    }

    /// Unit normal along the fixed axis.
    pub fn outward_normal(&self) -> Vec3 {
        let mut n = Vec3::ZERO;
        n[P::K] = 1.0;
        n
    }
}

impl<P: AxisPlane> Hit for Rect<P> {
    fn hit<'a>(&'a self, ray: &Ray, ray_t: Interval) -> Option<HitRecord<'a>> {
        let (lo, hi) = self.span();
        let size = hi - lo;
        if size.x <= 0.0 || size.y <= 0.0 {
            return None;
        }

        // Parallel rays never cross the plane; this also keeps t finite
        let d = ray.direction[P::K];
        if d.abs() < PARALLEL_EPSILON {
            return None;
        }

        let t = (self.k - ray.origin[P::K]) / d;
        if !ray_t.contains(t) {
            return None;
        }

        let p = ray.at(t);
        let (a, b) = (p[P::U], p[P::V]);
        if a < lo.x || a > hi.x || b < lo.y || b > hi.y {
            return None;
        }

        let uv = ((a - lo.x) / size.x, (b - lo.y) / size.y);
        Some(HitRecord::new(ray, t, self.outward_normal(), uv, &self.surface))
    }

    fn compute_bounds(&self) -> Aabb {
        let (lo, hi) = self.span();
        Aabb::from_points(self.to_world(lo), self.to_world(hi)).padded()
    }

    fn origin(&self) -> Vec3 {
        let (lo, hi) = self.span();
        self.to_world((lo + hi) * 0.5)
    }

    fn extent(&self) -> Vec3 {
        let (lo, hi) = self.span();
        let mut e = Vec3::ZERO;
        e[P::U] = hi.x - lo.x;
        e[P::V] = hi.y - lo.y;
        e
    }

    fn hash_geometry<H: Hasher>(&self, state: &mut H) {
        for c in [self.corner0, self.corner1] {
            c.x.to_bits().hash(state);
            c.y.to_bits().hash(state);
        }
        self.k.to_bits().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{Color, Material, MaterialLibrary};

    fn resolved<P: AxisPlane>(corner0: Vec2, corner1: Vec2, k: f32) -> Rect<P> {
        let mut library = MaterialLibrary::new();
        library.insert("lamp", Material::light(Color::splat(4.0)));
        let mut rect = Rect::<P>::new(corner0, corner1, k, "lamp");
        rect.surface.bind(&library);
        rect
    }

    #[test]
    fn test_rect_xz_hit_from_below() {
        let rect = resolved::<Xz>(Vec2::new(-1.0, -1.0), Vec2::new(1.0, 1.0), 3.0);
        let ray = Ray::new(Vec3::ZERO, Vec3::Y);

        let rec = rect.hit(&ray, Interval::new(0.001, f32::INFINITY)).unwrap();
        assert!((rec.t - 3.0).abs() < 1e-6);
        assert!(!rec.front_face);
        assert_eq!(rec.normal, Vec3::NEG_Y);
        assert!((rec.u - 0.5).abs() < 1e-6 && (rec.v - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rect_uv_interpolation() {
        let rect = resolved::<Xy>(Vec2::new(2.0, 0.0), Vec2::new(0.0, 4.0), -1.0);
        let ray = Ray::new(Vec3::new(1.5, 1.0, 5.0), Vec3::NEG_Z);

        let rec = rect.hit(&ray, Interval::new(0.001, f32::INFINITY)).unwrap();
        assert!((rec.u - 0.75).abs() < 1e-6);
        assert!((rec.v - 0.25).abs() < 1e-6);
        assert!(rec.front_face);
    }

    #[test]
    fn test_rect_parallel_ray_misses() {
        let rect = resolved::<Yz>(Vec2::new(-1.0, -1.0), Vec2::new(1.0, 1.0), 0.0);

        // Direction has an exactly zero X component, and the origin lies in the plane
        let in_plane = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::new(0.0, 0.0, 1.0));
        assert!(rect.hit(&in_plane, Interval::new(0.001, f32::INFINITY)).is_none());

        let off_plane = Ray::new(Vec3::new(2.0, 0.0, -5.0), Vec3::new(0.0, 0.3, 1.0));
        assert!(rect.hit(&off_plane, Interval::new(0.001, f32::INFINITY)).is_none());
    }

    #[test]
    fn test_rect_outside_bounds_misses() {
        let rect = resolved::<Xy>(Vec2::ZERO, Vec2::ONE, 0.0);
        let ray = Ray::new(Vec3::new(1.5, 0.5, 1.0), Vec3::NEG_Z);
        assert!(rect.hit(&ray, Interval::new(0.001, f32::INFINITY)).is_none());
    }

    #[test]
    fn test_rect_bounds_are_padded() {
        let rect = Rect::<Xz>::new(Vec2::new(-1.0, -2.0), Vec2::new(1.0, 2.0), 5.0, "lamp");
        let bbox = rect.compute_bounds();

        assert!(bbox.max.y > bbox.min.y);
        assert!(bbox.min.y < 5.0 && bbox.max.y > 5.0);
        assert_eq!(bbox.min.z, -2.0);
        assert_eq!(rect.extent(), Vec3::new(2.0, 0.0, 4.0));
        assert_eq!(rect.origin(), Vec3::new(0.0, 5.0, 0.0));
    }
}
