//! Ray-triangle intersection shared by meshes and the flattened backend.
//!
//! Uses the Möller-Trumbore algorithm.

use ember_math::{Interval, Ray, Vec3};

/// Determinants smaller than this mean the ray is parallel to the triangle.
const PARALLEL_EPSILON: f32 = 1e-8;

/// Barycentric hit on a triangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    pub t: f32,
    pub u: f32,
    pub v: f32,
}

/// Intersect `ray` with triangle `(v0, v1, v2)` inside `ray_t`.
pub fn intersect_triangle(ray: &Ray, v0: Vec3, v1: Vec3, v2: Vec3, ray_t: Interval) -> Option<TriangleHit> {
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;

    let h = ray.direction.cross(edge2);
    let a = edge1.dot(h);

    // Ray is parallel to triangle (or the triangle is degenerate)
    if a.abs() < PARALLEL_EPSILON {
        return None;
    }

    let f = 1.0 / a;
    let s = ray.origin - v0;
    let u = f * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = f * ray.direction.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(q);
    if !ray_t.contains(t) {
        return None;
    }

    Some(TriangleHit { t, u, v })
}

/// Geometric normal following the counter-clockwise winding.
///
/// Degenerate triangles yield the zero vector.
pub fn triangle_normal(v0: Vec3, v1: Vec3, v2: Vec3) -> Vec3 {
    (v1 - v0).cross(v2 - v0).normalize_or_zero()
}
