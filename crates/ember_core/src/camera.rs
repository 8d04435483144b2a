//! Camera configuration and the thin-lens camera derived from it.

use std::hash::{Hash, Hasher};

use ember_math::{Ray, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::hash_vec3;

/// Persistent camera settings, as edited by the host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub look_from: Vec3,
    /// Viewing direction, need not be normalized
    pub look_dir: Vec3,
    /// Vertical field of view in degrees
    pub fov: f32,
    /// Aspect ratio kept as separate terms, e.g. 16:9
    pub aspect_w: f32,
    pub aspect_h: f32,
    /// Lens diameter; zero disables defocus blur
    pub aperture: f32,
    /// Distance from the camera to the plane of perfect focus
    pub focus_dist: f32,
    /// 0 = perspective, 1 = orthographic, anything between blends
    pub projection: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            look_from: Vec3::new(0.0, 1.0, 5.0),
            look_dir: Vec3::new(0.0, 0.0, -1.0),
            fov: 45.0,
            aspect_w: 16.0,
            aspect_h: 9.0,
            aperture: 0.0,
            focus_dist: 5.0,
            projection: 0.0,
        }
    }
}

impl CameraConfig {
    /// Aspect ratio as width over height.
    pub fn aspect_ratio(&self) -> f32 {
        if self.aspect_h.abs() < f32::EPSILON {
            1.0
        } else {
            self.aspect_w / self.aspect_h
        }
    }
}

impl Hash for CameraConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_vec3(self.look_from, state);
        hash_vec3(self.look_dir, state);
        for value in [
            self.fov,
            self.aspect_w,
            self.aspect_h,
            self.aperture,
            self.focus_dist,
            self.projection,
        ] {
            value.to_bits().hash(state);
        }
    }
}

/// Ray generator rebuilt from a `CameraConfig`.
#[derive(Clone, Debug)]
pub struct Camera {
    origin: Vec3,
    // Orthonormal basis: u right, v up, w back from the view direction
    u: Vec3,
    v: Vec3,
    w: Vec3,
    viewport_width: f32,
    viewport_height: f32,
    // Focus plane
    lower_left: Vec3,
    horizontal: Vec3,
    vertical: Vec3,
    // Camera plane, scaled by the projection blend
    cam_lower_left: Vec3,
    cam_horizontal: Vec3,
    cam_vertical: Vec3,
    lens_radius: f32,
}

impl Camera {
    /// Derive the basis, viewport and frustum planes from `config`.
    pub fn new(config: &CameraConfig) -> Self {
        let theta = config.fov.to_radians();
        let viewport_height = 2.0 * (theta / 2.0).tan();
        let viewport_width = config.aspect_ratio() * viewport_height;

        let w = (-config.look_dir).normalize_or_zero();
        let w = if w == Vec3::ZERO { Vec3::Z } else { w };
        // Looking straight up or down makes Y useless as the up hint
        let up = if w.dot(Vec3::Y).abs() > 0.999 { Vec3::Z } else { Vec3::Y };
        let u = up.cross(w).normalize();
        let v = w.cross(u);

        let origin = config.look_from;
        let focus = config.focus_dist.max(f32::EPSILON);

        let horizontal = focus * viewport_width * u;
        let vertical = focus * viewport_height * v;
        let lower_left = origin - horizontal / 2.0 - vertical / 2.0 - focus * w;

        let projection = config.projection.clamp(0.0, 1.0);
        let cam_horizontal = projection * horizontal;
        let cam_vertical = projection * vertical;
        let cam_lower_left = origin - cam_horizontal / 2.0 - cam_vertical / 2.0;

        Self {
            origin,
            u,
            v,
            w,
            viewport_width,
            viewport_height,
            lower_left,
            horizontal,
            vertical,
            cam_lower_left,
            cam_horizontal,
            cam_vertical,
            lens_radius: config.aperture.max(0.0) / 2.0,
        }
    }

    /// Ray through viewport coordinates `(s, t)` in `[0, 1]`, t = 0 at the bottom.
    ///
    /// `lens` is a sample on the unit disk; it is scaled by the lens radius.
    pub fn ray(&self, s: f32, t: f32, lens: Vec2) -> Ray {
        let rd = self.lens_radius * lens;
        let offset = self.u * rd.x + self.v * rd.y;

        let start = self.cam_lower_left + s * self.cam_horizontal + t * self.cam_vertical + offset;
        let target = self.lower_left + s * self.horizontal + t * self.vertical;
        Ray::new(start, target - start)
    }

    /// Camera position.
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// Basis vectors `(u, v, w)`.
    pub fn basis(&self) -> (Vec3, Vec3, Vec3) {
        (self.u, self.v, self.w)
    }

    /// Viewport size at unit distance.
    pub fn viewport(&self) -> (f32, f32) {
        (self.viewport_width, self.viewport_height)
    }

    pub fn lens_radius(&self) -> f32 {
        self.lens_radius
    }
}
