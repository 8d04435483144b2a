use crate::Vec3;

/// A ray in 3D space.
///
/// The direction is not required to be normalized; intersection routines
/// solve for `t` in units of the direction's length.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// Create a new ray.
    #[inline]
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    /// Get the point along the ray at parameter t.
    ///
    /// Returns: origin + t * direction
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Component-wise reciprocal of the direction.
    ///
    /// Zero components produce signed infinities, which the slab test
    /// relies on to classify axis-parallel rays.
    #[inline]
    pub fn inv_direction(&self) -> Vec3 {
        Vec3::ONE / self.direction
    }
}

impl Default for Ray {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            direction: Vec3::NEG_Z,
        }
    }
}
