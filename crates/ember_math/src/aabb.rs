use crate::{Interval, Ray, Vec3, BOX_EPSILON};

/// Axis-Aligned Bounding Box.
///
/// Stored as a min corner and a max corner. A box built from real
/// geometry always satisfies `min <= max` on every axis; only
/// [`Aabb::EMPTY`] violates it, so that merging into it is a no-op.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Empty box, the identity element for [`Aabb::merge`].
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create an AABB from two corner points in any order.
    pub fn from_points(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Tightest box around a set of points, or [`Aabb::EMPTY`] for none.
    pub fn from_iter_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        points
            .into_iter()
            .fold(Aabb::EMPTY, |acc, p| Aabb {
                min: acc.min.min(p),
                max: acc.max.max(p),
            })
    }

    /// Component-wise union of two boxes.
    pub fn merge(a: &Aabb, b: &Aabb) -> Self {
        Self {
            min: a.min.min(b.min),
            max: a.max.max(b.max),
        }
    }

    /// Returns true if this is the empty box (or otherwise inverted).
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    /// Returns a copy with every axis thinner than [`BOX_EPSILON`] padded
    /// symmetrically, so planar primitives never produce zero-volume boxes.
    pub fn padded(&self) -> Self {
        let mut out = *self;
        for axis in 0..3 {
            if out.max[axis] - out.min[axis] < BOX_EPSILON {
                out.min[axis] -= BOX_EPSILON;
                out.max[axis] += BOX_EPSILON;
            }
        }
        out
    }

    /// Test if a ray intersects this AABB within the given interval.
    ///
    /// Uses the slab method. A zero direction component gives an infinite
    /// reciprocal; the resulting slab is either the whole line or empty,
    /// which is the correct answer for an axis-parallel ray. NaN slab
    /// bounds (origin exactly on a slab plane) are ignored by `min`/`max`.
    pub fn hit(&self, ray: &Ray, ray_t: Interval) -> bool {
        self.hit_with_inv(ray.origin, ray.inv_direction(), ray_t)
    }

    /// Slab test with a precomputed reciprocal direction.
    ///
    /// Traversal loops call this per node, so the reciprocal is hoisted.
    pub fn hit_with_inv(&self, origin: Vec3, inv_dir: Vec3, mut ray_t: Interval) -> bool {
        for axis in 0..3 {
            let t0 = (self.min[axis] - origin[axis]) * inv_dir[axis];
            let t1 = (self.max[axis] - origin[axis]) * inv_dir[axis];

            ray_t.min = ray_t.min.max(t0.min(t1));
            ray_t.max = ray_t.max.min(t0.max(t1));
            if ray_t.max < ray_t.min {
                return false;
            }
        }
        true
    }

    /// Returns the index (0=X, 1=Y, 2=Z) of the axis with the longest extent.
    pub fn longest_axis(&self) -> usize {
        let size = self.max - self.min;

        if size.x > size.y && size.x > size.z {
            0
        } else if size.y > size.z {
            1
        } else {
            2
        }
    }

    /// Returns the center point of the bounding box.
    pub fn centroid(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Size of the box along each axis.
    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    /// Returns true if `p` lies inside or on the boundary.
    pub fn contains_point(&self, p: Vec3) -> bool {
        self.min.cmple(p).all() && p.cmple(self.max).all()
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Aabb::EMPTY
    }
}
