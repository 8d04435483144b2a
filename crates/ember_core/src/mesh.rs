//! Static triangle meshes.
//!
//! A mesh keeps its triangles twice: in local (file) space as loaded, and
//! in world space after the pre-render pass has applied the transform.
//! Only the world-space copy is intersected.

use std::hash::{Hash, Hasher};
use std::path::Path;

use ember_math::{Aabb, Interval, Mat4, Ray, Vec3};
use serde::{Deserialize, Serialize};

use crate::hash_vec3;
use crate::hittable::{Hit, HitRecord, Surface};
use crate::triangle::{intersect_triangle, triangle_normal};
use crate::SceneError;

fn unit_scale() -> Vec3 {
    Vec3::ONE
}

/// A triangle mesh with a rotate-Y / scale / translate transform.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StaticMesh {
    pub surface: Surface,
    /// OBJ file the triangles come from, relative to the scene file
    #[serde(default)]
    pub source: String,
    /// World-space translation
    #[serde(default)]
    pub origin: Vec3,
    /// Per-axis scale (uniform when all components match)
    #[serde(default = "unit_scale")]
    pub scale: Vec3,
    /// Rotation about the Y axis in degrees
    #[serde(default)]
    pub rotation_y: f32,
    #[serde(skip)]
    local: Vec<[Vec3; 3]>,
    #[serde(skip)]
    world: Vec<[Vec3; 3]>,
}

impl StaticMesh {
    /// Create an unloaded mesh referencing `source`.
    pub fn new(source: impl Into<String>, material_id: impl Into<String>) -> Self {
        Self {
            surface: Surface::new(material_id),
            source: source.into(),
            origin: Vec3::ZERO,
            scale: Vec3::ONE,
            rotation_y: 0.0,
            local: Vec::new(),
            world: Vec::new(),
        }
    }

    /// Create a mesh directly from local-space triangles.
    pub fn from_triangles(triangles: Vec<[Vec3; 3]>, material_id: impl Into<String>) -> Self {
        Self {
            local: triangles,
            ..Self::new(String::new(), material_id)
        }
    }

    /// Set the transform.
    pub fn with_transform(mut self, origin: Vec3, scale: Vec3, rotation_y: f32) -> Self {
        self.origin = origin;
        self.scale = scale;
        self.rotation_y = rotation_y;
        self
    }

    /// True once local triangles are present.
    pub fn is_loaded(&self) -> bool {
        !self.local.is_empty()
    }

    /// Load the OBJ source, resolving relative paths against `base_dir`.
    ///
    /// Returns the number of triangles loaded.
    pub fn load(&mut self, base_dir: &Path) -> Result<usize, SceneError> {
        if self.source.is_empty() {
            return Err(SceneError::MissingMeshSource(self.surface.id()));
        }

        let path = base_dir.join(&self.source);
        let options = tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        };
        let (models, _materials) = tobj::load_obj(&path, &options).map_err(|source| SceneError::Mesh {
            path: path.clone(),
            source,
        })?;

        self.local.clear();
        for model in &models {
            let positions: Vec<Vec3> = model
                .mesh
                .positions
                .chunks_exact(3)
                .map(|p| Vec3::new(p[0], p[1], p[2]))
                .collect();
            self.local.extend(triangles_from_indexed(&positions, &model.mesh.indices));
        }

        log::info!("Loaded {} triangles from {:?}", self.local.len(), path);
        Ok(self.local.len())
    }

    /// Local-to-world matrix: rotate about Y, then scale, then translate.
    pub fn transform(&self) -> Mat4 {
        Mat4::from_translation(self.origin)
            * Mat4::from_scale(self.scale)
            * Mat4::from_rotation_y(self.rotation_y.to_radians())
    }

    /// Pre-render pass: bake the transform into world-space triangles.
    pub fn pre_render(&mut self) {
        let m = self.transform();
        self.world = self
            .local
            .iter()
            .map(|tri| tri.map(|v| m.transform_point3(v)))
            .collect();
    }

    /// World-space triangles (valid after `pre_render`).
    pub fn world_triangles(&self) -> &[[Vec3; 3]] {
        &self.world
    }

    /// Get the number of triangles in the mesh.
    pub fn triangle_count(&self) -> usize {
        self.local.len()
    }
}

/// Build triangles from an indexed vertex list, skipping invalid indices.
pub fn triangles_from_indexed(positions: &[Vec3], indices: &[u32]) -> Vec<[Vec3; 3]> {
    let mut triangles = Vec::with_capacity(indices.len() / 3);

    for chunk in indices.chunks_exact(3) {
        let (i0, i1, i2) = (chunk[0] as usize, chunk[1] as usize, chunk[2] as usize);

        if i0 >= positions.len() || i1 >= positions.len() || i2 >= positions.len() {
            log::warn!(
                "Invalid triangle indices: [{}, {}, {}], vertex count: {}",
                i0,
                i1,
                i2,
                positions.len()
            );
            continue;
        }

        triangles.push([positions[i0], positions[i1], positions[i2]]);
    }

    triangles
}

impl Hit for StaticMesh {
    fn hit<'a>(&'a self, ray: &Ray, ray_t: Interval) -> Option<HitRecord<'a>> {
        let mut closest: Option<(usize, f32, f32, f32)> = None;
        let mut interval = ray_t;

        for (index, [v0, v1, v2]) in self.world.iter().enumerate() {
            if let Some(hit) = intersect_triangle(ray, *v0, *v1, *v2, interval) {
                interval = interval.with_max(hit.t);
                closest = Some((index, hit.t, hit.u, hit.v));
            }
        }

        let (index, t, u, v) = closest?;
        let [v0, v1, v2] = self.world[index];
        let mut rec = HitRecord::new(ray, t, triangle_normal(v0, v1, v2), (u, v), &self.surface);
        rec.triangle = Some(index as u32);
        Some(rec)
    }

    fn compute_bounds(&self) -> Aabb {
        Aabb::from_iter_points(self.world.iter().flatten().copied()).padded()
    }

    fn origin(&self) -> Vec3 {
        self.origin
    }

    fn extent(&self) -> Vec3 {
        let bounds = self.compute_bounds();
        if bounds.is_empty() {
            Vec3::ZERO
        } else {
            bounds.extent()
        }
    }

    fn hash_geometry<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
        hash_vec3(self.origin, state);
        hash_vec3(self.scale, state);
        self.rotation_y.to_bits().hash(state);
        self.local.len().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{Color, Material, MaterialLibrary};

    fn quad() -> Vec<[Vec3; 3]> {
        // Unit quad in the XY plane, two triangles
        vec![
            [Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 0.0)],
            [Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 0.0), Vec3::new(0.0, 1.0, 0.0)],
        ]
    }

    fn resolved(mesh: StaticMesh) -> StaticMesh {
        let mut library = MaterialLibrary::new();
        library.insert("grey", Material::diffuse(Color::splat(0.5)));
        let mut mesh = mesh;
        mesh.surface.bind(&library);
        mesh
    }

    #[test]
    fn test_pre_render_order() {
        // Rotate first (X -> -Z), then scale, then translate
        let mut mesh = StaticMesh::from_triangles(vec![[Vec3::X, Vec3::X, Vec3::X]], "grey")
            .with_transform(Vec3::new(10.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 3.0), 90.0);
        mesh.pre_render();

        let p = mesh.world_triangles()[0][0];
        assert!((p - Vec3::new(10.0, 0.0, -3.0)).length() < 1e-5, "{p:?}");
    }

    #[test]
    fn test_mesh_hit_records_triangle_index() {
        let mut mesh = resolved(StaticMesh::from_triangles(quad(), "grey"));
        mesh.pre_render();

        // Lower-right half belongs to triangle 0, upper-left to triangle 1
        let ray = Ray::new(Vec3::new(0.8, 0.2, 1.0), Vec3::NEG_Z);
        let rec = mesh.hit(&ray, Interval::new(0.001, f32::INFINITY)).unwrap();
        assert_eq!(rec.triangle, Some(0));

        let ray = Ray::new(Vec3::new(0.2, 0.8, 1.0), Vec3::NEG_Z);
        let rec = mesh.hit(&ray, Interval::new(0.001, f32::INFINITY)).unwrap();
        assert_eq!(rec.triangle, Some(1));
        assert!((rec.t - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mesh_keeps_closest_triangle() {
        let mut tris = quad();
        // Second copy of the quad, closer to the ray origin
        tris.extend(quad().into_iter().map(|t| t.map(|v| v + Vec3::new(0.0, 0.0, 0.5))));
        let mut mesh = resolved(StaticMesh::from_triangles(tris, "grey"));
        mesh.pre_render();

        let ray = Ray::new(Vec3::new(0.8, 0.2, 1.0), Vec3::NEG_Z);
        let rec = mesh.hit(&ray, Interval::new(0.001, f32::INFINITY)).unwrap();
        assert!((rec.t - 0.5).abs() < 1e-6);
        assert_eq!(rec.triangle, Some(2));
    }

    #[test]
    fn test_mesh_not_hit_before_pre_render() {
        let mesh = resolved(StaticMesh::from_triangles(quad(), "grey"));
        let ray = Ray::new(Vec3::new(0.5, 0.2, 1.0), Vec3::NEG_Z);
        assert!(mesh.hit(&ray, Interval::new(0.001, f32::INFINITY)).is_none());
    }

    #[test]
    fn test_triangles_from_indexed_skips_invalid() {
        let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::ONE];
        let indices = vec![0, 1, 2, 1, 3, 2, 0, 9, 1];
        let triangles = triangles_from_indexed(&positions, &indices);

        assert_eq!(triangles.len(), 2, "Should extract 2 triangles");
        assert_eq!(triangles[1], [Vec3::X, Vec3::ONE, Vec3::Y]);
    }

    #[test]
    fn test_load_without_source_fails() {
        let mut mesh = StaticMesh::from_triangles(Vec::new(), "grey");
        assert!(matches!(
            mesh.load(Path::new(".")),
            Err(SceneError::MissingMeshSource(_))
        ));
    }

    #[test]
    fn test_load_obj_file() {
        let dir = std::env::temp_dir().join(format!("ember_mesh_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("quad.obj"),
            "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n",
        )
        .unwrap();

        let mut mesh = StaticMesh::new("quad.obj", "grey");
        let count = mesh.load(&dir).unwrap();

        assert_eq!(count, 2);
        assert!(mesh.is_loaded());
        std::fs::remove_dir_all(&dir).ok();
    }
}
