//! JSON scene files bundling materials, scene, camera and renderer settings.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::camera::CameraConfig;
use crate::error::{SceneError, SceneResult};
use crate::material::MaterialLibrary;
use crate::scene::Scene;
use crate::settings::RendererConfig;

/// Everything a host persists between sessions.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneFile {
    pub materials: MaterialLibrary,
    pub scene: Scene,
    pub camera: CameraConfig,
    pub renderer: RendererConfig,
}

impl SceneFile {
    /// Load a scene file and the meshes it references.
    ///
    /// Mesh paths are resolved relative to the scene file. Materials are
    /// resolved too, so the returned scene is ready for `build_boxes`.
    pub fn load(path: impl AsRef<Path>) -> SceneResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| SceneError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut file = Self::from_json(&text)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        file.scene.load_meshes(base_dir)?;
        file.scene.update_materials(&file.materials);

        log::info!(
            "Loaded scene '{}' from {:?}: {} objects, {} materials",
            file.scene.name,
            path,
            file.scene.len(),
            file.materials.len()
        );
        Ok(file)
    }

    /// Parse without touching the filesystem.
    pub fn from_json(text: &str) -> SceneResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> SceneResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the scene file to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> SceneResult<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?).map_err(|source| SceneError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Saved scene '{}' to {:?}", self.scene.name, path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hittable::Hittable;
    use crate::material::{Color, Material};
    use crate::mesh::StaticMesh;
    use crate::rect::{Rect, Yz};
    use crate::settings::{Backend, ExecutionStrategy};
    use crate::sphere::Sphere;
    use ember_math::{Vec2, Vec3};

    fn sample() -> SceneFile {
        let mut file = SceneFile::default();
        file.materials.insert("grey", Material::diffuse(Color::splat(0.5)));
        file.materials.insert("glass", Material::glass(1.5, 0.9));
        file.materials.insert("lamp", Material::light(Color::new(4.0, 3.0, 2.0)));

        file.scene.name = "sample".into();
        file.scene.add(Sphere::new(Vec3::new(0.0, 1.0, 0.0), 1.0, "glass"));
        file.scene.add(Rect::<Yz>::new(Vec2::new(-1.0, -2.0), Vec2::new(1.0, 2.0), 3.0, "lamp"));
        file.scene.add(
            StaticMesh::new("bunny.obj", "grey").with_transform(Vec3::new(1.0, 0.0, 0.0), Vec3::splat(2.0), 45.0),
        );

        file.camera.fov = 30.0;
        file.camera.projection = 0.25;
        file.renderer.backend = Backend::Bvh;
        file.renderer.execution = ExecutionStrategy::WorkerPool { threads: 2 };
        file
    }

    #[test]
    fn test_json_round_trip_preserves_fields() {
        let file = sample();
        let loaded = SceneFile::from_json(&file.to_json().unwrap()).unwrap();

        assert_eq!(loaded.camera, file.camera);
        assert_eq!(loaded.renderer, file.renderer);
        assert_eq!(loaded.materials.len(), 3);
        assert_eq!(loaded.scene.name, "sample");
        assert_eq!(loaded.scene.len(), 3);

        match &loaded.scene.objects()[2] {
            Hittable::Mesh(mesh) => {
                assert_eq!(mesh.source, "bunny.obj");
                assert_eq!(mesh.scale, Vec3::splat(2.0));
                assert_eq!(mesh.rotation_y, 45.0);
                assert_eq!(mesh.surface.material_id, "grey");
            }
            other => panic!("expected mesh, got {}", other.display_name()),
        }
        match &loaded.scene.objects()[1] {
            Hittable::RectYz(rect) => {
                assert_eq!(rect.k, 3.0);
                assert_eq!(rect.corner1, Vec2::new(1.0, 2.0));
            }
            other => panic!("expected rect, got {}", other.display_name()),
        }
    }

    #[test]
    fn test_loaded_objects_get_fresh_ids() {
        let file = sample();
        let loaded = SceneFile::from_json(&file.to_json().unwrap()).unwrap();
        assert_ne!(loaded.scene.objects()[0].id(), file.scene.objects()[0].id());
    }

    #[test]
    fn test_load_resolves_meshes_and_materials() {
        let dir = std::env::temp_dir().join(format!("ember_scene_file_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("bunny.obj"), "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();

        let path = dir.join("scene.json");
        sample().save(&path).unwrap();
        let loaded = SceneFile::load(&path).unwrap();

        match &loaded.scene.objects()[2] {
            Hittable::Mesh(mesh) => assert_eq!(mesh.triangle_count(), 1),
            other => panic!("expected mesh, got {}", other.display_name()),
        }
        assert!(loaded.scene.objects().iter().all(|o| o.surface().unwrap().material().is_some()));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = SceneFile::load("/definitely/not/here.json");
        assert!(matches!(result, Err(SceneError::Io { .. })));
    }
}
