//! Ember command-line renderer.
//!
//! Usage: `ember [scene.json] [passes]`
//!
//! Without a scene file a built-in demo room is rendered. Each pass is run
//! on the job's worker thread and accumulated; the final pass is written to
//! the configured output path.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ember_core::{
    CameraConfig, Color, Environment, Material, MaterialLibrary, Rect, RendererConfig, Scene, SceneFile, Sphere, Xy, Xz, Yz,
};
use ember_math::{Vec2, Vec3};
use ember_renderer::{PersistenceSink, RenderJob};

/// Writes RGB frames with the `image` crate; the format follows the extension.
struct ImageSink;

impl PersistenceSink for ImageSink {
    fn save(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        path: &Path,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let image = image::RgbImage::from_raw(width, height, rgb.to_vec())
            .ok_or("pixel buffer does not match the frame size")?;
        image.save(path)?;
        Ok(())
    }
}

fn demo_scene() -> SceneFile {
    let mut materials = MaterialLibrary::new();
    materials.insert("white", Material::diffuse(Color::splat(0.73)));
    materials.insert("red", Material::diffuse(Color::new(0.65, 0.05, 0.05)));
    materials.insert("green", Material::diffuse(Color::new(0.12, 0.45, 0.15)));
    materials.insert("mirror", Material::metal(Color::splat(0.9), 0.95));
    materials.insert("glass", Material::glass(1.5, 1.0));
    materials.insert("lamp", Material::light(Color::splat(15.0)));

    let mut scene = Scene::named("demo_room");
    let lo = Vec2::splat(-2.0);
    let hi = Vec2::splat(2.0);
    scene.add(Rect::<Xz>::new(lo, hi, -2.0, "white"));
    scene.add(Rect::<Xz>::new(lo, hi, 2.0, "white"));
    scene.add(Rect::<Xy>::new(lo, hi, -2.0, "white"));
    scene.add(Rect::<Yz>::new(lo, hi, -2.0, "red"));
    scene.add(Rect::<Yz>::new(lo, hi, 2.0, "green"));
    scene.add(Rect::<Xz>::new(Vec2::splat(-0.5), Vec2::splat(0.5), 1.99, "lamp"));
    scene.add(Sphere::new(Vec3::new(-0.8, -1.3, -0.6), 0.7, "mirror"));
    scene.add(Sphere::new(Vec3::new(0.9, -1.4, 0.4), 0.6, "glass"));

    let camera = CameraConfig {
        look_from: Vec3::new(0.0, 0.0, 7.5),
        look_dir: Vec3::NEG_Z,
        fov: 40.0,
        aspect_w: 1.0,
        aspect_h: 1.0,
        ..Default::default()
    };

    let renderer = RendererConfig {
        width: 400,
        height: 400,
        rays_per_pixel: 16,
        environment: Environment {
            enabled: false,
            ..Default::default()
        },
        save_output: true,
        ..Default::default()
    };

    scene.update_materials(&materials);
    SceneFile {
        materials,
        scene,
        camera,
        renderer,
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let mut args = std::env::args().skip(1);
    let file = match args.next() {
        Some(path) => SceneFile::load(&path).with_context(|| format!("Failed to load scene {}", path))?,
        None => {
            log::info!("No scene file given, rendering the demo room");
            demo_scene()
        }
    };
    let passes: u32 = match args.next() {
        Some(n) => n.parse().with_context(|| format!("Invalid pass count {:?}", n))?,
        None => 4,
    };
    if passes == 0 {
        bail!("Pass count must be at least 1");
    }

    let job = RenderJob::new().context("Failed to start render job")?;
    job.set_persistence_sink(Box::new(ImageSink));

    // Only the final pass is written out
    let mut renderer = file.renderer.clone();
    let save_output = renderer.save_output;
    renderer.save_output = false;

    for pass in 0..passes {
        if pass + 1 == passes {
            renderer.save_output = save_output;
        }
        if !job.set_config(&renderer, &file.scene, &file.camera) {
            bail!("Render job is still busy");
        }
        if !job.render_single_async() {
            bail!("Render job refused pass {}", pass);
        }
        job.wait_until_idle(Duration::from_millis(5));
        log::info!(
            "Pass {}/{} done in {:.1} ms",
            pass + 1,
            passes,
            job.get_render_time() as f64 / 1000.0
        );
    }

    let expected = if renderer.reuse_buffers { passes } else { 1 };
    if job.accumulated_passes() != expected {
        bail!("Rendered {} of {} passes, see log for errors", job.accumulated_passes(), expected);
    }
    if save_output {
        log::info!(
            "Wrote {} ({:.1} ms)",
            renderer.output_path.display(),
            job.get_save_time() as f64 / 1000.0
        );
    }
    Ok(())
}
