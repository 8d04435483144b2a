//! Core path tracing integrator.
//!
//! Implements Monte Carlo path tracing with:
//! - A unified stochastic material (refraction, gloss or diffuse per bounce)
//! - Thin-lens depth of field and per-pixel antialiasing jitter
//! - Extended Reinhard tone mapping and gamma correction

use ember_core::{Camera, Color, DebugView, RendererConfig};
use ember_math::{Interval, Ray, Vec2, Vec3};
use rand::Rng;

use crate::query::SceneQuery;
use crate::sampling::{cosine_direction, gen_f32, pixel_rng, random_in_unit_disk};

/// Closest distance a bounce may hit, to avoid self-intersection.
pub const T_MIN: f32 = 0.001;

/// Upper clamp for a single sample, so one firefly cannot dominate a pixel.
pub const MAX_SAMPLE_VALUE: f32 = 64.0;

/// Paths whose throughput falls below this (squared) stop early.
const MIN_THROUGHPUT_SQ: f32 = 1e-6;

/// Compute the color carried back along `ray`.
///
/// Walks at most `config.ray_bounces` bounces. Lights terminate the path;
/// misses pick up the environment.
pub fn trace_path<W, R>(ray: Ray, world: &W, config: &RendererConfig, rng: &mut R) -> Color
where
    W: SceneQuery + ?Sized,
    R: Rng + ?Sized,
{
    let mut ray = ray;
    let mut throughput = Color::ONE;
    let mut color = Color::ZERO;

    for _ in 0..config.ray_bounces {
        let Some(rec) = world.closest_hit(&ray, Interval::new(T_MIN, f32::INFINITY)) else {
            color += config.environment.sample(ray.direction) * throughput;
            break;
        };

        let material = rec.material;
        if material.is_emissive() {
            color += material.emitted_color * throughput;
            break;
        }

        let r1 = gen_f32(rng);
        let r2 = gen_f32(rng);
        let r3 = gen_f32(rng);

        let unit_direction = ray.direction.normalize_or_zero();
        let diffuse = cosine_direction(rec.normal, rng);

        let direction = if r1 < material.refraction_probability {
            let refraction_ratio = if rec.front_face {
                1.0 / material.refraction_index
            } else {
                material.refraction_index
            };
            let cos_theta = (-unit_direction).dot(rec.normal).min(1.0);
            let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();

            let cannot_refract = refraction_ratio * sin_theta > 1.0;
            let specular = if cannot_refract || reflectance(cos_theta, refraction_ratio) > r3 {
                reflect(unit_direction, rec.normal)
            } else {
                refract(unit_direction, rec.normal, refraction_ratio)
            };

            // Rough glass scatters on whichever side the specular ray left
            let rough = if specular.dot(rec.normal) < 0.0 { -diffuse } else { diffuse };
            throughput *= material.base_color;
            specular.lerp(rough, 1.0 - material.smoothness)
        } else {
            let gloss = if r2 < material.gloss_probability { 1.0 } else { 0.0 };
            let reflected = reflect(unit_direction, rec.normal);

            color += material.emitted_color * throughput;
            throughput *= material.base_color.lerp(material.gloss_color, gloss);
            diffuse.lerp(reflected, material.smoothness * gloss)
        };

        let direction = if direction.length_squared() < 1e-12 || !direction.is_finite() {
            rec.normal
        } else {
            direction
        };
        ray = Ray::new(rec.p, direction);

        if throughput.length_squared() < MIN_THROUGHPUT_SQ {
            break;
        }
    }

    color
}

/// Replace NaN components with zero and clamp into `[0, MAX_SAMPLE_VALUE]`.
#[inline]
pub fn sanitize_sample(color: Color) -> Color {
    let fix = |c: f32| if c.is_nan() { 0.0 } else { c.clamp(0.0, MAX_SAMPLE_VALUE) };
    Color::new(fix(color.x), fix(color.y), fix(color.z))
}

/// Render a single pixel: the mean of `rays_per_pixel` jittered samples.
///
/// Row 0 is the top of the image. The random stream depends only on the
/// seed, the pass and the pixel, never on the thread that renders it.
pub fn render_pixel<W>(world: &W, camera: &Camera, config: &RendererConfig, pass: u32, x: u32, y: u32) -> Color
where
    W: SceneQuery + ?Sized,
{
    if config.debug_view != DebugView::None {
        return debug_color(world, camera, config, x, y);
    }

    let pixel_index = y as u64 * config.width as u64 + x as u64;
    let mut rng = pixel_rng(config.seed, pass, pixel_index);
    let samples = config.rays_per_pixel.max(1);
    let (width, height) = (config.width.max(1) as f32, config.height.max(1) as f32);

    let mut pixel_color = Color::ZERO;
    for _ in 0..samples {
        let s = (x as f32 + gen_f32(&mut rng)) / width;
        let t = 1.0 - (y as f32 + gen_f32(&mut rng)) / height;
        let lens = if camera.lens_radius() > 0.0 {
            random_in_unit_disk(&mut rng)
        } else {
            Vec2::ZERO
        };

        let ray = camera.ray(s, t, lens);
        pixel_color += sanitize_sample(trace_path(ray, world, config, &mut rng));
    }

    pixel_color / samples as f32
}

/// First-hit inspection colors.
fn debug_color<W>(world: &W, camera: &Camera, config: &RendererConfig, x: u32, y: u32) -> Color
where
    W: SceneQuery + ?Sized,
{
    let s = (x as f32 + 0.5) / config.width.max(1) as f32;
    let t = 1.0 - (y as f32 + 0.5) / config.height.max(1) as f32;
    let ray = camera.ray(s, t, Vec2::ZERO);

    let Some(rec) = world.closest_hit(&ray, Interval::new(T_MIN, f32::INFINITY)) else {
        return Color::ZERO;
    };

    match config.debug_view {
        DebugView::Normals => 0.5 * (rec.normal + Vec3::ONE),
        DebugView::ObjectId => id_color(rec.object_id),
        DebugView::TriangleId => rec.triangle.map_or(Color::ZERO, |tri| id_color(tri as u64 + 1)),
        DebugView::None => Color::ZERO,
    }
}

/// Deterministic, well spread color for an id.
pub fn id_color(id: u64) -> Color {
    // splitmix64 finalizer
    let mut z = id.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;

    let channel = |shift: u32| 0.2 + 0.8 * ((z >> shift) & 0xFF) as f32 / 255.0;
    Color::new(channel(0), channel(8), channel(16))
}

// =============================================================================
// Scattering helpers
// =============================================================================

/// Reflect a vector about a normal.
#[inline]
pub fn reflect(v: Vec3, n: Vec3) -> Vec3 {
    v - 2.0 * v.dot(n) * n
}

/// Refract a unit vector through a surface.
#[inline]
pub fn refract(uv: Vec3, n: Vec3, etai_over_etat: f32) -> Vec3 {
    let cos_theta = (-uv).dot(n).min(1.0);
    let r_out_perp = etai_over_etat * (uv + cos_theta * n);
    let r_out_parallel = -(1.0 - r_out_perp.length_squared()).abs().sqrt() * n;
    r_out_perp + r_out_parallel
}

/// Schlick's approximation for reflectance.
#[inline]
pub fn reflectance(cosine: f32, ratio: f32) -> f32 {
    let r0 = ((1.0 - ratio) / (1.0 + ratio)).powi(2);
    r0 + (1.0 - r0) * (1.0 - cosine).powi(5)
}

// =============================================================================
// Tone mapping and output
// =============================================================================

/// Extended Reinhard: maps `white_point` to exactly 1.
#[inline]
pub fn reinhard_extended(c: f32, white_point: f32) -> f32 {
    let w2 = (white_point * white_point).max(f32::EPSILON);
    c * (1.0 + c / w2) / (1.0 + c)
}

/// Apply gamma correction (gamma = 2.0).
#[inline]
pub fn linear_to_gamma(linear: f32) -> f32 {
    if linear > 0.0 {
        linear.sqrt()
    } else {
        0.0
    }
}

/// Convert a linear color to 8-bit RGB, optionally tone mapping first.
pub fn color_to_rgb(color: Color, white_point: f32, tone_map: bool) -> [u8; 3] {
    let to_byte = |c: f32| {
        let c = if tone_map { reinhard_extended(c.max(0.0), white_point) } else { c };
        (255.0 * linear_to_gamma(c).clamp(0.0, 1.0)) as u8
    };
    [to_byte(color.x), to_byte(color.y), to_byte(color.z)]
}

/// One resolved image in the two channel layouts the sinks need.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    /// Interleaved RGBA, for display
    rgba: Vec<u8>,
    /// Interleaved RGB, for the file encoder
    rgb: Vec<u8>,
}

impl Frame {
    /// Create a new black frame.
    pub fn new(width: u32, height: u32) -> Self {
        let pixels = width as usize * height as usize;
        let mut rgba = vec![0; pixels * 4];
        for alpha in rgba.iter_mut().skip(3).step_by(4) {
            *alpha = 255;
        }
        Self {
            width,
            height,
            rgba,
            rgb: vec![0; pixels * 3],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Buffer for the display sink.
    pub fn display_buffer(&self) -> &[u8] {
        &self.rgba
    }

    /// Buffer for the persistence sink.
    pub fn file_buffer(&self) -> &[u8] {
        &self.rgb
    }

    /// RGBA value at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [self.rgba[i], self.rgba[i + 1], self.rgba[i + 2], self.rgba[i + 3]]
    }

    /// Repaint from an accumulation of `passes` per-pass means.
    pub fn resolve(&mut self, accumulation: &[Color], passes: u32, white_point: f32, tone_map: bool) {
        assert_eq!(
            accumulation.len(),
            self.width as usize * self.height as usize,
            "accumulation buffer does not match frame size"
        );
        let scale = 1.0 / passes.max(1) as f32;

        for (i, sum) in accumulation.iter().enumerate() {
            let [r, g, b] = color_to_rgb(*sum * scale, white_point, tone_map);
            self.rgba[i * 4..i * 4 + 3].copy_from_slice(&[r, g, b]);
            self.rgb[i * 3..i * 3 + 3].copy_from_slice(&[r, g, b]);
        }
    }
}
