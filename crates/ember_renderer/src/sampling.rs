//! Deterministic random numbers for the integrator.
//!
//! Every pixel owns a PCG stream selected by its index, so the samples a
//! pixel draws do not depend on which thread or chunk renders it.

use ember_math::{Vec2, Vec3};
use rand::Rng;
use rand_pcg::Pcg32;

/// Generator for one pixel of one pass.
pub fn pixel_rng(seed: u64, pass: u32, pixel_index: u64) -> Pcg32 {
    let state = seed ^ (pass as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    Pcg32::new(state, pixel_index)
}

/// Uniform float in `[0, 1)`.
#[inline]
pub fn gen_f32<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    rng.gen::<f32>()
}

/// Uniformly distributed unit vector, by rejection sampling the unit ball.
pub fn random_unit_vector<R: Rng + ?Sized>(rng: &mut R) -> Vec3 {
    loop {
        let v = Vec3::new(
            gen_f32(rng) * 2.0 - 1.0,
            gen_f32(rng) * 2.0 - 1.0,
            gen_f32(rng) * 2.0 - 1.0,
        );
        let len_sq = v.length_squared();
        if len_sq > 1e-6 && len_sq <= 1.0 {
            return v / len_sq.sqrt();
        }
    }
}

/// Point inside the unit disk.
pub fn random_in_unit_disk<R: Rng + ?Sized>(rng: &mut R) -> Vec2 {
    loop {
        let p = Vec2::new(gen_f32(rng) * 2.0 - 1.0, gen_f32(rng) * 2.0 - 1.0);
        if p.length_squared() < 1.0 {
            return p;
        }
    }
}

/// Cosine-weighted direction around `normal`.
///
/// Falls back to the normal when the sum nearly cancels.
pub fn cosine_direction<R: Rng + ?Sized>(normal: Vec3, rng: &mut R) -> Vec3 {
    let direction = normal + random_unit_vector(rng);
    if direction.length_squared() < 1e-8 {
        normal
    } else {
        direction.normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_rng_is_deterministic() {
        let mut a = pixel_rng(7, 3, 1234);
        let mut b = pixel_rng(7, 3, 1234);
        for _ in 0..16 {
            assert_eq!(gen_f32(&mut a).to_bits(), gen_f32(&mut b).to_bits());
        }
    }

    #[test]
    fn test_pixel_rng_streams_differ() {
        let mut a = pixel_rng(7, 0, 0);
        let mut b = pixel_rng(7, 0, 1);
        let mut c = pixel_rng(7, 1, 0);
        let xa: Vec<u32> = (0..4).map(|_| a.gen()).collect();
        let xb: Vec<u32> = (0..4).map(|_| b.gen()).collect();
        let xc: Vec<u32> = (0..4).map(|_| c.gen()).collect();
        assert_ne!(xa, xb);
        assert_ne!(xa, xc);
    }

    #[test]
    fn test_samples_stay_in_domain() {
        let mut rng = pixel_rng(1, 0, 0);
        for _ in 0..256 {
            let v = random_unit_vector(&mut rng);
            assert!((v.length() - 1.0).abs() < 1e-4);

            let d = random_in_unit_disk(&mut rng);
            assert!(d.length_squared() < 1.0);

            let c = cosine_direction(Vec3::Y, &mut rng);
            assert!(c.dot(Vec3::Y) >= -1e-4);
        }
    }
}
