//! Unified surface material and the id -> material registry.
//!
//! There is no material hierarchy: diffuse, metal, glass and lights are
//! all one struct whose per-bounce behavior is picked stochastically by
//! the integrator from the probabilities stored here.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ember_math::Vec3;
use serde::{Deserialize, Serialize};

use crate::hash_vec3;

/// Color type alias (RGB, linear, usually 0-1 but emission may exceed 1)
pub type Color = Vec3;

/// A surface material.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    /// Diffuse albedo
    pub base_color: Color,
    /// Emitted radiance, zero for everything that is not a light
    pub emitted_color: Color,
    /// Diffuse (0) to mirror (1) blend factor
    pub smoothness: f32,
    /// Chance that a non-refracting bounce is a gloss bounce
    pub gloss_probability: f32,
    /// Tint applied on gloss bounces
    pub gloss_color: Color,
    /// Chance that a bounce refracts through the surface
    pub refraction_probability: f32,
    /// Index of refraction, >= 1
    pub refraction_index: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: Color::splat(0.5),
            emitted_color: Color::ZERO,
            smoothness: 0.0,
            gloss_probability: 0.0,
            gloss_color: Color::ONE,
            refraction_probability: 0.0,
            refraction_index: 1.5,
        }
    }
}

impl Material {
    /// Plain diffuse surface.
    pub fn diffuse(base_color: Color) -> Self {
        Self {
            base_color,
            ..Default::default()
        }
    }

    /// Polished metal: every bounce is a gloss bounce tinted by `color`.
    pub fn metal(color: Color, smoothness: f32) -> Self {
        Self {
            base_color: color,
            gloss_color: color,
            gloss_probability: 1.0,
            smoothness,
            ..Default::default()
        }
    }

    /// Clear dielectric that always refracts.
    pub fn glass(refraction_index: f32, smoothness: f32) -> Self {
        Self {
            base_color: Color::ONE,
            refraction_probability: 1.0,
            refraction_index,
            smoothness,
            ..Default::default()
        }
    }

    /// Area light.
    pub fn light(emitted_color: Color) -> Self {
        Self {
            base_color: Color::ZERO,
            emitted_color,
            ..Default::default()
        }
    }

    /// Check if this material emits light.
    pub fn is_emissive(&self) -> bool {
        self.emitted_color.max_element() > 0.0
    }

    /// Copy with every scalar clamped into its valid range.
    pub fn sanitized(&self) -> Self {
        Self {
            smoothness: self.smoothness.clamp(0.0, 1.0),
            gloss_probability: self.gloss_probability.clamp(0.0, 1.0),
            refraction_probability: self.refraction_probability.clamp(0.0, 1.0),
            refraction_index: self.refraction_index.max(1.0),
            ..self.clone()
        }
    }
}

impl Hash for Material {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_vec3(self.base_color, state);
        hash_vec3(self.emitted_color, state);
        self.smoothness.to_bits().hash(state);
        self.gloss_probability.to_bits().hash(state);
        hash_vec3(self.gloss_color, state);
        self.refraction_probability.to_bits().hash(state);
        self.refraction_index.to_bits().hash(state);
    }
}

/// Resolves material ids to shared material references.
///
/// Implemented by whoever owns the materials (the editor, a scene file).
/// Returned materials must outlive every scene clone that binds them.
pub trait MaterialRegistry {
    fn lookup(&self, id: &str) -> Option<Arc<Material>>;
}

/// A named collection of materials, the default registry.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialLibrary {
    materials: BTreeMap<String, Arc<Material>>,
}

impl MaterialLibrary {
    /// Create an empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a material, returning the shared handle.
    pub fn insert(&mut self, id: impl Into<String>, material: Material) -> Arc<Material> {
        let material = Arc::new(material.sanitized());
        self.materials.insert(id.into(), Arc::clone(&material));
        material
    }

    /// Number of materials.
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    /// Check if the library is empty.
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Iterate over ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.materials.keys().map(String::as_str)
    }
}

impl MaterialRegistry for MaterialLibrary {
    fn lookup(&self, id: &str) -> Option<Arc<Material>> {
        self.materials.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emissive_flag() {
        assert!(Material::light(Color::splat(4.0)).is_emissive());
        assert!(!Material::diffuse(Color::ONE).is_emissive());
        assert!(!Material::metal(Color::ONE, 0.9).is_emissive());
    }

    #[test]
    fn test_sanitized_clamps_ranges() {
        let wild = Material {
            smoothness: 2.0,
            gloss_probability: -1.0,
            refraction_probability: 7.0,
            refraction_index: 0.2,
            ..Default::default()
        };
        let clean = wild.sanitized();

        assert_eq!(clean.smoothness, 1.0);
        assert_eq!(clean.gloss_probability, 0.0);
        assert_eq!(clean.refraction_probability, 1.0);
        assert_eq!(clean.refraction_index, 1.0);
    }

    #[test]
    fn test_library_lookup_shares_material() {
        let mut library = MaterialLibrary::new();
        let red = library.insert("red", Material::diffuse(Color::new(1.0, 0.0, 0.0)));

        let found = library.lookup("red").expect("red is registered");
        assert!(Arc::ptr_eq(&red, &found));
        assert!(library.lookup("blue").is_none());
        assert_eq!(library.ids().collect::<Vec<_>>(), vec!["red"]);
    }

    #[test]
    fn test_library_json_roundtrip() {
        let mut library = MaterialLibrary::new();
        library.insert("glass", Material::glass(1.5, 0.8));
        library.insert("lamp", Material::light(Color::new(4.0, 3.5, 3.0)));

        let json = serde_json::to_string(&library).unwrap();
        let back: MaterialLibrary = serde_json::from_str(&json).unwrap();

        assert_eq!(back.len(), 2);
        assert_eq!(*back.lookup("glass").unwrap(), *library.lookup("glass").unwrap());
        assert_eq!(*back.lookup("lamp").unwrap(), *library.lookup("lamp").unwrap());
    }
}
