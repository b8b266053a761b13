//! Material system for the geometry pass
//!
//! Materials are stored centrally in a [`MaterialManager`] and objects
//! reference them by ID. Lookups never fail: an unknown ID resolves to the
//! neutral default material so a missing asset still renders.

use std::collections::HashMap;

use crate::gfx::resources::handles::TextureKey;

/// Material ID for referencing materials
pub type MaterialId = String;

/// Name under which the neutral material is registered
pub const DEFAULT_MATERIAL_ID: &str = "default";

/// Surface description written into the G-buffer
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    /// Linear RGBA albedo, multiplied with the albedo texture
    pub albedo: [f32; 4],
    /// Specular strength stored in the albedo attachment's alpha
    pub specular: f32,
    /// Blinn-Phong exponent stored in the normal attachment's w
    pub shininess: f32,
    /// Decoded albedo texture; `None` samples the 1x1 white fallback
    pub albedo_texture: Option<TextureKey>,
}

impl Default for Material {
    fn default() -> Self {
        Self::neutral()
    }
}

impl Material {
    pub fn new(name: &str, albedo: [f32; 4]) -> Self {
        Self {
            name: name.to_string(),
            albedo,
            ..Self::neutral()
        }
    }

    /// Mid-grey, mildly specular, untextured
    pub fn neutral() -> Self {
        Self {
            name: DEFAULT_MATERIAL_ID.to_string(),
            albedo: [0.8, 0.8, 0.8, 1.0],
            specular: 0.5,
            shininess: 32.0,
            albedo_texture: None,
        }
    }

    /// Builder pattern: Set albedo from RGB values
    pub fn with_color(mut self, r: f32, g: f32, b: f32) -> Self {
        self.albedo = [r, g, b, self.albedo[3]];
        self
    }

    pub fn with_specular(mut self, specular: f32) -> Self {
        self.specular = specular.clamp(0.0, 1.0);
        self
    }

    pub fn with_shininess(mut self, shininess: f32) -> Self {
        self.shininess = shininess.max(1.0);
        self
    }

    pub fn with_texture(mut self, texture: TextureKey) -> Self {
        self.albedo_texture = Some(texture);
        self
    }
}

/// Result of a material lookup
#[derive(Debug, Clone, Copy)]
pub struct ResolvedMaterial<'a> {
    pub material: &'a Material,
    /// True when the requested material was missing
    pub fallback: bool,
}

/// Manages all materials of a scene
pub struct MaterialManager {
    materials: HashMap<MaterialId, Material>,
    default_material: Material,
}

impl MaterialManager {
    /// Creates a new material manager holding the neutral default
    pub fn new() -> Self {
        Self {
            materials: HashMap::new(),
            default_material: Material::neutral(),
        }
    }

    /// Adds or replaces a material, keyed by its name
    ///
    /// A material named [`DEFAULT_MATERIAL_ID`] replaces the fallback.
    pub fn add_material(&mut self, material: Material) {
        if material.name == DEFAULT_MATERIAL_ID {
            self.default_material = material;
        } else {
            self.materials.insert(material.name.clone(), material);
        }
    }

    pub fn get_material(&self, id: &str) -> Option<&Material> {
        if id == DEFAULT_MATERIAL_ID {
            return Some(&self.default_material);
        }
        self.materials.get(id)
    }

    pub fn get_material_mut(&mut self, id: &str) -> Option<&mut Material> {
        if id == DEFAULT_MATERIAL_ID {
            return Some(&mut self.default_material);
        }
        self.materials.get_mut(id)
    }

    /// Removes a material; the default cannot be removed
    pub fn remove_material(&mut self, id: &str) -> Option<Material> {
        if id == DEFAULT_MATERIAL_ID {
            return None;
        }
        self.materials.remove(id)
    }

    pub fn get_default_material(&self) -> &Material {
        &self.default_material
    }

    /// Gets material for an object with fallback to the default
    pub fn resolve(&self, id: &str) -> ResolvedMaterial<'_> {
        match self.get_material(id) {
            Some(material) => ResolvedMaterial {
                material,
                fallback: false,
            },
            None => ResolvedMaterial {
                material: self.get_default_material(),
                fallback: true,
            },
        }
    }

    /// Lists the IDs of all registered (non-default) materials
    pub fn list_materials(&self) -> Vec<&MaterialId> {
        self.materials.keys().collect()
    }

    /// Every texture referenced by a material
    pub fn textures(&self) -> impl Iterator<Item = TextureKey> + '_ {
        self.materials
            .values()
            .chain(std::iter::once(&self.default_material))
            .filter_map(|m| m.albedo_texture)
    }
}

impl Default for MaterialManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_material_resolves_to_neutral() {
        let manager = MaterialManager::new();
        let resolved = manager.resolve("does-not-exist");
        assert!(resolved.fallback);
        assert_eq!(resolved.material, &Material::neutral());
    }

    #[test]
    fn test_added_material_resolves() {
        let mut manager = MaterialManager::new();
        manager.add_material(Material::new("brick", [0.6, 0.2, 0.1, 1.0]).with_specular(0.1));

        let resolved = manager.resolve("brick");
        assert!(!resolved.fallback);
        assert_eq!(resolved.material.specular, 0.1);
    }

    #[test]
    fn test_default_cannot_be_removed() {
        let mut manager = MaterialManager::new();
        assert!(manager.remove_material(DEFAULT_MATERIAL_ID).is_none());
        assert!(manager.get_material(DEFAULT_MATERIAL_ID).is_some());
    }
}
