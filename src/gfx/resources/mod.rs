// src/gfx/resources/mod.rs
//! GPU resource handles, materials and backend textures

pub mod handles;
pub mod material;
pub mod texture_resource;

// Re-export main types
pub use handles::{AllocationStats, MeshKey, TextureKey};
pub use material::{Material, MaterialManager};
pub use texture_resource::TextureResource;
