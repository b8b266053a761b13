//! # Umbra Prelude
//!
//! Commonly used types in one import:
//!
//! ```rust
//! use umbra::prelude::*;
//! ```

// Application and configuration
pub use crate::app::Viewer;
pub use crate::config::{LightingConfig, PostProcessConfig, RenderConfig, ShadowConfig};
pub use crate::error::{RenderError, RenderResult};

// Scene and geometry
pub use crate::gfx::camera::{BoundingSphere, Camera, Frustum};
pub use crate::gfx::geometry::{generate_cube, generate_plane, generate_sphere, MeshData};
pub use crate::gfx::resources::material::Material;
pub use crate::gfx::scene::{ObjectKind, RenderableObject, Scene};

// Lights and frame pipeline
pub use crate::gfx::lighting::{DirectionalFalloff, LightDesc, LightId, LightKind};
pub use crate::gfx::rendering::{
    AntiAliasMode, FrameOutcome, FrameReport, HeadlessDevice, RenderDevice, Renderer, ShaderSet,
    ToneMapping, WgpuDevice,
};

// Common external dependencies
pub use cgmath::{Deg, Matrix4, Point3, Vector3};
