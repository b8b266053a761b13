//! # Scene collaborator boundary
//!
//! The render core only reads the scene: an ordered list of
//! [`RenderableObject`]s, each with a transform, a mesh handle, a bounding
//! radius and an [`ObjectKind`] whose [`ShaderVariant`] is resolved once when
//! the kind is set. Meshes and textures are uploaded through the scene so it
//! can release them deterministically.

pub mod object;
pub mod scene;
pub mod vertex;

// Re-export main types
pub use object::{ObjectKind, RenderableObject, ShaderVariant};
pub use scene::{MeshHandle, Scene, SceneStatistics};
pub use vertex::Vertex3D;
