//! Renderable objects as seen by the render core

use cgmath::{Matrix4, SquareMatrix};

use crate::gfx::camera::frustum::BoundingSphere;
use crate::gfx::rendering::device::ShaderProgram;
use crate::gfx::resources::handles::MeshKey;
use crate::gfx::resources::material::MaterialId;

/// What kind of surface an object has
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKind {
    /// Primitive with a single flat color and the neutral specular response
    Flat { color: [f32; 4] },
    /// Object shaded through a named material (albedo texture, specular)
    Textured { material: MaterialId },
}

/// Geometry-pass shader variant, fixed when the object's kind is set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderVariant {
    FlatColor,
    Textured,
}

impl ShaderVariant {
    pub fn program(self) -> ShaderProgram {
        match self {
            ShaderVariant::FlatColor => ShaderProgram::GeometryFlat,
            ShaderVariant::Textured => ShaderProgram::GeometryTextured,
        }
    }
}

impl From<&ObjectKind> for ShaderVariant {
    fn from(kind: &ObjectKind) -> Self {
        match kind {
            ObjectKind::Flat { .. } => ShaderVariant::FlatColor,
            ObjectKind::Textured { .. } => ShaderVariant::Textured,
        }
    }
}

/// An opaque object owned by the scene
#[derive(Debug, Clone)]
pub struct RenderableObject {
    pub name: String,
    pub transform: Matrix4<f32>,
    pub mesh: MeshKey,
    /// Radius of the mesh's bounding sphere in object space
    pub bounding_radius: f32,
    pub visible: bool,
    /// Whether the object occludes lights in shadow passes
    pub cast_shadows: bool,
    kind: ObjectKind,
    variant: ShaderVariant,
}

impl RenderableObject {
    pub fn new(name: &str, mesh: MeshKey, bounding_radius: f32, kind: ObjectKind) -> Self {
        let variant = ShaderVariant::from(&kind);
        Self {
            name: name.to_string(),
            transform: Matrix4::identity(),
            mesh,
            bounding_radius,
            visible: true,
            cast_shadows: true,
            kind,
            variant,
        }
    }

    pub fn flat(name: &str, mesh: MeshKey, bounding_radius: f32, color: [f32; 4]) -> Self {
        Self::new(name, mesh, bounding_radius, ObjectKind::Flat { color })
    }

    pub fn textured(name: &str, mesh: MeshKey, bounding_radius: f32, material: &str) -> Self {
        Self::new(
            name,
            mesh,
            bounding_radius,
            ObjectKind::Textured {
                material: material.to_string(),
            },
        )
    }

    pub fn with_transform(mut self, transform: Matrix4<f32>) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_cast_shadows(mut self, cast_shadows: bool) -> Self {
        self.cast_shadows = cast_shadows;
        self
    }

    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    pub fn variant(&self) -> ShaderVariant {
        self.variant
    }

    /// Replaces the kind and re-resolves the shader variant
    pub fn set_kind(&mut self, kind: ObjectKind) {
        self.variant = ShaderVariant::from(&kind);
        self.kind = kind;
    }

    pub fn bounding_sphere(&self) -> BoundingSphere {
        BoundingSphere::transformed(self.bounding_radius, &self.transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_variant_follows_kind() {
        let mut meshes: SlotMap<MeshKey, ()> = SlotMap::with_key();
        let mesh = meshes.insert(());

        let mut object = RenderableObject::flat("cube", mesh, 1.0, [1.0; 4]);
        assert_eq!(object.variant(), ShaderVariant::FlatColor);

        object.set_kind(ObjectKind::Textured {
            material: "brick".into(),
        });
        assert_eq!(object.variant(), ShaderVariant::Textured);
        assert_eq!(object.variant().program(), ShaderProgram::GeometryTextured);
    }
}
