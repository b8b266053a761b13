use log::debug;

use crate::error::RenderResult;
use crate::gfx::camera::frustum::BoundingSphere;
use crate::gfx::geometry::MeshData;
use crate::gfx::rendering::device::RenderDevice;
use crate::gfx::resources::handles::{MeshKey, TextureKey};
use crate::gfx::resources::material::{Material, MaterialManager};

use super::object::RenderableObject;

/// An uploaded mesh together with its object-space bounding radius
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshHandle {
    pub key: MeshKey,
    pub bounding_radius: f32,
}

/// Ordered collection of opaque objects plus the materials they reference
///
/// The scene owns every mesh and texture it uploaded; [`Scene::release`]
/// returns them to the device.
#[derive(Default)]
pub struct Scene {
    pub objects: Vec<RenderableObject>,
    pub material_manager: MaterialManager,
    meshes: Vec<MeshKey>,
    textures: Vec<TextureKey>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads a mesh through the device; the scene keeps ownership
    pub fn upload_mesh<D: RenderDevice>(
        &mut self,
        device: &mut D,
        label: &str,
        data: &MeshData,
    ) -> RenderResult<MeshHandle> {
        let key = device.create_mesh(label, data)?;
        self.meshes.push(key);
        debug!(
            "Uploaded mesh '{}' ({} vertices, {} triangles)",
            label,
            data.vertex_count(),
            data.triangle_count()
        );
        Ok(MeshHandle {
            key,
            bounding_radius: data.bounding_radius,
        })
    }

    /// Uploads decoded RGBA8 pixels as a material texture
    pub fn upload_texture<D: RenderDevice>(
        &mut self,
        device: &mut D,
        label: &str,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> RenderResult<TextureKey> {
        let key = device.create_texture_rgba8(label, width, height, pixels)?;
        self.textures.push(key);
        Ok(key)
    }

    /// Adds an object and returns its index
    pub fn add_object(&mut self, object: RenderableObject) -> usize {
        self.objects.push(object);
        self.objects.len() - 1
    }

    pub fn add_material(&mut self, material: Material) {
        self.material_manager.add_material(material);
    }

    pub fn get_object(&self, index: usize) -> Option<&RenderableObject> {
        self.objects.get(index)
    }

    pub fn get_object_mut(&mut self, index: usize) -> Option<&mut RenderableObject> {
        self.objects.get_mut(index)
    }

    pub fn find_object_mut(&mut self, name: &str) -> Option<&mut RenderableObject> {
        self.objects.iter_mut().find(|o| o.name == name)
    }

    pub fn visible_objects(&self) -> impl Iterator<Item = &RenderableObject> {
        self.objects.iter().filter(|o| o.visible)
    }

    /// Sphere enclosing every visible object, `None` for an empty scene
    pub fn bounding_sphere(&self) -> Option<BoundingSphere> {
        self.visible_objects()
            .map(RenderableObject::bounding_sphere)
            .reduce(|acc, sphere| acc.union(&sphere))
    }

    /// Releases every mesh and texture this scene uploaded
    pub fn release<D: RenderDevice>(&mut self, device: &mut D) {
        for key in self.meshes.drain(..) {
            device.destroy_mesh(key);
        }
        for key in self.textures.drain(..) {
            device.destroy_target(key);
        }
        self.objects.clear();
    }

    /// Gets statistics about the scene
    pub fn get_statistics(&self) -> SceneStatistics {
        SceneStatistics {
            object_count: self.objects.len(),
            visible_count: self.visible_objects().count(),
            material_count: self.material_manager.list_materials().len(),
            mesh_count: self.meshes.len(),
        }
    }
}

/// Scene statistics for debugging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneStatistics {
    pub object_count: usize,
    pub visible_count: usize,
    pub material_count: usize,
    pub mesh_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::geometry::generate_cube;
    use crate::gfx::rendering::headless::HeadlessDevice;
    use approx::assert_relative_eq;
    use cgmath::{Matrix4, Vector3};

    #[test]
    fn test_bounding_sphere_ignores_hidden_objects() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut scene = Scene::new();
        let cube = scene.upload_mesh(&mut device, "cube", &generate_cube()).unwrap();

        scene.add_object(
            RenderableObject::flat("a", cube.key, 1.0, [1.0; 4])
                .with_transform(Matrix4::from_translation(Vector3::new(-2.0, 0.0, 0.0))),
        );
        scene.add_object(
            RenderableObject::flat("b", cube.key, 1.0, [1.0; 4])
                .with_transform(Matrix4::from_translation(Vector3::new(2.0, 0.0, 0.0))),
        );
        let hidden = scene.add_object(
            RenderableObject::flat("c", cube.key, 1.0, [1.0; 4])
                .with_transform(Matrix4::from_translation(Vector3::new(50.0, 0.0, 0.0))),
        );
        scene.objects[hidden].visible = false;

        let sphere = scene.bounding_sphere().unwrap();
        assert_relative_eq!(sphere.radius, 3.0);
        assert_relative_eq!(sphere.center.x, 0.0);
    }

    #[test]
    fn test_release_returns_meshes_to_device() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut scene = Scene::new();
        scene.upload_mesh(&mut device, "cube", &generate_cube()).unwrap();
        scene
            .upload_texture(&mut device, "white", 1, 1, &[255; 4])
            .unwrap();
        assert_eq!(device.mesh_stats().live, 1);

        scene.release(&mut device);
        assert_eq!(device.mesh_stats().live, 0);
        assert_eq!(scene.get_statistics().mesh_count, 0);
    }

    #[test]
    fn test_empty_scene_has_no_bounds() {
        assert!(Scene::new().bounding_sphere().is_none());
    }
}
