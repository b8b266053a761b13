//! G-buffer targets and the geometry pass
//!
//! A single opaque pass rasterizes every frustum-visible object once into
//! position, normal and albedo/specular attachments plus depth. The flat and
//! textured shader variants write the same attachment layout.

use std::collections::HashSet;

use log::warn;

use crate::error::RenderResult;
use crate::gfx::camera::camera_utils::{convert_matrix4_to_array, Camera};
use crate::gfx::camera::frustum::Frustum;
use crate::gfx::rendering::device::{
    ColorAttachment, Draw, DrawUniform, LoadOp, PassDesc, RenderDevice, TargetDesc, TargetFormat,
};
use crate::gfx::resources::handles::TextureKey;
use crate::gfx::scene::{ObjectKind, RenderableObject, Scene, ShaderVariant};

/// Same-size attachments written by the geometry pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GBuffer {
    /// Rgba16Float: world xyz, w = 1 where geometry was drawn
    ///
    /// After an MSAA resolve edge texels hold `coverage * xyz` and
    /// `w = coverage`, so readers divide by w.
    pub position: TextureKey,
    /// Rgba16Float: world normal xyz, w = shininess
    pub normal: TextureKey,
    /// Rgba8Unorm: albedo rgb, a = specular strength
    pub albedo: TextureKey,
    pub depth: TextureKey,
    width: u32,
    height: u32,
    sample_count: u32,
}

impl GBuffer {
    /// Allocates all four attachments or none
    pub fn allocate<D: RenderDevice>(
        device: &mut D,
        label: &str,
        width: u32,
        height: u32,
        sample_count: u32,
    ) -> RenderResult<Self> {
        let layout = [
            ("position", TargetFormat::Rgba16Float),
            ("normal", TargetFormat::Rgba16Float),
            ("albedo", TargetFormat::Rgba8Unorm),
            ("depth", TargetFormat::Depth32Float),
        ];

        let mut keys = Vec::with_capacity(layout.len());
        for (name, format) in layout {
            let desc = TargetDesc::new(&format!("{label}_{name}"), width, height, format)
                .with_samples(sample_count);
            match device.create_target(&desc) {
                Ok(key) => keys.push(key),
                Err(err) => {
                    for key in keys {
                        device.destroy_target(key);
                    }
                    return Err(err);
                }
            }
        }

        Ok(Self {
            position: keys[0],
            normal: keys[1],
            albedo: keys[2],
            depth: keys[3],
            width,
            height,
            sample_count,
        })
    }

    pub fn release<D: RenderDevice>(self, device: &mut D) {
        for key in self.targets() {
            device.destroy_target(key);
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn color_targets(&self) -> [TextureKey; 3] {
        [self.position, self.normal, self.albedo]
    }

    pub fn targets(&self) -> [TextureKey; 4] {
        [self.position, self.normal, self.albedo, self.depth]
    }
}

/// Per-frame statistics of the geometry pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeometryStats {
    pub drawn: usize,
    pub culled: usize,
    pub material_fallbacks: usize,
}

/// Builds and submits the geometry pass
#[derive(Default)]
pub struct GeometryRenderer {
    /// Objects already reported as using the neutral material
    warned: HashSet<String>,
}

impl GeometryRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draws for every visible object inside the frustum, grouped by variant
    pub fn collect_draws<D: RenderDevice>(
        &mut self,
        device: &D,
        scene: &Scene,
        frustum: &Frustum,
    ) -> (Vec<Draw>, GeometryStats) {
        let mut stats = GeometryStats::default();
        let mut draws: Vec<(ShaderVariant, Draw)> = Vec::new();

        for object in scene.visible_objects() {
            if !frustum.intersects_sphere(&object.bounding_sphere()) {
                stats.culled += 1;
                continue;
            }
            let (uniform, texture, fallback) = self.resolve_surface(device, scene, object);
            if fallback {
                stats.material_fallbacks += 1;
            }
            draws.push((
                object.variant(),
                Draw::Mesh {
                    program: object.variant().program(),
                    mesh: object.mesh,
                    uniform,
                    texture,
                },
            ));
        }

        // Stable: scene order is kept inside each variant
        draws.sort_by_key(|(variant, _)| *variant);
        stats.drawn = draws.len();
        (draws.into_iter().map(|(_, draw)| draw).collect(), stats)
    }

    fn resolve_surface<D: RenderDevice>(
        &mut self,
        device: &D,
        scene: &Scene,
        object: &RenderableObject,
    ) -> (DrawUniform, Option<TextureKey>, bool) {
        let model = convert_matrix4_to_array(object.transform);
        let neutral = scene.material_manager.get_default_material();

        match object.kind() {
            ObjectKind::Flat { color } => (
                DrawUniform {
                    model,
                    albedo: *color,
                    material: [neutral.specular, neutral.shininess, 0.0, 0.0],
                },
                None,
                false,
            ),
            ObjectKind::Textured { material } => {
                let resolved = scene.material_manager.resolve(material);
                let mut fallback = resolved.fallback;
                let texture = match resolved.material.albedo_texture {
                    Some(key) if device.target_size(key).is_some() => Some(key),
                    Some(_) => {
                        fallback = true;
                        None
                    }
                    None => None,
                };
                if fallback && self.warned.insert(object.name.clone()) {
                    warn!(
                        "Object '{}' lacks material or texture '{}', using neutral material",
                        object.name, material
                    );
                }

                let m = if resolved.fallback { neutral } else { resolved.material };
                (
                    DrawUniform {
                        model,
                        albedo: m.albedo,
                        material: [m.specular, m.shininess, 0.0, 0.0],
                    },
                    texture,
                    fallback,
                )
            }
        }
    }

    /// Overwrites the whole G-buffer with this frame's visible geometry
    ///
    /// With a multisampled set the pass rasterizes into it and resolves the
    /// color attachments into `gbuffer`.
    #[allow(clippy::too_many_arguments)]
    pub fn render<D: RenderDevice>(
        &mut self,
        device: &mut D,
        scene: &Scene,
        camera: &Camera,
        frustum: &Frustum,
        gbuffer: &GBuffer,
        multisample: Option<&GBuffer>,
        clear_color: [f32; 4],
    ) -> RenderResult<GeometryStats> {
        let (draws, stats) = self.collect_draws(device, scene, frustum);

        let (raster, resolve) = match multisample {
            Some(ms) => (ms, Some(gbuffer)),
            None => (gbuffer, None),
        };

        let clears = [[0.0; 4], [0.0; 4], clear_color];
        let mut pass = PassDesc::new("geometry_pass")
            .with_depth(raster.depth, Some(1.0))
            .with_uniforms(&camera.uniform())
            .with_draws(draws);
        for (i, key) in raster.color_targets().into_iter().enumerate() {
            pass = pass.with_color(
                ColorAttachment::texture(key)
                    .with_load(LoadOp::Clear(clears[i]))
                    .with_resolve(resolve.map(|g| g.color_targets()[i])),
            );
        }

        device.submit_pass(&pass)?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::geometry::generate_cube;
    use crate::gfx::rendering::device::ShaderProgram;
    use crate::gfx::rendering::headless::HeadlessDevice;
    use crate::gfx::resources::material::Material;
    use cgmath::{Matrix4, Point3, Vector3};

    fn camera() -> Camera {
        Camera::look_at(Point3::new(0.0, 2.0, 8.0), Point3::new(0.0, 0.0, 0.0), 4.0 / 3.0)
    }

    #[test]
    fn test_allocation_is_all_or_nothing() {
        let mut device = HeadlessDevice::new(64, 48);
        device.fail_allocations("gbuffer_depth", true);
        assert!(GBuffer::allocate(&mut device, "gbuffer", 64, 48, 1).is_err());
        assert_eq!(device.target_stats().live, 0);
    }

    #[test]
    fn test_attachments_share_dimensions() {
        let mut device = HeadlessDevice::new(64, 48);
        let gbuffer = GBuffer::allocate(&mut device, "gbuffer", 64, 48, 1).unwrap();
        for key in gbuffer.targets() {
            assert_eq!(device.target_size(key), Some((64, 48)));
        }
        gbuffer.release(&mut device);
        assert_eq!(device.target_stats().live, 0);
    }

    #[test]
    fn test_draws_grouped_by_variant_and_culled() {
        let mut device = HeadlessDevice::new(64, 48);
        let mut scene = Scene::new();
        let cube = scene.upload_mesh(&mut device, "cube", &generate_cube()).unwrap();
        scene.add_material(Material::new("brick", [0.7, 0.3, 0.2, 1.0]));

        scene.add_object(RenderableObject::textured("t1", cube.key, cube.bounding_radius, "brick"));
        scene.add_object(RenderableObject::flat("f1", cube.key, cube.bounding_radius, [1.0; 4]));
        scene.add_object(
            RenderableObject::flat("behind", cube.key, cube.bounding_radius, [1.0; 4])
                .with_transform(Matrix4::from_translation(Vector3::new(0.0, 0.0, 50.0))),
        );
        scene.add_object(RenderableObject::textured(
            "t2",
            cube.key,
            cube.bounding_radius,
            "missing",
        ));

        let mut renderer = GeometryRenderer::new();
        let (draws, stats) = renderer.collect_draws(&device, &scene, &camera().frustum());

        let programs: Vec<_> = draws.iter().map(Draw::program).collect();
        assert_eq!(
            programs,
            vec![
                ShaderProgram::GeometryFlat,
                ShaderProgram::GeometryTextured,
                ShaderProgram::GeometryTextured
            ]
        );
        assert_eq!(stats.drawn, 3);
        assert_eq!(stats.culled, 1);
        assert_eq!(stats.material_fallbacks, 1);
    }

    #[test]
    fn test_missing_texture_falls_back_to_white() {
        let mut device = HeadlessDevice::new(64, 48);
        let mut scene = Scene::new();
        let cube = scene.upload_mesh(&mut device, "cube", &generate_cube()).unwrap();
        let texture = device.create_texture_rgba8("albedo", 1, 1, &[255, 0, 0, 255]).unwrap();
        scene.add_material(Material::new("red", [1.0; 4]).with_texture(texture));
        scene.add_object(RenderableObject::textured("t", cube.key, cube.bounding_radius, "red"));
        device.destroy_target(texture);

        let mut renderer = GeometryRenderer::new();
        let (draws, stats) = renderer.collect_draws(&device, &scene, &camera().frustum());
        assert!(matches!(draws[0], Draw::Mesh { texture: None, .. }));
        assert_eq!(stats.material_fallbacks, 1);
    }

    #[test]
    fn test_multisampled_pass_resolves_into_gbuffer() {
        let mut device = HeadlessDevice::new(64, 48);
        device.compile_all_builtin().unwrap();
        let mut scene = Scene::new();
        let cube = scene.upload_mesh(&mut device, "cube", &generate_cube()).unwrap();
        scene.add_object(RenderableObject::flat("c", cube.key, cube.bounding_radius, [1.0; 4]));

        let gbuffer = GBuffer::allocate(&mut device, "gbuffer", 64, 48, 1).unwrap();
        let ms = GBuffer::allocate(&mut device, "gbuffer_ms", 64, 48, 4).unwrap();

        device.begin_frame().unwrap();
        let cam = camera();
        GeometryRenderer::new()
            .render(&mut device, &scene, &cam, &cam.frustum(), &gbuffer, Some(&ms), [0.0; 4])
            .unwrap();
        device.present().unwrap();

        let frame = device.last_frame().unwrap();
        let pass = frame.passes_labelled("geometry_pass").next().unwrap();
        assert_eq!(pass.color.len(), 3);
        assert_eq!(pass.color[0].resolve, Some(gbuffer.position));
        assert_eq!(pass.depth.map(|d| d.target), Some(ms.depth));
    }
}
