//! HDR lighting accumulation
//!
//! One ambient pass clears the HDR target and writes the flat ambient term,
//! then every scheduled light adds one full-screen pass with `One + One`
//! blending. Additive blending makes the result independent of the order in
//! which included lights are drawn.

use cgmath::{InnerSpace, Point3, Vector3};
use log::trace;

use crate::config::{LightingConfig, ShadowConfig};
use crate::error::{RenderError, RenderResult};
use crate::gfx::camera::camera_utils::convert_matrix4_to_array;
use crate::gfx::rendering::device::{
    BlendMode, ColorAttachment, Draw, LoadOp, PassDesc, RenderDevice, ShaderProgram, TargetDesc,
    TargetFormat,
};
use crate::gfx::rendering::gbuffer::GBuffer;
use crate::gfx::rendering::shadow_cache::ShadowCache;
use crate::gfx::resources::handles::TextureKey;

use super::light::{Light, LightSet};
use super::scheduler::Schedule;

/// How directional lights compute their incoming direction
///
/// `Positional` reproduces the legacy behavior of treating the light like a
/// point light (direction from the surface to the light position).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectionalFalloff {
    /// Constant direction `target - position` for every surface point
    #[default]
    DirectionOnly,
    /// Per-pixel direction towards the light position
    Positional,
}

impl DirectionalFalloff {
    fn as_flag(self) -> f32 {
        match self {
            DirectionalFalloff::DirectionOnly => 0.0,
            DirectionalFalloff::Positional => 1.0,
        }
    }
}

/// Pass uniform of the directional light program
///
/// MUST match `LightUniform` in `lighting.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightUniform {
    pub light_view_proj: [[f32; 4]; 4],
    /// xyz = light position, w = 1 for positional falloff
    pub position: [f32; 4],
    /// xyz = unit direction the light travels in
    pub direction: [f32; 4],
    /// rgb = color * intensity
    pub radiance: [f32; 4],
    pub camera_position: [f32; 4],
    /// x = shadowed (0/1), y = depth bias, z = shadow texel size
    pub shadow: [f32; 4],
}

impl LightUniform {
    pub fn new(
        light: &Light,
        falloff: DirectionalFalloff,
        camera: Point3<f32>,
        shadow: ShadowBinding,
        bias: f32,
    ) -> Self {
        let p = light.position();
        let d = light.direction();
        let [r, g, b] = light.color;
        let texel = if shadow.size > 0 { 1.0 / shadow.size as f32 } else { 0.0 };

        Self {
            light_view_proj: convert_matrix4_to_array(light.light_space()),
            position: [p.x, p.y, p.z, falloff.as_flag()],
            direction: [d.x, d.y, d.z, 0.0],
            radiance: [r * light.intensity, g * light.intensity, b * light.intensity, 0.0],
            camera_position: [camera.x, camera.y, camera.z, 1.0],
            shadow: [if shadow.shadowed { 1.0 } else { 0.0 }, bias, texel, 0.0],
        }
    }
}

/// Pass uniform of the ambient program
///
/// MUST match `AmbientUniform` in `ambient.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AmbientUniform {
    /// rgb = ambient color * intensity
    pub ambient: [f32; 4],
}

/// Depth texture bound for one light pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowBinding {
    pub texture: TextureKey,
    pub size: u32,
    /// False binds the fallback and shades the light fully lit
    pub shadowed: bool,
}

impl ShadowBinding {
    /// The light's valid map, or the cache's fallback target
    pub fn for_light(light: &Light, cache: &ShadowCache) -> Self {
        match light.shadow_map() {
            Some(map) if light.cast_shadows() && map.is_valid() => match map.texture() {
                Some(texture) => Self {
                    texture,
                    size: map.size(),
                    shadowed: true,
                },
                None => Self::unshadowed(cache),
            },
            _ => Self::unshadowed(cache),
        }
    }

    fn unshadowed(cache: &ShadowCache) -> Self {
        Self {
            texture: cache.fallback_texture(),
            size: 1,
            shadowed: false,
        }
    }
}

/// Per-frame lighting statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightingStats {
    pub light_passes: usize,
    pub unshadowed: usize,
}

/// Owns the HDR accumulation target and issues the lighting passes
pub struct LightingAccumulator {
    hdr: Option<TextureKey>,
    size: (u32, u32),
}

impl LightingAccumulator {
    pub fn new() -> Self {
        Self {
            hdr: None,
            size: (0, 0),
        }
    }

    pub fn hdr_target(&self) -> Option<TextureKey> {
        self.hdr
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// (Re)allocates the HDR target for a viewport size
    pub fn allocate<D: RenderDevice>(
        &mut self,
        device: &mut D,
        width: u32,
        height: u32,
    ) -> RenderResult<()> {
        self.release(device);
        let desc = TargetDesc::new("hdr_accumulation", width, height, TargetFormat::Rgba16Float);
        let hdr = device.create_target(&desc)?;
        self.hdr = Some(hdr);
        self.size = (width, height);
        Ok(())
    }

    pub fn release<D: RenderDevice>(&mut self, device: &mut D) {
        if let Some(hdr) = self.hdr.take() {
            device.destroy_target(hdr);
        }
        self.size = (0, 0);
    }

    /// Ambient pass followed by one additive pass per scheduled light
    #[allow(clippy::too_many_arguments)]
    pub fn accumulate<D: RenderDevice>(
        &self,
        device: &mut D,
        gbuffer: &GBuffer,
        lights: &LightSet,
        schedule: &Schedule,
        shadows: &ShadowCache,
        lighting: &LightingConfig,
        shadow_config: &ShadowConfig,
        camera: Point3<f32>,
    ) -> RenderResult<LightingStats> {
        let Some(hdr) = self.hdr else {
            return Err(RenderError::UnknownResource("hdr target"));
        };

        let [r, g, b] = lighting.ambient_color;
        let k = lighting.ambient_intensity;
        let ambient = PassDesc::new("ambient_pass")
            .with_color(
                ColorAttachment::texture(hdr).with_load(LoadOp::Clear([0.0, 0.0, 0.0, 1.0])),
            )
            .with_input(gbuffer.position)
            .with_input(gbuffer.albedo)
            .with_uniforms(&AmbientUniform {
                ambient: [r * k, g * k, b * k, 1.0],
            })
            .with_draw(Draw::FullScreen {
                program: ShaderProgram::Ambient,
            });
        device.submit_pass(&ambient)?;

        let mut stats = LightingStats::default();
        for scheduled in &schedule.included {
            let Some(light) = lights.get(scheduled.id) else {
                continue;
            };
            let shadow = ShadowBinding::for_light(light, shadows);
            if light.cast_shadows() && !shadow.shadowed {
                stats.unshadowed += 1;
            }

            let uniform = LightUniform::new(
                light,
                lighting.directional_falloff,
                camera,
                shadow,
                shadow_config.bias,
            );
            let pass = PassDesc::new("light_pass")
                .with_color(
                    ColorAttachment::texture(hdr)
                        .with_load(LoadOp::Keep)
                        .with_blend(BlendMode::Additive),
                )
                .with_input(gbuffer.position)
                .with_input(gbuffer.normal)
                .with_input(gbuffer.albedo)
                .with_input(shadow.texture)
                .with_uniforms(&uniform)
                .with_draw(Draw::FullScreen {
                    program: ShaderProgram::DirectionalLight,
                });
            device.submit_pass(&pass)?;
            stats.light_passes += 1;
        }

        trace!(
            "Lighting: {} light passes, {} unshadowed",
            stats.light_passes,
            stats.unshadowed
        );
        Ok(stats)
    }
}

impl Default for LightingAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// One G-buffer texel as read by the lighting program
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceSample {
    pub position: Point3<f32>,
    pub normal: Vector3<f32>,
    pub albedo: [f32; 3],
    pub specular: f32,
    pub shininess: f32,
}

impl SurfaceSample {
    /// Decodes G-buffer texels the way the full-screen programs do
    ///
    /// Returns `None` for background texels. Partially covered texels from a
    /// multisample resolve are divided by their coverage in `position.w`.
    pub fn from_texels(
        position: [f32; 4],
        normal_shininess: [f32; 4],
        albedo_specular: [f32; 4],
    ) -> Option<Self> {
        let coverage = position[3];
        if coverage <= 0.0 {
            return None;
        }
        let [nx, ny, nz, shininess] = normal_shininess;
        let [r, g, b, specular] = albedo_specular;
        Some(Self {
            position: Point3::new(position[0], position[1], position[2]) / coverage,
            normal: Vector3::new(nx, ny, nz).normalize(),
            albedo: [r, g, b],
            specular,
            shininess,
        })
    }
}

/// CPU mirror of `lighting.wgsl`, used to reason about shading results
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightingModel {
    pub falloff: DirectionalFalloff,
}

impl LightingModel {
    pub fn new(falloff: DirectionalFalloff) -> Self {
        Self { falloff }
    }

    /// Direction from the surface towards the light
    pub fn incident(&self, light: &Light, surface: &SurfaceSample) -> Vector3<f32> {
        match self.falloff {
            DirectionalFalloff::DirectionOnly => -light.direction(),
            DirectionalFalloff::Positional => {
                let to_light = light.position() - surface.position;
                if to_light.magnitude2() <= f32::EPSILON {
                    -light.direction()
                } else {
                    to_light.normalize()
                }
            }
        }
    }

    /// Lambert + Blinn-Phong contribution of one light, times `shadow`
    pub fn evaluate(
        &self,
        light: &Light,
        surface: &SurfaceSample,
        camera: Point3<f32>,
        shadow: f32,
    ) -> [f32; 3] {
        let n = surface.normal.normalize();
        let l = self.incident(light, surface);
        let n_dot_l = n.dot(l).max(0.0);
        if n_dot_l <= 0.0 {
            return [0.0; 3];
        }

        let view = camera - surface.position;
        let specular = if view.magnitude2() > f32::EPSILON {
            let h = (l + view.normalize()).normalize();
            n.dot(h).max(0.0).powf(surface.shininess) * surface.specular
        } else {
            0.0
        };

        let scale = light.intensity * shadow;
        let mut out = [0.0; 3];
        for (i, channel) in out.iter_mut().enumerate() {
            *channel = (surface.albedo[i] * n_dot_l + specular) * light.color[i] * scale;
        }
        out
    }
}

/// 3x3 percentage-closer filter around `coords` (uv in 0..1, z = depth)
///
/// `depth_at(u, v)` returns the stored occluder depth. Coordinates outside
/// the light's projection count as lit.
pub fn pcf_shadow_factor(
    depth_at: impl Fn(f32, f32) -> f32,
    coords: [f32; 3],
    texel_size: f32,
    bias: f32,
) -> f32 {
    let [u, v, depth] = coords;
    if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) || depth > 1.0 {
        return 1.0;
    }

    let mut lit = 0.0;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let stored = depth_at(u + dx as f32 * texel_size, v + dy as f32 * texel_size);
            if depth - bias <= stored {
                lit += 1.0;
            }
        }
    }
    lit / 9.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::lighting::light::LightDesc;
    use approx::assert_relative_eq;

    fn surface() -> SurfaceSample {
        SurfaceSample {
            position: Point3::new(5.0, 0.0, 0.0),
            normal: Vector3::unit_y(),
            albedo: [0.5, 0.5, 0.5],
            specular: 0.0,
            shininess: 32.0,
        }
    }

    fn overhead_light(intensity: f32) -> Light {
        Light::from_desc(
            &LightDesc::directional(Point3::new(0.0, 10.0, 0.0), Point3::new(0.0, 0.0, 0.0))
                .with_intensity(intensity),
        )
        .unwrap()
    }

    #[test]
    fn test_direction_only_ignores_surface_position() {
        let light = overhead_light(1.0);
        let model = LightingModel::new(DirectionalFalloff::DirectionOnly);
        let camera = Point3::new(0.0, 5.0, 5.0);

        let a = model.evaluate(&light, &surface(), camera, 1.0);
        let b = model.evaluate(
            &light,
            &SurfaceSample {
                position: Point3::new(-20.0, 0.0, 3.0),
                ..surface()
            },
            camera,
            1.0,
        );
        assert_relative_eq!(a[0], 0.5);
        assert_relative_eq!(a[0], b[0]);
    }

    #[test]
    fn test_positional_falloff_reproduces_point_light_math() {
        let light = overhead_light(1.0);
        let model = LightingModel::new(DirectionalFalloff::Positional);
        let lit = model.evaluate(&light, &surface(), Point3::new(0.0, 5.0, 5.0), 1.0);

        // Light at (0,10,0), surface at (5,0,0): cos = 10 / sqrt(125)
        let expected = 0.5 * 10.0 / 125.0_f32.sqrt();
        assert_relative_eq!(lit[0], expected, epsilon = 1e-5);
    }

    #[test]
    fn test_resolved_edge_texel_keeps_world_position() {
        let world = Point3::new(4.0, 2.0, -6.0);
        let quarter = 0.25;
        let texel = [world.x * quarter, world.y * quarter, world.z * quarter, quarter];

        let sample = SurfaceSample::from_texels(texel, [0.0, 0.5, 0.0, 16.0], [1.0; 4]).unwrap();
        assert_relative_eq!(sample.position.x, world.x, epsilon = 1e-5);
        assert_relative_eq!(sample.position.y, world.y, epsilon = 1e-5);
        assert_relative_eq!(sample.position.z, world.z, epsilon = 1e-5);
        assert_relative_eq!(sample.normal.y, 1.0);

        // Positional falloff depends on the position, so an edge texel must
        // shade like a fully covered one
        let light = overhead_light(1.0);
        let model = LightingModel::new(DirectionalFalloff::Positional);
        let full =
            SurfaceSample::from_texels([4.0, 2.0, -6.0, 1.0], [0.0, 1.0, 0.0, 16.0], [1.0; 4])
                .unwrap();
        let camera = Point3::new(0.0, 5.0, 5.0);
        let edge_lit = model.evaluate(&light, &sample, camera, 1.0);
        let full_lit = model.evaluate(&light, &full, camera, 1.0);
        assert_relative_eq!(edge_lit[0], full_lit[0], epsilon = 1e-5);
    }

    #[test]
    fn test_background_texel_has_no_surface() {
        assert!(SurfaceSample::from_texels([0.0; 4], [0.0; 4], [0.2, 0.3, 0.4, 1.0]).is_none());
    }

    #[test]
    fn test_back_facing_surface_is_unlit() {
        let light = overhead_light(1.0);
        let model = LightingModel::new(DirectionalFalloff::DirectionOnly);
        let down = SurfaceSample {
            normal: -Vector3::unit_y(),
            specular: 1.0,
            ..surface()
        };
        assert_eq!(model.evaluate(&light, &down, Point3::new(0.0, 5.0, 5.0), 1.0), [0.0; 3]);
    }

    #[test]
    fn test_accumulation_is_order_independent() {
        let model = LightingModel::new(DirectionalFalloff::DirectionOnly);
        let camera = Point3::new(1.0, 4.0, 2.0);
        let lights = [
            overhead_light(1.0),
            Light::from_desc(
                &LightDesc::directional(Point3::new(5.0, 5.0, 0.0), Point3::new(0.0, 0.0, 0.0))
                    .with_color([1.0, 0.2, 0.2])
                    .with_intensity(3.0),
            )
            .unwrap(),
            Light::from_desc(
                &LightDesc::directional(Point3::new(-2.0, 8.0, 1.0), Point3::new(0.0, 0.0, 0.0))
                    .with_intensity(0.5),
            )
            .unwrap(),
        ];
        let s = SurfaceSample {
            specular: 0.5,
            ..surface()
        };

        let sum = |order: &[usize]| {
            order.iter().fold([0.0_f32; 3], |mut acc, i| {
                let c = model.evaluate(&lights[*i], &s, camera, 1.0);
                for k in 0..3 {
                    acc[k] += c[k];
                }
                acc
            })
        };

        let forward = sum(&[0, 1, 2]);
        let backward = sum(&[2, 1, 0]);
        for k in 0..3 {
            assert_relative_eq!(forward[k], backward[k], epsilon = 1e-5);
        }
    }

    #[test]
    fn test_pcf_softens_edges() {
        // Occluder covers u < 0.5
        let depth_at = |u: f32, _v: f32| if u < 0.5 { 0.2 } else { 1.0 };
        let texel = 0.1;

        assert_relative_eq!(pcf_shadow_factor(depth_at, [0.8, 0.5, 0.6], texel, 0.005), 1.0);
        assert_relative_eq!(pcf_shadow_factor(depth_at, [0.2, 0.5, 0.6], texel, 0.005), 0.0);
        let edge = pcf_shadow_factor(depth_at, [0.5, 0.5, 0.6], texel, 0.005);
        assert_relative_eq!(edge, 6.0 / 9.0);
    }

    #[test]
    fn test_pcf_outside_projection_is_lit() {
        let depth_at = |_u: f32, _v: f32| 0.0;
        assert_eq!(pcf_shadow_factor(depth_at, [1.5, 0.5, 0.5], 0.01, 0.0), 1.0);
        assert_eq!(pcf_shadow_factor(depth_at, [0.5, 0.5, 1.2], 0.01, 0.0), 1.0);
    }
}
