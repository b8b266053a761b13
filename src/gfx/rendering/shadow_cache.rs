//! Shadow map caching and rendering
//!
//! Every shadow-casting light owns exactly one [`ShadowMap`]. A map is only
//! re-rendered when:
//! - the light's position or target moved beyond the configured tolerance
//! - a shadow-casting object moved, appeared or disappeared
//! - manual cache invalidation is requested
//!
//! Static lights over a static scene therefore cost a single depth pass for
//! the whole application lifetime.

use cgmath::{InnerSpace, Matrix4, Point3, Vector3};
use log::{debug, warn};

use crate::config::ShadowConfig;
use crate::error::RenderResult;
use crate::gfx::camera::camera_utils::{convert_matrix4_to_array, OPENGL_TO_WGPU_MATRIX};
use crate::gfx::camera::frustum::{BoundingSphere, Frustum};
use crate::gfx::lighting::light::Light;
use crate::gfx::rendering::device::{
    Draw, DrawUniform, PassDesc, RenderDevice, ShaderProgram, TargetDesc, TargetFormat,
};
use crate::gfx::resources::handles::{MeshKey, TextureKey};
use crate::gfx::scene::{RenderableObject, Scene};

/// Transform state of one occluder at the time of a shadow render
#[derive(Debug, Clone, PartialEq)]
pub struct OccluderState {
    pub mesh: MeshKey,
    pub transform: Matrix4<f32>,
}

impl OccluderState {
    fn of(object: &RenderableObject) -> Self {
        Self {
            mesh: object.mesh,
            transform: object.transform,
        }
    }

    fn differs_from(&self, other: &OccluderState, tolerance: f32) -> bool {
        if self.mesh != other.mesh {
            return true;
        }
        let a: &[f32; 16] = self.transform.as_ref();
        let b: &[f32; 16] = other.transform.as_ref();
        a.iter().zip(b.iter()).any(|(x, y)| (x - y).abs() > tolerance)
    }
}

/// Light and occluder state captured at the last successful shadow render
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowSnapshot {
    pub position: Point3<f32>,
    pub target: Point3<f32>,
    pub occluders: Vec<OccluderState>,
}

impl ShadowSnapshot {
    pub fn capture(light: &Light, scene: &Scene) -> Self {
        Self {
            position: light.position(),
            target: light.target(),
            occluders: shadow_casters(scene).map(OccluderState::of).collect(),
        }
    }

    /// Checks if this snapshot differs significantly from another
    pub fn differs_from(&self, other: &ShadowSnapshot, tolerance: f32) -> bool {
        let moved = |a: Point3<f32>, b: Point3<f32>| {
            (a.x - b.x).abs() > tolerance
                || (a.y - b.y).abs() > tolerance
                || (a.z - b.z).abs() > tolerance
        };

        if moved(self.position, other.position) || moved(self.target, other.target) {
            return true;
        }
        if self.occluders.len() != other.occluders.len() {
            return true;
        }
        self.occluders
            .iter()
            .zip(other.occluders.iter())
            .any(|(a, b)| a.differs_from(b, tolerance))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowMapStatus {
    /// Allocated, never rendered (or invalidated)
    Pending,
    Valid,
    /// Allocation or render failed; the light is shaded unshadowed
    Invalid,
}

/// Depth target owned one-to-one by a shadow-casting light
#[derive(Debug)]
pub struct ShadowMap {
    texture: Option<TextureKey>,
    size: u32,
    status: ShadowMapStatus,
    snapshot: Option<ShadowSnapshot>,
    generation: u64,
}

impl ShadowMap {
    pub fn texture(&self) -> Option<TextureKey> {
        self.texture
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn status(&self) -> ShadowMapStatus {
        self.status
    }

    pub fn is_valid(&self) -> bool {
        self.status == ShadowMapStatus::Valid && self.texture.is_some()
    }

    fn mark_invalid(&mut self) {
        self.status = ShadowMapStatus::Invalid;
        self.snapshot = None;
    }
}

/// What the shadow stage did for one light this frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowOutcome {
    /// `cast_shadows == false`, nothing to do
    Skipped,
    Rendered,
    /// Unchanged since the last render, cached map reused
    Cached,
    /// Map missing or failed, light falls back to fully lit
    Unshadowed,
}

/// Statistics about the shadow cache for debugging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShadowCacheStats {
    pub renders: u64,
    pub cache_hits: u64,
    pub unshadowed: u64,
    pub live_maps: usize,
}

/// Shadow map cache manager
pub struct ShadowCache {
    config: ShadowConfig,
    /// 1x1 depth target bound in place of a missing map
    fallback: TextureKey,
    generation: u64,
    stats: ShadowCacheStats,
}

impl ShadowCache {
    pub fn new<D: RenderDevice>(device: &mut D, config: ShadowConfig) -> RenderResult<Self> {
        let fallback = device.create_target(&TargetDesc::new(
            "shadow_fallback",
            1,
            1,
            TargetFormat::Depth32Float,
        ))?;

        Ok(Self {
            config,
            fallback,
            generation: 0,
            stats: ShadowCacheStats::default(),
        })
    }

    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    /// Applies a new configuration; true when the allocated map size changes
    pub fn set_config(&mut self, config: ShadowConfig, device_max: u32) -> bool {
        let resized =
            config.effective_map_size(device_max) != self.config.effective_map_size(device_max);
        self.config = config;
        resized
    }

    pub fn fallback_texture(&self) -> TextureKey {
        self.fallback
    }

    pub fn get_stats(&self) -> ShadowCacheStats {
        self.stats
    }

    /// Forces every map to re-render once
    pub fn invalidate(&mut self) {
        self.generation += 1;
    }

    /// Gives a shadow-casting light its map; no-op for other lights
    pub fn allocate<D: RenderDevice>(&mut self, device: &mut D, light: &mut Light) {
        if !light.cast_shadows() || light.shadow_map.is_some() {
            return;
        }

        let size = self.config.effective_map_size(device.max_texture_size());
        let mut map = ShadowMap {
            texture: None,
            size,
            status: ShadowMapStatus::Pending,
            snapshot: None,
            generation: self.generation,
        };
        self.try_create_texture(device, &mut map);
        light.shadow_map = Some(map);
    }

    /// Frees the light's map, if any
    pub fn release<D: RenderDevice>(&mut self, device: &mut D, light: &mut Light) {
        if let Some(map) = light.shadow_map.take() {
            if let Some(texture) = map.texture {
                device.destroy_target(texture);
                self.stats.live_maps = self.stats.live_maps.saturating_sub(1);
            }
        }
    }

    /// Releases the fallback target; the cache is unusable afterwards
    pub fn destroy<D: RenderDevice>(&mut self, device: &mut D) {
        device.destroy_target(self.fallback);
    }

    fn try_create_texture<D: RenderDevice>(&mut self, device: &mut D, map: &mut ShadowMap) {
        let desc = TargetDesc::new("shadow_map", map.size, map.size, TargetFormat::Depth32Float);
        match device.create_target(&desc) {
            Ok(texture) => {
                map.texture = Some(texture);
                map.status = ShadowMapStatus::Pending;
                self.stats.live_maps += 1;
            }
            Err(err) => {
                warn!("Shadow map allocation failed, light renders unshadowed: {}", err);
                map.texture = None;
                map.mark_invalid();
            }
        }
    }

    /// Forgets a render whose frame never reached the GPU
    ///
    /// The map goes back to `Pending`, so the next frame renders it again
    /// instead of reusing a depth texture that was never written.
    pub fn discard_render(&mut self, light: &mut Light) {
        if let Some(map) = light.shadow_map.as_mut() {
            if map.status == ShadowMapStatus::Valid {
                map.status = ShadowMapStatus::Pending;
                map.snapshot = None;
            }
        }
    }

    /// Checks if the light's shadow map needs to be regenerated
    pub fn needs_update(&self, light: &Light, snapshot: &ShadowSnapshot) -> bool {
        let Some(map) = light.shadow_map() else {
            return false;
        };
        if map.status != ShadowMapStatus::Valid || map.generation != self.generation {
            return true;
        }
        match &map.snapshot {
            Some(last) => snapshot.differs_from(last, self.config.change_tolerance),
            None => true,
        }
    }

    /// Orthographic light-space transform covering `bounds` plus the margin
    pub fn light_view_projection(
        light: &Light,
        bounds: Option<BoundingSphere>,
        margin: f32,
    ) -> Matrix4<f32> {
        let (center, radius) = match bounds {
            Some(sphere) => (sphere.center, sphere.radius + margin),
            None => (light.target(), margin),
        };
        let radius = radius.max(0.01);

        let direction = light.direction();
        let up = if direction.dot(Vector3::unit_y()).abs() > 0.99 {
            Vector3::unit_z()
        } else {
            Vector3::unit_y()
        };

        let eye = center - direction * (radius * 2.0);
        let view = Matrix4::look_at_rh(eye, center, up);
        let projection =
            cgmath::ortho(-radius, radius, -radius, radius, radius * 0.5, radius * 3.5);

        OPENGL_TO_WGPU_MATRIX * projection * view
    }

    /// Produces or reuses the light's depth map for this frame
    ///
    /// Never fails: a missing target or failed pass marks the map invalid and
    /// the light is shaded without shadows until a later frame succeeds.
    pub fn render<D: RenderDevice>(
        &mut self,
        device: &mut D,
        light: &mut Light,
        scene: &Scene,
        bounds: Option<BoundingSphere>,
    ) -> ShadowOutcome {
        if !light.cast_shadows() {
            return ShadowOutcome::Skipped;
        }
        if light.shadow_map.is_none() {
            self.allocate(device, light);
        }

        // Failed maps are retried with a fresh target
        if let Some(mut map) = light.shadow_map.take() {
            if map.texture.is_none() || map.status == ShadowMapStatus::Invalid {
                if let Some(texture) = map.texture.take() {
                    device.destroy_target(texture);
                    self.stats.live_maps = self.stats.live_maps.saturating_sub(1);
                }
                self.try_create_texture(device, &mut map);
            }
            light.shadow_map = Some(map);
        }

        let snapshot = ShadowSnapshot::capture(light, scene);
        if !self.needs_update(light, &snapshot) {
            light.clear_dirty();
            self.stats.cache_hits += 1;
            debug!("Shadow cache hit");
            return ShadowOutcome::Cached;
        }

        let view_proj = Self::light_view_projection(light, bounds, self.config.bounds_margin);
        let frustum = Frustum::from_view_proj(view_proj);
        let generation = self.generation;

        let Some(map) = light.shadow_map.as_mut() else {
            return ShadowOutcome::Unshadowed;
        };

        let target = match map.texture {
            Some(texture) => match device.target_size(texture) {
                Some((w, h)) if w > 0 && h > 0 => texture,
                _ => {
                    warn!("Shadow map target is missing or zero-sized, rendering unshadowed");
                    map.mark_invalid();
                    self.stats.unshadowed += 1;
                    return ShadowOutcome::Unshadowed;
                }
            },
            None => {
                self.stats.unshadowed += 1;
                return ShadowOutcome::Unshadowed;
            }
        };

        let draws = shadow_casters(scene)
            .filter(|object| frustum.intersects_sphere(&object.bounding_sphere()))
            .map(|object| Draw::Mesh {
                program: ShaderProgram::ShadowDepth,
                mesh: object.mesh,
                uniform: DrawUniform {
                    model: convert_matrix4_to_array(object.transform),
                    albedo: [0.0; 4],
                    material: [0.0; 4],
                },
                texture: None,
            });

        let pass = PassDesc::new("shadow_pass")
            .with_depth(target, Some(1.0))
            .with_uniforms(&ShadowUniform::new(view_proj))
            .with_draws(draws);

        match device.submit_pass(&pass) {
            Ok(()) => {
                map.status = ShadowMapStatus::Valid;
                map.snapshot = Some(snapshot);
                map.generation = generation;
                light.set_light_space(view_proj);
                light.clear_dirty();
                self.stats.renders += 1;
                debug!("Shadow map rendered ({} occluders)", pass.draws.len());
                ShadowOutcome::Rendered
            }
            Err(err) => {
                warn!("Shadow pass failed, light renders unshadowed: {}", err);
                map.mark_invalid();
                self.stats.unshadowed += 1;
                ShadowOutcome::Unshadowed
            }
        }
    }
}

/// Visible objects that occlude lights
fn shadow_casters(scene: &Scene) -> impl Iterator<Item = &RenderableObject> {
    scene.visible_objects().filter(|object| object.cast_shadows)
}

/// Pass uniform of the depth-only program
///
/// MUST match `ShadowUniform` in `shadow.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShadowUniform {
    pub light_view_proj: [[f32; 4]; 4],
}

impl ShadowUniform {
    pub fn new(light_view_proj: Matrix4<f32>) -> Self {
        Self {
            light_view_proj: convert_matrix4_to_array(light_view_proj),
        }
    }
}
