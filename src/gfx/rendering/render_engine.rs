//! Frame orchestration
//!
//! [`Renderer`] owns every size-dependent buffer and walks the fixed stage
//! order `Idle → Shadow → Geometry → Lighting → PostProcess → Present` once per
//! frame. Resizes are applied at the frame boundary, never mid-frame.

use log::{debug, info, trace, warn};

use crate::config::RenderConfig;
use crate::error::{RenderError, RenderResult};
use crate::gfx::camera::Camera;
use crate::gfx::lighting::{
    Light, LightDesc, LightId, LightScheduler, LightSet, LightingAccumulator, Schedule,
};
use crate::gfx::rendering::device::RenderDevice;
use crate::gfx::rendering::gbuffer::{GBuffer, GeometryRenderer};
use crate::gfx::rendering::post_process::{AntiAliasMode, PostProcessStage, ToneMapping};
use crate::gfx::rendering::shader_set::ShaderSet;
use crate::gfx::rendering::shadow_cache::{ShadowCache, ShadowCacheStats, ShadowOutcome};
use crate::gfx::scene::Scene;

/// Stage of the per-frame state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    Idle,
    Shadow,
    Geometry,
    Lighting,
    PostProcess,
    Present,
}

/// How a call to [`Renderer::render_frame`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameOutcome {
    Presented,
    /// The surface went stale mid-frame; nothing reached the screen
    Discarded,
    /// No usable viewport (e.g. minimized window)
    #[default]
    Skipped,
}

/// Per-frame statistics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    pub outcome: FrameOutcome,
    pub objects_drawn: usize,
    pub objects_culled: usize,
    pub material_fallbacks: usize,
    pub shadow_renders: usize,
    pub shadow_cache_hits: usize,
    pub unshadowed_lights: usize,
    pub lights_scheduled: usize,
    pub lights_dropped: usize,
    pub anti_alias: AntiAliasMode,
}

/// Size-dependent targets shared by the geometry and lighting stages
struct FrameTargets {
    gbuffer: GBuffer,
    size: (u32, u32),
}

pub struct Renderer<D: RenderDevice> {
    device: D,
    config: RenderConfig,
    lights: LightSet,
    shadow_cache: ShadowCache,
    geometry: GeometryRenderer,
    accumulator: LightingAccumulator,
    post: PostProcessStage,
    targets: Option<FrameTargets>,
    pending_resize: Option<(u32, u32)>,
    stage: FrameStage,
    frame_index: u64,
    /// Lights whose maps were rendered in the frame being recorded
    shadows_rendered: Vec<LightId>,
}

impl<D: RenderDevice> Renderer<D> {
    /// Compiles the shader set and allocates buffers for the current surface
    ///
    /// Shader compilation failures are fatal.
    pub fn new(mut device: D, config: RenderConfig, shaders: &ShaderSet) -> RenderResult<Self> {
        shaders.compile_all(&mut device)?;
        let shadow_cache = ShadowCache::new(&mut device, config.shadow)?;

        let mut renderer = Self {
            device,
            config,
            lights: LightSet::new(),
            shadow_cache,
            geometry: GeometryRenderer::new(),
            accumulator: LightingAccumulator::new(),
            post: PostProcessStage::new(),
            targets: None,
            pending_resize: None,
            stage: FrameStage::Idle,
            frame_index: 0,
            shadows_rendered: Vec::new(),
        };

        let (width, height) = renderer.device.surface_size();
        if width > 0 && height > 0 {
            renderer.allocate_targets(width, height)?;
        } else {
            renderer.pending_resize = Some((width, height));
        }

        info!("Renderer ready at {}x{}", width, height);
        Ok(renderer)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Mutable configuration; changes take effect at the next frame
    pub fn config_mut(&mut self) -> &mut RenderConfig {
        &mut self.config
    }

    pub fn stage(&self) -> FrameStage {
        self.stage
    }

    /// Size of the currently allocated buffers
    pub fn size(&self) -> Option<(u32, u32)> {
        self.targets.as_ref().map(|t| t.size)
    }

    pub fn gbuffer(&self) -> Option<&GBuffer> {
        self.targets.as_ref().map(|t| &t.gbuffer)
    }

    // Lights

    /// Replaces the whole light set
    ///
    /// Every descriptor is validated before existing lights are touched, so an
    /// unsupported kind leaves the previous set in place.
    pub fn initialize_lights(&mut self, descs: &[LightDesc]) -> RenderResult<Vec<LightId>> {
        let lights = descs
            .iter()
            .map(Light::from_desc)
            .collect::<RenderResult<Vec<_>>>()?;

        for mut old in self.lights.drain() {
            self.shadow_cache.release(&mut self.device, &mut old);
        }

        let ids: Vec<LightId> = lights.into_iter().map(|light| self.insert_light(light)).collect();
        info!(
            "Initialized {} lights ({} shadow maps)",
            ids.len(),
            self.shadow_cache.get_stats().live_maps
        );
        Ok(ids)
    }

    pub fn add_light(&mut self, desc: &LightDesc) -> RenderResult<LightId> {
        let light = Light::from_desc(desc)?;
        Ok(self.insert_light(light))
    }

    fn insert_light(&mut self, mut light: Light) -> LightId {
        self.shadow_cache.allocate(&mut self.device, &mut light);
        self.lights.insert(light)
    }

    /// Removes a light and frees its shadow map
    pub fn remove_light(&mut self, id: LightId) -> bool {
        match self.lights.remove(id) {
            Some(mut light) => {
                self.shadow_cache.release(&mut self.device, &mut light);
                true
            }
            None => false,
        }
    }

    pub fn lights(&self) -> &LightSet {
        &self.lights
    }

    pub fn light(&self, id: LightId) -> Option<&Light> {
        self.lights.get(id)
    }

    /// Mutable access for controllers that move lights between frames
    pub fn light_mut(&mut self, id: LightId) -> Option<&mut Light> {
        self.lights.get_mut(id)
    }

    /// Turns shadow casting on or off, allocating or freeing the map now
    pub fn set_cast_shadows(&mut self, id: LightId, cast_shadows: bool) -> bool {
        let Some(light) = self.lights.get_mut(id) else {
            return false;
        };
        if light.cast_shadows() == cast_shadows {
            return true;
        }
        light.set_cast_shadows_flag(cast_shadows);
        if cast_shadows {
            self.shadow_cache.allocate(&mut self.device, light);
        } else {
            self.shadow_cache.release(&mut self.device, light);
        }
        true
    }

    // Runtime toggles

    /// Advances to the next anti-aliasing mode and returns it
    pub fn cycle_anti_alias(&mut self) -> AntiAliasMode {
        self.config.post.anti_alias = self.config.post.anti_alias.next();
        info!("Anti-aliasing mode: {}", self.config.post.anti_alias);
        self.config.post.anti_alias
    }

    pub fn set_anti_alias(&mut self, mode: AntiAliasMode) {
        self.config.post.anti_alias = mode;
    }

    pub fn anti_alias(&self) -> AntiAliasMode {
        self.config.post.anti_alias
    }

    /// Mode the allocated buffers implement, after any degradation
    pub fn effective_anti_alias(&self) -> AntiAliasMode {
        self.post.effective_mode()
    }

    pub fn set_light_budget(&mut self, budget: Option<usize>) {
        self.config.lighting.light_budget = budget;
    }

    pub fn light_budget(&self) -> Option<usize> {
        self.config.lighting.light_budget
    }

    pub fn set_tone_mapping(&mut self, tone_mapping: ToneMapping) {
        self.config.post.tone_mapping = tone_mapping;
    }

    pub fn set_exposure(&mut self, exposure: f32) {
        self.config.post.exposure = exposure.max(0.0);
    }

    pub fn set_shadow_bias(&mut self, bias: f32) {
        self.config.shadow.bias = bias.max(0.0);
    }

    /// Requests a new shadow-map resolution; every map is reallocated
    pub fn set_shadow_map_size(&mut self, size: u32) {
        self.config.shadow.map_size = size;
    }

    pub fn set_vsync(&mut self, enabled: bool) {
        self.device.set_vsync(enabled);
    }

    /// Forces every shadow map to re-render on the next frame
    pub fn invalidate_shadow_cache(&mut self) {
        self.shadow_cache.invalidate();
    }

    pub fn shadow_stats(&self) -> ShadowCacheStats {
        self.shadow_cache.get_stats()
    }

    // Resize

    /// Records a viewport size, applied before the next frame's shadow stage
    pub fn request_resize(&mut self, width: u32, height: u32) {
        debug!("Resize requested: {}x{}", width, height);
        self.pending_resize = Some((width, height));
    }

    pub fn pending_resize(&self) -> Option<(u32, u32)> {
        self.pending_resize
    }

    fn apply_pending_resize(&mut self) -> RenderResult<bool> {
        let Some((width, height)) = self.pending_resize else {
            return Ok(self.targets.is_some());
        };
        if width == 0 || height == 0 {
            return Ok(false);
        }

        self.device.configure_surface(width, height)?;
        self.allocate_targets(width, height)?;
        self.pending_resize = None;
        info!("Resized to {}x{}", width, height);
        Ok(true)
    }

    /// Tears down and reallocates every size-dependent buffer
    fn allocate_targets(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.release_targets();

        let gbuffer = GBuffer::allocate(&mut self.device, "gbuffer", width, height, 1)?;
        if let Err(err) = self.accumulator.allocate(&mut self.device, width, height) {
            gbuffer.release(&mut self.device);
            return Err(err);
        }
        self.post
            .configure(&mut self.device, self.config.post.anti_alias, width, height);

        self.targets = Some(FrameTargets {
            gbuffer,
            size: (width, height),
        });
        Ok(())
    }

    fn release_targets(&mut self) {
        if let Some(targets) = self.targets.take() {
            targets.gbuffer.release(&mut self.device);
        }
        self.accumulator.release(&mut self.device);
        self.post.release(&mut self.device);
    }

    /// Applies configuration changes that need resource work
    fn sync_config(&mut self) {
        let device_max = self.device.max_texture_size();
        if self.shadow_cache.set_config(self.config.shadow, device_max) {
            info!(
                "Shadow map size changed to {}, reallocating",
                self.config.shadow.effective_map_size(device_max)
            );
            let ids = self.lights.ids().to_vec();
            for id in ids {
                if let Some(light) = self.lights.get_mut(id) {
                    self.shadow_cache.release(&mut self.device, light);
                    self.shadow_cache.allocate(&mut self.device, light);
                }
            }
        }

        if let Some((width, height)) = self.size() {
            self.post
                .configure(&mut self.device, self.config.post.anti_alias, width, height);
        }
    }

    fn enter(&mut self, stage: FrameStage) {
        trace!("Frame {}: {:?} -> {:?}", self.frame_index, self.stage, stage);
        self.stage = stage;
    }

    // Frame

    /// Renders one frame of `scene` seen from `camera` and presents it
    ///
    /// A stale surface discards the frame and schedules a resize instead of
    /// returning an error.
    pub fn render_frame(&mut self, scene: &Scene, camera: &Camera) -> RenderResult<FrameReport> {
        self.frame_index += 1;
        let mut report = FrameReport {
            frame: self.frame_index,
            ..FrameReport::default()
        };

        match self.apply_pending_resize() {
            Ok(true) => {}
            Ok(false) => {
                trace!("Frame {} skipped: no viewport", self.frame_index);
                return Ok(report);
            }
            Err(err) if err.is_recoverable() => {
                warn!("Resize failed, skipping frame: {}", err);
                return Ok(report);
            }
            Err(err) => return Err(err),
        }
        self.sync_config();
        report.anti_alias = self.post.effective_mode();

        self.shadows_rendered.clear();
        let result = self.record_frame(scene, camera, &mut report);
        self.enter(FrameStage::Idle);

        match result {
            Ok(()) => {
                report.outcome = FrameOutcome::Presented;
                Ok(report)
            }
            Err(err) if err.is_recoverable() => {
                self.device.discard_frame();
                self.discard_shadow_renders();
                let size = self.pending_resize.unwrap_or_else(|| self.device.surface_size());
                self.pending_resize = Some(size);
                warn!("Frame {} discarded ({}), resize scheduled", self.frame_index, err);
                report.outcome = FrameOutcome::Discarded;
                Ok(report)
            }
            Err(err) => {
                self.device.discard_frame();
                self.discard_shadow_renders();
                Err(err)
            }
        }
    }

    /// Maps rendered in a discarded frame were never written
    fn discard_shadow_renders(&mut self) {
        for id in self.shadows_rendered.drain(..) {
            if let Some(light) = self.lights.get_mut(id) {
                self.shadow_cache.discard_render(light);
            }
        }
    }

    fn record_frame(
        &mut self,
        scene: &Scene,
        camera: &Camera,
        report: &mut FrameReport,
    ) -> RenderResult<()> {
        let (gbuffer, hdr) = match (&self.targets, self.accumulator.hdr_target()) {
            (Some(targets), Some(hdr)) => (targets.gbuffer, hdr),
            _ => return Err(RenderError::UnknownResource("frame targets")),
        };

        self.device.begin_frame()?;

        self.enter(FrameStage::Shadow);
        let scheduler = LightScheduler::new(self.config.lighting.light_budget);
        let schedule = scheduler.schedule(&self.lights, camera.position);
        report.lights_scheduled = schedule.included.len();
        report.lights_dropped = schedule.dropped.len();
        self.render_shadows(scene, &schedule, report);

        self.enter(FrameStage::Geometry);
        let frustum = camera.frustum();
        let geometry = self.geometry.render(
            &mut self.device,
            scene,
            camera,
            &frustum,
            &gbuffer,
            self.post.multisample(),
            self.config.clear_color,
        )?;
        report.objects_drawn = geometry.drawn;
        report.objects_culled = geometry.culled;
        report.material_fallbacks = geometry.material_fallbacks;

        self.enter(FrameStage::Lighting);
        let lighting = self.accumulator.accumulate(
            &mut self.device,
            &gbuffer,
            &self.lights,
            &schedule,
            &self.shadow_cache,
            &self.config.lighting,
            &self.config.shadow,
            camera.position,
        )?;
        report.unshadowed_lights = lighting.unshadowed;

        self.enter(FrameStage::PostProcess);
        self.post.resolve(&mut self.device, hdr, &self.config.post)?;

        self.enter(FrameStage::Present);
        self.device.present()
    }

    /// Brings the shadow maps of every scheduled light up to date
    fn render_shadows(&mut self, scene: &Scene, schedule: &Schedule, report: &mut FrameReport) {
        let bounds = scene.bounding_sphere();
        for id in schedule.included_ids() {
            let Some(light) = self.lights.get_mut(id) else {
                continue;
            };
            match self.shadow_cache.render(&mut self.device, light, scene, bounds) {
                ShadowOutcome::Rendered => {
                    report.shadow_renders += 1;
                    self.shadows_rendered.push(id);
                }
                ShadowOutcome::Cached => report.shadow_cache_hits += 1,
                ShadowOutcome::Skipped | ShadowOutcome::Unshadowed => {}
            }
        }
    }

    /// Frees every GPU resource the renderer owns and returns the device
    pub fn shutdown(mut self) -> D {
        for mut light in self.lights.drain() {
            self.shadow_cache.release(&mut self.device, &mut light);
        }
        self.release_targets();
        self.shadow_cache.destroy(&mut self.device);
        self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::geometry::{generate_cube, generate_plane};
    use crate::gfx::lighting::LightUniform;
    use crate::gfx::rendering::device::ShaderProgram;
    use crate::gfx::rendering::headless::HeadlessDevice;
    use crate::gfx::scene::RenderableObject;
    use approx::assert_relative_eq;
    use cgmath::{Matrix4, Point3, Vector3};

    fn renderer() -> Renderer<HeadlessDevice> {
        Renderer::new(
            HeadlessDevice::new(64, 48),
            RenderConfig::default(),
            &ShaderSet::builtin(),
        )
        .unwrap()
    }

    fn camera() -> Camera {
        Camera::look_at(Point3::new(0.0, 4.0, 10.0), Point3::new(0.0, 0.0, 0.0), 4.0 / 3.0)
    }

    fn scene(device: &mut HeadlessDevice) -> Scene {
        let mut scene = Scene::new();
        let cube = scene.upload_mesh(device, "cube", &generate_cube()).unwrap();
        let ground = scene
            .upload_mesh(device, "ground", &generate_plane(20.0, 20.0, 1, 1))
            .unwrap();
        scene.add_object(RenderableObject::flat(
            "ground",
            ground.key,
            ground.bounding_radius,
            [0.6, 0.6, 0.6, 1.0],
        ));
        scene.add_object(
            RenderableObject::flat("cube", cube.key, cube.bounding_radius, [0.8, 0.2, 0.2, 1.0])
                .with_transform(Matrix4::from_translation(Vector3::new(0.0, 0.5, 0.0))),
        );
        scene
    }

    fn sun(cast_shadows: bool) -> LightDesc {
        LightDesc::directional(Point3::new(5.0, 10.0, 5.0), Point3::new(0.0, 0.0, 0.0))
            .with_cast_shadows(cast_shadows)
    }

    fn light_at(x: f32, intensity: f32) -> LightDesc {
        LightDesc::directional(Point3::new(x, 4.0, 10.0), Point3::new(0.0, 0.0, 0.0))
            .with_intensity(intensity)
            .with_cast_shadows(false)
    }

    fn frame_labels(device: &HeadlessDevice) -> Vec<String> {
        device
            .last_frame()
            .unwrap()
            .passes
            .iter()
            .map(|p| p.label.clone())
            .collect()
    }

    #[test]
    fn test_stages_run_in_order() {
        let mut r = renderer();
        let scene = scene(r.device_mut());
        r.initialize_lights(&[sun(true)]).unwrap();

        let report = r.render_frame(&scene, &camera()).unwrap();
        assert_eq!(report.outcome, FrameOutcome::Presented);
        assert_eq!(r.stage(), FrameStage::Idle);
        assert_eq!(
            frame_labels(r.device()),
            vec![
                "shadow_pass",
                "geometry_pass",
                "ambient_pass",
                "light_pass",
                "tone_map_pass",
                "fxaa_pass"
            ]
        );
    }

    #[test]
    fn test_non_casting_lights_never_get_shadow_maps() {
        let mut r = renderer();
        let scene = scene(r.device_mut());
        r.initialize_lights(&[sun(false), sun(false)]).unwrap();

        for _ in 0..5 {
            r.render_frame(&scene, &camera()).unwrap();
        }
        assert!(r.device().live_targets("shadow_map").is_empty());
        assert_eq!(r.shadow_stats().renders, 0);
        assert!(r.lights().iter().all(|(_, light)| !light.has_shadow_map()));
    }

    #[test]
    fn test_static_light_renders_shadow_once_in_100_frames() {
        let mut r = renderer();
        let scene = scene(r.device_mut());
        r.initialize_lights(&[sun(true)]).unwrap();

        for _ in 0..100 {
            r.render_frame(&scene, &camera()).unwrap();
        }
        let shadow_passes: usize = r
            .device()
            .frames()
            .iter()
            .map(|f| f.passes_labelled("shadow_pass").count())
            .sum();
        assert_eq!(shadow_passes, 1);
        assert_eq!(r.shadow_stats().renders, 1);
        assert_eq!(r.shadow_stats().cache_hits, 99);
    }

    #[test]
    fn test_moving_light_rerenders_its_map() {
        let mut r = renderer();
        let scene = scene(r.device_mut());
        let ids = r.initialize_lights(&[sun(true)]).unwrap();

        r.render_frame(&scene, &camera()).unwrap();
        r.light_mut(ids[0]).unwrap().set_position(Point3::new(-5.0, 10.0, 5.0));
        let report = r.render_frame(&scene, &camera()).unwrap();
        assert_eq!(report.shadow_renders, 1);
        assert!(!r.light(ids[0]).unwrap().is_dirty());
    }

    #[test]
    fn test_budget_keeps_the_most_important_light() {
        let mut r = renderer();
        let scene = scene(r.device_mut());
        let eye = Point3::new(0.0, 0.0, 0.0);
        let cam = Camera::look_at(eye, Point3::new(0.0, 0.0, -1.0), 4.0 / 3.0);

        // L1: intensity 1 at distance 10 (0.01), L2: intensity 5 at distance 5 (0.2)
        let l1 = LightDesc::directional(Point3::new(10.0, 0.0, 0.0), eye).with_cast_shadows(false);
        let l2 = LightDesc::directional(Point3::new(0.0, 5.0, 0.0), eye)
            .with_intensity(5.0)
            .with_cast_shadows(false);
        r.initialize_lights(&[l1, l2]).unwrap();
        r.set_light_budget(Some(1));

        let report = r.render_frame(&scene, &cam).unwrap();
        assert_eq!(report.lights_scheduled, 1);
        assert_eq!(report.lights_dropped, 1);

        let frame = r.device().last_frame().unwrap();
        let passes: Vec<_> = frame.passes_labelled("light_pass").collect();
        assert_eq!(passes.len(), 1);
        let uniform: LightUniform = bytemuck::pod_read_unaligned(&passes[0].uniforms);
        assert_relative_eq!(uniform.radiance[0], 5.0);
    }

    #[test]
    fn test_budget_yields_min_of_budget_and_visible_lights() {
        let mut r = renderer();
        let scene = scene(r.device_mut());
        r.initialize_lights(&[
            light_at(-2.0, 1.0),
            light_at(-1.0, 2.0),
            light_at(0.0, 0.0),
            light_at(1.0, 3.0),
            light_at(2.0, 4.0),
        ])
        .unwrap();

        for (budget, expected) in [(Some(3), 3), (Some(10), 4), (None, 4), (Some(0), 0)] {
            r.set_light_budget(budget);
            r.render_frame(&scene, &camera()).unwrap();
            let frame = r.device().last_frame().unwrap();
            assert_eq!(frame.passes_labelled("light_pass").count(), expected, "{budget:?}");
        }
    }

    #[test]
    fn test_objects_outside_frustum_are_never_drawn() {
        let mut r = renderer();
        let mut scene = scene(r.device_mut());
        let far = scene
            .upload_mesh(r.device_mut(), "far", &generate_cube())
            .unwrap();
        scene.add_object(
            RenderableObject::flat("far", far.key, far.bounding_radius, [1.0; 4])
                .with_transform(Matrix4::from_translation(Vector3::new(0.0, 0.0, 100.0))),
        );
        r.initialize_lights(&[sun(false)]).unwrap();

        let report = r.render_frame(&scene, &camera()).unwrap();
        assert_eq!(report.objects_culled, 1);
        let drawn = r
            .device()
            .last_frame()
            .unwrap()
            .meshes_drawn(ShaderProgram::GeometryFlat);
        assert_eq!(drawn.len(), 2);
        assert!(!drawn.contains(&far.key));
    }

    #[test]
    fn test_resize_reallocates_size_dependent_buffers() {
        let mut r = renderer();
        let scene = scene(r.device_mut());
        r.initialize_lights(&[sun(true)]).unwrap();
        r.render_frame(&scene, &camera()).unwrap();

        r.request_resize(128, 96);
        let report = r.render_frame(&scene, &camera()).unwrap();
        assert_eq!(report.outcome, FrameOutcome::Presented);
        assert_eq!(r.size(), Some((128, 96)));
        assert_eq!(r.device().surface_size(), (128, 96));

        for prefix in ["gbuffer", "hdr_accumulation", "fxaa_source"] {
            let live = r.device().live_targets(prefix);
            assert!(!live.is_empty(), "{prefix}");
            for desc in live {
                assert_eq!((desc.width, desc.height), (128, 96), "{}", desc.label);
            }
        }
        // The shadow map is not size-dependent and stays cached
        assert_eq!(r.shadow_stats().renders, 1);
    }

    #[test]
    fn test_zero_size_skips_frames_until_valid() {
        let mut r = renderer();
        let scene = scene(r.device_mut());
        r.request_resize(0, 0);

        let report = r.render_frame(&scene, &camera()).unwrap();
        assert_eq!(report.outcome, FrameOutcome::Skipped);
        assert_eq!(r.device().presented_count(), 0);

        r.request_resize(32, 32);
        let report = r.render_frame(&scene, &camera()).unwrap();
        assert_eq!(report.outcome, FrameOutcome::Presented);
    }

    #[test]
    fn test_outdated_surface_discards_frame() {
        let mut r = renderer();
        let scene = scene(r.device_mut());
        r.device_mut().simulate_surface_outdated(1);

        let report = r.render_frame(&scene, &camera()).unwrap();
        assert_eq!(report.outcome, FrameOutcome::Discarded);
        assert_eq!(r.device().presented_count(), 0);
        assert!(!r.device().last_frame().unwrap().presented);
        assert_eq!(r.pending_resize(), Some((64, 48)));

        let report = r.render_frame(&scene, &camera()).unwrap();
        assert_eq!(report.outcome, FrameOutcome::Presented);
        assert_eq!(r.device().presented_count(), 1);
    }

    #[test]
    fn test_discarded_frame_does_not_cache_its_shadow_maps() {
        let mut r = renderer();
        let scene = scene(r.device_mut());
        r.initialize_lights(&[sun(true)]).unwrap();
        r.device_mut().simulate_surface_outdated(1);

        let report = r.render_frame(&scene, &camera()).unwrap();
        assert_eq!(report.outcome, FrameOutcome::Discarded);
        assert_eq!(report.shadow_renders, 1);

        let report = r.render_frame(&scene, &camera()).unwrap();
        assert_eq!(report.outcome, FrameOutcome::Presented);
        assert_eq!(report.shadow_renders, 1);
        assert_eq!(report.shadow_cache_hits, 0);

        let presented_shadow_passes: usize = r
            .device()
            .frames()
            .iter()
            .filter(|f| f.presented)
            .map(|f| f.passes_labelled("shadow_pass").count())
            .sum();
        assert_eq!(presented_shadow_passes, 1);

        let report = r.render_frame(&scene, &camera()).unwrap();
        assert_eq!(report.shadow_renders, 0);
        assert_eq!(report.shadow_cache_hits, 1);
    }

    #[test]
    fn test_unsupported_light_leaves_existing_set() {
        let mut r = renderer();
        r.initialize_lights(&[sun(true)]).unwrap();

        let spot = LightDesc {
            kind: crate::gfx::lighting::LightKind::Point { range: 10.0 },
            ..sun(true)
        };
        let err = r.initialize_lights(&[sun(true), spot]).unwrap_err();
        assert_eq!(err, RenderError::UnsupportedLight("point"));
        assert_eq!(r.lights().len(), 1);
        assert_eq!(r.device().live_targets("shadow_map").len(), 1);
    }

    #[test]
    fn test_reinitializing_frees_old_shadow_maps() {
        let mut r = renderer();
        r.initialize_lights(&[sun(true), sun(true)]).unwrap();
        assert_eq!(r.device().live_targets("shadow_map").len(), 2);

        r.initialize_lights(&[sun(false)]).unwrap();
        assert!(r.device().live_targets("shadow_map").is_empty());
    }

    #[test]
    fn test_shader_failure_is_fatal() {
        let mut device = HeadlessDevice::new(64, 48);
        device.fail_shader(ShaderProgram::DirectionalLight);
        let err = Renderer::new(device, RenderConfig::default(), &ShaderSet::builtin())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            RenderError::ShaderCompilation {
                program: ShaderProgram::DirectionalLight,
                ..
            }
        ));
    }

    #[test]
    fn test_every_anti_alias_mode_renders() {
        let mut r = renderer();
        let scene = scene(r.device_mut());
        r.initialize_lights(&[sun(true)]).unwrap();

        for mode in AntiAliasMode::ALL {
            r.set_anti_alias(mode);
            let report = r.render_frame(&scene, &camera()).unwrap();
            assert_eq!(report.outcome, FrameOutcome::Presented);
            assert_eq!(report.anti_alias, mode);

            let frame = r.device().last_frame().unwrap();
            assert_eq!(frame.passes_labelled("fxaa_pass").count() == 1, mode.uses_fxaa());
            let geometry = frame.passes_labelled("geometry_pass").next().unwrap();
            assert_eq!(geometry.color[0].resolve.is_some(), mode.sample_count() > 1);
            assert_eq!(
                r.device().live_targets("gbuffer_ms").len(),
                if mode.sample_count() > 1 { 4 } else { 0 }
            );
        }
    }

    #[test]
    fn test_cycle_anti_alias_wraps() {
        let mut r = renderer();
        let start = r.anti_alias();
        for _ in 0..AntiAliasMode::ALL.len() - 1 {
            assert_ne!(r.cycle_anti_alias(), start);
        }
        assert_eq!(r.cycle_anti_alias(), start);
    }

    #[test]
    fn test_missing_material_still_renders() {
        let mut r = renderer();
        let mut scene = scene(r.device_mut());
        let cube = scene.upload_mesh(r.device_mut(), "c", &generate_cube()).unwrap();
        scene.add_object(RenderableObject::textured("odd", cube.key, cube.bounding_radius, "nope"));

        let report = r.render_frame(&scene, &camera()).unwrap();
        assert_eq!(report.outcome, FrameOutcome::Presented);
        assert_eq!(report.material_fallbacks, 1);
    }

    #[test]
    fn test_shadow_allocation_failure_renders_unshadowed() {
        let mut device = HeadlessDevice::new(64, 48);
        device.fail_allocations("shadow_map", true);
        let mut r = Renderer::new(device, RenderConfig::default(), &ShaderSet::builtin()).unwrap();
        let scene = scene(r.device_mut());
        r.initialize_lights(&[sun(true)]).unwrap();

        let report = r.render_frame(&scene, &camera()).unwrap();
        assert_eq!(report.outcome, FrameOutcome::Presented);
        assert_eq!(report.unshadowed_lights, 1);

        r.device_mut().fail_allocations("shadow_map", false);
        let report = r.render_frame(&scene, &camera()).unwrap();
        assert_eq!(report.shadow_renders, 1);
        assert_eq!(report.unshadowed_lights, 0);
    }

    #[test]
    fn test_toggling_cast_shadows_allocates_and_frees() {
        let mut r = renderer();
        let ids = r.initialize_lights(&[sun(false)]).unwrap();

        assert!(r.set_cast_shadows(ids[0], true));
        assert_eq!(r.device().live_targets("shadow_map").len(), 1);
        assert!(r.set_cast_shadows(ids[0], false));
        assert!(r.device().live_targets("shadow_map").is_empty());
    }

    #[test]
    fn test_shadow_map_size_change_reallocates() {
        let mut r = renderer();
        let scene = scene(r.device_mut());
        r.config_mut().shadow.min_map_size = 256;
        r.initialize_lights(&[sun(true)]).unwrap();
        r.render_frame(&scene, &camera()).unwrap();

        r.set_shadow_map_size(512);
        let report = r.render_frame(&scene, &camera()).unwrap();
        assert_eq!(report.shadow_renders, 1);
        let maps = r.device().live_targets("shadow_map");
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].width, 512);
    }

    #[test]
    fn test_shadow_map_size_below_minimum_keeps_maps() {
        let mut r = renderer();
        let scene = scene(r.device_mut());
        r.initialize_lights(&[sun(true)]).unwrap();
        r.render_frame(&scene, &camera()).unwrap();

        r.set_shadow_map_size(256);
        let report = r.render_frame(&scene, &camera()).unwrap();
        assert_eq!(report.shadow_renders, 0);
        assert_eq!(report.shadow_cache_hits, 1);
        let after = r.device().live_targets("shadow_map");
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].width, 2048);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut r = renderer();
        r.initialize_lights(&[sun(true)]).unwrap();
        r.set_anti_alias(AntiAliasMode::Msaa4xFxaa);
        let scene = scene(r.device_mut());
        r.render_frame(&scene, &camera()).unwrap();

        let mut scene = scene;
        let mut device = r.shutdown();
        scene.release(&mut device);
        assert_eq!(device.target_stats().live, 0);
        assert_eq!(device.mesh_stats().live, 0);
    }
}
