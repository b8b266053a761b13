//! Recording render device without a GPU
//!
//! [`HeadlessDevice`] validates every pass the way a real backend would
//! (live handles, matching attachment sizes, compiled programs) and records
//! it, so frame orchestration can be inspected and tested offscreen. Faults
//! (allocation failures, shader errors, outdated surfaces) can be injected.

use std::collections::HashSet;

use log::trace;

use crate::error::{RenderError, RenderResult};
use crate::gfx::geometry::MeshData;
use crate::gfx::resources::handles::{AllocationStats, MeshKey, ResourceTable, TextureKey};

use super::device::{
    ColorTarget, Draw, PassDesc, RenderDevice, ShaderProgram, TargetDesc, TargetFormat,
};
use super::shader_set::ShaderSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshRecord {
    pub label: String,
    pub vertex_count: usize,
    pub index_count: usize,
}

/// Passes recorded between `begin_frame` and `present`/`discard_frame`
#[derive(Debug, Clone, Default)]
pub struct RecordedFrame {
    pub passes: Vec<PassDesc>,
    pub presented: bool,
}

impl RecordedFrame {
    pub fn passes_labelled<'a>(
        &'a self,
        label: &'a str,
    ) -> impl Iterator<Item = &'a PassDesc> + 'a {
        self.passes.iter().filter(move |p| p.label == label)
    }

    /// Number of draws using `program` across the frame
    pub fn draw_count(&self, program: ShaderProgram) -> usize {
        self.passes
            .iter()
            .flat_map(|p| p.draws.iter())
            .filter(|d| d.program() == program)
            .count()
    }

    /// Meshes drawn with `program` across the frame
    pub fn meshes_drawn(&self, program: ShaderProgram) -> Vec<MeshKey> {
        self.passes
            .iter()
            .flat_map(|p| p.draws.iter())
            .filter_map(|d| match d {
                Draw::Mesh { program: p, mesh, .. } if *p == program => Some(*mesh),
                _ => None,
            })
            .collect()
    }
}

pub struct HeadlessDevice {
    surface_size: (u32, u32),
    max_texture_size: u32,
    sample_counts: Vec<u32>,
    vsync: bool,
    compiled: HashSet<ShaderProgram>,
    targets: ResourceTable<TextureKey, TargetDesc>,
    meshes: ResourceTable<MeshKey, MeshRecord>,
    target_stats: AllocationStats,
    mesh_stats: AllocationStats,
    current: Option<Vec<PassDesc>>,
    frames: Vec<RecordedFrame>,
    failing_labels: HashSet<String>,
    failing_programs: HashSet<ShaderProgram>,
    outdated_presents: u32,
}

impl HeadlessDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface_size: (width, height),
            max_texture_size: 8192,
            sample_counts: vec![1, 2, 4],
            vsync: true,
            compiled: HashSet::new(),
            targets: ResourceTable::with_key(),
            meshes: ResourceTable::with_key(),
            target_stats: AllocationStats::default(),
            mesh_stats: AllocationStats::default(),
            current: None,
            frames: Vec::new(),
            failing_labels: HashSet::new(),
            failing_programs: HashSet::new(),
            outdated_presents: 0,
        }
    }

    pub fn with_max_texture_size(mut self, max: u32) -> Self {
        self.max_texture_size = max;
        self
    }

    /// Restricts the sample counts reported as supported
    pub fn with_sample_counts(mut self, counts: &[u32]) -> Self {
        self.sample_counts = counts.to_vec();
        self
    }

    /// Compiles the bundled shader set
    pub fn compile_all_builtin(&mut self) -> RenderResult<()> {
        ShaderSet::builtin().compile_all(self)
    }

    /// Makes every allocation whose label starts with `prefix` fail (or succeed again)
    pub fn fail_allocations(&mut self, prefix: &str, fail: bool) {
        if fail {
            self.failing_labels.insert(prefix.to_string());
        } else {
            self.failing_labels.remove(prefix);
        }
    }

    pub fn fail_shader(&mut self, program: ShaderProgram) {
        self.failing_programs.insert(program);
    }

    /// The next `count` presents report an outdated surface
    pub fn simulate_surface_outdated(&mut self, count: u32) {
        self.outdated_presents = count;
    }

    pub fn frames(&self) -> &[RecordedFrame] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&RecordedFrame> {
        self.frames.last()
    }

    pub fn presented_count(&self) -> usize {
        self.frames.iter().filter(|f| f.presented).count()
    }

    pub fn clear_frames(&mut self) {
        self.frames.clear();
    }

    pub fn target_stats(&self) -> AllocationStats {
        self.target_stats
    }

    pub fn mesh_stats(&self) -> AllocationStats {
        self.mesh_stats
    }

    pub fn target_desc(&self, key: TextureKey) -> Option<&TargetDesc> {
        self.targets.get(key)
    }

    /// Live targets whose label starts with `prefix`
    pub fn live_targets(&self, prefix: &str) -> Vec<&TargetDesc> {
        self.targets
            .values()
            .filter(|desc| desc.label.starts_with(prefix))
            .collect()
    }

    pub fn is_vsync(&self) -> bool {
        self.vsync
    }

    pub fn is_compiled(&self, program: ShaderProgram) -> bool {
        self.compiled.contains(&program)
    }

    fn allocation_fails(&self, label: &str) -> bool {
        self.failing_labels.iter().any(|prefix| label.starts_with(prefix.as_str()))
    }

    fn validate_pass(&self, pass: &PassDesc) -> RenderResult<()> {
        let mismatch = || RenderError::AttachmentMismatch {
            pass: pass.label.clone(),
        };

        if pass.color.is_empty() && pass.depth.is_none() {
            return Err(mismatch());
        }

        for draw in &pass.draws {
            let program = draw.program();
            if !self.compiled.contains(&program) {
                return Err(RenderError::MissingShader(program));
            }
            if let Draw::Mesh { mesh, texture, .. } = draw {
                if !self.meshes.contains_key(*mesh) {
                    return Err(RenderError::UnknownResource("mesh"));
                }
                if let Some(texture) = texture {
                    if !self.targets.contains_key(*texture) {
                        return Err(RenderError::UnknownResource("texture"));
                    }
                }
            }
        }

        for input in &pass.inputs {
            let desc = self
                .targets
                .get(*input)
                .ok_or(RenderError::UnknownResource("texture"))?;
            if desc.sample_count > 1 {
                return Err(mismatch());
            }
        }

        // (width, height, samples) of every rendered attachment
        let mut extents = Vec::new();
        for attachment in &pass.color {
            match attachment.target {
                ColorTarget::Texture(key) => {
                    let desc = self
                        .targets
                        .get(key)
                        .ok_or(RenderError::UnknownResource("texture"))?;
                    extents.push((desc.width, desc.height, desc.sample_count));
                }
                ColorTarget::Surface => {
                    extents.push((self.surface_size.0, self.surface_size.1, 1));
                }
            }
            if let Some(resolve) = attachment.resolve {
                let desc = self
                    .targets
                    .get(resolve)
                    .ok_or(RenderError::UnknownResource("texture"))?;
                let (w, h, _) = extents[extents.len() - 1];
                if desc.sample_count != 1 || (desc.width, desc.height) != (w, h) {
                    return Err(mismatch());
                }
            }
        }
        if let Some(depth) = pass.depth {
            let desc = self
                .targets
                .get(depth.target)
                .ok_or(RenderError::UnknownResource("texture"))?;
            if !desc.format.is_depth() {
                return Err(mismatch());
            }
            extents.push((desc.width, desc.height, desc.sample_count));
        }

        if extents.windows(2).any(|pair| pair[0] != pair[1]) {
            return Err(mismatch());
        }
        Ok(())
    }
}

impl RenderDevice for HeadlessDevice {
    fn surface_size(&self) -> (u32, u32) {
        self.surface_size
    }

    fn configure_surface(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidDimensions { width, height });
        }
        self.surface_size = (width, height);
        Ok(())
    }

    fn set_vsync(&mut self, enabled: bool) {
        self.vsync = enabled;
    }

    fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    fn supports_sample_count(&self, _format: TargetFormat, samples: u32) -> bool {
        self.sample_counts.contains(&samples)
    }

    fn compile_shader(&mut self, program: ShaderProgram, source: &str) -> RenderResult<()> {
        let fail = |message: &str| RenderError::ShaderCompilation {
            program,
            message: message.to_string(),
        };

        if self.failing_programs.contains(&program) {
            return Err(fail("injected compilation failure"));
        }
        if !source.contains("fn vs_main") {
            return Err(fail("missing vertex entry point 'vs_main'"));
        }
        if program.has_fragment_stage() && !source.contains("fn fs_main") {
            return Err(fail("missing fragment entry point 'fs_main'"));
        }

        self.compiled.insert(program);
        Ok(())
    }

    fn create_target(&mut self, desc: &TargetDesc) -> RenderResult<TextureKey> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::InvalidDimensions {
                width: desc.width,
                height: desc.height,
            });
        }
        if desc.width > self.max_texture_size || desc.height > self.max_texture_size {
            return Err(RenderError::ResourceAllocation {
                label: desc.label.clone(),
                reason: format!("exceeds maximum size {}", self.max_texture_size),
            });
        }
        if desc.sample_count > 1 && !self.supports_sample_count(desc.format, desc.sample_count) {
            return Err(RenderError::ResourceAllocation {
                label: desc.label.clone(),
                reason: format!("{} samples unsupported", desc.sample_count),
            });
        }
        if self.allocation_fails(&desc.label) {
            return Err(RenderError::ResourceAllocation {
                label: desc.label.clone(),
                reason: "injected allocation failure".to_string(),
            });
        }

        self.target_stats.record_allocation();
        trace!("create_target {} {}x{}", desc.label, desc.width, desc.height);
        Ok(self.targets.insert(desc.clone()))
    }

    fn destroy_target(&mut self, key: TextureKey) {
        if self.targets.remove(key).is_some() {
            self.target_stats.record_release();
        }
    }

    fn target_size(&self, key: TextureKey) -> Option<(u32, u32)> {
        self.targets.get(key).map(|desc| (desc.width, desc.height))
    }

    fn create_texture_rgba8(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> RenderResult<TextureKey> {
        if pixels.len() != (width as usize) * (height as usize) * 4 {
            return Err(RenderError::ResourceAllocation {
                label: label.to_string(),
                reason: format!(
                    "expected {}x{} RGBA8 pixels, got {} bytes",
                    width,
                    height,
                    pixels.len()
                ),
            });
        }
        self.create_target(&TargetDesc::new(label, width, height, TargetFormat::Rgba8Unorm))
    }

    fn create_mesh(&mut self, label: &str, mesh: &MeshData) -> RenderResult<MeshKey> {
        if self.allocation_fails(label) {
            return Err(RenderError::ResourceAllocation {
                label: label.to_string(),
                reason: "injected allocation failure".to_string(),
            });
        }
        self.mesh_stats.record_allocation();
        Ok(self.meshes.insert(MeshRecord {
            label: label.to_string(),
            vertex_count: mesh.vertex_count(),
            index_count: mesh.indices.len(),
        }))
    }

    fn destroy_mesh(&mut self, key: MeshKey) {
        if self.meshes.remove(key).is_some() {
            self.mesh_stats.record_release();
        }
    }

    fn begin_frame(&mut self) -> RenderResult<()> {
        if let Some(passes) = self.current.take() {
            self.frames.push(RecordedFrame {
                passes,
                presented: false,
            });
        }
        self.current = Some(Vec::new());
        Ok(())
    }

    fn submit_pass(&mut self, pass: &PassDesc) -> RenderResult<()> {
        if self.current.is_none() {
            return Err(RenderError::NoActiveFrame);
        }
        self.validate_pass(pass)?;
        trace!("submit_pass {} ({} draws)", pass.label, pass.draws.len());
        if let Some(passes) = self.current.as_mut() {
            passes.push(pass.clone());
        }
        Ok(())
    }

    fn present(&mut self) -> RenderResult<()> {
        let passes = self.current.take().ok_or(RenderError::NoActiveFrame)?;
        if self.outdated_presents > 0 {
            self.outdated_presents -= 1;
            self.frames.push(RecordedFrame {
                passes,
                presented: false,
            });
            return Err(RenderError::SurfaceOutdated);
        }
        self.frames.push(RecordedFrame {
            passes,
            presented: true,
        });
        Ok(())
    }

    fn discard_frame(&mut self) {
        if let Some(passes) = self.current.take() {
            self.frames.push(RecordedFrame {
                passes,
                presented: false,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::rendering::device::ColorAttachment;

    #[test]
    fn test_pass_outside_frame_is_rejected() {
        let mut device = HeadlessDevice::new(16, 16);
        let target = device
            .create_target(&TargetDesc::new("t", 16, 16, TargetFormat::Rgba16Float))
            .unwrap();
        let pass = PassDesc::new("p").with_color(ColorAttachment::texture(target));
        assert_eq!(device.submit_pass(&pass), Err(RenderError::NoActiveFrame));
    }

    #[test]
    fn test_mismatched_attachments_are_rejected() {
        let mut device = HeadlessDevice::new(16, 16);
        let a = device
            .create_target(&TargetDesc::new("a", 16, 16, TargetFormat::Rgba16Float))
            .unwrap();
        let b = device
            .create_target(&TargetDesc::new("b", 8, 8, TargetFormat::Depth32Float))
            .unwrap();

        device.begin_frame().unwrap();
        let pass = PassDesc::new("p")
            .with_color(ColorAttachment::texture(a))
            .with_depth(b, Some(1.0));
        assert!(matches!(
            device.submit_pass(&pass),
            Err(RenderError::AttachmentMismatch { .. })
        ));
    }

    #[test]
    fn test_stale_handle_is_rejected() {
        let mut device = HeadlessDevice::new(16, 16);
        let a = device
            .create_target(&TargetDesc::new("a", 16, 16, TargetFormat::Rgba16Float))
            .unwrap();
        device.destroy_target(a);

        device.begin_frame().unwrap();
        let pass = PassDesc::new("p").with_color(ColorAttachment::texture(a));
        assert_eq!(
            device.submit_pass(&pass),
            Err(RenderError::UnknownResource("texture"))
        );
        assert_eq!(device.target_stats().live, 0);
    }

    #[test]
    fn test_builtin_compile_failure_is_reported() {
        let mut device = HeadlessDevice::new(16, 16);
        device.fail_shader(ShaderProgram::ToneMap);
        assert!(device.compile_all_builtin().is_err());
        assert!(!device.is_compiled(ShaderProgram::ToneMap));

        let mut device = HeadlessDevice::new(16, 16);
        device.compile_all_builtin().unwrap();
        assert!(device.is_compiled(ShaderProgram::DirectionalLight));
    }

    #[test]
    fn test_injected_faults() {
        let mut device = HeadlessDevice::new(16, 16).with_sample_counts(&[1]);
        device.fail_allocations("gbuffer", true);
        assert!(device
            .create_target(&TargetDesc::new("gbuffer_normal", 16, 16, TargetFormat::Rgba16Float))
            .is_err());
        assert!(device
            .create_target(
                &TargetDesc::new("hdr", 16, 16, TargetFormat::Rgba16Float).with_samples(4)
            )
            .is_err());

        device.fail_shader(ShaderProgram::Ambient);
        assert!(device
            .compile_shader(ShaderProgram::Ambient, "fn vs_main() {} fn fs_main() {}")
            .is_err());

        device.simulate_surface_outdated(1);
        device.begin_frame().unwrap();
        assert_eq!(device.present(), Err(RenderError::SurfaceOutdated));
        device.begin_frame().unwrap();
        assert!(device.present().is_ok());
        assert_eq!(device.presented_count(), 1);
    }
}
