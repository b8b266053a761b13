//! Graphics device abstraction used by the frame orchestrator
//!
//! The render core describes every GPU pass as plain data ([`PassDesc`]) and
//! hands it to a [`RenderDevice`]. The production backend is
//! [`WgpuDevice`](super::wgpu_device::WgpuDevice); the
//! [`HeadlessDevice`](super::headless::HeadlessDevice) records passes without a
//! GPU and backs the test-suite.

use crate::error::RenderResult;
use crate::gfx::geometry::MeshData;
use crate::gfx::resources::handles::{MeshKey, TextureKey};

/// Every shader program the pipeline runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderProgram {
    /// Depth-only occluder pass into a shadow map
    ShadowDepth,
    /// G-buffer fill for flat-colored primitives
    GeometryFlat,
    /// G-buffer fill for textured objects
    GeometryTextured,
    /// Flat ambient term, clears the HDR target
    Ambient,
    /// Full-screen directional light accumulation
    DirectionalLight,
    /// HDR resolve through the active tone-mapping operator
    ToneMap,
    /// Edge-detection anti-aliasing filter
    Fxaa,
}

impl ShaderProgram {
    /// All programs, in the order they are compiled at startup
    pub const ALL: [ShaderProgram; 7] = [
        ShaderProgram::ShadowDepth,
        ShaderProgram::GeometryFlat,
        ShaderProgram::GeometryTextured,
        ShaderProgram::Ambient,
        ShaderProgram::DirectionalLight,
        ShaderProgram::ToneMap,
        ShaderProgram::Fxaa,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ShaderProgram::ShadowDepth => "shadow_depth",
            ShaderProgram::GeometryFlat => "geometry_flat",
            ShaderProgram::GeometryTextured => "geometry_textured",
            ShaderProgram::Ambient => "ambient",
            ShaderProgram::DirectionalLight => "directional_light",
            ShaderProgram::ToneMap => "tone_map",
            ShaderProgram::Fxaa => "fxaa",
        }
    }

    /// Depth-only programs have no fragment entry point
    pub fn has_fragment_stage(self) -> bool {
        !matches!(self, ShaderProgram::ShadowDepth)
    }

    /// Whether the program consumes mesh vertex buffers (as opposed to a
    /// full-screen triangle generated in the vertex shader)
    pub fn uses_mesh_input(self) -> bool {
        matches!(
            self,
            ShaderProgram::ShadowDepth
                | ShaderProgram::GeometryFlat
                | ShaderProgram::GeometryTextured
        )
    }
}

/// Pixel formats of the render targets the pipeline allocates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    Depth32Float,
    Rgba16Float,
    Rgba8Unorm,
    /// Whatever format the presentation surface uses
    Surface,
}

impl TargetFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, TargetFormat::Depth32Float)
    }
}

/// Description of a render target allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TargetFormat,
    pub sample_count: u32,
}

impl TargetDesc {
    pub fn new(label: &str, width: u32, height: u32, format: TargetFormat) -> Self {
        Self {
            label: label.to_string(),
            width,
            height,
            format,
            sample_count: 1,
        }
    }

    pub fn with_samples(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count.max(1);
        self
    }
}

/// What happens to an attachment's previous contents when a pass begins
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp {
    Clear([f32; 4]),
    Keep,
}

/// Blend state applied to a color attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Replace,
    /// `src + dst`, used for per-light accumulation
    Additive,
}

/// Where a color attachment writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorTarget {
    Texture(TextureKey),
    /// The presentable surface image of the current frame
    Surface,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAttachment {
    pub target: ColorTarget,
    /// Single-sampled target a multisampled attachment resolves into
    pub resolve: Option<TextureKey>,
    pub load: LoadOp,
    pub blend: BlendMode,
}

impl ColorAttachment {
    pub fn texture(key: TextureKey) -> Self {
        Self {
            target: ColorTarget::Texture(key),
            resolve: None,
            load: LoadOp::Clear([0.0; 4]),
            blend: BlendMode::Replace,
        }
    }

    pub fn surface() -> Self {
        Self {
            target: ColorTarget::Surface,
            resolve: None,
            load: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
            blend: BlendMode::Replace,
        }
    }

    pub fn with_load(mut self, load: LoadOp) -> Self {
        self.load = load;
        self
    }

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_resolve(mut self, resolve: Option<TextureKey>) -> Self {
        self.resolve = resolve;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthAttachment {
    pub target: TextureKey,
    /// `Some(depth)` clears, `None` keeps the previous contents
    pub clear: Option<f32>,
}

/// Per-draw uniform block shared by the shadow and geometry programs
///
/// MUST match `DrawUniform` in `shadow.wgsl`, `geometry_flat.wgsl` and
/// `geometry_textured.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawUniform {
    pub model: [[f32; 4]; 4],
    pub albedo: [f32; 4],
    /// x = specular strength, y = shininess, zw unused
    pub material: [f32; 4],
}

/// A single draw inside a pass
#[derive(Debug, Clone, PartialEq)]
pub enum Draw {
    Mesh {
        program: ShaderProgram,
        mesh: MeshKey,
        uniform: DrawUniform,
        /// Albedo texture, `None` binds the device's 1x1 white texture
        texture: Option<TextureKey>,
    },
    /// Full-screen triangle generated in the vertex shader
    FullScreen { program: ShaderProgram },
}

impl Draw {
    pub fn program(&self) -> ShaderProgram {
        match self {
            Draw::Mesh { program, .. } => *program,
            Draw::FullScreen { program } => *program,
        }
    }
}

/// Data description of one render pass
///
/// Inputs are bound in order as sampled textures; `uniforms` is the raw bytes
/// of the program's pass-level uniform block.
#[derive(Debug, Clone, PartialEq)]
pub struct PassDesc {
    pub label: String,
    pub color: Vec<ColorAttachment>,
    pub depth: Option<DepthAttachment>,
    pub inputs: Vec<TextureKey>,
    pub uniforms: Vec<u8>,
    pub draws: Vec<Draw>,
}

impl PassDesc {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            color: Vec::new(),
            depth: None,
            inputs: Vec::new(),
            uniforms: Vec::new(),
            draws: Vec::new(),
        }
    }

    pub fn with_color(mut self, attachment: ColorAttachment) -> Self {
        self.color.push(attachment);
        self
    }

    pub fn with_depth(mut self, target: TextureKey, clear: Option<f32>) -> Self {
        self.depth = Some(DepthAttachment { target, clear });
        self
    }

    pub fn with_input(mut self, texture: TextureKey) -> Self {
        self.inputs.push(texture);
        self
    }

    pub fn with_uniforms<T: bytemuck::Pod>(mut self, uniforms: &T) -> Self {
        self.uniforms = bytemuck::bytes_of(uniforms).to_vec();
        self
    }

    pub fn with_draw(mut self, draw: Draw) -> Self {
        self.draws.push(draw);
        self
    }

    pub fn with_draws(mut self, draws: impl IntoIterator<Item = Draw>) -> Self {
        self.draws.extend(draws);
        self
    }

    /// Texture keys of every attachment written by this pass
    pub fn attachment_keys(&self) -> impl Iterator<Item = TextureKey> + '_ {
        let colors = self.color.iter().filter_map(|c| match c.target {
            ColorTarget::Texture(key) => Some(key),
            ColorTarget::Surface => None,
        });
        let resolves = self.color.iter().filter_map(|c| c.resolve);
        colors.chain(resolves).chain(self.depth.map(|d| d.target))
    }

    pub fn writes_surface(&self) -> bool {
        self.color
            .iter()
            .any(|c| matches!(c.target, ColorTarget::Surface))
    }
}

/// Backend that owns GPU resources and executes pass descriptions
///
/// All calls happen on the render thread in the fixed stage order. `present`
/// is the only call allowed to block (vertical sync / swap).
pub trait RenderDevice {
    /// Current size of the presentation surface in pixels
    fn surface_size(&self) -> (u32, u32);

    /// Reconfigures the presentation surface for a new size
    fn configure_surface(&mut self, width: u32, height: u32) -> RenderResult<()>;

    /// Switches between vsync (`Fifo`) and immediate presentation
    fn set_vsync(&mut self, enabled: bool);

    /// Largest supported 2D texture dimension
    fn max_texture_size(&self) -> u32;

    /// Whether a multisampled target of `format` with `samples` can be created
    fn supports_sample_count(&self, format: TargetFormat, samples: u32) -> bool;

    /// Compiles a program from WGSL source; failure is fatal for the pipeline
    fn compile_shader(&mut self, program: ShaderProgram, source: &str) -> RenderResult<()>;

    fn create_target(&mut self, desc: &TargetDesc) -> RenderResult<TextureKey>;

    fn destroy_target(&mut self, key: TextureKey);

    /// Size of a live target, `None` if the handle is stale
    fn target_size(&self, key: TextureKey) -> Option<(u32, u32)>;

    /// Uploads already-decoded RGBA8 pixels as a sampled texture
    fn create_texture_rgba8(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> RenderResult<TextureKey>;

    fn create_mesh(&mut self, label: &str, mesh: &MeshData) -> RenderResult<MeshKey>;

    fn destroy_mesh(&mut self, key: MeshKey);

    /// Acquires the next surface image and starts recording
    fn begin_frame(&mut self) -> RenderResult<()>;

    /// Records one pass into the current frame
    fn submit_pass(&mut self, pass: &PassDesc) -> RenderResult<()>;

    /// Submits the frame and presents it, blocking until a frame slot is free
    fn present(&mut self) -> RenderResult<()>;

    /// Drops everything recorded since `begin_frame` without presenting
    fn discard_frame(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_program_stages() {
        assert!(!ShaderProgram::ShadowDepth.has_fragment_stage());
        assert!(ShaderProgram::Fxaa.has_fragment_stage());
        assert!(ShaderProgram::GeometryTextured.uses_mesh_input());
        assert!(!ShaderProgram::ToneMap.uses_mesh_input());
    }

    #[test]
    fn test_attachment_keys_cover_color_resolve_and_depth() {
        let mut keys: SlotMap<TextureKey, ()> = SlotMap::with_key();
        let color = keys.insert(());
        let resolve = keys.insert(());
        let depth = keys.insert(());

        let pass = PassDesc::new("test")
            .with_color(ColorAttachment::texture(color).with_resolve(Some(resolve)))
            .with_color(ColorAttachment::surface())
            .with_depth(depth, Some(1.0));

        let collected: Vec<_> = pass.attachment_keys().collect();
        assert_eq!(collected, vec![color, resolve, depth]);
        assert!(pass.writes_surface());
    }
}
