// src/gfx/rendering/mod.rs
//! Frame pipeline
//!
//! Shadow pass, G-buffer fill, light accumulation and post-processing, driven
//! by [`Renderer`] against any [`RenderDevice`] backend.

pub mod device;
pub mod gbuffer;
pub mod headless;
pub mod pipeline_manager;
pub mod post_process;
pub mod render_engine;
pub mod render_pass_ext;
pub mod shader_set;
pub mod shadow_cache;
pub mod wgpu_device;

// Re-export main types
pub use device::{
    BlendMode, ColorAttachment, ColorTarget, DepthAttachment, Draw, DrawUniform, LoadOp,
    PassDesc, RenderDevice, ShaderProgram, TargetDesc, TargetFormat,
};
pub use gbuffer::{GBuffer, GeometryRenderer, GeometryStats};
pub use headless::{HeadlessDevice, RecordedFrame};
pub use pipeline_manager::{PipelineConfig, PipelineManager, PipelineStats};
pub use post_process::{AntiAliasMode, PostProcessStage, ToneMapping};
pub use render_engine::{FrameOutcome, FrameReport, FrameStage, Renderer};
pub use shader_set::ShaderSet;
pub use shadow_cache::{ShadowCache, ShadowCacheStats, ShadowOutcome};
pub use wgpu_device::WgpuDevice;
