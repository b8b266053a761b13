//! Tone mapping and anti-aliasing
//!
//! The HDR accumulation buffer is resolved through the selected operator and
//! then optionally filtered with FXAA before reaching the surface. Each
//! [`AntiAliasMode`] decides which intermediate buffers exist; buffers the
//! current mode does not need are released when the mode changes.

use std::collections::HashSet;

use log::{info, warn};

use crate::config::PostProcessConfig;
use crate::error::RenderResult;
use crate::gfx::rendering::device::{
    ColorAttachment, Draw, PassDesc, RenderDevice, ShaderProgram, TargetDesc, TargetFormat,
};
use crate::gfx::rendering::gbuffer::GBuffer;
use crate::gfx::resources::handles::TextureKey;

/// HDR to display-range operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToneMapping {
    Clamp,
    Reinhard,
    /// ACES filmic fit
    #[default]
    Filmic,
}

impl ToneMapping {
    pub const ALL: [ToneMapping; 3] = [
        ToneMapping::Clamp,
        ToneMapping::Reinhard,
        ToneMapping::Filmic,
    ];

    pub fn next(self) -> Self {
        match self {
            ToneMapping::Clamp => ToneMapping::Reinhard,
            ToneMapping::Reinhard => ToneMapping::Filmic,
            ToneMapping::Filmic => ToneMapping::Clamp,
        }
    }

    /// Index understood by `tonemap.wgsl`
    pub fn shader_index(self) -> f32 {
        match self {
            ToneMapping::Clamp => 0.0,
            ToneMapping::Reinhard => 1.0,
            ToneMapping::Filmic => 2.0,
        }
    }

    /// CPU mirror of the shader operator
    pub fn apply(self, hdr: [f32; 3], exposure: f32) -> [f32; 3] {
        hdr.map(|c| {
            let x = (c * exposure).max(0.0);
            let mapped = match self {
                ToneMapping::Clamp => x,
                ToneMapping::Reinhard => x / (1.0 + x),
                ToneMapping::Filmic => (x * (2.51 * x + 0.03)) / (x * (2.43 * x + 0.59) + 0.14),
            };
            mapped.clamp(0.0, 1.0)
        })
    }
}

/// Anti-aliasing modes, in cycling order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AntiAliasMode {
    Off,
    #[default]
    Fxaa,
    Msaa2x,
    Msaa4x,
    Msaa4xFxaa,
}

impl AntiAliasMode {
    pub const ALL: [AntiAliasMode; 5] = [
        AntiAliasMode::Off,
        AntiAliasMode::Fxaa,
        AntiAliasMode::Msaa2x,
        AntiAliasMode::Msaa4x,
        AntiAliasMode::Msaa4xFxaa,
    ];

    /// Next mode in the sequence, wrapping back to `Off`
    pub fn next(self) -> Self {
        match self {
            AntiAliasMode::Off => AntiAliasMode::Fxaa,
            AntiAliasMode::Fxaa => AntiAliasMode::Msaa2x,
            AntiAliasMode::Msaa2x => AntiAliasMode::Msaa4x,
            AntiAliasMode::Msaa4x => AntiAliasMode::Msaa4xFxaa,
            AntiAliasMode::Msaa4xFxaa => AntiAliasMode::Off,
        }
    }

    pub fn sample_count(self) -> u32 {
        match self {
            AntiAliasMode::Off | AntiAliasMode::Fxaa => 1,
            AntiAliasMode::Msaa2x => 2,
            AntiAliasMode::Msaa4x | AntiAliasMode::Msaa4xFxaa => 4,
        }
    }

    pub fn uses_fxaa(self) -> bool {
        matches!(self, AntiAliasMode::Fxaa | AntiAliasMode::Msaa4xFxaa)
    }

    /// Mode matching what was actually allocated
    fn from_parts(samples: u32, fxaa: bool) -> Self {
        match (samples, fxaa) {
            (4, true) => AntiAliasMode::Msaa4xFxaa,
            (4, false) => AntiAliasMode::Msaa4x,
            (2, _) => AntiAliasMode::Msaa2x,
            (_, true) => AntiAliasMode::Fxaa,
            _ => AntiAliasMode::Off,
        }
    }
}

impl std::fmt::Display for AntiAliasMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AntiAliasMode::Off => "off",
            AntiAliasMode::Fxaa => "FXAA",
            AntiAliasMode::Msaa2x => "MSAA 2x",
            AntiAliasMode::Msaa4x => "MSAA 4x",
            AntiAliasMode::Msaa4xFxaa => "MSAA 4x + FXAA",
        };
        f.write_str(label)
    }
}

/// MUST match `ToneMapUniform` in `tonemap.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ToneMapUniform {
    /// x = operator index, y = exposure
    pub params: [f32; 4],
}

/// MUST match `FxaaUniform` in `fxaa.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FxaaUniform {
    /// xy = 1 / viewport size
    pub inverse_size: [f32; 4],
}

/// Owns the anti-aliasing intermediates and composites to the surface
#[derive(Default)]
pub struct PostProcessStage {
    requested: Option<AntiAliasMode>,
    size: (u32, u32),
    multisample: Option<GBuffer>,
    fxaa_source: Option<TextureKey>,
    warned_samples: HashSet<u32>,
}

impl PostProcessStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Multisampled G-buffer set the geometry pass rasterizes into
    pub fn multisample(&self) -> Option<&GBuffer> {
        self.multisample.as_ref()
    }

    /// LDR target tone mapping writes when FXAA runs afterwards
    pub fn fxaa_source(&self) -> Option<TextureKey> {
        self.fxaa_source
    }

    /// Mode the allocated buffers actually implement
    pub fn effective_mode(&self) -> AntiAliasMode {
        let samples = self.multisample.as_ref().map_or(1, GBuffer::sample_count);
        AntiAliasMode::from_parts(samples, self.fxaa_source.is_some())
    }

    /// Makes the intermediates match `mode` at the given viewport size
    pub fn configure<D: RenderDevice>(
        &mut self,
        device: &mut D,
        mode: AntiAliasMode,
        width: u32,
        height: u32,
    ) {
        if self.requested == Some(mode) && self.size == (width, height) {
            return;
        }
        self.release(device);

        let samples = self.supported_samples(device, mode.sample_count());
        if samples > 1 {
            match GBuffer::allocate(device, "gbuffer_ms", width, height, samples) {
                Ok(set) => self.multisample = Some(set),
                Err(err) => warn!(
                    "Multisample buffers unavailable, rendering single-sampled: {}",
                    err
                ),
            }
        }

        if mode.uses_fxaa() {
            let desc = TargetDesc::new("fxaa_source", width, height, TargetFormat::Surface);
            match device.create_target(&desc) {
                Ok(key) => self.fxaa_source = Some(key),
                Err(err) => warn!("FXAA target unavailable, skipping edge filter: {}", err),
            }
        }

        self.requested = Some(mode);
        self.size = (width, height);
        info!("Anti-aliasing: {} (requested {})", self.effective_mode(), mode);
    }

    fn supported_samples<D: RenderDevice>(&mut self, device: &D, samples: u32) -> u32 {
        if samples <= 1 {
            return 1;
        }
        let supported = [
            TargetFormat::Rgba16Float,
            TargetFormat::Rgba8Unorm,
            TargetFormat::Depth32Float,
        ]
        .iter()
        .all(|format| device.supports_sample_count(*format, samples));

        if supported {
            samples
        } else {
            if self.warned_samples.insert(samples) {
                warn!("{}x multisampling unsupported by the device, falling back to 1x", samples);
            }
            1
        }
    }

    /// Frees every intermediate; the next `configure` reallocates
    pub fn release<D: RenderDevice>(&mut self, device: &mut D) {
        if let Some(set) = self.multisample.take() {
            set.release(device);
        }
        if let Some(key) = self.fxaa_source.take() {
            device.destroy_target(key);
        }
        self.requested = None;
    }

    /// Tone maps `hdr` and composites the result to the surface
    pub fn resolve<D: RenderDevice>(
        &self,
        device: &mut D,
        hdr: TextureKey,
        config: &PostProcessConfig,
    ) -> RenderResult<()> {
        let tone_target = match self.fxaa_source {
            Some(key) => ColorAttachment::texture(key),
            None => ColorAttachment::surface(),
        };
        let tone_map = PassDesc::new("tone_map_pass")
            .with_color(tone_target)
            .with_input(hdr)
            .with_uniforms(&ToneMapUniform {
                params: [config.tone_mapping.shader_index(), config.exposure, 0.0, 0.0],
            })
            .with_draw(Draw::FullScreen {
                program: ShaderProgram::ToneMap,
            });
        device.submit_pass(&tone_map)?;

        if let Some(source) = self.fxaa_source {
            let (w, h) = self.size;
            let fxaa = PassDesc::new("fxaa_pass")
                .with_color(ColorAttachment::surface())
                .with_input(source)
                .with_uniforms(&FxaaUniform {
                    inverse_size: [1.0 / w.max(1) as f32, 1.0 / h.max(1) as f32, 0.0, 0.0],
                })
                .with_draw(Draw::FullScreen {
                    program: ShaderProgram::Fxaa,
                });
            device.submit_pass(&fxaa)?;
        }
        Ok(())
    }
}
