//! Runtime configuration for the renderer
//!
//! The renderer owns one [`RenderConfig`] and re-reads it at the start of
//! every frame, so every field can change between frames without a restart.

use crate::gfx::lighting::accumulator::DirectionalFalloff;
use crate::gfx::rendering::post_process::{AntiAliasMode, ToneMapping};

/// Shadow-map configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowConfig {
    /// Requested shadow-map edge length in texels
    pub map_size: u32,
    /// Lower bound applied to `map_size`
    pub min_map_size: u32,
    /// Depth offset applied before the shadow comparison
    pub bias: f32,
    /// World-space padding around the scene bounds in the light projection
    pub bounds_margin: f32,
    /// Position/target change below which a cached map is reused
    pub change_tolerance: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            map_size: 2048,
            min_map_size: 2048,
            bias: 0.005,
            bounds_margin: 2.0,
            change_tolerance: 0.001,
        }
    }
}

impl ShadowConfig {
    pub fn with_map_size(mut self, map_size: u32) -> Self {
        self.map_size = map_size;
        self
    }

    pub fn with_min_map_size(mut self, min_map_size: u32) -> Self {
        self.min_map_size = min_map_size;
        self
    }

    pub fn with_bias(mut self, bias: f32) -> Self {
        self.bias = bias.max(0.0);
        self
    }

    pub fn with_bounds_margin(mut self, margin: f32) -> Self {
        self.bounds_margin = margin.max(0.0);
        self
    }

    /// Edge length actually allocated, given the device limit
    pub fn effective_map_size(&self, device_max: u32) -> u32 {
        self.map_size.max(self.min_map_size).min(device_max).max(1)
    }
}

/// Lighting configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightingConfig {
    /// Maximum lights shaded per frame, `None` for unlimited
    pub light_budget: Option<usize>,
    pub ambient_color: [f32; 3],
    pub ambient_intensity: f32,
    pub directional_falloff: DirectionalFalloff,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            light_budget: None,
            ambient_color: [1.0, 1.0, 1.0],
            ambient_intensity: 0.1,
            directional_falloff: DirectionalFalloff::default(),
        }
    }
}

impl LightingConfig {
    pub fn with_light_budget(mut self, budget: Option<usize>) -> Self {
        self.light_budget = budget;
        self
    }

    pub fn with_ambient(mut self, color: [f32; 3], intensity: f32) -> Self {
        self.ambient_color = color;
        self.ambient_intensity = intensity.max(0.0);
        self
    }

    pub fn with_directional_falloff(mut self, falloff: DirectionalFalloff) -> Self {
        self.directional_falloff = falloff;
        self
    }
}

/// Tone-mapping and anti-aliasing configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostProcessConfig {
    pub anti_alias: AntiAliasMode,
    pub tone_mapping: ToneMapping,
    /// Linear multiplier applied to HDR color before tone mapping
    pub exposure: f32,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            anti_alias: AntiAliasMode::Fxaa,
            tone_mapping: ToneMapping::Filmic,
            exposure: 1.0,
        }
    }
}

impl PostProcessConfig {
    pub fn with_anti_alias(mut self, mode: AntiAliasMode) -> Self {
        self.anti_alias = mode;
        self
    }

    pub fn with_tone_mapping(mut self, tone_mapping: ToneMapping) -> Self {
        self.tone_mapping = tone_mapping;
        self
    }

    pub fn with_exposure(mut self, exposure: f32) -> Self {
        self.exposure = exposure.max(0.0);
        self
    }
}

/// Complete renderer configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderConfig {
    pub shadow: ShadowConfig,
    pub lighting: LightingConfig,
    pub post: PostProcessConfig,
    /// Clear color of the G-buffer albedo target
    pub clear_color: [f32; 4],
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            shadow: ShadowConfig::default(),
            lighting: LightingConfig::default(),
            post: PostProcessConfig::default(),
            clear_color: [0.1, 0.2, 0.3, 1.0],
        }
    }
}

impl RenderConfig {
    pub fn with_shadow(mut self, shadow: ShadowConfig) -> Self {
        self.shadow = shadow;
        self
    }

    pub fn with_lighting(mut self, lighting: LightingConfig) -> Self {
        self.lighting = lighting;
        self
    }

    pub fn with_post(mut self, post: PostProcessConfig) -> Self {
        self.post = post;
        self
    }

    pub fn with_clear_color(mut self, clear_color: [f32; 4]) -> Self {
        self.clear_color = clear_color;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_defaults() {
        let shadow = ShadowConfig::default();
        assert_eq!(shadow.effective_map_size(8192), 2048);
        assert_eq!(shadow.change_tolerance, 0.001);
    }

    #[test]
    fn test_effective_map_size_policy() {
        let shadow = ShadowConfig::default().with_map_size(512);
        assert_eq!(shadow.effective_map_size(8192), 2048);

        let shadow = shadow.with_min_map_size(256);
        assert_eq!(shadow.effective_map_size(8192), 512);

        let shadow = shadow.with_map_size(16384);
        assert_eq!(shadow.effective_map_size(8192), 8192);
    }

    #[test]
    fn test_budget_defaults_to_unlimited() {
        assert_eq!(RenderConfig::default().lighting.light_budget, None);
    }
}
