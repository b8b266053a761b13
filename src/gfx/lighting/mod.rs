//! # Lighting
//!
//! Directional lights, per-frame importance scheduling under an optional
//! budget, and additive accumulation of the scheduled lights into the HDR
//! target.

pub mod accumulator;
pub mod light;
pub mod scheduler;

// Re-export main types
pub use accumulator::{
    pcf_shadow_factor, AmbientUniform, DirectionalFalloff, LightUniform, LightingAccumulator,
    LightingModel, LightingStats, ShadowBinding, SurfaceSample,
};
pub use light::{Light, LightDesc, LightId, LightKind, LightSet};
pub use scheduler::{importance, LightScheduler, Schedule, ScheduledLight};
