// src/lib.rs
//! Umbra rendering core
//!
//! Shadow-mapped deferred rendering on wgpu: cached per-light shadow maps,
//! a G-buffer geometry pass, budgeted light scheduling, additive HDR light
//! accumulation and a tone-mapping/anti-aliasing chain.

pub mod app;
pub mod config;
pub mod error;
pub mod gfx;
pub mod prelude;

// Re-export main types for convenience
pub use app::Viewer;
pub use config::RenderConfig;
pub use error::{RenderError, RenderResult};
