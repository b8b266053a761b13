//! # Graphics Module
//!
//! Everything the frame pipeline touches, leaves first:
//!
//! - **Camera** ([`camera`]) - view/projection matrices and frustum culling
//! - **Scene** ([`scene`]) - the read-only object list the renderer draws
//! - **Geometry** ([`geometry`]) - procedural meshes for demos and tests
//! - **Lighting** ([`lighting`]) - lights, importance scheduling and accumulation
//! - **Rendering** ([`rendering`]) - shadow cache, G-buffer, post-processing,
//!   the frame orchestrator and its device backends
//! - **Resources** ([`resources`]) - resource handles, materials, wgpu textures
//!
//! ## Usage
//!
//! ```no_run
//! use umbra::gfx::camera::Camera;
//! use umbra::gfx::rendering::{HeadlessDevice, Renderer, ShaderSet};
//! use umbra::gfx::scene::Scene;
//! use umbra::RenderConfig;
//!
//! let device = HeadlessDevice::new(800, 600);
//! let mut renderer = Renderer::new(device, RenderConfig::default(), &ShaderSet::builtin())?;
//! let camera = Camera::look_at((0.0, 2.0, 5.0).into(), (0.0, 0.0, 0.0).into(), 800.0 / 600.0);
//! let report = renderer.render_frame(&Scene::new(), &camera)?;
//! # let _ = report;
//! # Ok::<(), umbra::RenderError>(())
//! ```

pub mod camera;
pub mod geometry;
pub mod lighting;
pub mod rendering;
pub mod resources;
pub mod scene;

// Re-export commonly used types
pub use camera::Camera;
pub use rendering::{Renderer, WgpuDevice};
