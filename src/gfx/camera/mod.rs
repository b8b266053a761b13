pub mod camera_utils;
pub mod frustum;

// Re-export main types
pub use camera_utils::{Camera, CameraUniform, PerspectiveParams, OPENGL_TO_WGPU_MATRIX};
pub use frustum::{BoundingSphere, Frustum, Plane};
