//! Error types for the Umbra rendering core
//!
//! Every fallible operation in the library returns [`RenderResult`]. Only a few
//! variants are fatal (shader compilation at startup, unsupported light kinds);
//! the orchestrator recovers from the rest by degrading or discarding a frame.

use thiserror::Error;

use crate::gfx::rendering::device::ShaderProgram;

/// Result alias used throughout the crate
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors produced by the rendering core and its device backends
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RenderError {
    /// A light kind that is modeled but has no implementation (spot, point)
    #[error("{0} lights are not implemented")]
    UnsupportedLight(&'static str),

    /// A shader program failed to compile
    #[error("shader program '{program:?}' failed to compile: {message}")]
    ShaderCompilation {
        program: ShaderProgram,
        message: String,
    },

    /// A pass referenced a program that was never compiled
    #[error("shader program '{0:?}' has not been compiled")]
    MissingShader(ShaderProgram),

    /// A render target or viewport with an unusable size
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// The device could not allocate a resource
    #[error("failed to allocate '{label}': {reason}")]
    ResourceAllocation { label: String, reason: String },

    /// A handle that does not (or no longer) refer to a live resource
    #[error("unknown {0} handle")]
    UnknownResource(&'static str),

    /// Attachments of one pass do not share the same dimensions
    #[error("attachments of pass '{pass}' do not share dimensions")]
    AttachmentMismatch { pass: String },

    /// The presentation surface changed size or was lost mid-frame
    #[error("presentation surface is outdated")]
    SurfaceOutdated,

    /// Acquiring the next surface image timed out
    #[error("timed out acquiring the presentation surface")]
    SurfaceTimeout,

    /// A pass or present was issued outside `begin_frame`/`present`
    #[error("no frame is being recorded")]
    NoActiveFrame,

    /// Adapter or device creation failed
    #[error("graphics device request failed: {0}")]
    DeviceRequest(String),
}

impl RenderError {
    /// Whether the orchestrator can recover by discarding the current frame
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RenderError::SurfaceOutdated
                | RenderError::SurfaceTimeout
                | RenderError::InvalidDimensions { .. }
                | RenderError::AttachmentMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(RenderError::SurfaceOutdated.is_recoverable());
        assert!(RenderError::InvalidDimensions { width: 0, height: 10 }.is_recoverable());
        assert!(!RenderError::UnsupportedLight("spot").is_recoverable());
        assert!(!RenderError::ShaderCompilation {
            program: ShaderProgram::Fxaa,
            message: "boom".to_string(),
        }
        .is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = RenderError::UnsupportedLight("point");
        assert_eq!(err.to_string(), "point lights are not implemented");
    }
}
