//! Shader sources handed to the renderer at construction
//!
//! The built-in WGSL programs are bundled into the binary. Collaborators may
//! replace any of them with their own source before the renderer compiles the
//! set; a program without source is a fatal startup error.

use std::borrow::Cow;
use std::collections::HashMap;

use log::info;

use crate::error::{RenderError, RenderResult};

use super::device::{RenderDevice, ShaderProgram};

#[derive(Debug, Clone, Default)]
pub struct ShaderSet {
    sources: HashMap<ShaderProgram, Cow<'static, str>>,
}

impl ShaderSet {
    /// A set with no sources at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// All programs with their bundled WGSL sources
    pub fn builtin() -> Self {
        Self::empty()
            .with_source(ShaderProgram::ShadowDepth, include_str!("shaders/shadow.wgsl"))
            .with_source(ShaderProgram::GeometryFlat, include_str!("shaders/geometry_flat.wgsl"))
            .with_source(
                ShaderProgram::GeometryTextured,
                include_str!("shaders/geometry_textured.wgsl"),
            )
            .with_source(ShaderProgram::Ambient, include_str!("shaders/ambient.wgsl"))
            .with_source(ShaderProgram::DirectionalLight, include_str!("shaders/lighting.wgsl"))
            .with_source(ShaderProgram::ToneMap, include_str!("shaders/tonemap.wgsl"))
            .with_source(ShaderProgram::Fxaa, include_str!("shaders/fxaa.wgsl"))
    }

    /// Replaces the source of one program
    pub fn with_source(
        mut self,
        program: ShaderProgram,
        source: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.sources.insert(program, source.into());
        self
    }

    pub fn source(&self, program: ShaderProgram) -> Option<&str> {
        self.sources.get(&program).map(|s| s.as_ref())
    }

    /// Compiles every program; stops at the first failure
    pub fn compile_all<D: RenderDevice>(&self, device: &mut D) -> RenderResult<()> {
        for program in ShaderProgram::ALL {
            let source = self.source(program).ok_or_else(|| RenderError::ShaderCompilation {
                program,
                message: "no source supplied".to_string(),
            })?;
            device.compile_shader(program, source)?;
        }
        info!("Compiled {} shader programs", ShaderProgram::ALL.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_has_every_program_with_entry_points() {
        let set = ShaderSet::builtin();
        for program in ShaderProgram::ALL {
            let source = set.source(program).unwrap();
            assert!(source.contains("fn vs_main"), "{program:?} lacks vs_main");
            if program.has_fragment_stage() {
                assert!(source.contains("fn fs_main"), "{program:?} lacks fs_main");
            }
        }
    }

    #[test]
    fn test_missing_source_is_a_compile_error() {
        let mut device = crate::gfx::rendering::headless::HeadlessDevice::new(8, 8);
        let err = ShaderSet::empty().compile_all(&mut device).unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompilation { .. }));
    }
}
