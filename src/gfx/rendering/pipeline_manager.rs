//! Render pipeline management for the wgpu backend
//!
//! Shader modules are compiled once per [`ShaderProgram`]; pipelines are
//! created lazily per program and sample count, since the geometry programs
//! run both single- and multisampled depending on the anti-aliasing mode.

use std::{collections::HashMap, sync::Arc};
use wgpu::*;

use crate::gfx::rendering::device::{DrawUniform, ShaderProgram};
use crate::gfx::scene::vertex::Vertex3D;

/// G-buffer attachment formats, in attachment order
pub const GBUFFER_FORMATS: [TextureFormat; 3] = [
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba8Unorm,
];

pub const HDR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Blend state of the per-light accumulation pass
pub const ADDITIVE_BLEND: BlendState = BlendState {
    color: BlendComponent {
        src_factor: BlendFactor::One,
        dst_factor: BlendFactor::One,
        operation: BlendOperation::Add,
    },
    alpha: BlendComponent {
        src_factor: BlendFactor::One,
        dst_factor: BlendFactor::One,
        operation: BlendOperation::Add,
    },
};

/// How a pass input texture is declared in WGSL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputBinding {
    /// `texture_2d<f32>` read with `textureLoad`
    Texel,
    /// `texture_2d<f32>` read through a filtering sampler
    Filtered,
    /// `texture_depth_2d` read through a comparison sampler
    Depth,
}

/// Bind group layouts and input description of one program
pub struct ProgramLayout {
    pub groups: Vec<BindGroupLayout>,
    /// Sampled inputs of full-screen programs (group 1), in binding order
    pub inputs: Vec<InputBinding>,
    /// Sampler bound after the inputs, if any
    pub sampler: Option<SamplerBindingType>,
}

/// Configuration for creating a render pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub label: String,
    pub bind_group_layouts: Vec<BindGroupLayout>,
    pub cull_mode: Option<Face>,
    pub depth_format: Option<TextureFormat>,
    pub sample_count: u32,
    pub color_targets: Vec<Option<ColorTargetState>>,
    pub vertex_only: bool,       // shadow pass
    pub no_vertex_buffers: bool, // full-screen triangles
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            label: "Default Pipeline".to_string(),
            bind_group_layouts: Vec::new(),
            cull_mode: Some(Face::Back),
            depth_format: None,
            sample_count: 1,
            color_targets: Vec::new(),
            vertex_only: false,
            no_vertex_buffers: false,
        }
    }
}

impl PipelineConfig {
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_owned();
        self
    }

    pub fn with_cull_mode(mut self, face: Option<Face>) -> Self {
        self.cull_mode = face;
        self
    }

    pub fn with_vertex_only(mut self) -> Self {
        self.vertex_only = true;
        self
    }

    pub fn with_bind_group_layouts(mut self, layouts: Vec<BindGroupLayout>) -> Self {
        self.bind_group_layouts = layouts;
        self
    }

    pub fn with_depth_stencil(mut self, format: TextureFormat) -> Self {
        self.depth_format = Some(format);
        self
    }

    pub fn with_color_targets(mut self, targets: Vec<Option<ColorTargetState>>) -> Self {
        self.color_targets = targets;
        self
    }

    pub fn with_sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count.max(1);
        self
    }

    /// Configures pipeline for full-screen triangle rendering (no vertex buffers)
    pub fn with_no_vertex_buffers(mut self) -> Self {
        self.no_vertex_buffers = true;
        self
    }

    /// Pipeline state of `program` rendering at `sample_count`
    pub fn for_program(
        program: ShaderProgram,
        layout: &ProgramLayout,
        surface_format: TextureFormat,
        sample_count: u32,
    ) -> Self {
        let target = |format: TextureFormat, blend: BlendState| {
            Some(ColorTargetState {
                format,
                blend: Some(blend),
                write_mask: ColorWrites::ALL,
            })
        };

        let base = PipelineConfig::default()
            .with_label(&format!("{}_x{}", program.label(), sample_count))
            .with_bind_group_layouts(layout.groups.clone())
            .with_sample_count(sample_count);

        match program {
            // No culling: back faces still occlude
            ShaderProgram::ShadowDepth => base
                .with_vertex_only()
                .with_cull_mode(None)
                .with_depth_stencil(DEPTH_FORMAT),
            ShaderProgram::GeometryFlat | ShaderProgram::GeometryTextured => base
                .with_depth_stencil(DEPTH_FORMAT)
                .with_color_targets(
                    GBUFFER_FORMATS
                        .iter()
                        .map(|format| target(*format, BlendState::REPLACE))
                        .collect(),
                ),
            ShaderProgram::Ambient => base
                .with_no_vertex_buffers()
                .with_cull_mode(None)
                .with_color_targets(vec![target(HDR_FORMAT, BlendState::REPLACE)]),
            ShaderProgram::DirectionalLight => base
                .with_no_vertex_buffers()
                .with_cull_mode(None)
                .with_color_targets(vec![target(HDR_FORMAT, ADDITIVE_BLEND)]),
            ShaderProgram::ToneMap | ShaderProgram::Fxaa => base
                .with_no_vertex_buffers()
                .with_cull_mode(None)
                .with_color_targets(vec![target(surface_format, BlendState::REPLACE)]),
        }
    }
}

/// Manages shader modules and render pipelines with lazy creation
pub struct PipelineManager {
    device: Arc<Device>,
    surface_format: TextureFormat,
    layouts: HashMap<ShaderProgram, ProgramLayout>,
    shader_modules: HashMap<ShaderProgram, ShaderModule>,
    pipelines: HashMap<(ShaderProgram, u32), RenderPipeline>,
}

impl PipelineManager {
    pub fn new(device: Arc<Device>, surface_format: TextureFormat) -> Self {
        let layouts = ShaderProgram::ALL
            .iter()
            .map(|program| (*program, create_program_layout(&device, *program)))
            .collect();

        Self {
            device,
            surface_format,
            layouts,
            shader_modules: HashMap::new(),
            pipelines: HashMap::new(),
        }
    }

    pub fn layout(&self, program: ShaderProgram) -> Option<&ProgramLayout> {
        self.layouts.get(&program)
    }

    pub fn is_loaded(&self, program: ShaderProgram) -> bool {
        self.shader_modules.contains_key(&program)
    }

    /// Compiles a shader module and drops pipelines built from the old one
    pub fn load_shader(&mut self, program: ShaderProgram, source: &str) {
        let shader_module = self.device.create_shader_module(ShaderModuleDescriptor {
            label: Some(program.label()),
            source: ShaderSource::Wgsl(source.into()),
        });

        self.shader_modules.insert(program, shader_module);
        self.pipelines.retain(|(p, _), _| *p != program);
    }

    /// Creates the pipeline for `program` at `sample_count` if it does not exist
    pub fn prepare(&mut self, program: ShaderProgram, sample_count: u32) -> Result<(), String> {
        if self.pipelines.contains_key(&(program, sample_count)) {
            return Ok(());
        }
        let layout = self
            .layouts
            .get(&program)
            .ok_or_else(|| format!("no layout for '{}'", program.label()))?;
        let config =
            PipelineConfig::for_program(program, layout, self.surface_format, sample_count);
        let pipeline = self.create_pipeline_from_config(program, &config)?;
        self.pipelines.insert((program, sample_count), pipeline);
        Ok(())
    }

    /// A pipeline previously created with [`prepare`](Self::prepare)
    pub fn get_pipeline(
        &self,
        program: ShaderProgram,
        sample_count: u32,
    ) -> Option<&RenderPipeline> {
        self.pipelines.get(&(program, sample_count))
    }

    fn create_pipeline_from_config(
        &self,
        program: ShaderProgram,
        config: &PipelineConfig,
    ) -> Result<RenderPipeline, String> {
        let shader = self
            .shader_modules
            .get(&program)
            .ok_or_else(|| format!("Shader '{}' not loaded", program.label()))?;

        let bind_group_layout_refs: Vec<&BindGroupLayout> =
            config.bind_group_layouts.iter().collect();
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&PipelineLayoutDescriptor {
                label: Some(&format!("{} Layout", config.label)),
                bind_group_layouts: &bind_group_layout_refs,
                push_constant_ranges: &[],
            });

        let fragment_state = if config.vertex_only {
            None
        } else {
            Some(FragmentState {
                module: shader,
                entry_point: Some("fs_main"),
                targets: &config.color_targets,
                compilation_options: PipelineCompilationOptions::default(),
            })
        };

        let mesh_layout = [Vertex3D::desc()];
        let vertex_buffers: &[VertexBufferLayout] = if config.no_vertex_buffers {
            &[]
        } else {
            &mesh_layout
        };

        let depth_stencil = config.depth_format.map(|format| DepthStencilState {
            format,
            depth_write_enabled: true,
            depth_compare: CompareFunction::Less,
            stencil: StencilState::default(),
            bias: DepthBiasState::default(),
        });

        Ok(self
            .device
            .create_render_pipeline(&RenderPipelineDescriptor {
                label: Some(&config.label),
                layout: Some(&pipeline_layout),
                vertex: VertexState {
                    module: shader,
                    entry_point: Some("vs_main"),
                    buffers: vertex_buffers,
                    compilation_options: PipelineCompilationOptions::default(),
                },
                fragment: fragment_state,
                primitive: PrimitiveState {
                    topology: PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: FrontFace::Ccw,
                    cull_mode: config.cull_mode,
                    polygon_mode: PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil,
                multisample: MultisampleState {
                    count: config.sample_count,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
                cache: None,
            }))
    }

    pub fn get_stats(&self) -> PipelineStats {
        PipelineStats {
            total_pipelines: self.pipelines.len(),
            loaded_shaders: self.shader_modules.len(),
        }
    }
}

/// Statistics about pipeline manager state
#[derive(Debug)]
pub struct PipelineStats {
    pub total_pipelines: usize,
    pub loaded_shaders: usize,
}

fn uniform_entry(binding: u32, dynamic: bool) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::VERTEX_FRAGMENT,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: if dynamic {
                BufferSize::new(std::mem::size_of::<DrawUniform>() as u64)
            } else {
                None
            },
        },
        count: None,
    }
}

fn texture_entry(binding: u32, input: InputBinding) -> BindGroupLayoutEntry {
    let sample_type = match input {
        InputBinding::Texel => TextureSampleType::Float { filterable: false },
        InputBinding::Filtered => TextureSampleType::Float { filterable: true },
        InputBinding::Depth => TextureSampleType::Depth,
    };
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Texture {
            multisampled: false,
            view_dimension: TextureViewDimension::D2,
            sample_type,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32, ty: SamplerBindingType) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Sampler(ty),
        count: None,
    }
}

/// Group 0 is the pass uniform; mesh programs bind the per-draw uniform at
/// group 1 (dynamic offset), full-screen programs bind their inputs there.
fn create_program_layout(device: &Device, program: ShaderProgram) -> ProgramLayout {
    let label = program.label();
    let pass = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
        label: Some(&format!("{label} Pass Layout")),
        entries: &[uniform_entry(0, false)],
    });

    let (inputs, sampler) = match program {
        ShaderProgram::ShadowDepth | ShaderProgram::GeometryFlat => (vec![], None),
        ShaderProgram::GeometryTextured => (
            vec![InputBinding::Filtered],
            Some(SamplerBindingType::Filtering),
        ),
        ShaderProgram::Ambient => (vec![InputBinding::Texel, InputBinding::Texel], None),
        ShaderProgram::DirectionalLight => (
            vec![
                InputBinding::Texel,
                InputBinding::Texel,
                InputBinding::Texel,
                InputBinding::Depth,
            ],
            Some(SamplerBindingType::Comparison),
        ),
        ShaderProgram::ToneMap => (vec![InputBinding::Texel], None),
        ShaderProgram::Fxaa => (vec![InputBinding::Filtered], Some(SamplerBindingType::Filtering)),
    };

    let mut input_entries: Vec<BindGroupLayoutEntry> = inputs
        .iter()
        .enumerate()
        .map(|(i, input)| texture_entry(i as u32, *input))
        .collect();
    if let Some(ty) = sampler {
        input_entries.push(sampler_entry(inputs.len() as u32, ty));
    }

    let mut groups = vec![pass];
    if program.uses_mesh_input() {
        groups.push(device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some(&format!("{label} Draw Layout")),
            entries: &[uniform_entry(0, true)],
        }));
        if !input_entries.is_empty() {
            groups.push(device.create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: Some(&format!("{label} Material Layout")),
                entries: &input_entries,
            }));
        }
    } else {
        groups.push(device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some(&format!("{label} Input Layout")),
            entries: &input_entries,
        }));
    }

    ProgramLayout {
        groups,
        inputs,
        sampler,
    }
}
