//! wgpu backend of [`RenderDevice`]
//!
//! Owns the surface, device and queue, a slot-map table per resource kind, and
//! a [`PipelineManager`] whose pipelines are created lazily per program and
//! sample count. Each [`PassDesc`] becomes one wgpu render pass recorded into
//! the frame's command encoder; `present` submits and presents.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use wgpu::util::DeviceExt;

use crate::error::{RenderError, RenderResult};
use crate::gfx::geometry::MeshData;
use crate::gfx::rendering::device::{
    ColorTarget, Draw, DrawUniform, LoadOp, PassDesc, RenderDevice, ShaderProgram, TargetDesc,
    TargetFormat,
};
use crate::gfx::rendering::pipeline_manager::PipelineManager;
use crate::gfx::rendering::render_pass_ext::{GpuMesh, RenderPassExt};
use crate::gfx::resources::handles::{AllocationStats, MeshKey, ResourceTable, TextureKey};
use crate::gfx::resources::texture_resource::TextureResource;

/// Surface image and encoder of the frame being recorded
struct ActiveFrame {
    surface_texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    encoder: wgpu::CommandEncoder,
}

/// Bind groups created for one pass
#[derive(Default)]
struct PassBindings {
    pass_groups: HashMap<ShaderProgram, wgpu::BindGroup>,
    draw_groups: HashMap<ShaderProgram, wgpu::BindGroup>,
    input_groups: HashMap<ShaderProgram, wgpu::BindGroup>,
    /// Dynamic offset into the draw uniform buffer, per draw
    draw_offsets: Vec<u32>,
    /// Albedo texture group of textured draws, per draw
    material_groups: Vec<Option<wgpu::BindGroup>>,
}

pub struct WgpuDevice {
    surface: wgpu::Surface<'static>,
    adapter: wgpu::Adapter,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: wgpu::SurfaceConfiguration,
    present_modes: Vec<wgpu::PresentMode>,
    pipelines: PipelineManager,
    targets: ResourceTable<TextureKey, TextureResource>,
    meshes: ResourceTable<MeshKey, GpuMesh>,
    target_stats: AllocationStats,
    mesh_stats: AllocationStats,
    linear_sampler: wgpu::Sampler,
    shadow_sampler: wgpu::Sampler,
    white_texture: TextureResource,
    frame: Option<ActiveFrame>,
}

impl WgpuDevice {
    /// Creates the device for a window surface of the given size
    pub async fn new(
        window: impl Into<wgpu::SurfaceTarget<'static>>,
        width: u32,
        height: u32,
    ) -> RenderResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .map_err(|e| RenderError::DeviceRequest(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| RenderError::DeviceRequest(e.to_string()))?;

        // 2x multisampling is only valid with adapter-specific format features
        let required_features =
            adapter.features() & wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Umbra Device"),
                required_features,
                required_limits: wgpu::Limits {
                    max_texture_dimension_2d: 4096,
                    ..wgpu::Limits::downlevel_defaults()
                },
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| RenderError::DeviceRequest(e.to_string()))?;

        let surface_capabilities = surface.get_capabilities(&adapter);
        let format = surface_capabilities
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_capabilities.formats.first().copied())
            .ok_or_else(|| RenderError::DeviceRequest("surface reports no formats".to_string()))?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_capabilities
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let linear_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Linear Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        // Comparison sampler for hardware PCF
        let shadow_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Shadow Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            compare: Some(wgpu::CompareFunction::LessEqual),
            lod_min_clamp: 0.0,
            lod_max_clamp: 100.0,
            ..Default::default()
        });

        let white_texture = TextureResource::create_from_rgba_data(
            &device,
            &queue,
            &[255; 4],
            1,
            1,
            "white_texture",
        );

        let device: Arc<wgpu::Device> = Arc::new(device);
        let queue: Arc<wgpu::Queue> = Arc::new(queue);
        let pipelines = PipelineManager::new(device.clone(), format);

        info!(
            "wgpu device ready: {} ({:?}), surface {:?} {}x{}",
            adapter.get_info().name,
            adapter.get_info().backend,
            format,
            config.width,
            config.height
        );

        Ok(Self {
            surface,
            adapter,
            device,
            queue,
            config,
            present_modes: surface_capabilities.present_modes,
            pipelines,
            targets: ResourceTable::with_key(),
            meshes: ResourceTable::with_key(),
            target_stats: AllocationStats::default(),
            mesh_stats: AllocationStats::default(),
            linear_sampler,
            shadow_sampler,
            white_texture,
            frame: None,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    pub fn target_stats(&self) -> AllocationStats {
        self.target_stats
    }

    pub fn mesh_stats(&self) -> AllocationStats {
        self.mesh_stats
    }

    fn texture_format(&self, format: TargetFormat) -> wgpu::TextureFormat {
        match format {
            TargetFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
            TargetFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TargetFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TargetFormat::Surface => self.config.format,
        }
    }

    /// Sample count shared by the pass attachments
    fn pass_sample_count(&self, pass: &PassDesc) -> RenderResult<u32> {
        let first = pass.color.iter().find_map(|c| match c.target {
            ColorTarget::Texture(key) => Some(key),
            ColorTarget::Surface => None,
        });
        match first.or(pass.depth.map(|d| d.target)) {
            Some(key) => Ok(lookup(&self.targets, key)?.sample_count),
            None => Ok(1),
        }
    }

    fn create_pass_bindings(&self, pass: &PassDesc) -> RenderResult<PassBindings> {
        let mut bindings = PassBindings::default();

        let uniform_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Uniforms", pass.label)),
            contents: if pass.uniforms.is_empty() {
                &[0u8; 16][..]
            } else {
                pass.uniforms.as_slice()
            },
            usage: wgpu::BufferUsages::UNIFORM,
        });

        // Per-draw uniforms packed at the dynamic offset alignment
        let uniform_size = std::mem::size_of::<DrawUniform>();
        let alignment = self.device.limits().min_uniform_buffer_offset_alignment as usize;
        let stride = uniform_size.div_ceil(alignment) * alignment;

        let mut draw_bytes = Vec::new();
        for draw in &pass.draws {
            match draw {
                Draw::Mesh { mesh, uniform, .. } => {
                    lookup_mesh(&self.meshes, *mesh)?;
                    bindings.draw_offsets.push(draw_bytes.len() as u32);
                    draw_bytes.extend_from_slice(bytemuck::bytes_of(uniform));
                    draw_bytes.resize(draw_bytes.len() + stride - uniform_size, 0);
                }
                Draw::FullScreen { .. } => bindings.draw_offsets.push(0),
            }
        }
        let draw_buffer = (!draw_bytes.is_empty()).then(|| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{} Draw Uniforms", pass.label)),
                contents: &draw_bytes,
                usage: wgpu::BufferUsages::UNIFORM,
            })
        });

        let mut programs: Vec<ShaderProgram> = pass.draws.iter().map(Draw::program).collect();
        programs.dedup();

        for program in programs {
            if bindings.pass_groups.contains_key(&program) {
                continue;
            }
            let layout = self
                .pipelines
                .layout(program)
                .ok_or(RenderError::MissingShader(program))?;

            bindings.pass_groups.insert(
                program,
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("{} Pass Bind Group", program.label())),
                    layout: &layout.groups[0],
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniform_buffer.as_entire_binding(),
                    }],
                }),
            );

            if program.uses_mesh_input() {
                if let Some(buffer) = &draw_buffer {
                    bindings.draw_groups.insert(
                        program,
                        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                            label: Some(&format!("{} Draw Bind Group", program.label())),
                            layout: &layout.groups[1],
                            entries: &[wgpu::BindGroupEntry {
                                binding: 0,
                                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                                    buffer,
                                    offset: 0,
                                    size: wgpu::BufferSize::new(uniform_size as u64),
                                }),
                            }],
                        }),
                    );
                }
                continue;
            }

            if pass.inputs.len() != layout.inputs.len() {
                return Err(RenderError::AttachmentMismatch {
                    pass: pass.label.clone(),
                });
            }
            let mut entries = Vec::with_capacity(pass.inputs.len() + 1);
            for (i, key) in pass.inputs.iter().enumerate() {
                let view = &lookup(&self.targets, *key)?.view;
                entries.push(wgpu::BindGroupEntry {
                    binding: i as u32,
                    resource: wgpu::BindingResource::TextureView(view),
                });
            }
            if let Some(ty) = layout.sampler {
                let sampler = match ty {
                    wgpu::SamplerBindingType::Comparison => &self.shadow_sampler,
                    _ => &self.linear_sampler,
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: pass.inputs.len() as u32,
                    resource: wgpu::BindingResource::Sampler(sampler),
                });
            }
            bindings.input_groups.insert(
                program,
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("{} Input Bind Group", program.label())),
                    layout: &layout.groups[1],
                    entries: &entries,
                }),
            );
        }

        for draw in &pass.draws {
            let group = match draw {
                Draw::Mesh {
                    program: program @ ShaderProgram::GeometryTextured,
                    texture,
                    ..
                } => {
                    let view = match texture {
                        Some(key) => &lookup(&self.targets, *key)?.view,
                        None => &self.white_texture.view,
                    };
                    let layout = self
                        .pipelines
                        .layout(*program)
                        .ok_or(RenderError::MissingShader(*program))?;
                    Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("Material Bind Group"),
                        layout: &layout.groups[2],
                        entries: &[
                            wgpu::BindGroupEntry {
                                binding: 0,
                                resource: wgpu::BindingResource::TextureView(view),
                            },
                            wgpu::BindGroupEntry {
                                binding: 1,
                                resource: wgpu::BindingResource::Sampler(&self.linear_sampler),
                            },
                        ],
                    }))
                }
                _ => None,
            };
            bindings.material_groups.push(group);
        }

        Ok(bindings)
    }
}

fn lookup(
    targets: &ResourceTable<TextureKey, TextureResource>,
    key: TextureKey,
) -> RenderResult<&TextureResource> {
    targets.get(key).ok_or(RenderError::UnknownResource("texture"))
}

fn lookup_mesh(meshes: &ResourceTable<MeshKey, GpuMesh>, key: MeshKey) -> RenderResult<&GpuMesh> {
    meshes.get(key).ok_or(RenderError::UnknownResource("mesh"))
}

fn load_op(load: LoadOp) -> wgpu::LoadOp<wgpu::Color> {
    match load {
        LoadOp::Clear([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
            r: r as f64,
            g: g as f64,
            b: b as f64,
            a: a as f64,
        }),
        LoadOp::Keep => wgpu::LoadOp::Load,
    }
}

impl RenderDevice for WgpuDevice {
    fn surface_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn configure_surface(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidDimensions { width, height });
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        Ok(())
    }

    fn set_vsync(&mut self, enabled: bool) {
        let wanted = if enabled {
            wgpu::PresentMode::Fifo
        } else {
            wgpu::PresentMode::Immediate
        };
        if !self.present_modes.contains(&wanted) {
            warn!("Present mode {:?} unsupported, keeping {:?}", wanted, self.config.present_mode);
            return;
        }
        self.config.present_mode = wanted;
        self.surface.configure(&self.device, &self.config);
    }

    fn max_texture_size(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn supports_sample_count(&self, format: TargetFormat, samples: u32) -> bool {
        let flags = self
            .adapter
            .get_texture_format_features(self.texture_format(format))
            .flags;
        let adapter_specific = self
            .device
            .features()
            .contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES);
        match samples {
            1 => true,
            4 => flags.sample_count_supported(4),
            n => adapter_specific && flags.sample_count_supported(n),
        }
    }

    fn compile_shader(&mut self, program: ShaderProgram, source: &str) -> RenderResult<()> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.pipelines.load_shader(program, source);
        let prepared = self.pipelines.prepare(program, 1);
        let error = pollster::block_on(self.device.pop_error_scope());

        if let Err(message) = prepared {
            return Err(RenderError::ShaderCompilation { program, message });
        }
        if let Some(error) = error {
            return Err(RenderError::ShaderCompilation {
                program,
                message: error.to_string(),
            });
        }
        let stats = self.pipelines.get_stats();
        debug!(
            "Compiled shader program '{}' ({} shaders, {} pipelines)",
            program.label(),
            stats.loaded_shaders,
            stats.total_pipelines
        );
        Ok(())
    }

    fn create_target(&mut self, desc: &TargetDesc) -> RenderResult<TextureKey> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::InvalidDimensions {
                width: desc.width,
                height: desc.height,
            });
        }
        let max = self.max_texture_size();
        if desc.width > max || desc.height > max {
            return Err(RenderError::ResourceAllocation {
                label: desc.label.clone(),
                reason: format!("exceeds maximum size {}", max),
            });
        }
        if desc.sample_count > 1 && !self.supports_sample_count(desc.format, desc.sample_count) {
            return Err(RenderError::ResourceAllocation {
                label: desc.label.clone(),
                reason: format!("{} samples unsupported", desc.sample_count),
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let resource = TextureResource::create_target(
            &self.device,
            &desc.label,
            desc.width,
            desc.height,
            self.texture_format(desc.format),
            desc.sample_count,
        );
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            resource.destroy();
            return Err(RenderError::ResourceAllocation {
                label: desc.label.clone(),
                reason: error.to_string(),
            });
        }

        self.target_stats.record_allocation();
        Ok(self.targets.insert(resource))
    }

    fn destroy_target(&mut self, key: TextureKey) {
        if let Some(resource) = self.targets.remove(key) {
            resource.destroy();
            self.target_stats.record_release();
        }
    }

    fn target_size(&self, key: TextureKey) -> Option<(u32, u32)> {
        self.targets.get(key).map(|t| (t.width, t.height))
    }

    fn create_texture_rgba8(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> RenderResult<TextureKey> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidDimensions { width, height });
        }
        if pixels.len() != (width as usize) * (height as usize) * 4 {
            return Err(RenderError::ResourceAllocation {
                label: label.to_string(),
                reason: format!(
                    "expected {}x{} RGBA8 pixels, got {} bytes",
                    width,
                    height,
                    pixels.len()
                ),
            });
        }
        let resource = TextureResource::create_from_rgba_data(
            &self.device,
            &self.queue,
            pixels,
            width,
            height,
            label,
        );
        self.target_stats.record_allocation();
        Ok(self.targets.insert(resource))
    }

    fn create_mesh(&mut self, label: &str, mesh: &MeshData) -> RenderResult<MeshKey> {
        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Vertex Buffer", label)),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Index Buffer", label)),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        self.mesh_stats.record_allocation();
        Ok(self.meshes.insert(GpuMesh {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
        }))
    }

    fn destroy_mesh(&mut self, key: MeshKey) {
        if let Some(mesh) = self.meshes.remove(key) {
            mesh.vertex_buffer.destroy();
            mesh.index_buffer.destroy();
            self.mesh_stats.record_release();
        }
    }

    fn begin_frame(&mut self) -> RenderResult<()> {
        self.discard_frame();

        let surface_texture = match self.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                return Err(RenderError::SurfaceOutdated)
            }
            Err(wgpu::SurfaceError::Timeout) => return Err(RenderError::SurfaceTimeout),
            Err(err) => return Err(RenderError::DeviceRequest(err.to_string())),
        };
        if surface_texture.suboptimal {
            debug!("Surface texture is suboptimal");
        }

        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        self.frame = Some(ActiveFrame {
            surface_texture,
            view,
            encoder,
        });
        Ok(())
    }

    fn submit_pass(&mut self, pass: &PassDesc) -> RenderResult<()> {
        if self.frame.is_none() {
            return Err(RenderError::NoActiveFrame);
        }
        let samples = self.pass_sample_count(pass)?;

        for draw in &pass.draws {
            let program = draw.program();
            if !self.pipelines.is_loaded(program) {
                return Err(RenderError::MissingShader(program));
            }
            self.pipelines
                .prepare(program, samples)
                .map_err(|message| RenderError::ShaderCompilation { program, message })?;
        }

        let bindings = self.create_pass_bindings(pass)?;

        let targets = &self.targets;
        let Some(frame) = self.frame.as_mut() else {
            return Err(RenderError::NoActiveFrame);
        };
        let surface_view = &frame.view;

        let mut color_attachments = Vec::with_capacity(pass.color.len());
        for attachment in &pass.color {
            let view = match attachment.target {
                ColorTarget::Texture(key) => &lookup(targets, key)?.view,
                ColorTarget::Surface => surface_view,
            };
            let resolve_target = match attachment.resolve {
                Some(key) => Some(&lookup(targets, key)?.view),
                None => None,
            };
            color_attachments.push(Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target,
                ops: wgpu::Operations {
                    load: load_op(attachment.load),
                    store: wgpu::StoreOp::Store,
                },
            }));
        }

        let depth_stencil_attachment = match pass.depth {
            Some(depth) => Some(wgpu::RenderPassDepthStencilAttachment {
                view: &lookup(targets, depth.target)?.view,
                depth_ops: Some(wgpu::Operations {
                    load: match depth.clear {
                        Some(value) => wgpu::LoadOp::Clear(value),
                        None => wgpu::LoadOp::Load,
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            None => None,
        };

        let mut render_pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&pass.label),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            occlusion_query_set: None,
            timestamp_writes: None,
        });

        for (i, draw) in pass.draws.iter().enumerate() {
            let program = draw.program();
            let Some(pipeline) = self.pipelines.get_pipeline(program, samples) else {
                continue;
            };
            render_pass.set_pipeline(pipeline);
            if let Some(group) = bindings.pass_groups.get(&program) {
                render_pass.set_bind_group(0, group, &[]);
            }

            match draw {
                Draw::Mesh { mesh, .. } => {
                    let Some(gpu_mesh) = self.meshes.get(*mesh) else {
                        continue;
                    };
                    if let Some(group) = bindings.draw_groups.get(&program) {
                        render_pass.set_bind_group(1, group, &[bindings.draw_offsets[i]]);
                    }
                    if let Some(Some(group)) = bindings.material_groups.get(i) {
                        render_pass.set_bind_group(2, group, &[]);
                    }
                    render_pass.draw_mesh(gpu_mesh);
                }
                Draw::FullScreen { .. } => {
                    if let Some(group) = bindings.input_groups.get(&program) {
                        render_pass.set_bind_group(1, group, &[]);
                    }
                    render_pass.draw_full_screen();
                }
            }
        }

        Ok(())
    }

    fn present(&mut self) -> RenderResult<()> {
        let frame = self.frame.take().ok_or(RenderError::NoActiveFrame)?;
        self.queue.submit(std::iter::once(frame.encoder.finish()));
        frame.surface_texture.present();
        Ok(())
    }

    fn discard_frame(&mut self) {
        if self.frame.take().is_some() {
            debug!("Discarded unfinished frame");
        }
    }
}
