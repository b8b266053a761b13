//! Minimal windowed viewer
//!
//! Opens a winit window, drives a [`Renderer`] over a [`WgpuDevice`] once per
//! redraw, forwards resizes and quits on Escape. Scene content and animation
//! are supplied by the caller through setup and update callbacks.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use log::{debug, error, info};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowAttributes},
};

use crate::config::RenderConfig;
use crate::gfx::camera::Camera;
use crate::gfx::lighting::LightDesc;
use crate::gfx::rendering::{FrameOutcome, Renderer, ShaderSet, WgpuDevice};
use crate::gfx::scene::Scene;

/// Uploads scene content once the device exists and returns the initial lights
pub type SetupCallback =
    Box<dyn FnOnce(&mut WgpuDevice, &mut Scene) -> anyhow::Result<Vec<LightDesc>>>;

/// Called before every frame with the elapsed seconds since the previous one
pub type UpdateCallback = Box<dyn FnMut(f32, &mut Scene, &mut Camera, &mut Renderer<WgpuDevice>)>;

pub struct Viewer {
    event_loop: Option<EventLoop<()>>,
    state: ViewerState,
}

struct ViewerState {
    title: String,
    config: RenderConfig,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer<WgpuDevice>>,
    scene: Scene,
    camera: Camera,
    setup: Option<SetupCallback>,
    update: Option<UpdateCallback>,
    last_frame: Instant,
    error: Option<anyhow::Error>,
}

impl Viewer {
    pub fn new(camera: Camera) -> anyhow::Result<Self> {
        let event_loop = EventLoop::new().context("failed to create event loop")?;

        Ok(Self {
            event_loop: Some(event_loop),
            state: ViewerState {
                title: "Umbra".to_string(),
                config: RenderConfig::default(),
                window: None,
                renderer: None,
                scene: Scene::new(),
                camera,
                setup: None,
                update: None,
                last_frame: Instant::now(),
                error: None,
            },
        })
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.state.title = title.to_string();
        self
    }

    pub fn with_config(mut self, config: RenderConfig) -> Self {
        self.state.config = config;
        self
    }

    pub fn on_setup<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut WgpuDevice, &mut Scene) -> anyhow::Result<Vec<LightDesc>> + 'static,
    {
        self.state.setup = Some(Box::new(setup));
        self
    }

    pub fn on_update<F>(mut self, update: F) -> Self
    where
        F: FnMut(f32, &mut Scene, &mut Camera, &mut Renderer<WgpuDevice>) + 'static,
    {
        self.state.update = Some(Box::new(update));
        self
    }

    /// Runs the event loop until the window closes
    pub fn run(mut self) -> anyhow::Result<()> {
        let event_loop = self
            .event_loop
            .take()
            .context("event loop already consumed")?;
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop
            .run_app(&mut self.state)
            .context("event loop terminated abnormally")?;

        match self.state.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl ViewerState {
    fn create_renderer(&mut self, window: Arc<Window>) -> anyhow::Result<Renderer<WgpuDevice>> {
        let (width, height) = window.inner_size().into();
        let device = pollster::block_on(WgpuDevice::new(window, width, height))
            .context("failed to create graphics device")?;

        let mut renderer = Renderer::new(device, self.config, &ShaderSet::builtin())
            .context("failed to build the frame pipeline")?;

        let lights = match self.setup.take() {
            Some(setup) => setup(renderer.device_mut(), &mut self.scene)?,
            None => Vec::new(),
        };
        renderer
            .initialize_lights(&lights)
            .context("failed to initialize lights")?;
        self.camera.set_aspect(width, height);

        info!(
            "Viewer ready: {} objects, {} lights",
            self.scene.get_statistics().object_count,
            renderer.lights().len()
        );
        Ok(renderer)
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{:#}", err);
        self.error = Some(err);
        event_loop.exit();
    }
}

impl ApplicationHandler for ViewerState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = WindowAttributes::default()
            .with_title(self.title.clone())
            .with_inner_size(winit::dpi::LogicalSize::new(1200, 800));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                self.fail(event_loop, anyhow::Error::new(err).context("failed to create window"));
                return;
            }
        };
        self.window = Some(window.clone());

        match self.create_renderer(window) {
            Ok(renderer) => {
                self.renderer = Some(renderer);
                self.last_frame = Instant::now();
            }
            Err(err) => self.fail(event_loop, err),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match event {
            WindowEvent::KeyboardInput {
                event:
                    winit::event::KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        ..
                    },
                ..
            }
            | WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(PhysicalSize { width, height }) => {
                renderer.request_resize(width, height);
                if width > 0 && height > 0 {
                    self.camera.set_aspect(width, height);
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let delta_time = (now - self.last_frame).as_secs_f32();
                self.last_frame = now;

                if let Some(update) = self.update.as_mut() {
                    update(delta_time, &mut self.scene, &mut self.camera, renderer);
                }

                match renderer.render_frame(&self.scene, &self.camera) {
                    Ok(report) if report.outcome == FrameOutcome::Presented => {
                        debug!(
                            "Frame {}: {} drawn, {} culled, {} shadow renders",
                            report.frame,
                            report.objects_drawn,
                            report.objects_culled,
                            report.shadow_renders
                        );
                    }
                    Ok(_) => {}
                    Err(err) => {
                        let err = anyhow::Error::new(err).context("frame failed");
                        self.fail(event_loop, err);
                    }
                }
            }
            _ => (),
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.take() {
            let mut device = renderer.shutdown();
            self.scene.release(&mut device);
            info!("Released renderer resources");
        }
    }
}
