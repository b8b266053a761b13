//! Render pass extensions for the wgpu backend

use wgpu::*;

/// Uploaded mesh buffers
pub struct GpuMesh {
    pub vertex_buffer: Buffer,
    pub index_buffer: Buffer,
    pub index_count: u32,
}

/// Draw helpers shared by every pass the backend records
pub trait RenderPassExt {
    fn draw_mesh(&mut self, mesh: &GpuMesh);

    /// Three vertices covering the viewport, generated in `vs_main`
    fn draw_full_screen(&mut self);
}

impl RenderPassExt for RenderPass<'_> {
    fn draw_mesh(&mut self, mesh: &GpuMesh) {
        if mesh.index_count == 0 {
            return;
        }
        self.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
        self.set_index_buffer(mesh.index_buffer.slice(..), IndexFormat::Uint32);
        self.draw_indexed(0..mesh.index_count, 0, 0..1);
    }

    fn draw_full_screen(&mut self) {
        self.draw(0..3, 0..1);
    }
}
