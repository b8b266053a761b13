//! # Procedural geometry
//!
//! Generates the primitive meshes used by demos and tests in place of asset
//! loading. Every generator returns a [`MeshData`] in the renderer's vertex
//! format together with the radius of its bounding sphere around the origin.
//!
//! ```rust
//! use umbra::gfx::geometry::{generate_cube, generate_plane, generate_sphere};
//!
//! let cube = generate_cube();
//! let sphere = generate_sphere(32, 16);
//! let ground = generate_plane(20.0, 20.0, 4, 4);
//! assert!(ground.bounding_radius > cube.bounding_radius);
//! # let _ = sphere;
//! ```

pub mod primitives;

pub use primitives::*;

use crate::gfx::scene::vertex::Vertex3D;

/// CPU-side mesh ready for upload through a render device
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex3D>,
    /// Triangle list, counter-clockwise winding
    pub indices: Vec<u32>,
    /// Radius of the bounding sphere centered at the mesh origin
    pub bounding_radius: f32,
}

impl MeshData {
    /// Builds a mesh and computes its bounding radius from the vertices
    pub fn new(vertices: Vec<Vertex3D>, indices: Vec<u32>) -> Self {
        let bounding_radius = vertices
            .iter()
            .map(|v| {
                let [x, y, z] = v.position;
                (x * x + y * y + z * z).sqrt()
            })
            .fold(0.0_f32, f32::max);

        Self {
            vertices,
            indices,
            bounding_radius,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
