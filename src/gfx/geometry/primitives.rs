//! Primitive shape generators (Y-up, counter-clockwise winding)

use std::f32::consts::PI;

use super::MeshData;
use crate::gfx::scene::vertex::Vertex3D;

/// Unit cube centered at the origin, spanning -0.5..0.5 on every axis
///
/// Each face has its own four vertices so normals stay flat.
pub fn generate_cube() -> MeshData {
    // (normal, tangent u, tangent v) per face
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
    ];
    let corners = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, u_axis, v_axis) in faces {
        let base = vertices.len() as u32;
        for [u, v] in corners {
            let (su, sv) = (u - 0.5, v - 0.5);
            let position = [
                normal[0] * 0.5 + u_axis[0] * su + v_axis[0] * sv,
                normal[1] * 0.5 + u_axis[1] * su + v_axis[1] * sv,
                normal[2] * 0.5 + u_axis[2] * su + v_axis[2] * sv,
            ];
            vertices.push(Vertex3D {
                position,
                normal,
                uv: [u, 1.0 - v],
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }

    MeshData::new(vertices, indices)
}

/// UV sphere of radius 1.0 centered at the origin
pub fn generate_sphere(longitude_segments: u32, latitude_segments: u32) -> MeshData {
    let long_segs = longitude_segments.max(3);
    let lat_segs = latitude_segments.max(2);

    let mut vertices = Vec::with_capacity(((lat_segs + 1) * (long_segs + 1)) as usize);
    for lat in 0..=lat_segs {
        let theta = lat as f32 * PI / lat_segs as f32;
        let (sin_theta, cos_theta) = theta.sin_cos();

        for long in 0..=long_segs {
            let phi = long as f32 * 2.0 * PI / long_segs as f32;
            let (sin_phi, cos_phi) = phi.sin_cos();
            let p = [sin_theta * cos_phi, cos_theta, sin_theta * sin_phi];

            vertices.push(Vertex3D {
                position: p,
                normal: p,
                uv: [long as f32 / long_segs as f32, lat as f32 / lat_segs as f32],
            });
        }
    }

    let mut indices = Vec::with_capacity((lat_segs * long_segs * 6) as usize);
    for lat in 0..lat_segs {
        for long in 0..long_segs {
            let first = lat * (long_segs + 1) + long;
            let second = first + long_segs + 1;
            indices.extend_from_slice(&[first, first + 1, second, second, first + 1, second + 1]);
        }
    }

    MeshData::new(vertices, indices)
}

/// Horizontal plane in XZ facing +Y, centered at the origin
pub fn generate_plane(
    width: f32,
    depth: f32,
    width_segments: u32,
    depth_segments: u32,
) -> MeshData {
    let w_segs = width_segments.max(1);
    let d_segs = depth_segments.max(1);

    let mut vertices = Vec::with_capacity(((w_segs + 1) * (d_segs + 1)) as usize);
    for z in 0..=d_segs {
        let v = z as f32 / d_segs as f32;
        for x in 0..=w_segs {
            let u = x as f32 / w_segs as f32;
            vertices.push(Vertex3D {
                position: [(u - 0.5) * width, 0.0, (v - 0.5) * depth],
                normal: [0.0, 1.0, 0.0],
                uv: [u, v],
            });
        }
    }

    let mut indices = Vec::with_capacity((w_segs * d_segs * 6) as usize);
    for z in 0..d_segs {
        for x in 0..w_segs {
            let i = z * (w_segs + 1) + x;
            let next_row = i + w_segs + 1;
            indices.extend_from_slice(&[i, next_row, i + 1, i + 1, next_row, next_row + 1]);
        }
    }

    MeshData::new(vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn face_normal(mesh: &MeshData, tri: usize) -> [f32; 3] {
        let idx = &mesh.indices[tri * 3..tri * 3 + 3];
        let a = mesh.vertices[idx[0] as usize].position;
        let b = mesh.vertices[idx[1] as usize].position;
        let c = mesh.vertices[idx[2] as usize].position;
        let e1 = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
        let e2 = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
        [
            e1[1] * e2[2] - e1[2] * e2[1],
            e1[2] * e2[0] - e1[0] * e2[2],
            e1[0] * e2[1] - e1[1] * e2[0],
        ]
    }

    #[test]
    fn test_cube_generation() {
        let cube = generate_cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.triangle_count(), 12);
        assert_relative_eq!(cube.bounding_radius, 0.75_f32.sqrt(), epsilon = 1e-5);
    }

    #[test]
    fn test_cube_winding_faces_outward() {
        let cube = generate_cube();
        for tri in 0..cube.triangle_count() {
            let n = face_normal(&cube, tri);
            let expected = cube.vertices[cube.indices[tri * 3] as usize].normal;
            let dot = n[0] * expected[0] + n[1] * expected[1] + n[2] * expected[2];
            assert!(dot > 0.0, "triangle {tri} winds inward");
        }
    }

    #[test]
    fn test_sphere_generation() {
        let sphere = generate_sphere(8, 6);
        assert_eq!(sphere.vertex_count(), 9 * 7);
        assert_eq!(sphere.triangle_count(), 8 * 6 * 2);
        assert_relative_eq!(sphere.bounding_radius, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_plane_generation() {
        let plane = generate_plane(2.0, 2.0, 2, 2);
        assert_eq!(plane.vertex_count(), 9);
        assert_eq!(plane.indices.len(), 24);
        assert_relative_eq!(plane.bounding_radius, 2.0_f32.sqrt(), epsilon = 1e-5);

        let n = face_normal(&plane, 0);
        assert!(n[1] > 0.0, "plane must face +Y");
    }
}
