use cgmath::{perspective, Deg, EuclideanSpace, Matrix4, Point3, Rad, SquareMatrix, Vector3};

use super::frustum::Frustum;

/// Converts OpenGL clip space (z in -1..1) to wgpu clip space (z in 0..1)
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

/// Perspective parameters kept so the projection can follow viewport resizes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerspectiveParams {
    pub fovy: Rad<f32>,
    pub aspect: f32,
    pub znear: f32,
    pub zfar: f32,
}

impl Default for PerspectiveParams {
    fn default() -> Self {
        Self {
            fovy: Deg(45.0).into(),
            aspect: 16.0 / 9.0,
            znear: 0.1,
            zfar: 200.0,
        }
    }
}

impl PerspectiveParams {
    pub fn matrix(&self) -> Matrix4<f32> {
        OPENGL_TO_WGPU_MATRIX * perspective(self.fovy, self.aspect, self.znear, self.zfar)
    }
}

/// Viewing camera supplied to the renderer each frame
///
/// Matrices are already in wgpu clip space. The frustum is derived from them
/// once per frame by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub view: Matrix4<f32>,
    pub projection: Matrix4<f32>,
    pub position: Point3<f32>,
    perspective: Option<PerspectiveParams>,
}

impl Camera {
    /// Right-handed, Y-up camera at `eye` looking at `target`
    pub fn look_at(eye: Point3<f32>, target: Point3<f32>, aspect: f32) -> Self {
        let params = PerspectiveParams {
            aspect,
            ..PerspectiveParams::default()
        };
        Self::with_perspective(eye, target, params)
    }

    pub fn with_perspective(
        eye: Point3<f32>,
        target: Point3<f32>,
        params: PerspectiveParams,
    ) -> Self {
        Self {
            view: Matrix4::look_at_rh(eye, target, Vector3::unit_y()),
            projection: params.matrix(),
            position: eye,
            perspective: Some(params),
        }
    }

    /// Camera from collaborator-supplied matrices
    ///
    /// The eye position is recovered from the inverse view matrix; a singular
    /// view falls back to the origin.
    pub fn from_matrices(view: Matrix4<f32>, projection: Matrix4<f32>) -> Self {
        let position = view
            .invert()
            .map(|inv| Point3::from_vec(inv.w.truncate()))
            .unwrap_or_else(Point3::origin);

        Self {
            view,
            projection,
            position,
            perspective: None,
        }
    }

    /// Rebuilds the projection for a new viewport; no-op for raw matrices
    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        if let Some(params) = self.perspective.as_mut() {
            params.aspect = width as f32 / height as f32;
            self.projection = params.matrix();
        }
    }

    /// Moves the eye and target while keeping the projection
    pub fn set_view(&mut self, eye: Point3<f32>, target: Point3<f32>) {
        self.view = Matrix4::look_at_rh(eye, target, Vector3::unit_y());
        self.position = eye;
    }

    pub fn view_projection(&self) -> Matrix4<f32> {
        self.projection * self.view
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_proj(self.view_projection())
    }

    pub fn uniform(&self) -> CameraUniform {
        CameraUniform {
            view_position: self.position.to_homogeneous().into(),
            view_proj: convert_matrix4_to_array(self.view_projection()),
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct CameraUniform {
    /// The eye position of the camera in homogenous coordinates.
    ///
    /// Homogenous coordinates are used to fullfill the 16 byte alignment requirement.
    pub view_position: [f32; 4],

    /// Contains the view projection matrix.
    pub view_proj: [[f32; 4]; 4],
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self {
            view_position: [0.0; 4],
            view_proj: convert_matrix4_to_array(Matrix4::identity()),
        }
    }
}

pub fn convert_matrix4_to_array(matrix4: Matrix4<f32>) -> [[f32; 4]; 4] {
    let mut result = [[0.0; 4]; 4];

    for i in 0..4 {
        for j in 0..4 {
            result[i][j] = matrix4[i][j];
        }
    }

    result
}
