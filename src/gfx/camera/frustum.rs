//! View frustum and bounding spheres for culling
//!
//! Planes are extracted from a view-projection matrix with the Gribb/Hartmann
//! method, using the wgpu depth convention (clip z in 0..w).

use cgmath::{InnerSpace, Matrix4, Point3, Transform, Vector3, Vector4};

/// A plane `dot(normal, p) + distance = 0` with a unit normal pointing inward
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vector3<f32>,
    pub distance: f32,
}

impl Plane {
    /// Plane from raw `(a, b, c, d)` coefficients, normalized
    fn from_coefficients(v: Vector4<f32>) -> Self {
        let normal = v.truncate();
        let length = normal.magnitude();
        if length <= f32::EPSILON {
            // Degenerate row, accept everything
            return Self {
                normal: Vector3::new(0.0, 0.0, 0.0),
                distance: 0.0,
            };
        }
        Self {
            normal: normal / length,
            distance: v.w / length,
        }
    }

    pub fn distance_to_point(&self, point: Point3<f32>) -> f32 {
        self.normal.dot(Vector3::new(point.x, point.y, point.z)) + self.distance
    }
}

/// Six clip planes: left, right, bottom, top, near, far
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [Plane; 6],
}

impl Frustum {
    pub fn from_view_proj(view_proj: Matrix4<f32>) -> Self {
        // cgmath is column-major: m[col][row]
        let m = view_proj;
        let row = |r: usize| Vector4::new(m[0][r], m[1][r], m[2][r], m[3][r]);
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        let planes = [
            Plane::from_coefficients(r3 + r0),
            Plane::from_coefficients(r3 - r0),
            Plane::from_coefficients(r3 + r1),
            Plane::from_coefficients(r3 - r1),
            Plane::from_coefficients(r2),
            Plane::from_coefficients(r3 - r2),
        ];

        Self { planes }
    }

    pub fn planes(&self) -> &[Plane; 6] {
        &self.planes
    }

    /// False only when the sphere lies entirely behind one of the planes
    pub fn intersects_sphere(&self, sphere: &BoundingSphere) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(sphere.center) >= -sphere.radius)
    }

    pub fn contains_point(&self, point: Point3<f32>) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(point) >= 0.0)
    }
}

/// World-space bounding sphere
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Point3<f32>,
    pub radius: f32,
}

impl BoundingSphere {
    pub fn new(center: Point3<f32>, radius: f32) -> Self {
        Self {
            center,
            radius: radius.max(0.0),
        }
    }

    /// Sphere of `radius` around the local origin moved into world space
    ///
    /// The radius is scaled by the largest axis scale of the transform, so
    /// non-uniform scales stay conservative.
    pub fn transformed(radius: f32, transform: &Matrix4<f32>) -> Self {
        let center = transform.transform_point(Point3::new(0.0, 0.0, 0.0));
        let scale = [transform.x, transform.y, transform.z]
            .iter()
            .map(|axis| axis.truncate().magnitude())
            .fold(0.0_f32, f32::max);

        Self::new(center, radius * scale)
    }

    /// Smallest sphere enclosing both
    pub fn union(&self, other: &BoundingSphere) -> BoundingSphere {
        let offset = other.center - self.center;
        let dist = offset.magnitude();

        if dist + other.radius <= self.radius {
            return *self;
        }
        if dist + self.radius <= other.radius {
            return *other;
        }

        let radius = (dist + self.radius + other.radius) * 0.5;
        let center = self.center + offset * ((radius - self.radius) / dist);
        BoundingSphere::new(center, radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::camera::camera_utils::Camera;
    use approx::assert_relative_eq;

    fn camera() -> Camera {
        Camera::look_at(Point3::new(0.0, 0.0, 10.0), Point3::new(0.0, 0.0, 0.0), 1.0)
    }

    #[test]
    fn test_sphere_in_front_is_visible() {
        let frustum = camera().frustum();
        assert!(frustum.intersects_sphere(&BoundingSphere::new(Point3::new(0.0, 0.0, 0.0), 1.0)));
    }

    #[test]
    fn test_sphere_behind_camera_is_culled() {
        let frustum = camera().frustum();
        assert!(!frustum.intersects_sphere(&BoundingSphere::new(Point3::new(0.0, 0.0, 20.0), 1.0)));
    }

    #[test]
    fn test_sphere_far_to_the_side_is_culled() {
        let frustum = camera().frustum();
        let far_away = BoundingSphere::new(Point3::new(100.0, 0.0, 0.0), 1.0);
        assert!(!frustum.intersects_sphere(&far_away));
    }

    #[test]
    fn test_sphere_straddling_plane_is_kept() {
        let frustum = camera().frustum();
        // Half-angle 22.5 deg at distance 10: edge at ~4.14
        assert!(frustum.intersects_sphere(&BoundingSphere::new(Point3::new(4.6, 0.0, 0.0), 1.0)));
    }

    #[test]
    fn test_near_plane_uses_zero_to_one_depth() {
        let frustum = camera().frustum();
        let near = frustum.planes()[4];
        // Eye at z=10 looking down -Z with znear 0.1
        let on_near = near.distance_to_point(Point3::new(0.0, 0.0, 9.9));
        assert_relative_eq!(on_near, 0.0, epsilon = 1e-3);
        assert!(frustum.contains_point(Point3::new(0.0, 0.0, 9.0)));
        assert!(!frustum.contains_point(Point3::new(0.0, 0.0, 9.95)));
    }

    #[test]
    fn test_transformed_radius_uses_largest_scale() {
        let transform = Matrix4::from_translation(Vector3::new(1.0, 2.0, 3.0))
            * Matrix4::from_nonuniform_scale(1.0, 3.0, 2.0);
        let sphere = BoundingSphere::transformed(0.5, &transform);
        assert_relative_eq!(sphere.radius, 1.5);
        assert_relative_eq!(sphere.center.y, 2.0);
    }

    #[test]
    fn test_union_encloses_both() {
        let a = BoundingSphere::new(Point3::new(-2.0, 0.0, 0.0), 1.0);
        let b = BoundingSphere::new(Point3::new(3.0, 0.0, 0.0), 2.0);
        let u = a.union(&b);
        assert_relative_eq!(u.radius, 4.0);
        assert_relative_eq!(u.center.x, 1.0);

        let inner = BoundingSphere::new(Point3::new(0.0, 0.0, 0.0), 0.5);
        assert_eq!(u.union(&inner), u);
    }
}
