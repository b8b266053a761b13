//! Light sources
//!
//! Lights are described by a [`LightDesc`] whose [`LightKind`] carries the
//! variant-specific payload. Only directional lights have a shading and shadow
//! path; spot and point descriptors are rejected when the runtime [`Light`] is
//! built, never later during a frame.

use cgmath::{InnerSpace, Matrix4, Point3, Rad, SquareMatrix, Vector3};
use slotmap::{new_key_type, SlotMap};

use crate::error::{RenderError, RenderResult};
use crate::gfx::rendering::shadow_cache::ShadowMap;

new_key_type! {
    /// Stable handle to a light owned by the renderer
    pub struct LightId;
}

/// Variant tag with variant-specific payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Directional {
        target: Point3<f32>,
    },
    Spot {
        direction: Vector3<f32>,
        cone_angle: Rad<f32>,
    },
    Point {
        range: f32,
    },
}

impl LightKind {
    pub fn name(&self) -> &'static str {
        match self {
            LightKind::Directional { .. } => "directional",
            LightKind::Spot { .. } => "spot",
            LightKind::Point { .. } => "point",
        }
    }
}

/// Light description supplied by the scene collaborator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightDesc {
    pub kind: LightKind,
    pub position: Point3<f32>,
    pub color: [f32; 3],
    pub intensity: f32,
    pub cast_shadows: bool,
}

impl LightDesc {
    /// White, unit-intensity, shadow-casting directional light
    pub fn directional(position: Point3<f32>, target: Point3<f32>) -> Self {
        Self {
            kind: LightKind::Directional { target },
            position,
            color: [1.0, 1.0, 1.0],
            intensity: 1.0,
            cast_shadows: true,
        }
    }

    pub fn with_color(mut self, color: [f32; 3]) -> Self {
        self.color = color;
        self
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_cast_shadows(mut self, cast_shadows: bool) -> Self {
        self.cast_shadows = cast_shadows;
        self
    }

    /// Fails for light kinds without an implementation
    pub fn validate(&self) -> RenderResult<()> {
        match self.kind {
            LightKind::Directional { .. } => Ok(()),
            other => Err(RenderError::UnsupportedLight(other.name())),
        }
    }
}

/// A directional light as tracked by the renderer
///
/// Moving the light sets `dirty`; the shadow stage compares the new transform
/// against the snapshot of its last render and clears the flag.
#[derive(Debug)]
pub struct Light {
    position: Point3<f32>,
    target: Point3<f32>,
    pub color: [f32; 3],
    pub intensity: f32,
    cast_shadows: bool,
    light_space: Matrix4<f32>,
    dirty: bool,
    pub(crate) shadow_map: Option<ShadowMap>,
}

impl Light {
    pub fn from_desc(desc: &LightDesc) -> RenderResult<Self> {
        desc.validate()?;
        let LightKind::Directional { target } = desc.kind else {
            return Err(RenderError::UnsupportedLight(desc.kind.name()));
        };

        Ok(Self {
            position: desc.position,
            target,
            color: desc.color,
            intensity: desc.intensity,
            cast_shadows: desc.cast_shadows,
            light_space: Matrix4::identity(),
            dirty: true,
            shadow_map: None,
        })
    }

    pub fn position(&self) -> Point3<f32> {
        self.position
    }

    pub fn target(&self) -> Point3<f32> {
        self.target
    }

    pub fn set_position(&mut self, position: Point3<f32>) {
        if position != self.position {
            self.position = position;
            self.dirty = true;
        }
    }

    pub fn set_target(&mut self, target: Point3<f32>) {
        if target != self.target {
            self.target = target;
            self.dirty = true;
        }
    }

    /// Unit direction the light travels in; straight down when degenerate
    pub fn direction(&self) -> Vector3<f32> {
        let dir = self.target - self.position;
        if dir.magnitude2() <= f32::EPSILON {
            -Vector3::unit_y()
        } else {
            dir.normalize()
        }
    }

    pub fn cast_shadows(&self) -> bool {
        self.cast_shadows
    }

    pub(crate) fn set_cast_shadows_flag(&mut self, cast_shadows: bool) {
        self.cast_shadows = cast_shadows;
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Light-space view-projection of the last shadow render
    pub fn light_space(&self) -> Matrix4<f32> {
        self.light_space
    }

    pub(crate) fn set_light_space(&mut self, light_space: Matrix4<f32>) {
        self.light_space = light_space;
    }

    pub fn shadow_map(&self) -> Option<&ShadowMap> {
        self.shadow_map.as_ref()
    }

    pub fn has_shadow_map(&self) -> bool {
        self.shadow_map.is_some()
    }

    /// Whether the light can contribute any color at all
    pub fn is_visible(&self) -> bool {
        self.intensity > 0.0 && self.color.iter().any(|c| *c > 0.0)
    }
}

/// Lights keyed by [`LightId`], iterated in insertion order
#[derive(Debug, Default)]
pub struct LightSet {
    lights: SlotMap<LightId, Light>,
    order: Vec<LightId>,
}

impl LightSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, light: Light) -> LightId {
        let id = self.lights.insert(light);
        self.order.push(id);
        id
    }

    pub fn remove(&mut self, id: LightId) -> Option<Light> {
        let light = self.lights.remove(id)?;
        self.order.retain(|other| *other != id);
        Some(light)
    }

    pub fn get(&self, id: LightId) -> Option<&Light> {
        self.lights.get(id)
    }

    pub fn get_mut(&mut self, id: LightId) -> Option<&mut Light> {
        self.lights.get_mut(id)
    }

    /// Light IDs in insertion order
    pub fn ids(&self) -> &[LightId] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = (LightId, &Light)> {
        self.order
            .iter()
            .filter_map(|id| self.lights.get(*id).map(|light| (*id, light)))
    }

    /// Removes every light, returning them in insertion order
    pub fn drain(&mut self) -> Vec<Light> {
        let order = std::mem::take(&mut self.order);
        let lights = order
            .into_iter()
            .filter_map(|id| self.lights.remove(id))
            .collect();
        self.lights.clear();
        lights
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sun() -> LightDesc {
        LightDesc::directional(Point3::new(0.0, 10.0, 0.0), Point3::new(0.0, 0.0, 0.0))
    }

    #[test]
    fn test_spot_and_point_are_rejected() {
        let spot = LightDesc {
            kind: LightKind::Spot {
                direction: -Vector3::unit_y(),
                cone_angle: Rad(0.5),
            },
            ..sun()
        };
        let point = LightDesc {
            kind: LightKind::Point { range: 10.0 },
            ..sun()
        };

        assert_eq!(
            Light::from_desc(&spot).unwrap_err(),
            RenderError::UnsupportedLight("spot")
        );
        assert_eq!(
            Light::from_desc(&point).unwrap_err(),
            RenderError::UnsupportedLight("point")
        );
    }

    #[test]
    fn test_moving_sets_dirty() {
        let mut light = Light::from_desc(&sun()).unwrap();
        light.clear_dirty();

        light.set_position(Point3::new(0.0, 10.0, 0.0));
        assert!(!light.is_dirty(), "same position must not dirty the light");

        light.set_target(Point3::new(1.0, 0.0, 0.0));
        assert!(light.is_dirty());
    }

    #[test]
    fn test_direction_is_normalized() {
        let light = Light::from_desc(&sun()).unwrap();
        let dir = light.direction();
        assert!((dir.magnitude() - 1.0).abs() < 1e-6);
        assert!(dir.y < 0.0);
    }

    #[test]
    fn test_visibility() {
        let black = Light::from_desc(&sun().with_color([0.0; 3])).unwrap();
        let off = Light::from_desc(&sun().with_intensity(0.0)).unwrap();
        assert!(!black.is_visible());
        assert!(!off.is_visible());
        assert!(Light::from_desc(&sun()).unwrap().is_visible());
    }

    #[test]
    fn test_light_set_preserves_insertion_order() {
        let mut set = LightSet::new();
        let a = set.insert(Light::from_desc(&sun()).unwrap());
        let b = set.insert(Light::from_desc(&sun()).unwrap());
        let c = set.insert(Light::from_desc(&sun()).unwrap());

        set.remove(b);
        let ids: Vec<_> = set.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![a, c]);
        assert_eq!(set.drain().len(), 2);
        assert!(set.is_empty());
    }
}
