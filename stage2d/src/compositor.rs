//! Per-layer view transforms derived from the base camera.
//!
//! Only reads actors and the camera; it never touches bodies.

use glam::{Affine2, Vec2 as GlamVec2};

use crate::actor::{ActorId, ActorShape};
use crate::body::BodyState;
use crate::camera::Camera;
use crate::layer::{Layer, LayerId};
use crate::math::Vec2;

/// Effective view of one layer: the camera scaled by the layer's parallax.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerTransform {
    pub layer: LayerId,
    /// World point shown at the screen center.
    pub focus: Vec2,
    /// Degrees.
    pub rotation: f32,
    pub pixels_per_meter: f32,
    pub visible: bool,
}

impl LayerTransform {
    pub fn from_camera(camera: &Camera, layer: &Layer) -> Self {
        let p = layer.parallax();
        let center = camera.center();
        Self {
            layer: layer.id(),
            focus: Vec2::new(center.x * p.position.x, center.y * p.position.y),
            rotation: camera.rotation() * p.rotation,
            pixels_per_meter: 1.0 + (camera.meter() - 1.0) * p.zoom,
            visible: layer.is_visible(),
        }
    }

    /// Screen coordinates are pixels relative to the screen center, y up.
    pub fn world_to_screen(&self, world: Vec2) -> Vec2 {
        (world - self.focus).rotated(-self.rotation) * self.pixels_per_meter
    }

    pub fn screen_to_world(&self, screen: Vec2) -> Vec2 {
        (screen / self.pixels_per_meter).rotated(self.rotation) + self.focus
    }

    /// World-to-screen as an affine matrix for the renderer.
    pub fn matrix(&self) -> Affine2 {
        Affine2::from_scale(GlamVec2::splat(self.pixels_per_meter))
            * Affine2::from_angle(-self.rotation.to_radians())
            * Affine2::from_translation(-self.focus.to_glam())
    }
}

#[derive(Debug, Default)]
pub struct Compositor {
    transforms: Vec<LayerTransform>,
}

impl Compositor {
    pub(crate) fn recompute(&mut self, camera: &Camera, layers: &[Layer]) {
        self.transforms.clear();
        self.transforms
            .extend(layers.iter().map(|l| LayerTransform::from_camera(camera, l)));
    }

    /// Transforms in layer order, as of the end of the last tick.
    pub fn transforms(&self) -> &[LayerTransform] {
        &self.transforms
    }

    pub fn get(&self, layer: LayerId) -> Option<&LayerTransform> {
        self.transforms.iter().find(|t| t.layer == layer)
    }
}

/// Read-only view of one actor for the renderer.
#[derive(Clone, Debug, PartialEq)]
pub struct ActorSnapshot {
    pub id: ActorId,
    pub position: Vec2,
    pub rotation: f32,
    pub shape: ActorShape,
    pub state: BodyState,
    pub visible: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LayerSnapshot {
    pub transform: LayerTransform,
    pub actors: Vec<ActorSnapshot>,
}

/// Everything the rendering collaborator needs for one frame, in draw order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneSnapshot {
    pub layers: Vec<LayerSnapshot>,
}
