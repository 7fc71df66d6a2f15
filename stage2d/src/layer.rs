use std::fmt;

use serde::{Deserialize, Serialize};

use crate::actor::ActorId;
use crate::error::{StageError, StageResult};
use crate::math::Vec2;
use crate::physics::PhysicsWorld;
use crate::units::UnitScale;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(u32);

impl LayerId {
    pub(crate) fn from_u32(id: u32) -> Self {
        Self(id)
    }

    pub fn to_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How strongly a layer follows the camera. 1 moves with the camera,
/// 0 is locked to the screen.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parallax {
    pub position: Vec2,
    pub rotation: f32,
    pub zoom: f32,
}

impl Default for Parallax {
    fn default() -> Self {
        Self {
            position: Vec2::ONE,
            rotation: 1.0,
            zoom: 1.0,
        }
    }
}

impl Parallax {
    pub const SCREEN_LOCKED: Self = Self {
        position: Vec2::ZERO,
        rotation: 0.0,
        zoom: 0.0,
    };

    pub fn new(x: f32, y: f32, rotation: f32, zoom: f32) -> Self {
        Self {
            position: Vec2::new(x, y),
            rotation,
            zoom,
        }
    }
}

/// Settings a lazily created world starts from.
#[derive(Clone, Copy, Debug)]
pub(crate) struct WorldSettings {
    pub gravity: Vec2,
    pub units: UnitScale,
    pub step: f32,
    pub max_substeps: u32,
}

/// Ordered group of actors sharing parallax, time distortion and (once any
/// member has a body) one physics world.
pub struct Layer {
    id: LayerId,
    name: Option<String>,
    pub(crate) position: i32,
    pub(crate) actors: Vec<ActorId>,
    parallax: Parallax,
    time_distort: f32,
    visible: bool,
    gravity: Option<Vec2>,
    paused: bool,
    pub(crate) world: Option<PhysicsWorld>,
}

impl Layer {
    pub(crate) fn new(id: LayerId, position: i32) -> Self {
        Self {
            id,
            name: None,
            position,
            actors: Vec::new(),
            parallax: Parallax::default(),
            time_distort: 1.0,
            visible: true,
            gravity: None,
            paused: false,
            world: None,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// Sort key among the scene's layers; larger is drawn and updated later.
    pub fn position(&self) -> i32 {
        self.position
    }

    /// Actors in insertion order.
    pub fn actors(&self) -> &[ActorId] {
        &self.actors
    }

    pub fn parallax(&self) -> Parallax {
        self.parallax
    }

    pub fn set_parallax(&mut self, parallax: Parallax) {
        self.parallax = parallax;
    }

    pub fn time_distort(&self) -> f32 {
        self.time_distort
    }

    /// Scales the time this layer's world and callbacks see. 0 freezes the layer.
    pub fn set_time_distort(&mut self, factor: f32) -> StageResult<()> {
        if !factor.is_finite() || factor < 0.0 {
            return Err(StageError::argument(format!(
                "time distortion must be >= 0, got {factor}"
            )));
        }
        self.time_distort = factor;
        Ok(())
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Layer-specific gravity; `None` uses the scene default.
    pub fn gravity(&self) -> Option<Vec2> {
        self.gravity
    }

    pub fn set_gravity(&mut self, gravity: Vec2) {
        self.gravity = Some(gravity);
        if let Some(world) = self.world.as_mut() {
            world.set_gravity(gravity);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Stops stepping the world. Callbacks still run.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn has_world(&self) -> bool {
        self.world.is_some()
    }

    pub fn body_count(&self) -> usize {
        self.world.as_ref().map_or(0, |w| w.body_count())
    }

    pub fn joint_count(&self) -> usize {
        self.world.as_ref().map_or(0, |w| w.joint_count())
    }

    pub fn fault(&self) -> Option<&str> {
        self.world.as_ref().and_then(|w| w.fault())
    }

    pub(crate) fn world_or_create(&mut self, settings: WorldSettings) -> &mut PhysicsWorld {
        let gravity = self.gravity.unwrap_or(settings.gravity);
        let id = self.id;
        self.world.get_or_insert_with(|| {
            log::debug!("creating physics world for layer {id}");
            let mut world = PhysicsWorld::new(gravity, settings.units);
            world.set_timing(settings.step, settings.max_substeps);
            world
        })
    }

    /// Steps the world by `dt` scaled with the time distortion.
    pub(crate) fn step(&mut self, dt: f32) -> StageResult<()> {
        if self.paused {
            return Ok(());
        }
        let scaled = dt * self.time_distort;
        let layer = self.id;
        match self.world.as_mut() {
            // Reported on the tick it happened; the world stays frozen.
            Some(world) if world.fault().is_some() => Ok(()),
            Some(world) => world
                .advance(scaled)
                .map(|_| ())
                .map_err(|reason| StageError::WorldFault { layer, reason }),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer")
            .field("id", &self.id)
            .field("position", &self.position)
            .field("actors", &self.actors.len())
            .field("has_world", &self.world.is_some())
            .finish()
    }
}
