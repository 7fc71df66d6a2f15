//! Body lifecycle: body types, state transitions and the motion API.
//!
//! An actor in [`BodyState::None`] is purely visual. Any other state means
//! exactly one engine body exists in the world of the actor's layer.
//! Static, dynamic and kinematic bodies switch type in place; any change to
//! or from [`BodyType::Sensor`] destroys and recreates the body, carrying its
//! velocity and rebinding its joints.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::actor::{Actor, ActorId, ActorShape};
use crate::error::{StageError, StageResult};
use crate::fixture::{Binding, FixtureId, FixtureSet, FixtureSpec, ResolveContext};
use crate::layer::Layer;
use crate::math::{wrap_degrees, Vec2};
use crate::physics::{BodySpec, PhysicsWorld};
use crate::scene::Scene;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyType {
    Static,
    Dynamic,
    Kinematic,
    /// Velocity-driven body whose fixtures only report overlaps.
    Sensor,
}

impl fmt::Display for BodyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BodyType::Static => "static",
            BodyType::Dynamic => "dynamic",
            BodyType::Kinematic => "kinematic",
            BodyType::Sensor => "sensor",
        };
        f.write_str(name)
    }
}

/// Physics state of an actor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyState {
    #[default]
    None,
    Static,
    Dynamic,
    Kinematic,
    Sensor,
}

impl BodyState {
    pub fn body_type(self) -> Option<BodyType> {
        match self {
            BodyState::None => None,
            BodyState::Static => Some(BodyType::Static),
            BodyState::Dynamic => Some(BodyType::Dynamic),
            BodyState::Kinematic => Some(BodyType::Kinematic),
            BodyState::Sensor => Some(BodyType::Sensor),
        }
    }
}

impl From<BodyType> for BodyState {
    fn from(t: BodyType) -> Self {
        match t {
            BodyType::Static => BodyState::Static,
            BodyType::Dynamic => BodyState::Dynamic,
            BodyType::Kinematic => BodyState::Kinematic,
            BodyType::Sensor => BodyState::Sensor,
        }
    }
}

impl fmt::Display for BodyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.body_type() {
            Some(t) => t.fmt(f),
            None => f.write_str("none"),
        }
    }
}

fn body_spec(actor: &Actor, body_type: BodyType) -> BodySpec {
    BodySpec {
        body_type,
        position: actor.position,
        rotation: actor.rotation,
        velocity: Vec2::ZERO,
        angular_velocity: 0.0,
        gravity_scale: actor.profile.gravity_scale,
        linear_damping: actor.profile.linear_damping,
        angular_damping: actor.profile.angular_damping,
        rotation_locked: actor.profile.rotation_locked,
    }
}

fn needs_recreation(from: BodyType, to: BodyType) -> bool {
    from == BodyType::Sensor || to == BodyType::Sensor
}

impl Scene {
    /// The actor and the layer it lives in, borrowed together.
    pub(crate) fn split(&mut self, id: ActorId) -> StageResult<(&mut Actor, &mut Layer)> {
        let actor = self.actors.get_mut(&id).ok_or(StageError::UnknownActor(id))?;
        let layer_id = actor.layer;
        let layer = self
            .layers
            .iter_mut()
            .find(|l| l.id() == layer_id)
            .ok_or(StageError::UnknownLayer(layer_id))?;
        Ok((actor, layer))
    }

    fn world_of(&self, id: ActorId) -> StageResult<Option<&PhysicsWorld>> {
        let actor = self.actor(id)?;
        Ok(self.layer(actor.layer())?.world.as_ref())
    }

    /// Runs `f` on the actor's fixture set, bound to its body if it has one.
    fn with_fixtures<R>(
        &mut self,
        id: ActorId,
        f: impl FnOnce(&mut FixtureSet, Option<&mut Binding<'_>>) -> StageResult<R>,
    ) -> StageResult<R> {
        let units = self.settings().units;
        let (actor, layer) = self.split(id)?;
        let attached = match (actor.state.body_type(), layer.world.as_mut()) {
            (Some(t), Some(world)) => world.body_handle(id).map(|h| (t, world, h)),
            _ => None,
        };
        match attached {
            Some((body_type, world, body)) => {
                let mut binding = Binding {
                    world,
                    body,
                    ctx: ResolveContext {
                        profile: &actor.profile,
                        body_type,
                        units,
                    },
                };
                f(&mut actor.fixtures, Some(&mut binding))
            }
            None => f(&mut actor.fixtures, None),
        }
    }

    // ------------------------------
    // Transitions
    // ------------------------------

    /// Moves the actor into `target`, creating, converting or destroying its
    /// body as needed.
    pub fn set_body_state(&mut self, id: ActorId, target: BodyState) -> StageResult<()> {
        let current = self.actor(id)?.state;
        if current == target {
            return Ok(());
        }
        match (current.body_type(), target.body_type()) {
            (None, Some(to)) => self.create_engine_body(id, to, Vec2::ZERO, 0.0)?,
            (Some(_), None) => {
                self.release_joints_of(id);
                self.destroy_body(id);
            }
            (Some(from), Some(to)) if needs_recreation(from, to) => {
                self.recreate_body(id, from, to)?
            }
            (Some(_), Some(to)) => self.convert_body(id, to)?,
            (None, None) => {}
        }
        log::debug!("actor {id}: {current} -> {target}");
        Ok(())
    }

    pub fn make_static(&mut self, id: ActorId) -> StageResult<()> {
        self.set_body_state(id, BodyState::Static)
    }

    pub fn make_dynamic(&mut self, id: ActorId) -> StageResult<()> {
        self.set_body_state(id, BodyState::Dynamic)
    }

    pub fn make_kinematic(&mut self, id: ActorId) -> StageResult<()> {
        self.set_body_state(id, BodyState::Kinematic)
    }

    pub fn make_sensor(&mut self, id: ActorId) -> StageResult<()> {
        self.set_body_state(id, BodyState::Sensor)
    }

    /// Drops the body; the actor stays in the scene as a visual only.
    pub fn make_visual(&mut self, id: ActorId) -> StageResult<()> {
        self.set_body_state(id, BodyState::None)
    }

    pub(crate) fn create_engine_body(
        &mut self,
        id: ActorId,
        body_type: BodyType,
        velocity: Vec2,
        angular_velocity: f32,
    ) -> StageResult<()> {
        let settings = self.world_settings();
        let (actor, layer) = self.split(id)?;
        let mut spec = body_spec(actor, body_type);
        spec.velocity = velocity;
        spec.angular_velocity = angular_velocity;

        let world = layer.world_or_create(settings);
        let body = world.create_body(id, &spec);
        let mut binding = Binding {
            world,
            body,
            ctx: ResolveContext {
                profile: &actor.profile,
                body_type,
                units: settings.units,
            },
        };
        if let Err(err) = actor.fixtures.rebuild_all(&mut binding) {
            binding.world.remove_body(id);
            actor.fixtures.detach_engine();
            return Err(StageError::Rebuild {
                actor: id,
                source: Box::new(err),
            });
        }
        actor.state = body_type.into();
        Ok(())
    }

    /// Removes the engine body without touching joint records.
    pub(crate) fn destroy_body(&mut self, id: ActorId) {
        let Ok((actor, layer)) = self.split(id) else {
            return;
        };
        if let Some(world) = layer.world.as_mut() {
            world.remove_body(id);
        }
        actor.fixtures.detach_engine();
        actor.state = BodyState::None;
    }

    fn convert_body(&mut self, id: ActorId, to: BodyType) -> StageResult<()> {
        let units = self.settings().units;
        let (actor, layer) = self.split(id)?;
        let Some(world) = layer.world.as_mut() else {
            return Err(StageError::argument(format!("actor {id} has no physics world")));
        };
        world.set_body_type(id, to);
        if let Some(body) = world.body_handle(id) {
            let mut binding = Binding {
                world,
                body,
                ctx: ResolveContext {
                    profile: &actor.profile,
                    body_type: to,
                    units,
                },
            };
            actor.fixtures.refresh_filters(&mut binding);
        }
        actor.state = to.into();
        Ok(())
    }

    fn recreate_body(&mut self, id: ActorId, from: BodyType, to: BodyType) -> StageResult<()> {
        let velocity = self.velocity(id)?;
        let angular = self.angular_velocity(id)?;
        self.detach_joints_of(id);
        {
            let (actor, layer) = self.split(id)?;
            if let Some(world) = layer.world.as_mut() {
                if let Some((position, rotation)) = world.position(id) {
                    actor.position = position;
                    actor.rotation = rotation;
                }
                world.remove_body(id);
            }
            actor.fixtures.detach_engine();
            actor.state = BodyState::None;
        }
        log::debug!("recreating body of actor {id} ({from} -> {to})");

        let result = self.create_engine_body(id, to, velocity, angular);
        if result.is_err() && self.create_engine_body(id, from, velocity, angular).is_err() {
            self.release_joints_of(id);
            return result;
        }
        self.rebind_joints_of(id);
        result
    }

    // ------------------------------
    // Position and motion
    // ------------------------------

    /// Lower-left corner of the actor, world units.
    pub fn position(&self, id: ActorId) -> StageResult<Vec2> {
        Ok(self.actor(id)?.position)
    }

    /// Teleports the actor. A sleeping body is woken.
    pub fn set_position(&mut self, id: ActorId, position: Vec2) -> StageResult<()> {
        if !position.is_finite() {
            return Err(StageError::argument(format!("position must be finite, got {position:?}")));
        }
        let (actor, layer) = self.split(id)?;
        actor.position = position;
        if let Some(world) = layer.world.as_mut() {
            world.set_position(id, position, actor.rotation);
        }
        Ok(())
    }

    pub fn move_by(&mut self, id: ActorId, delta: Vec2) -> StageResult<()> {
        let p = self.position(id)?;
        self.set_position(id, p + delta)
    }

    /// Rotation in degrees.
    pub fn rotation(&self, id: ActorId) -> StageResult<f32> {
        Ok(self.actor(id)?.rotation)
    }

    pub fn set_rotation(&mut self, id: ActorId, degrees: f32) -> StageResult<()> {
        if !degrees.is_finite() {
            return Err(StageError::argument(format!("rotation must be finite, got {degrees}")));
        }
        let (actor, layer) = self.split(id)?;
        actor.rotation = wrap_degrees(degrees);
        if let Some(world) = layer.world.as_mut() {
            world.set_position(id, actor.position, actor.rotation);
        }
        Ok(())
    }

    pub fn rotate_by(&mut self, id: ActorId, degrees: f32) -> StageResult<()> {
        let r = self.rotation(id)?;
        self.set_rotation(id, r + degrees)
    }

    /// Linear velocity in world units per second. Zero without a body.
    pub fn velocity(&self, id: ActorId) -> StageResult<Vec2> {
        Ok(self
            .world_of(id)?
            .and_then(|w| w.velocity(id))
            .unwrap_or(Vec2::ZERO))
    }

    pub fn set_velocity(&mut self, id: ActorId, velocity: Vec2) -> StageResult<()> {
        match self.motion_world(id, "set_velocity")? {
            Some(world) => world.set_velocity(id, velocity),
            None => log::warn!("set_velocity ignored: actor {id} has no body"),
        }
        Ok(())
    }

    /// Degrees per second, counter-clockwise positive.
    pub fn angular_velocity(&self, id: ActorId) -> StageResult<f32> {
        Ok(self
            .world_of(id)?
            .and_then(|w| w.angular_velocity(id))
            .unwrap_or(0.0))
    }

    pub fn set_angular_velocity(&mut self, id: ActorId, degrees_per_second: f32) -> StageResult<()> {
        match self.motion_world(id, "set_angular_velocity")? {
            Some(world) => world.set_angular_velocity(id, degrees_per_second),
            None => log::warn!("set_angular_velocity ignored: actor {id} has no body"),
        }
        Ok(())
    }

    /// Zeroes velocity, angular velocity and pending forces.
    pub fn reset_movement(&mut self, id: ActorId) -> StageResult<()> {
        let (_, layer) = self.split(id)?;
        if let Some(world) = layer.world.as_mut() {
            world.reset_movement(id);
        }
        Ok(())
    }

    /// The world of an actor whose velocity may be set directly.
    /// Static bodies cannot move.
    fn motion_world(
        &mut self,
        id: ActorId,
        operation: &'static str,
    ) -> StageResult<Option<&mut PhysicsWorld>> {
        let state = self.actor(id)?.state;
        match state {
            BodyState::None => Ok(None),
            BodyState::Static => Err(StageError::UnsupportedOperation {
                operation,
                actor: id,
                state: state.to_string(),
            }),
            _ => {
                let (_, layer) = self.split(id)?;
                Ok(layer.world.as_mut())
            }
        }
    }

    /// The world of an actor that accepts forces. Only dynamic bodies do.
    fn force_world(
        &mut self,
        id: ActorId,
        operation: &'static str,
    ) -> StageResult<Option<&mut PhysicsWorld>> {
        let state = self.actor(id)?.state;
        match state {
            BodyState::None => {
                log::warn!("{operation} ignored: actor {id} has no body");
                Ok(None)
            }
            BodyState::Dynamic => {
                let (_, layer) = self.split(id)?;
                Ok(layer.world.as_mut())
            }
            _ => Err(StageError::UnsupportedOperation {
                operation,
                actor: id,
                state: state.to_string(),
            }),
        }
    }

    /// Force in world units, applied at the center of mass until the end of the tick.
    pub fn apply_force(&mut self, id: ActorId, force: Vec2) -> StageResult<()> {
        if let Some(world) = self.force_world(id, "apply_force")? {
            world.apply_force(id, force);
        }
        Ok(())
    }

    /// Force applied at a world point.
    pub fn apply_force_at(&mut self, id: ActorId, force: Vec2, point: Vec2) -> StageResult<()> {
        if let Some(world) = self.force_world(id, "apply_force_at")? {
            world.apply_force_at(id, force, point);
        }
        Ok(())
    }

    pub fn apply_torque(&mut self, id: ActorId, torque: f32) -> StageResult<()> {
        if let Some(world) = self.force_world(id, "apply_torque")? {
            world.apply_torque(id, torque);
        }
        Ok(())
    }

    pub fn apply_impulse(&mut self, id: ActorId, impulse: Vec2) -> StageResult<()> {
        if let Some(world) = self.force_world(id, "apply_impulse")? {
            world.apply_impulse(id, impulse);
        }
        Ok(())
    }

    pub fn apply_angular_impulse(&mut self, id: ActorId, impulse: f32) -> StageResult<()> {
        if let Some(world) = self.force_world(id, "apply_angular_impulse")? {
            world.apply_angular_impulse(id, impulse);
        }
        Ok(())
    }

    // ------------------------------
    // Sleep
    // ------------------------------

    pub fn sleep(&mut self, id: ActorId) -> StageResult<()> {
        let (_, layer) = self.split(id)?;
        if let Some(world) = layer.world.as_mut() {
            world.sleep(id);
        }
        Ok(())
    }

    pub fn awake(&mut self, id: ActorId) -> StageResult<()> {
        let (_, layer) = self.split(id)?;
        if let Some(world) = layer.world.as_mut() {
            world.wake_actor(id);
        }
        Ok(())
    }

    /// False for actors without a body.
    pub fn is_sleeping(&self, id: ActorId) -> StageResult<bool> {
        Ok(self
            .world_of(id)?
            .and_then(|w| w.is_sleeping(id))
            .unwrap_or(false))
    }

    // ------------------------------
    // Queries
    // ------------------------------

    /// True if a static actor lies directly below this one. Only defined for
    /// dynamic bodies.
    pub fn is_grounded(&self, id: ActorId) -> StageResult<bool> {
        let state = self.actor(id)?.state;
        if state != BodyState::Dynamic {
            return Err(StageError::UnsupportedOperation {
                operation: "is_grounded",
                actor: id,
                state: state.to_string(),
            });
        }
        Ok(self.world_of(id)?.is_some_and(|w| w.is_grounded(id)))
    }

    /// Point test against the actor's fixtures. Actors without a body are
    /// tested against their visual bounds.
    pub fn contains_point(&self, id: ActorId, point: Vec2) -> StageResult<bool> {
        let actor = self.actor(id)?;
        if actor.state == BodyState::None {
            return Ok(actor.bounds().contains(point));
        }
        Ok(self.world_of(id)?.is_some_and(|w| w.contains_point(id, point)))
    }

    /// True if the fixtures of the two actors intersect. Actors in different
    /// layers or without a body never overlap.
    pub fn overlaps(&self, a: ActorId, b: ActorId) -> StageResult<bool> {
        let (actor_a, actor_b) = (self.actor(a)?, self.actor(b)?);
        if a == b || actor_a.layer() != actor_b.layer() {
            return Ok(false);
        }
        Ok(self.world_of(a)?.is_some_and(|w| w.overlaps(a, b)))
    }

    // ------------------------------
    // Body properties
    // ------------------------------

    pub fn set_gravity_scale(&mut self, id: ActorId, scale: f32) -> StageResult<()> {
        let (actor, layer) = self.split(id)?;
        actor.profile.gravity_scale = scale;
        if let Some(world) = layer.world.as_mut() {
            world.set_gravity_scale(id, scale);
        }
        Ok(())
    }

    pub fn set_damping(&mut self, id: ActorId, linear: f32, angular: f32) -> StageResult<()> {
        if linear < 0.0 || angular < 0.0 {
            return Err(StageError::argument("damping must be >= 0"));
        }
        let (actor, layer) = self.split(id)?;
        actor.profile.linear_damping = linear;
        actor.profile.angular_damping = angular;
        if let Some(world) = layer.world.as_mut() {
            world.set_damping(id, linear, angular);
        }
        Ok(())
    }

    pub fn set_rotation_locked(&mut self, id: ActorId, locked: bool) -> StageResult<()> {
        let (actor, layer) = self.split(id)?;
        actor.profile.rotation_locked = locked;
        if let Some(world) = layer.world.as_mut() {
            world.lock_rotations(id, locked);
        }
        Ok(())
    }

    /// Mass in kilograms. Zero for actors without a dynamic body.
    pub fn mass(&self, id: ActorId) -> StageResult<f32> {
        Ok(self
            .world_of(id)?
            .and_then(|w| w.mass(id))
            .unwrap_or(0.0))
    }

    /// World position of a point in the actor's local frame.
    pub fn local_to_world(&self, id: ActorId, local: Vec2) -> StageResult<Vec2> {
        if let Some(p) = self.world_of(id)?.and_then(|w| w.local_to_world(id, local)) {
            return Ok(p);
        }
        let actor = self.actor(id)?;
        Ok(actor.position + local.rotated(actor.rotation))
    }

    pub fn world_to_local(&self, id: ActorId, world: Vec2) -> StageResult<Vec2> {
        if let Some(p) = self.world_of(id)?.and_then(|w| w.world_to_local(id, world)) {
            return Ok(p);
        }
        let actor = self.actor(id)?;
        Ok((world - actor.position).rotated(-actor.rotation))
    }

    // ------------------------------
    // Materials and fixtures
    // ------------------------------

    /// Changes one profile value and rebuilds the fixtures. The profile is
    /// restored if the rebuild fails.
    fn update_profile(
        &mut self,
        id: ActorId,
        edit: impl FnOnce(&mut crate::fixture::PhysicsProfile),
    ) -> StageResult<()> {
        let previous = self.actor(id)?.profile.clone();
        edit(&mut self.actor_mut(id)?.profile);
        let result = self.with_fixtures(id, |fixtures, binding| match binding {
            Some(b) => fixtures.rebuild_all(b),
            None => Ok(()),
        });
        if let Err(err) = result {
            self.actor_mut(id)?.profile = previous;
            return Err(StageError::Rebuild {
                actor: id,
                source: Box::new(err),
            });
        }
        Ok(())
    }

    pub fn set_density(&mut self, id: ActorId, density: f32) -> StageResult<()> {
        if !density.is_finite() || density < 0.0 {
            return Err(StageError::argument(format!("density must be >= 0, got {density}")));
        }
        self.update_profile(id, |p| p.density = Some(density))
    }

    pub fn set_friction(&mut self, id: ActorId, friction: f32) -> StageResult<()> {
        if !friction.is_finite() || friction < 0.0 {
            return Err(StageError::argument(format!("friction must be >= 0, got {friction}")));
        }
        self.update_profile(id, |p| p.friction = Some(friction))
    }

    pub fn set_restitution(&mut self, id: ActorId, restitution: f32) -> StageResult<()> {
        if !restitution.is_finite() || restitution < 0.0 {
            return Err(StageError::argument(format!(
                "restitution must be >= 0, got {restitution}"
            )));
        }
        self.update_profile(id, |p| p.restitution = Some(restitution))
    }

    /// Adds a user fixture. Its collider exists immediately if the actor has a body.
    pub fn attach_fixture(&mut self, id: ActorId, spec: FixtureSpec) -> StageResult<FixtureId> {
        self.with_fixtures(id, |fixtures, binding| fixtures.attach(spec, binding))
    }

    /// Returns false if the actor has no such fixture.
    pub fn detach_fixture(&mut self, id: ActorId, fixture: FixtureId) -> StageResult<bool> {
        self.with_fixtures(id, |fixtures, binding| {
            Ok(fixtures.detach(fixture, binding).is_some())
        })
    }

    /// Replaces every fixture, derived ones included. Atomic.
    pub fn set_fixtures(&mut self, id: ActorId, specs: Vec<FixtureSpec>) -> StageResult<()> {
        self.with_fixtures(id, |fixtures, binding| fixtures.replace_all(specs, binding))
            .map_err(|err| StageError::Rebuild {
                actor: id,
                source: Box::new(err),
            })
    }

    /// Replaces the visual shape and regenerates the derived fixtures.
    /// On failure the old shape and fixtures stay in place.
    fn reshape(&mut self, id: ActorId, shape: ActorShape) -> StageResult<()> {
        let derived = shape.fixture_shape();
        derived.validate()?;
        let actor = self.actor_mut(id)?;
        let previous = std::mem::replace(&mut actor.shape, shape);
        // Actors whose fixtures were all replaced by the user keep them.
        if !actor.fixtures.has_derived() {
            log::debug!("actor {id} resized; custom fixtures left unchanged");
            return Ok(());
        }
        let result = self.with_fixtures(id, |fixtures, binding| {
            fixtures.replace_derived(vec![FixtureSpec::new(derived)], binding)
        });
        if let Err(err) = result {
            self.actor_mut(id)?.shape = previous;
            return Err(StageError::Rebuild {
                actor: id,
                source: Box::new(err),
            });
        }
        Ok(())
    }

    /// Resizes a rectangle actor (images and text included).
    pub fn set_size(&mut self, id: ActorId, width: f32, height: f32) -> StageResult<()> {
        if !matches!(self.actor(id)?.shape, ActorShape::Rectangle { .. }) {
            return Err(StageError::argument(format!("actor {id} is not a rectangle")));
        }
        self.reshape(id, ActorShape::Rectangle { width, height })
    }

    pub fn set_radius(&mut self, id: ActorId, radius: f32) -> StageResult<()> {
        if !matches!(self.actor(id)?.shape, ActorShape::Circle { .. }) {
            return Err(StageError::argument(format!("actor {id} is not a circle")));
        }
        self.reshape(
            id,
            ActorShape::Circle {
                diameter: radius * 2.0,
            },
        )
    }

    pub fn set_points(&mut self, id: ActorId, points: Vec<Vec2>) -> StageResult<()> {
        if !matches!(self.actor(id)?.shape, ActorShape::Polygon { .. }) {
            return Err(StageError::argument(format!("actor {id} is not a polygon")));
        }
        self.reshape(id, ActorShape::Polygon { points })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorDesc;
    use crate::units::ShapeDesc;

    fn ball(scene: &mut Scene) -> ActorId {
        scene.add_actor(ActorDesc::circle(1.0)).unwrap()
    }

    #[test]
    fn state_and_body_stay_in_lockstep() {
        let mut scene = Scene::new();
        let id = ball(&mut scene);
        let layer = scene.main_layer();
        let sequence = [
            BodyState::Dynamic,
            BodyState::Static,
            BodyState::Sensor,
            BodyState::Kinematic,
            BodyState::None,
            BodyState::Sensor,
            BodyState::Dynamic,
        ];
        for state in sequence {
            scene.set_body_state(id, state).unwrap();
            let actor = scene.actor(id).unwrap();
            assert_eq!(actor.state(), state);
            let expected = usize::from(state != BodyState::None);
            assert_eq!(scene.layer(layer).unwrap().body_count(), expected);
            assert_eq!(actor.fixtures().is_attached(), state != BodyState::None);
        }
    }

    #[test]
    fn forces_depend_on_body_state() {
        let mut scene = Scene::new();
        let id = ball(&mut scene);
        assert!(scene.apply_force(id, Vec2::new(1.0, 0.0)).is_ok());

        scene.make_static(id).unwrap();
        assert!(matches!(
            scene.apply_impulse(id, Vec2::new(1.0, 0.0)),
            Err(StageError::UnsupportedOperation { .. })
        ));
        assert!(matches!(
            scene.apply_torque(id, 1.0),
            Err(StageError::UnsupportedOperation { .. })
        ));

        scene.make_dynamic(id).unwrap();
        scene.apply_impulse(id, Vec2::new(2.0, 0.0)).unwrap();
        assert!(scene.velocity(id).unwrap().x > 0.0);
    }

    #[test]
    fn sensor_round_trip_keeps_velocity() {
        let mut scene = Scene::new();
        let id = ball(&mut scene);
        scene.make_kinematic(id).unwrap();
        scene.set_velocity(id, Vec2::new(0.0, 3.0)).unwrap();
        scene.make_sensor(id).unwrap();
        assert!(scene.velocity(id).unwrap().abs_diff_eq(Vec2::new(0.0, 3.0), 1e-5));
        scene.make_kinematic(id).unwrap();
        assert!(scene.velocity(id).unwrap().abs_diff_eq(Vec2::new(0.0, 3.0), 1e-5));
    }

    #[test]
    fn failed_resize_keeps_previous_shape() {
        let mut scene = Scene::new();
        let id = scene.add_actor(ActorDesc::rectangle(2.0, 1.0)).unwrap();
        scene.make_dynamic(id).unwrap();
        let mass = scene.mass(id).unwrap();
        assert!(mass > 0.0);

        assert!(scene.set_size(id, -1.0, 1.0).is_err());
        assert_eq!(
            scene.actor(id).unwrap().shape(),
            &ActorShape::Rectangle {
                width: 2.0,
                height: 1.0
            }
        );
        assert!((scene.mass(id).unwrap() - mass).abs() < 1e-4);

        scene.set_size(id, 4.0, 1.0).unwrap();
        assert!((scene.mass(id).unwrap() - 2.0 * mass).abs() < 1e-3);
        assert!(scene.set_radius(id, 1.0).is_err());
    }

    #[test]
    fn custom_fixtures_survive_resize() {
        let mut scene = Scene::new();
        let id = scene.add_actor(ActorDesc::circle(1.0)).unwrap();
        scene.make_dynamic(id).unwrap();
        let extra = scene
            .attach_fixture(
                id,
                FixtureSpec::new(ShapeDesc::rectangle(Vec2::new(1.0, 0.0), 0.5, 0.5)),
            )
            .unwrap();
        scene.set_radius(id, 2.0).unwrap();
        let fixtures = scene.actor(id).unwrap().fixtures();
        assert_eq!(fixtures.len(), 2);
        assert!(fixtures.get(extra).is_some());
        assert!(scene.detach_fixture(id, extra).unwrap());
        assert!(!scene.detach_fixture(id, extra).unwrap());
    }

    #[test]
    fn resize_keeps_fully_custom_fixtures() {
        let mut scene = Scene::new();
        let id = scene.add_actor(ActorDesc::rectangle(2.0, 1.0)).unwrap();
        scene.make_dynamic(id).unwrap();
        let wheel = FixtureSpec::new(ShapeDesc::circle(Vec2::new(1.0, 0.5), 0.5));
        scene.set_fixtures(id, vec![wheel.clone()]).unwrap();

        scene.set_size(id, 4.0, 2.0).unwrap();
        let actor = scene.actor(id).unwrap();
        assert_eq!(
            actor.shape(),
            &ActorShape::Rectangle {
                width: 4.0,
                height: 2.0
            }
        );
        let specs: Vec<_> = actor.fixtures().specs().map(|(_, s)| s.clone()).collect();
        assert_eq!(specs, vec![wheel]);
    }

    #[test]
    fn grounded_is_only_defined_for_dynamic_bodies() {
        let mut scene = Scene::new();
        let floor = scene
            .add_actor(ActorDesc::rectangle(10.0, 1.0).at(-5.0, -1.0))
            .unwrap();
        scene.make_static(floor).unwrap();
        let crate_id = scene.add_actor(ActorDesc::rectangle(1.0, 1.0)).unwrap();
        assert!(matches!(
            scene.is_grounded(crate_id),
            Err(StageError::UnsupportedOperation { .. })
        ));

        scene.make_dynamic(crate_id).unwrap();
        assert!(scene.is_grounded(crate_id).unwrap());
        scene.set_position(crate_id, Vec2::new(0.0, 2.0)).unwrap();
        assert!(!scene.is_grounded(crate_id).unwrap());
        assert!(matches!(
            scene.is_grounded(floor),
            Err(StageError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn point_and_overlap_queries() {
        let mut scene = Scene::new();
        let a = scene.add_actor(ActorDesc::circle(2.0)).unwrap();
        let b = scene
            .add_actor(ActorDesc::rectangle(1.0, 1.0).at(1.5, 0.5))
            .unwrap();

        // Without bodies only the visual bounds count and nothing overlaps.
        assert!(scene.contains_point(a, Vec2::new(1.9, 1.9)).unwrap());
        assert!(!scene.overlaps(a, b).unwrap());

        scene.make_dynamic(a).unwrap();
        scene.make_static(b).unwrap();
        assert!(scene.contains_point(a, Vec2::new(1.0, 1.0)).unwrap());
        // Inside the bounding box but outside the circle.
        assert!(!scene.contains_point(a, Vec2::new(1.9, 1.9)).unwrap());
        assert!(scene.overlaps(a, b).unwrap());
        assert!(!scene.overlaps(a, a).unwrap());

        scene.set_position(b, Vec2::new(6.0, 0.0)).unwrap();
        assert!(!scene.overlaps(a, b).unwrap());
    }

    #[test]
    fn positioning_wakes_a_sleeping_body() {
        let mut scene = Scene::new();
        let id = ball(&mut scene);
        scene.make_dynamic(id).unwrap();
        scene.sleep(id).unwrap();
        assert!(scene.is_sleeping(id).unwrap());
        scene.set_position(id, Vec2::new(3.0, 4.0)).unwrap();
        assert!(!scene.is_sleeping(id).unwrap());
        assert_eq!(scene.position(id).unwrap(), Vec2::new(3.0, 4.0));
    }
}
