//! Joints between pairs of actors.
//!
//! A joint record outlives its engine joint: when a body is recreated the
//! engine joint is rebuilt from the frame captured at creation time. Limits
//! and motor settings are kept on the record and applied whenever the engine
//! joint is (re)built, so they can be set before the joint is attached.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::actor::ActorId;
use crate::error::{StageError, StageResult};
use crate::layer::LayerId;
use crate::math::Vec2;
use crate::physics::PhysicsWorld;
use crate::scene::Scene;
use crate::units::UnitScale;

// Rapier is private implementation detail: do NOT re-export it.
use rapier2d::prelude::*;

/// Damping factor of velocity motors.
const MOTOR_FACTOR: f32 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JointId(u32);

impl JointId {
    pub fn to_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for JointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Joint geometry. Anchors are in the local frame of their actor, relative
/// to the actor position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum JointKind {
    /// Rigid pin around one anchor on `a`.
    Revolute { anchor: Vec2 },
    /// Rigid rod keeping the current anchor distance.
    Distance { anchor_a: Vec2, anchor_b: Vec2 },
    /// Elastic connection.
    Spring {
        anchor_a: Vec2,
        anchor_b: Vec2,
        rest_length: f32,
        stiffness: f32,
        damping: f32,
    },
    /// Sliding along an axis through the anchor, angle in degrees in the
    /// local frame of `a`.
    Prismatic { anchor: Vec2, axis_angle: f32 },
    /// Anchors may move closer than `max_length` but never further apart.
    Rope {
        anchor_a: Vec2,
        anchor_b: Vec2,
        max_length: f32,
    },
    /// Locks relative position and rotation, pulling the anchors together.
    Weld { anchor_a: Vec2, anchor_b: Vec2 },
}

impl JointKind {
    fn name(&self) -> &'static str {
        match self {
            JointKind::Revolute { .. } => "revolute",
            JointKind::Distance { .. } => "distance",
            JointKind::Spring { .. } => "spring",
            JointKind::Prismatic { .. } => "prismatic",
            JointKind::Rope { .. } => "rope",
            JointKind::Weld { .. } => "weld",
        }
    }

    fn validate(&self) -> Result<(), String> {
        let finite = |v: Vec2| v.is_finite();
        let ok = match *self {
            JointKind::Revolute { anchor } => finite(anchor),
            JointKind::Distance { anchor_a, anchor_b } | JointKind::Weld { anchor_a, anchor_b } => {
                finite(anchor_a) && finite(anchor_b)
            }
            JointKind::Spring {
                anchor_a,
                anchor_b,
                rest_length,
                stiffness,
                damping,
            } => {
                finite(anchor_a)
                    && finite(anchor_b)
                    && rest_length >= 0.0
                    && stiffness >= 0.0
                    && damping >= 0.0
            }
            JointKind::Prismatic { anchor, axis_angle } => finite(anchor) && axis_angle.is_finite(),
            JointKind::Rope {
                anchor_a,
                anchor_b,
                max_length,
            } => finite(anchor_a) && finite(anchor_b) && max_length.is_finite() && max_length > 0.0,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("invalid {} joint parameters", self.name()))
        }
    }
}

/// Limits and motor of revolute and prismatic joints. Revolute values are
/// degrees and newton-meters, prismatic values meters and newtons.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JointParams {
    pub lower_limit: Option<f32>,
    pub upper_limit: Option<f32>,
    pub limit_enabled: bool,
    pub motor_speed: Option<f32>,
    pub max_motor_force: Option<f32>,
    pub motor_enabled: bool,
}

impl JointParams {
    fn validate(&self) -> StageResult<()> {
        if let (Some(lo), Some(hi)) = (self.lower_limit, self.upper_limit) {
            if lo > hi {
                return Err(StageError::argument(format!(
                    "lower limit {lo} is above upper limit {hi}"
                )));
            }
        }
        if self.max_motor_force.is_some_and(|f| f < 0.0) {
            return Err(StageError::argument("max motor force must be >= 0"));
        }
        Ok(())
    }
}

/// Everything needed to create a joint. Setting a limit or motor value also
/// enables it.
#[derive(Clone, Debug, PartialEq)]
pub struct JointSpec {
    pub kind: JointKind,
    pub params: JointParams,
    /// Whether the two joined bodies still collide with each other.
    pub collide_connected: bool,
}

impl JointSpec {
    pub fn new(kind: JointKind) -> Self {
        Self {
            kind,
            params: JointParams::default(),
            collide_connected: false,
        }
    }

    pub fn revolute(anchor: Vec2) -> Self {
        Self::new(JointKind::Revolute { anchor })
    }

    pub fn distance(anchor_a: Vec2, anchor_b: Vec2) -> Self {
        Self::new(JointKind::Distance { anchor_a, anchor_b })
    }

    pub fn spring(anchor_a: Vec2, anchor_b: Vec2, rest_length: f32, stiffness: f32, damping: f32) -> Self {
        Self::new(JointKind::Spring {
            anchor_a,
            anchor_b,
            rest_length,
            stiffness,
            damping,
        })
    }

    pub fn prismatic(anchor: Vec2, axis_angle: f32) -> Self {
        Self::new(JointKind::Prismatic { anchor, axis_angle })
    }

    pub fn rope(anchor_a: Vec2, anchor_b: Vec2, max_length: f32) -> Self {
        Self::new(JointKind::Rope {
            anchor_a,
            anchor_b,
            max_length,
        })
    }

    pub fn weld(anchor_a: Vec2, anchor_b: Vec2) -> Self {
        Self::new(JointKind::Weld { anchor_a, anchor_b })
    }

    #[must_use]
    pub fn with_lower_limit(mut self, lower: f32) -> Self {
        self.params.lower_limit = Some(lower);
        self.params.limit_enabled = true;
        self
    }

    #[must_use]
    pub fn with_upper_limit(mut self, upper: f32) -> Self {
        self.params.upper_limit = Some(upper);
        self.params.limit_enabled = true;
        self
    }

    #[must_use]
    pub fn with_motor_speed(mut self, speed: f32) -> Self {
        self.params.motor_speed = Some(speed);
        self.params.motor_enabled = true;
        self
    }

    #[must_use]
    pub fn with_max_motor_force(mut self, force: f32) -> Self {
        self.params.max_motor_force = Some(force);
        self.params.motor_enabled = true;
        self
    }

    #[must_use]
    pub fn with_collide_connected(mut self, collide: bool) -> Self {
        self.collide_connected = collide;
        self
    }
}

/// Local anchor geometry captured at creation, world units and degrees.
#[derive(Clone, Copy, Debug)]
struct JointFrame {
    local_a: Vec2,
    local_b: Vec2,
    /// Unit axis in the local frame of `a`. Prismatic only.
    axis: Vec2,
    /// Rotation of `a` minus rotation of `b` at creation.
    reference_angle: f32,
    /// Rope maximum or rod length.
    length: f32,
}

impl JointFrame {
    fn capture(kind: &JointKind, world: &PhysicsWorld, a: ActorId, b: ActorId) -> Option<Self> {
        let (_, rot_a) = world.position(a)?;
        let (_, rot_b) = world.position(b)?;
        let pinned = |anchor: Vec2| -> Option<(Vec2, Vec2)> {
            let w = world.local_to_world(a, anchor)?;
            Some((anchor, world.world_to_local(b, w)?))
        };
        let (local_a, local_b, axis, length) = match *kind {
            JointKind::Revolute { anchor } => {
                let (la, lb) = pinned(anchor)?;
                (la, lb, Vec2::ZERO, 0.0)
            }
            JointKind::Prismatic { anchor, axis_angle } => {
                let (la, lb) = pinned(anchor)?;
                (la, lb, Vec2::from_degrees(axis_angle), 0.0)
            }
            JointKind::Distance { anchor_a, anchor_b } => {
                let wa = world.local_to_world(a, anchor_a)?;
                let wb = world.local_to_world(b, anchor_b)?;
                (anchor_a, anchor_b, Vec2::ZERO, wa.distance(wb))
            }
            JointKind::Spring {
                anchor_a,
                anchor_b,
                rest_length,
                ..
            } => (anchor_a, anchor_b, Vec2::ZERO, rest_length),
            JointKind::Rope {
                anchor_a,
                anchor_b,
                max_length,
            } => (anchor_a, anchor_b, Vec2::ZERO, max_length),
            JointKind::Weld { anchor_a, anchor_b } => (anchor_a, anchor_b, Vec2::ZERO, 0.0),
        };
        Some(Self {
            local_a,
            local_b,
            axis,
            reference_angle: rot_a - rot_b,
            length,
        })
    }
}

pub type ReleaseListener = Box<dyn FnOnce(&mut Scene, JointId) -> anyhow::Result<()>>;

struct JointRecord {
    layer: LayerId,
    a: ActorId,
    b: ActorId,
    kind: JointKind,
    params: JointParams,
    collide_connected: bool,
    frame: JointFrame,
    engine: Option<ImpulseJointHandle>,
    release_listeners: Vec<ReleaseListener>,
}

impl JointRecord {
    fn involves(&self, actor: ActorId) -> bool {
        self.a == actor || self.b == actor
    }

    /// Engine joint plus the distance bound projected after every sub-step.
    fn engine_joint(&self, units: UnitScale) -> (GenericJoint, Option<(Vec2, Vec2, f32, f32)>) {
        let f = &self.frame;
        let p = &self.params;
        let la = units.point_to_engine(f.local_a);
        let lb = units.point_to_engine(f.local_b);
        let reference = units.angle_to_engine(f.reference_angle);

        let (mut joint, limit): (GenericJoint, _) = match &self.kind {
            JointKind::Revolute { .. } => {
                let mut builder = RevoluteJointBuilder::new();
                if p.limit_enabled {
                    builder = builder.limits([
                        units.angle_to_engine(p.lower_limit.unwrap_or(f32::MIN)),
                        units.angle_to_engine(p.upper_limit.unwrap_or(f32::MAX)),
                    ]);
                }
                if p.motor_enabled {
                    builder = builder
                        .motor_velocity(units.angle_to_engine(p.motor_speed.unwrap_or(0.0)), MOTOR_FACTOR);
                    if let Some(torque) = p.max_motor_force {
                        builder = builder.motor_max_force(units.torque_to_engine(torque));
                    }
                }
                let mut joint: GenericJoint = builder.build().into();
                joint.set_local_frame1(Isometry::new(la.coords, 0.0));
                joint.set_local_frame2(Isometry::new(lb.coords, reference));
                (joint, None)
            }
            JointKind::Prismatic { .. } => {
                let axis = rapier2d::na::Unit::new_normalize(vector![f.axis.x, f.axis.y]);
                let mut builder = PrismaticJointBuilder::new(axis);
                if p.limit_enabled {
                    builder = builder.limits([
                        units.length_to_engine(p.lower_limit.unwrap_or(f32::MIN)),
                        units.length_to_engine(p.upper_limit.unwrap_or(f32::MAX)),
                    ]);
                }
                if p.motor_enabled {
                    builder = builder
                        .motor_velocity(units.length_to_engine(p.motor_speed.unwrap_or(0.0)), MOTOR_FACTOR);
                    if let Some(force) = p.max_motor_force {
                        builder = builder.motor_max_force(units.force_to_engine(Vec2::new(force, 0.0)).x);
                    }
                }
                let axis_angle = f.axis.y.atan2(f.axis.x);
                let mut joint: GenericJoint = builder.build().into();
                joint.set_local_frame1(Isometry::new(la.coords, axis_angle));
                joint.set_local_frame2(Isometry::new(lb.coords, axis_angle + reference));
                (joint, None)
            }
            JointKind::Weld { .. } => {
                let mut joint: GenericJoint = FixedJointBuilder::new().build().into();
                joint.set_local_frame1(Isometry::new(la.coords, 0.0));
                joint.set_local_frame2(Isometry::new(lb.coords, reference));
                (joint, None)
            }
            JointKind::Spring {
                stiffness, damping, ..
            } => {
                let joint = SpringJointBuilder::new(units.length_to_engine(f.length), *stiffness, *damping)
                    .local_anchor1(la)
                    .local_anchor2(lb)
                    .build()
                    .into();
                (joint, None)
            }
            JointKind::Rope { .. } => {
                let joint = RopeJointBuilder::new(units.length_to_engine(f.length))
                    .local_anchor1(la)
                    .local_anchor2(lb)
                    .build()
                    .into();
                (joint, Some((f.local_a, f.local_b, 0.0, f.length)))
            }
            JointKind::Distance { .. } => {
                let joint = RopeJointBuilder::new(units.length_to_engine(f.length))
                    .local_anchor1(la)
                    .local_anchor2(lb)
                    .build()
                    .into();
                (joint, Some((f.local_a, f.local_b, f.length, f.length)))
            }
        };
        joint.set_contacts_enabled(self.collide_connected);
        (joint, limit)
    }
}

/// Live joints only. A record is dropped once its joint is released and the
/// listeners have run; ids below `next_id` without a record are released.
#[derive(Default)]
pub(crate) struct JointTable {
    records: BTreeMap<JointId, JointRecord>,
    next_id: u32,
}

impl JointTable {
    fn live_of(&self, actor: ActorId) -> Vec<JointId> {
        self.records
            .iter()
            .filter(|(_, r)| r.involves(actor))
            .map(|(id, _)| *id)
            .collect()
    }

    fn was_issued(&self, id: JointId) -> bool {
        id.0 < self.next_id
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl Scene {
    fn joint_record(&self, id: JointId) -> StageResult<&JointRecord> {
        self.joints.records.get(&id).ok_or(StageError::UnknownJoint(id))
    }

    fn joint_record_mut(&mut self, id: JointId) -> StageResult<&mut JointRecord> {
        self.joints
            .records
            .get_mut(&id)
            .ok_or(StageError::UnknownJoint(id))
    }

    /// Joins two actors. Both need a body and must live in the same layer.
    pub fn create_joint(&mut self, a: ActorId, b: ActorId, spec: JointSpec) -> StageResult<JointId> {
        let fail = |reason: &str| StageError::JointCreation {
            a,
            b,
            reason: reason.to_string(),
        };
        if a == b {
            return Err(fail("an actor cannot be joined to itself"));
        }
        let (actor_a, actor_b) = (self.actor(a)?, self.actor(b)?);
        if !actor_a.has_body() || !actor_b.has_body() {
            return Err(fail("both actors need a physics body"));
        }
        if actor_a.layer() != actor_b.layer() {
            return Err(fail("the actors are in different layers"));
        }
        let layer = actor_a.layer();
        spec.kind.validate().map_err(|reason| fail(&reason))?;
        spec.params.validate()?;

        let frame = self
            .layer(layer)?
            .world
            .as_ref()
            .and_then(|world| JointFrame::capture(&spec.kind, world, a, b))
            .ok_or_else(|| fail("missing engine body"))?;

        let id = JointId(self.joints.next_id);
        self.joints.records.insert(
            id,
            JointRecord {
                layer,
                a,
                b,
                kind: spec.kind,
                params: spec.params,
                collide_connected: spec.collide_connected,
                frame,
                engine: None,
                release_listeners: Vec::new(),
            },
        );
        if !self.attach_joint(id) {
            self.joints.records.remove(&id);
            return Err(fail("the engine rejected the joint"));
        }
        self.joints.next_id += 1;
        log::debug!("created joint {id} between actors {a} and {b}");
        Ok(id)
    }

    /// Builds the engine joint of a record. Returns false if a body is missing.
    fn attach_joint(&mut self, id: JointId) -> bool {
        let units = self.settings().units;
        let Some(record) = self.joints.records.get_mut(&id) else {
            return false;
        };
        let Some(world) = self
            .layers
            .iter_mut()
            .find(|l| l.id() == record.layer)
            .and_then(|l| l.world.as_mut())
        else {
            return false;
        };
        if let Some(old) = record.engine.take() {
            world.remove_joint(old);
        }
        let (joint, limit) = record.engine_joint(units);
        record.engine = world.insert_joint(record.a, record.b, joint, limit);
        if record.engine.is_some() {
            world.wake_actor(record.a);
            world.wake_actor(record.b);
        }
        record.engine.is_some()
    }

    fn detach_joint(&mut self, id: JointId) {
        let Some(record) = self.joints.records.get_mut(&id) else {
            return;
        };
        let Some(handle) = record.engine.take() else {
            return;
        };
        if let Some(world) = self
            .layers
            .iter_mut()
            .find(|l| l.id() == record.layer)
            .and_then(|l| l.world.as_mut())
        {
            world.remove_joint(handle);
        }
    }

    /// Detaches the joint from the engine and notifies its release listeners
    /// once. Releasing again is a no-op.
    pub fn release_joint(&mut self, id: JointId) -> StageResult<()> {
        if self.is_released(id)? {
            return Ok(());
        }
        self.detach_joint(id);
        let Some(record) = self.joints.records.remove(&id) else {
            return Err(StageError::UnknownJoint(id));
        };
        let listeners = record.release_listeners;
        log::debug!("released joint {id}");
        for listener in listeners {
            if let Err(err) = listener(self, id) {
                log::error!("release listener of joint {id} failed: {err:#}");
            }
        }
        Ok(())
    }

    /// Registers a one-shot release notification. Ignored for joints that
    /// were already released.
    pub fn add_release_listener<F>(&mut self, id: JointId, listener: F) -> StageResult<()>
    where
        F: FnOnce(&mut Scene, JointId) -> anyhow::Result<()> + 'static,
    {
        if self.is_released(id)? {
            return Ok(());
        }
        self.joint_record_mut(id)?
            .release_listeners
            .push(Box::new(listener));
        Ok(())
    }

    pub fn is_released(&self, id: JointId) -> StageResult<bool> {
        if self.joints.records.contains_key(&id) {
            Ok(false)
        } else if self.joints.was_issued(id) {
            Ok(true)
        } else {
            Err(StageError::UnknownJoint(id))
        }
    }

    pub fn joint_kind(&self, id: JointId) -> StageResult<&JointKind> {
        Ok(&self.joint_record(id)?.kind)
    }

    pub fn joint_actors(&self, id: JointId) -> StageResult<(ActorId, ActorId)> {
        let r = self.joint_record(id)?;
        Ok((r.a, r.b))
    }

    pub fn joint_params(&self, id: JointId) -> StageResult<JointParams> {
        Ok(self.joint_record(id)?.params)
    }

    /// Unreleased joints attached to an actor.
    pub fn joints_of(&self, actor: ActorId) -> Vec<JointId> {
        self.joints.live_of(actor)
    }

    /// Changes limits or motor settings. The engine joint is rebuilt if attached.
    pub fn update_joint_params(
        &mut self,
        id: JointId,
        edit: impl FnOnce(&mut JointParams),
    ) -> StageResult<()> {
        let record = self.joint_record_mut(id)?;
        let mut params = record.params;
        edit(&mut params);
        params.validate()?;
        record.params = params;
        if record.engine.is_some() {
            self.attach_joint(id);
        }
        Ok(())
    }

    pub fn set_joint_limits(&mut self, id: JointId, lower: f32, upper: f32) -> StageResult<()> {
        self.update_joint_params(id, |p| {
            p.lower_limit = Some(lower);
            p.upper_limit = Some(upper);
            p.limit_enabled = true;
        })
    }

    pub fn set_lower_limit(&mut self, id: JointId, lower: f32) -> StageResult<()> {
        self.update_joint_params(id, |p| {
            p.lower_limit = Some(lower);
            p.limit_enabled = true;
        })
    }

    pub fn set_upper_limit(&mut self, id: JointId, upper: f32) -> StageResult<()> {
        self.update_joint_params(id, |p| {
            p.upper_limit = Some(upper);
            p.limit_enabled = true;
        })
    }

    pub fn enable_limit(&mut self, id: JointId, enabled: bool) -> StageResult<()> {
        self.update_joint_params(id, |p| p.limit_enabled = enabled)
    }

    pub fn set_motor_speed(&mut self, id: JointId, speed: f32) -> StageResult<()> {
        self.update_joint_params(id, |p| {
            p.motor_speed = Some(speed);
            p.motor_enabled = true;
        })
    }

    pub fn set_max_motor_force(&mut self, id: JointId, force: f32) -> StageResult<()> {
        self.update_joint_params(id, |p| {
            p.max_motor_force = Some(force);
            p.motor_enabled = true;
        })
    }

    pub fn enable_motor(&mut self, id: JointId, enabled: bool) -> StageResult<()> {
        self.update_joint_params(id, |p| p.motor_enabled = enabled)
    }

    /// Maximum length of a rope joint.
    pub fn rope_length(&self, id: JointId) -> StageResult<f32> {
        let r = self.joint_record(id)?;
        match r.kind {
            JointKind::Rope { .. } => Ok(r.frame.length),
            _ => Err(StageError::argument(format!("joint {id} is not a rope"))),
        }
    }

    pub fn set_rope_length(&mut self, id: JointId, length: f32) -> StageResult<()> {
        if !length.is_finite() || length <= 0.0 {
            return Err(StageError::argument(format!(
                "rope length must be positive, got {length}"
            )));
        }
        let record = self.joint_record_mut(id)?;
        let JointKind::Rope { max_length, .. } = &mut record.kind else {
            return Err(StageError::argument(format!("joint {id} is not a rope")));
        };
        *max_length = length;
        record.frame.length = length;
        if record.engine.is_some() {
            self.attach_joint(id);
        }
        Ok(())
    }

    /// World positions of both anchors.
    pub fn joint_anchors(&self, id: JointId) -> StageResult<(Vec2, Vec2)> {
        let r = self.joint_record(id)?;
        Ok((
            self.local_to_world(r.a, r.frame.local_a)?,
            self.local_to_world(r.b, r.frame.local_b)?,
        ))
    }

    /// Current displacement of a prismatic joint along its axis.
    pub fn prismatic_translation(&self, id: JointId) -> StageResult<f32> {
        let r = self.joint_record(id)?;
        if !matches!(r.kind, JointKind::Prismatic { .. }) {
            return Err(StageError::argument(format!("joint {id} is not prismatic")));
        }
        let (wa, wb) = self.joint_anchors(id)?;
        let axis = r.frame.axis.rotated(self.rotation(r.a)?);
        Ok((wb - wa).dot(axis))
    }

    /// Releases every joint attached to an actor, with notifications.
    pub(crate) fn release_joints_of(&mut self, actor: ActorId) {
        for id in self.joints.live_of(actor) {
            if let Err(err) = self.release_joint(id) {
                log::warn!("could not release joint {id}: {err}");
            }
        }
    }

    /// Removes the engine joints of an actor whose body is about to be
    /// recreated. Records stay live.
    pub(crate) fn detach_joints_of(&mut self, actor: ActorId) {
        for id in self.joints.live_of(actor) {
            self.detach_joint(id);
        }
    }

    /// Rebuilds detached joints of an actor; joints that cannot be rebuilt
    /// are released.
    pub(crate) fn rebind_joints_of(&mut self, actor: ActorId) {
        for id in self.joints.live_of(actor) {
            let detached = self
                .joints
                .records
                .get(&id)
                .is_some_and(|r| r.engine.is_none());
            if detached && !self.attach_joint(id) {
                log::debug!("joint {id} lost a body and is released");
                if let Err(err) = self.release_joint(id) {
                    log::warn!("could not release joint {id}: {err}");
                }
            }
        }
    }

    /// Releases joints whose engine joint or actors have gone away.
    pub(crate) fn sweep_joints(&mut self) {
        let stale: Vec<JointId> = self
            .joints
            .records
            .iter()
            .filter(|(_, r)| {
                let alive = self.contains_actor(r.a) && self.contains_actor(r.b);
                let attached = r.engine.is_some_and(|h| {
                    self.layer(r.layer)
                        .ok()
                        .and_then(|l| l.world.as_ref())
                        .is_some_and(|w| w.has_joint(h))
                });
                !alive || !attached
            })
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if let Err(err) = self.release_joint(id) {
                log::warn!("could not release joint {id}: {err}");
            }
        }
    }
}
