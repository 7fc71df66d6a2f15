// stage2d/src/physics.rs
use std::collections::HashMap;

use crate::actor::ActorId;
use crate::body::BodyType;
use crate::collision::{ContactTracker, ContactTransition};
use crate::math::Vec2;
use crate::units::UnitScale;

// Rapier is private implementation detail: do NOT re-export it.
use rapier2d::parry::query::{intersection_test, PointQuery};
use rapier2d::parry::shape::{Cuboid, Shape};
use rapier2d::prelude::*;

/// Default fixed sub-step of every world, in seconds.
pub const DEFAULT_STEP: f32 = 0.008;
pub const DEFAULT_MAX_SUBSTEPS: u32 = 32;

/// Height of the strip below a body searched for ground, in world units.
pub const GROUND_TOLERANCE: f32 = 0.01;

/// Raw begin/end notification as reported by the engine, engine units.
#[derive(Clone, Debug)]
pub(crate) struct ContactRecord {
    pub collider1: ColliderHandle,
    pub collider2: ColliderHandle,
    pub started: bool,
    pub sensor: bool,
    /// Points from collider1 toward collider2.
    pub normal: Vector<Real>,
    pub points: Vec<Point<Real>>,
}

/// Forwards engine collision events over a channel, keeping the contact
/// geometry the default collector throws away.
struct ContactCollector {
    sender: crossbeam_channel::Sender<ContactRecord>,
}

impl EventHandler for ContactCollector {
    fn handle_collision_event(
        &self,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        event: CollisionEvent,
        contact_pair: Option<&ContactPair>,
    ) {
        let collider1 = event.collider1();
        let collider2 = event.collider2();
        let mut normal = vector![0.0, 0.0];
        let mut points = Vec::new();
        if let (true, Some(pair)) = (event.started(), contact_pair) {
            let flip = pair.collider1 != collider1;
            if let Some(manifold) = pair.manifolds.iter().find(|m| !m.data.solver_contacts.is_empty()) {
                normal = if flip {
                    -manifold.data.normal
                } else {
                    manifold.data.normal
                };
                points.extend(manifold.data.solver_contacts.iter().map(|c| c.point));
            }
        }
        // A closed channel only means the world is being dropped.
        let _ = self.sender.send(ContactRecord {
            collider1,
            collider2,
            started: event.started(),
            sensor: event.sensor(),
            normal,
            points,
        });
    }

    fn handle_contact_force_event(
        &self,
        _dt: Real,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: Real,
    ) {
    }
}

/// Parameters for a new engine body, world units.
#[derive(Clone, Debug)]
pub(crate) struct BodySpec {
    pub body_type: BodyType,
    pub position: Vec2,
    pub rotation: f32,
    pub velocity: Vec2,
    pub angular_velocity: f32,
    pub gravity_scale: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub rotation_locked: bool,
}

impl BodySpec {
    pub fn new(body_type: BodyType) -> Self {
        Self {
            body_type,
            position: Vec2::ZERO,
            rotation: 0.0,
            velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            gravity_scale: 1.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            rotation_locked: false,
        }
    }
}

pub(crate) fn engine_body_type(body_type: BodyType) -> RigidBodyType {
    match body_type {
        BodyType::Static => RigidBodyType::Fixed,
        BodyType::Dynamic => RigidBodyType::Dynamic,
        BodyType::Kinematic | BodyType::Sensor => RigidBodyType::KinematicVelocityBased,
    }
}

/// Two anchor points whose distance is kept in `[min, max]` after each sub-step.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DistanceLimit {
    pub body1: RigidBodyHandle,
    pub body2: RigidBodyHandle,
    pub anchor1: Point<Real>,
    pub anchor2: Point<Real>,
    pub min: Real,
    pub max: Real,
}

/// One layer's rigid-body world: the engine sets plus the actor <-> body mapping.
pub(crate) struct PhysicsWorld {
    // --- rapier internals ---
    pipeline: PhysicsPipeline,
    integration_parameters: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    rigid_bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,

    event_recv: crossbeam_channel::Receiver<ContactRecord>,
    event_handler: ContactCollector,

    // --- mappings (stage <-> rapier) ---
    actor_to_body: HashMap<ActorId, RigidBodyHandle>,
    body_to_actor: HashMap<RigidBodyHandle, ActorId>,
    distance_limits: HashMap<ImpulseJointHandle, DistanceLimit>,

    contacts: ContactTracker,
    transitions: Vec<ContactTransition>,

    units: UnitScale,
    gravity: Vec2,
    step_size: f32,
    max_substeps: u32,
    accumulator: f32,
    fault: Option<String>,
}

impl PhysicsWorld {
    pub fn new(gravity: Vec2, units: UnitScale) -> Self {
        let (sender, event_recv) = crossbeam_channel::unbounded();
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = DEFAULT_STEP;

        Self {
            pipeline: PhysicsPipeline::new(),
            integration_parameters,
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            rigid_bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),

            event_recv,
            event_handler: ContactCollector { sender },

            actor_to_body: HashMap::new(),
            body_to_actor: HashMap::new(),
            distance_limits: HashMap::new(),

            contacts: ContactTracker::default(),
            transitions: Vec::new(),

            units,
            gravity,
            step_size: DEFAULT_STEP,
            max_substeps: DEFAULT_MAX_SUBSTEPS,
            accumulator: 0.0,
            fault: None,
        }
    }

    pub fn set_timing(&mut self, step_size: f32, max_substeps: u32) {
        self.step_size = step_size;
        self.max_substeps = max_substeps.max(1);
        self.integration_parameters.dt = step_size;
    }

    pub fn set_gravity(&mut self, gravity: Vec2) {
        self.gravity = gravity;
    }

    pub fn gravity(&self) -> Vec2 {
        self.gravity
    }

    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    pub fn body_count(&self) -> usize {
        self.rigid_bodies.len()
    }

    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }

    pub fn joint_count(&self) -> usize {
        self.impulse_joints.len()
    }

    // ------------------------------
    // Bodies
    // ------------------------------

    /// Create a body for an actor, replacing any previous one.
    pub fn create_body(&mut self, actor: ActorId, spec: &BodySpec) -> RigidBodyHandle {
        self.remove_body(actor);

        let u = self.units;
        let body = RigidBodyBuilder::new(engine_body_type(spec.body_type))
            .translation(u.vector_to_engine(spec.position))
            .rotation(u.angle_to_engine(spec.rotation))
            .linvel(u.vector_to_engine(spec.velocity))
            .angvel(u.angle_to_engine(spec.angular_velocity))
            .gravity_scale(spec.gravity_scale)
            .linear_damping(spec.linear_damping)
            .angular_damping(spec.angular_damping)
            .locked_axes(if spec.rotation_locked {
                LockedAxes::ROTATION_LOCKED
            } else {
                LockedAxes::empty()
            })
            .ccd_enabled(matches!(spec.body_type, BodyType::Dynamic))
            .user_data(actor.to_u32() as u128)
            .build();

        let handle = self.rigid_bodies.insert(body);
        self.actor_to_body.insert(actor, handle);
        self.body_to_actor.insert(handle, actor);
        log::debug!("created {:?} body for actor {actor}", spec.body_type);
        handle
    }

    /// Remove an actor's body with its colliders and attached joints.
    pub fn remove_body(&mut self, actor: ActorId) -> bool {
        let Some(handle) = self.actor_to_body.remove(&actor) else {
            return false;
        };
        self.body_to_actor.remove(&handle);
        if let Some(body) = self.rigid_bodies.get(handle) {
            let attached: Vec<ColliderHandle> = body.colliders().to_vec();
            for collider in attached {
                self.end_contacts_of(collider);
            }
        }
        self.distance_limits
            .retain(|_, l| l.body1 != handle && l.body2 != handle);
        self.rigid_bodies.remove(
            handle,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
        true
    }

    pub fn body_handle(&self, actor: ActorId) -> Option<RigidBodyHandle> {
        self.actor_to_body.get(&actor).copied()
    }

    pub fn has_body(&self, actor: ActorId) -> bool {
        self.actor_to_body.contains_key(&actor)
    }

    fn body(&self, actor: ActorId) -> Option<&RigidBody> {
        let h = *self.actor_to_body.get(&actor)?;
        self.rigid_bodies.get(h)
    }

    fn body_mut(&mut self, actor: ActorId) -> Option<&mut RigidBody> {
        let h = *self.actor_to_body.get(&actor)?;
        self.rigid_bodies.get_mut(h)
    }

    pub fn set_body_type(&mut self, actor: ActorId, body_type: BodyType) {
        if let Some(b) = self.body_mut(actor) {
            b.set_body_type(engine_body_type(body_type), true);
            b.enable_ccd(matches!(body_type, BodyType::Dynamic));
        }
    }

    pub fn position(&self, actor: ActorId) -> Option<(Vec2, f32)> {
        let b = self.body(actor)?;
        Some((
            self.units.vector_to_world(b.translation()),
            self.units.angle_to_world(b.rotation().angle()),
        ))
    }

    /// Teleports the body. Always wakes it.
    pub fn set_position(&mut self, actor: ActorId, position: Vec2, rotation: f32) {
        let u = self.units;
        if let Some(b) = self.body_mut(actor) {
            b.set_position(
                Isometry::new(u.vector_to_engine(position), u.angle_to_engine(rotation)),
                true,
            );
            b.wake_up(true);
        }
    }

    pub fn velocity(&self, actor: ActorId) -> Option<Vec2> {
        self.body(actor).map(|b| self.units.vector_to_world(b.linvel()))
    }

    pub fn set_velocity(&mut self, actor: ActorId, velocity: Vec2) {
        let v = self.units.vector_to_engine(velocity);
        if let Some(b) = self.body_mut(actor) {
            b.set_linvel(v, true);
        }
    }

    /// Angular velocity in degrees per second.
    pub fn angular_velocity(&self, actor: ActorId) -> Option<f32> {
        self.body(actor).map(|b| self.units.angle_to_world(b.angvel()))
    }

    pub fn set_angular_velocity(&mut self, actor: ActorId, degrees_per_second: f32) {
        let w = self.units.angle_to_engine(degrees_per_second);
        if let Some(b) = self.body_mut(actor) {
            b.set_angvel(w, true);
        }
    }

    pub fn apply_force(&mut self, actor: ActorId, force: Vec2) {
        let f = self.units.force_to_engine(force);
        if let Some(b) = self.body_mut(actor) {
            b.add_force(f, true);
        }
    }

    pub fn apply_force_at(&mut self, actor: ActorId, force: Vec2, point: Vec2) {
        let f = self.units.force_to_engine(force);
        let p = self.units.point_to_engine(point);
        if let Some(b) = self.body_mut(actor) {
            b.add_force_at_point(f, p, true);
        }
    }

    pub fn apply_torque(&mut self, actor: ActorId, torque: f32) {
        let t = self.units.torque_to_engine(torque);
        if let Some(b) = self.body_mut(actor) {
            b.add_torque(t, true);
        }
    }

    pub fn apply_impulse(&mut self, actor: ActorId, impulse: Vec2) {
        let i = self.units.force_to_engine(impulse);
        if let Some(b) = self.body_mut(actor) {
            b.apply_impulse(i, true);
        }
    }

    pub fn apply_angular_impulse(&mut self, actor: ActorId, impulse: f32) {
        let i = self.units.torque_to_engine(impulse);
        if let Some(b) = self.body_mut(actor) {
            b.apply_torque_impulse(i, true);
        }
    }

    pub fn reset_movement(&mut self, actor: ActorId) {
        if let Some(b) = self.body_mut(actor) {
            b.set_linvel(vector![0.0, 0.0], false);
            b.set_angvel(0.0, false);
            b.reset_forces(false);
            b.reset_torques(false);
        }
    }

    pub fn set_gravity_scale(&mut self, actor: ActorId, scale: f32) {
        if let Some(b) = self.body_mut(actor) {
            b.set_gravity_scale(scale, true);
        }
    }

    pub fn set_damping(&mut self, actor: ActorId, linear: f32, angular: f32) {
        if let Some(b) = self.body_mut(actor) {
            b.set_linear_damping(linear);
            b.set_angular_damping(angular);
        }
    }

    pub fn lock_rotations(&mut self, actor: ActorId, locked: bool) {
        if let Some(b) = self.body_mut(actor) {
            b.lock_rotations(locked, true);
        }
    }

    pub fn mass(&self, actor: ActorId) -> Option<f32> {
        self.body(actor).map(|b| b.mass())
    }

    pub fn sleep(&mut self, actor: ActorId) {
        if let Some(b) = self.body_mut(actor) {
            b.sleep();
        }
    }

    pub fn wake_actor(&mut self, actor: ActorId) {
        if let Some(b) = self.body_mut(actor) {
            b.wake_up(true);
        }
    }

    pub fn wake(&mut self, body: RigidBodyHandle) {
        if let Some(b) = self.rigid_bodies.get_mut(body) {
            b.wake_up(true);
        }
    }

    pub fn is_sleeping(&self, actor: ActorId) -> Option<bool> {
        self.body(actor).map(|b| b.is_sleeping())
    }

    /// World position of a point given in the actor's local frame.
    pub fn local_to_world(&self, actor: ActorId, local: Vec2) -> Option<Vec2> {
        let b = self.body(actor)?;
        let p = b.position() * self.units.point_to_engine(local);
        Some(self.units.point_to_world(&p))
    }

    /// Local-frame coordinates of a world point.
    pub fn world_to_local(&self, actor: ActorId, world: Vec2) -> Option<Vec2> {
        let b = self.body(actor)?;
        let p = b
            .position()
            .inverse_transform_point(&self.units.point_to_engine(world));
        Some(self.units.point_to_world(&p))
    }

    // ------------------------------
    // Colliders
    // ------------------------------

    pub fn insert_collider(&mut self, body: RigidBodyHandle, collider: Collider) -> ColliderHandle {
        let handle = self
            .colliders
            .insert_with_parent(collider, body, &mut self.rigid_bodies);
        self.refresh_mass(body);
        handle
    }

    pub fn remove_collider(&mut self, handle: ColliderHandle) {
        self.end_contacts_of(handle);
        let parent = self.colliders.get(handle).and_then(|c| c.parent());
        self.colliders
            .remove(handle, &mut self.island_manager, &mut self.rigid_bodies, true);
        if let Some(body) = parent {
            self.refresh_mass(body);
        }
    }

    /// Mass is otherwise only recomputed on the next step.
    fn refresh_mass(&mut self, body: RigidBodyHandle) {
        if let Some(b) = self.rigid_bodies.get_mut(body) {
            b.recompute_mass_properties_from_colliders(&self.colliders);
        }
    }

    pub fn set_collider_groups(&mut self, handle: ColliderHandle, groups: InteractionGroups) {
        if let Some(c) = self.colliders.get_mut(handle) {
            c.set_collision_groups(groups);
        }
    }

    fn end_contacts_of(&mut self, collider: ColliderHandle) {
        for (a, b) in self.contacts.purge_collider(collider) {
            self.transitions.push(ContactTransition::ended(a, b));
        }
    }

    pub fn touching(&self, a: ActorId, b: ActorId) -> bool {
        self.contacts.touching(a, b)
    }

    /// Actors currently in contact with `actor`, sorted by id.
    pub fn touching_actors(&self, actor: ActorId) -> Vec<ActorId> {
        self.contacts.partners(actor)
    }

    // ------------------------------
    // Queries
    // ------------------------------

    /// World pose of a collider. Follows the parent body directly, so a
    /// teleport is visible before the next step syncs the collider.
    fn collider_pose(&self, collider: &Collider) -> Isometry<Real> {
        let parent = collider.parent().and_then(|h| self.rigid_bodies.get(h));
        match (parent, collider.position_wrt_parent()) {
            (Some(body), Some(local)) => body.position() * local,
            _ => *collider.position(),
        }
    }

    fn colliders_of(&self, actor: ActorId) -> Vec<&Collider> {
        let Some(body) = self.body(actor) else {
            return Vec::new();
        };
        body.colliders()
            .iter()
            .filter_map(|h| self.colliders.get(*h))
            .collect()
    }

    /// True if the world point lies inside one of the actor's colliders.
    pub fn contains_point(&self, actor: ActorId, point: Vec2) -> bool {
        let p = self.units.point_to_engine(point);
        self.colliders_of(actor)
            .into_iter()
            .any(|c| c.shape().contains_point(&self.collider_pose(c), &p))
    }

    /// True if any collider of `a` intersects any collider of `b`.
    pub fn overlaps(&self, a: ActorId, b: ActorId) -> bool {
        let others: Vec<(Isometry<Real>, &Collider)> = self
            .colliders_of(b)
            .into_iter()
            .map(|c| (self.collider_pose(c), c))
            .collect();
        self.colliders_of(a).into_iter().any(|c1| {
            let pos1 = self.collider_pose(c1);
            others.iter().any(|(pos2, c2)| {
                intersection_test(&pos1, c1.shape(), pos2, c2.shape()).unwrap_or(false)
            })
        })
    }

    /// True if a static collider touches the thin strip along the bottom
    /// edge of the actor's bounding box. Sensors never count as ground.
    pub fn is_grounded(&self, actor: ActorId) -> bool {
        let Some(own) = self.body_handle(actor) else {
            return false;
        };
        let mut bounds: Option<(Point<Real>, Point<Real>)> = None;
        for c in self.colliders_of(actor) {
            let aabb = c.shape().compute_aabb(&self.collider_pose(c));
            bounds = Some(match bounds {
                Some((mins, maxs)) => (mins.inf(&aabb.mins), maxs.sup(&aabb.maxs)),
                None => (aabb.mins, aabb.maxs),
            });
        }
        let Some((mins, maxs)) = bounds else {
            return false;
        };

        let tolerance = self.units.length_to_engine(GROUND_TOLERANCE);
        // Narrower than the body so walls touching its sides do not count.
        let half_width = (maxs.x - mins.x) * 0.45;
        let footing = Cuboid::new(vector![half_width, tolerance]);
        let footing_pos = Isometry::translation((mins.x + maxs.x) * 0.5, mins.y);

        self.colliders.iter().any(|(_, c)| {
            let Some(parent) = c.parent() else {
                return false;
            };
            if parent == own || c.is_sensor() {
                return false;
            }
            self.rigid_bodies.get(parent).is_some_and(|b| b.is_fixed())
                && intersection_test(&footing_pos, &footing, &self.collider_pose(c), c.shape())
                    .unwrap_or(false)
        })
    }

    // ------------------------------
    // Joints
    // ------------------------------

    pub fn insert_joint(
        &mut self,
        a: ActorId,
        b: ActorId,
        joint: GenericJoint,
        limit: Option<(Vec2, Vec2, f32, f32)>,
    ) -> Option<ImpulseJointHandle> {
        let body1 = self.body_handle(a)?;
        let body2 = self.body_handle(b)?;
        let handle = self.impulse_joints.insert(body1, body2, joint, true);
        if let Some((anchor1, anchor2, min, max)) = limit {
            self.distance_limits.insert(
                handle,
                DistanceLimit {
                    body1,
                    body2,
                    anchor1: self.units.point_to_engine(anchor1),
                    anchor2: self.units.point_to_engine(anchor2),
                    min: self.units.length_to_engine(min),
                    max: self.units.length_to_engine(max),
                },
            );
        }
        Some(handle)
    }

    pub fn remove_joint(&mut self, handle: ImpulseJointHandle) {
        self.distance_limits.remove(&handle);
        self.impulse_joints.remove(handle, true);
    }

    pub fn has_joint(&self, handle: ImpulseJointHandle) -> bool {
        self.impulse_joints.get(handle).is_some()
    }

    // ------------------------------
    // Stepping
    // ------------------------------

    /// Advances the world by `dt` seconds in fixed sub-steps. Returns the number
    /// of sub-steps taken, or the fault reason if the world is unusable.
    pub fn advance(&mut self, dt: f32) -> Result<u32, String> {
        if let Some(reason) = &self.fault {
            return Err(reason.clone());
        }
        self.accumulator += dt.max(0.0);
        let mut steps = 0;
        while self.accumulator >= self.step_size && steps < self.max_substeps {
            self.step_once();
            self.accumulator -= self.step_size;
            steps += 1;
            if let Some(reason) = self.check_integrity() {
                log::error!("physics world faulted: {reason}");
                self.fault = Some(reason.clone());
                return Err(reason);
            }
        }
        if steps == self.max_substeps {
            // Drop the backlog instead of spiralling.
            self.accumulator = self.accumulator.min(self.step_size);
        }
        if steps > 0 {
            for (_, b) in self.rigid_bodies.iter_mut() {
                b.reset_forces(false);
                b.reset_torques(false);
            }
        }
        Ok(steps)
    }

    fn step_once(&mut self) {
        let gravity = self.units.vector_to_engine(self.gravity);
        self.pipeline.step(
            &gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &self.event_handler,
        );
        self.project_distance_limits();
        self.collect_events();
    }

    /// Position-level correction for rope and distance joints, split by
    /// inverse mass, followed by removal of the separating velocity.
    fn project_distance_limits(&mut self) {
        for limit in self.distance_limits.values() {
            let (Some(b1), Some(b2)) = (
                self.rigid_bodies.get(limit.body1),
                self.rigid_bodies.get(limit.body2),
            ) else {
                continue;
            };
            let p1 = b1.position() * limit.anchor1;
            let p2 = b2.position() * limit.anchor2;
            let delta = p2 - p1;
            let len = delta.norm();
            if len <= f32::EPSILON {
                continue;
            }
            let target = len.clamp(limit.min, limit.max);
            if (target - len).abs() <= f32::EPSILON {
                continue;
            }
            let n = delta / len;
            let w1 = inverse_mass(b1);
            let w2 = inverse_mass(b2);
            let total = w1 + w2;
            if total <= 0.0 {
                continue;
            }
            let err = len - target;
            // Relative velocity along the axis, positive when moving apart.
            let rel = (b2.linvel() - b1.linvel()).dot(&n);
            let stretching = err > 0.0;
            let v_fix = if (stretching && rel > 0.0) || (!stretching && rel < 0.0) {
                rel
            } else {
                0.0
            };

            if let Some(b1) = self.rigid_bodies.get_mut(limit.body1) {
                if w1 > 0.0 {
                    let t = b1.translation() + n * (err * w1 / total);
                    b1.set_translation(t, true);
                    let v = b1.linvel() + n * (v_fix * w1 / total);
                    b1.set_linvel(v, true);
                }
            }
            if let Some(b2) = self.rigid_bodies.get_mut(limit.body2) {
                if w2 > 0.0 {
                    let t = b2.translation() - n * (err * w2 / total);
                    b2.set_translation(t, true);
                    let v = b2.linvel() - n * (v_fix * w2 / total);
                    b2.set_linvel(v, true);
                }
            }
        }
    }

    fn check_integrity(&self) -> Option<String> {
        for (handle, b) in self.rigid_bodies.iter() {
            let finite = b.translation().iter().all(|v| v.is_finite())
                && b.linvel().iter().all(|v| v.is_finite())
                && b.angvel().is_finite()
                && b.rotation().angle().is_finite();
            if !finite {
                let owner = self
                    .body_to_actor
                    .get(&handle)
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "?".to_string());
                return Some(format!("non-finite state on body of actor {owner}"));
            }
        }
        None
    }

    fn collect_events(&mut self) {
        while let Ok(record) = self.event_recv.try_recv() {
            if record.started {
                let (Some(a), Some(b)) = (
                    self.collider_owner(record.collider1),
                    self.collider_owner(record.collider2),
                ) else {
                    continue;
                };
                if a == b {
                    continue;
                }
                if self.contacts.begin(record.collider1, record.collider2, a, b) {
                    let u = self.units;
                    self.transitions.push(ContactTransition {
                        a,
                        b,
                        began: true,
                        sensor: record.sensor,
                        normal: u.vector_to_world(&record.normal).normalized(),
                        points: record.points.iter().map(|p| u.point_to_world(p)).collect(),
                    });
                }
            } else if let Some((a, b)) = self.contacts.end(record.collider1, record.collider2) {
                self.transitions.push(ContactTransition::ended(a, b));
            }
        }
    }

    fn collider_owner(&self, collider: ColliderHandle) -> Option<ActorId> {
        let parent = self.colliders.get(collider)?.parent()?;
        self.body_to_actor.get(&parent).copied()
    }

    pub fn drain_transitions(&mut self) -> Vec<ContactTransition> {
        std::mem::take(&mut self.transitions)
    }

    /// Actors whose bodies currently exist, with world transforms.
    pub fn body_transforms(&self) -> impl Iterator<Item = (ActorId, Vec2, f32)> + '_ {
        self.actor_to_body.iter().filter_map(|(actor, handle)| {
            let b = self.rigid_bodies.get(*handle)?;
            Some((
                *actor,
                self.units.vector_to_world(b.translation()),
                self.units.angle_to_world(b.rotation().angle()),
            ))
        })
    }
}

fn inverse_mass(body: &RigidBody) -> f32 {
    if !body.is_dynamic() {
        return 0.0;
    }
    let m = body.mass();
    if m > 0.0 {
        1.0 / m
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::ShapeDesc;

    fn ball(world: &mut PhysicsWorld, actor: u32, body_type: BodyType, pos: Vec2) -> RigidBodyHandle {
        let mut spec = BodySpec::new(body_type);
        spec.position = pos;
        let h = world.create_body(ActorId::from_u32(actor), &spec);
        let shape = world
            .units
            .to_engine_shape(&ShapeDesc::circle(Vec2::ZERO, 0.5))
            .unwrap();
        let collider = ColliderBuilder::new(shape.shape)
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .build();
        world.insert_collider(h, collider);
        h
    }

    #[test]
    fn rope_limit_is_projected() {
        let mut world = PhysicsWorld::new(Vec2::ZERO, UnitScale::default());
        ball(&mut world, 1, BodyType::Dynamic, Vec2::ZERO);
        ball(&mut world, 2, BodyType::Dynamic, Vec2::new(2.0, 0.0));
        let (a, b) = (ActorId::from_u32(1), ActorId::from_u32(2));
        let joint: GenericJoint = RopeJointBuilder::new(2.0).build().into();
        world
            .insert_joint(a, b, joint, Some((Vec2::ZERO, Vec2::ZERO, 0.0, 2.0)))
            .unwrap();

        world.set_position(a, Vec2::new(-4.0, 0.0), 0.0);
        world.advance(0.016).unwrap();
        let (pa, _) = world.position(a).unwrap();
        let (pb, _) = world.position(b).unwrap();
        assert!(pa.distance(pb) <= 2.0 + 1e-3);
    }

    #[test]
    fn accumulator_runs_fixed_substeps() {
        let mut world = PhysicsWorld::new(Vec2::ZERO, UnitScale::default());
        world.set_timing(0.01, 8);
        assert_eq!(world.advance(0.025), Ok(2));
        assert_eq!(world.advance(0.006), Ok(1));
        // Backlog beyond max_substeps is dropped.
        assert_eq!(world.advance(1.0), Ok(8));
        assert!(world.accumulator <= 0.01);
    }

    #[test]
    fn overlapping_bodies_report_one_begin_per_pair() {
        let mut world = PhysicsWorld::new(Vec2::ZERO, UnitScale::default());
        ball(&mut world, 1, BodyType::Dynamic, Vec2::ZERO);
        ball(&mut world, 2, BodyType::Dynamic, Vec2::new(0.5, 0.0));
        world.advance(0.016).unwrap();
        let began: Vec<_> = world
            .drain_transitions()
            .into_iter()
            .filter(|t| t.began)
            .collect();
        assert_eq!(began.len(), 1);
        assert!(world.touching(ActorId::from_u32(1), ActorId::from_u32(2)));
    }

    #[test]
    fn removing_a_body_ends_its_contacts() {
        let mut world = PhysicsWorld::new(Vec2::ZERO, UnitScale::default());
        ball(&mut world, 1, BodyType::Static, Vec2::ZERO);
        ball(&mut world, 2, BodyType::Dynamic, Vec2::new(0.5, 0.0));
        world.advance(0.016).unwrap();
        world.drain_transitions();

        assert!(world.remove_body(ActorId::from_u32(2)));
        let ended = world.drain_transitions();
        assert_eq!(ended.len(), 1);
        assert!(!ended[0].began);
        world.advance(0.016).unwrap();
        assert!(world.drain_transitions().is_empty());
        assert_eq!(world.body_count(), 1);
    }

    fn unit_box(world: &mut PhysicsWorld, actor: u32, body_type: BodyType, pos: Vec2) {
        let mut spec = BodySpec::new(body_type);
        spec.position = pos;
        let h = world.create_body(ActorId::from_u32(actor), &spec);
        let shape = world
            .units
            .to_engine_shape(&ShapeDesc::rectangle(Vec2::ZERO, 1.0, 1.0))
            .unwrap();
        let collider = ColliderBuilder::new(shape.shape)
            .translation(shape.offset)
            .build();
        world.insert_collider(h, collider);
    }

    #[test]
    fn point_and_overlap_queries_follow_a_teleport() {
        let mut world = PhysicsWorld::new(Vec2::ZERO, UnitScale::default());
        unit_box(&mut world, 1, BodyType::Dynamic, Vec2::ZERO);
        unit_box(&mut world, 2, BodyType::Static, Vec2::new(5.0, 0.0));
        let (a, b) = (ActorId::from_u32(1), ActorId::from_u32(2));

        assert!(world.contains_point(a, Vec2::new(0.5, 0.5)));
        assert!(!world.contains_point(a, Vec2::new(1.5, 0.5)));
        assert!(!world.overlaps(a, b));

        world.set_position(a, Vec2::new(4.5, 0.0), 0.0);
        assert!(world.contains_point(a, Vec2::new(5.2, 0.5)));
        assert!(world.overlaps(a, b));
        assert!(world.overlaps(b, a));
    }

    #[test]
    fn grounded_needs_a_static_body_right_below() {
        let mut world = PhysicsWorld::new(Vec2::ZERO, UnitScale::default());
        unit_box(&mut world, 1, BodyType::Static, Vec2::new(0.0, -1.0));
        unit_box(&mut world, 2, BodyType::Dynamic, Vec2::ZERO);
        unit_box(&mut world, 3, BodyType::Dynamic, Vec2::new(0.0, 3.0));
        unit_box(&mut world, 4, BodyType::Dynamic, Vec2::new(0.0, 1.0));

        assert!(world.is_grounded(ActorId::from_u32(2)));
        assert!(!world.is_grounded(ActorId::from_u32(3)));
        // Standing on a dynamic body is not standing on the ground.
        assert!(!world.is_grounded(ActorId::from_u32(4)));
    }

    #[test]
    fn faulted_world_is_never_stepped_again() {
        let mut world = PhysicsWorld::new(Vec2::ZERO, UnitScale::default());
        ball(&mut world, 1, BodyType::Dynamic, Vec2::ZERO);
        assert!(world.check_integrity().is_none());

        world.set_velocity(ActorId::from_u32(1), Vec2::new(f32::NAN, 0.0));
        let reason = world.check_integrity().unwrap();
        assert!(reason.contains("actor 1"));

        world.fault = Some(reason);
        assert!(world.advance(0.016).is_err());
    }
}
