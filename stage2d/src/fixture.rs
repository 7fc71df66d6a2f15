//! Fixtures: shape + material attachments of a body.
//!
//! A [`FixtureSet`] keeps the world-space specs of one actor and, while the
//! actor has a body, the engine colliders built from them. Rebuilds are
//! all-or-nothing: every spec is resolved into a collider before any attached
//! collider is touched.

use serde::{Deserialize, Serialize};

use crate::body::BodyType;
use crate::error::StageResult;
use crate::physics::PhysicsWorld;
use crate::units::{ShapeDesc, UnitScale};

// Rapier is private implementation detail: do NOT re-export it.
use rapier2d::prelude::*;

pub const DEFAULT_DENSITY: f32 = 10.0;
pub const DEFAULT_FRICTION: f32 = 0.0;
pub const DEFAULT_RESTITUTION: f32 = 0.5;

/// Collision category bits assigned per body type.
pub const CATEGORY_SENSOR: u32 = 1;
pub const CATEGORY_STATIC: u32 = 2;
pub const CATEGORY_KINEMATIC: u32 = 4;
pub const CATEGORY_DYNAMIC: u32 = 8;
pub const DEFAULT_MASK: u32 = 0xFFFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionFilter {
    pub category: u32,
    pub mask: u32,
}

impl CollisionFilter {
    pub fn new(category: u32, mask: u32) -> Self {
        Self { category, mask }
    }

    /// Category/mask used for fixtures without an explicit filter.
    pub fn for_body_type(body_type: BodyType) -> Self {
        let category = match body_type {
            BodyType::Sensor => CATEGORY_SENSOR,
            BodyType::Static => CATEGORY_STATIC,
            BodyType::Kinematic => CATEGORY_KINEMATIC,
            BodyType::Dynamic => CATEGORY_DYNAMIC,
        };
        Self::new(category, DEFAULT_MASK)
    }

    fn to_groups(self) -> InteractionGroups {
        InteractionGroups::new(
            Group::from_bits_truncate(self.category),
            Group::from_bits_truncate(self.mask),
        )
    }
}

/// Physics defaults of an actor. Fixture values left unset fall back to these,
/// and unset values here fall back to the engine defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsProfile {
    /// Body type applied when the actor is added to a layer. `None` keeps the
    /// actor purely visual.
    pub body_type: Option<BodyType>,
    pub density: Option<f32>,
    pub friction: Option<f32>,
    pub restitution: Option<f32>,
    pub gravity_scale: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub rotation_locked: bool,
}

impl Default for PhysicsProfile {
    fn default() -> Self {
        Self {
            body_type: None,
            density: None,
            friction: None,
            restitution: None,
            gravity_scale: 1.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            rotation_locked: false,
        }
    }
}

impl PhysicsProfile {
    #[must_use]
    pub fn with_body_type(mut self, body_type: BodyType) -> Self {
        self.body_type = Some(body_type);
        self
    }

    #[must_use]
    pub fn with_density(mut self, density: f32) -> Self {
        self.density = Some(density);
        self
    }

    #[must_use]
    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = Some(friction);
        self
    }

    #[must_use]
    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = Some(restitution);
        self
    }

    #[must_use]
    pub fn with_gravity_scale(mut self, scale: f32) -> Self {
        self.gravity_scale = scale;
        self
    }

    #[must_use]
    pub fn with_rotation_locked(mut self, locked: bool) -> Self {
        self.rotation_locked = locked;
        self
    }
}

/// One fixture as requested by the user. Unset properties are inherited.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FixtureSpec {
    pub shape: ShapeDesc,
    pub density: Option<f32>,
    pub friction: Option<f32>,
    pub restitution: Option<f32>,
    /// Explicit sensor flag; unset follows the body type.
    pub sensor: Option<bool>,
    pub filter: Option<CollisionFilter>,
}

impl FixtureSpec {
    pub fn new(shape: ShapeDesc) -> Self {
        Self {
            shape,
            density: None,
            friction: None,
            restitution: None,
            sensor: None,
            filter: None,
        }
    }

    #[must_use]
    pub fn with_density(mut self, density: f32) -> Self {
        self.density = Some(density);
        self
    }

    #[must_use]
    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = Some(friction);
        self
    }

    #[must_use]
    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = Some(restitution);
        self
    }

    #[must_use]
    pub fn with_sensor(mut self, sensor: bool) -> Self {
        self.sensor = Some(sensor);
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: CollisionFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Final material values after applying the profile and engine defaults.
    pub fn resolved_material(&self, profile: &PhysicsProfile) -> (f32, f32, f32) {
        (
            self.density.or(profile.density).unwrap_or(DEFAULT_DENSITY),
            self.friction.or(profile.friction).unwrap_or(DEFAULT_FRICTION),
            self.restitution
                .or(profile.restitution)
                .unwrap_or(DEFAULT_RESTITUTION),
        )
    }

    fn resolve(&self, ctx: &ResolveContext<'_>) -> StageResult<Collider> {
        let engine = ctx.units.to_engine_shape(&self.shape)?;
        let (density, friction, restitution) = self.resolved_material(ctx.profile);
        let sensor = self
            .sensor
            .unwrap_or(matches!(ctx.body_type, BodyType::Sensor));
        let filter = self
            .filter
            .unwrap_or_else(|| CollisionFilter::for_body_type(ctx.body_type));

        let mut builder = ColliderBuilder::new(engine.shape)
            .translation(engine.offset)
            .density(ctx.units.density_to_engine(density.max(0.0)))
            .friction(friction.max(0.0))
            .restitution(restitution.max(0.0))
            .restitution_combine_rule(CoefficientCombineRule::Max)
            .sensor(sensor)
            .collision_groups(filter.to_groups())
            .active_events(ActiveEvents::COLLISION_EVENTS);
        if sensor {
            // Sensors also report overlaps with static and kinematic bodies.
            builder = builder.active_collision_types(ActiveCollisionTypes::all());
        }
        Ok(builder.build())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FixtureId(u32);

impl FixtureId {
    pub fn to_u32(self) -> u32 {
        self.0
    }
}

/// Everything needed to turn a spec into an engine collider.
pub(crate) struct ResolveContext<'a> {
    pub profile: &'a PhysicsProfile,
    pub body_type: BodyType,
    pub units: UnitScale,
}

/// The engine body a fixture set is currently attached to.
pub(crate) struct Binding<'a> {
    pub world: &'a mut PhysicsWorld,
    pub body: RigidBodyHandle,
    pub ctx: ResolveContext<'a>,
}

#[derive(Clone, Debug)]
struct FixtureEntry {
    id: FixtureId,
    spec: FixtureSpec,
    /// Derived from the actor's visual geometry rather than set by the user.
    derived: bool,
}

#[derive(Debug, Default)]
pub struct FixtureSet {
    entries: Vec<FixtureEntry>,
    /// Parallel to `entries` while attached to a body, empty otherwise.
    colliders: Vec<ColliderHandle>,
    next_id: u32,
}

impl FixtureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn specs(&self) -> impl Iterator<Item = (FixtureId, &FixtureSpec)> {
        self.entries.iter().map(|e| (e.id, &e.spec))
    }

    pub fn get(&self, id: FixtureId) -> Option<&FixtureSpec> {
        self.entries.iter().find(|e| e.id == id).map(|e| &e.spec)
    }

    /// True if only geometry-derived fixtures are present.
    pub fn is_derived(&self) -> bool {
        self.entries.iter().all(|e| e.derived)
    }

    pub(crate) fn has_derived(&self) -> bool {
        self.entries.iter().any(|e| e.derived)
    }

    pub(crate) fn is_attached(&self) -> bool {
        !self.colliders.is_empty()
    }

    pub(crate) fn collider_handles(&self) -> &[ColliderHandle] {
        &self.colliders
    }

    fn allocate(&mut self, spec: FixtureSpec, derived: bool) -> FixtureEntry {
        let id = FixtureId(self.next_id);
        self.next_id += 1;
        FixtureEntry { id, spec, derived }
    }

    /// Adds one fixture. With a binding the collider is created immediately.
    pub(crate) fn attach(
        &mut self,
        spec: FixtureSpec,
        binding: Option<&mut Binding<'_>>,
    ) -> StageResult<FixtureId> {
        spec.shape.validate()?;
        let handle = match binding {
            Some(b) => {
                let collider = spec.resolve(&b.ctx)?;
                let handle = b.world.insert_collider(b.body, collider);
                b.world.wake(b.body);
                Some(handle)
            }
            None => None,
        };
        let entry = self.allocate(spec, false);
        let id = entry.id;
        self.entries.push(entry);
        if let Some(handle) = handle {
            self.colliders.push(handle);
        }
        Ok(id)
    }

    /// Removes one fixture and its collider. Returns the spec if it existed.
    pub(crate) fn detach(
        &mut self,
        id: FixtureId,
        binding: Option<&mut Binding<'_>>,
    ) -> Option<FixtureSpec> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        let entry = self.entries.remove(index);
        if index < self.colliders.len() {
            let handle = self.colliders.remove(index);
            if let Some(b) = binding {
                b.world.remove_collider(handle);
                b.world.wake(b.body);
            }
        }
        Some(entry.spec)
    }

    /// Destroys every attached collider and recreates it from the current specs.
    pub(crate) fn rebuild_all(&mut self, binding: &mut Binding<'_>) -> StageResult<()> {
        let colliders = resolve_all(&self.entries, &binding.ctx)?;
        self.swap_colliders(colliders, binding);
        Ok(())
    }

    /// Replaces the derived fixtures with `derived`, keeping user fixtures.
    /// Atomic: on error both the specs and the colliders stay as they were.
    pub(crate) fn replace_derived(
        &mut self,
        derived: Vec<FixtureSpec>,
        binding: Option<&mut Binding<'_>>,
    ) -> StageResult<()> {
        let mut next: Vec<FixtureEntry> = Vec::with_capacity(self.entries.len());
        let saved_next_id = self.next_id;
        for spec in derived {
            let entry = self.allocate(spec, true);
            next.push(entry);
        }
        next.extend(self.entries.iter().filter(|e| !e.derived).cloned());
        self.install(next, binding).inspect_err(|_| self.next_id = saved_next_id)
    }

    /// Replaces every fixture with user-provided specs.
    pub(crate) fn replace_all(
        &mut self,
        specs: Vec<FixtureSpec>,
        binding: Option<&mut Binding<'_>>,
    ) -> StageResult<()> {
        let saved_next_id = self.next_id;
        let next = specs
            .into_iter()
            .map(|spec| self.allocate(spec, false))
            .collect();
        self.install(next, binding).inspect_err(|_| self.next_id = saved_next_id)
    }

    fn install(
        &mut self,
        next: Vec<FixtureEntry>,
        binding: Option<&mut Binding<'_>>,
    ) -> StageResult<()> {
        match binding {
            Some(b) => {
                let colliders = resolve_all(&next, &b.ctx)?;
                self.entries = next;
                self.swap_colliders(colliders, b);
            }
            None => {
                for entry in &next {
                    entry.spec.shape.validate()?;
                }
                self.entries = next;
            }
        }
        Ok(())
    }

    fn swap_colliders(&mut self, colliders: Vec<Collider>, binding: &mut Binding<'_>) {
        for handle in self.colliders.drain(..) {
            binding.world.remove_collider(handle);
        }
        self.colliders = colliders
            .into_iter()
            .map(|c| binding.world.insert_collider(binding.body, c))
            .collect();
        // Rebuilding always wakes the body so the new mass takes effect.
        binding.world.wake(binding.body);
    }

    /// Re-applies the per-type collision filter after a body type hot-swap.
    pub(crate) fn refresh_filters(&self, binding: &mut Binding<'_>) {
        for (entry, handle) in self.entries.iter().zip(&self.colliders) {
            let filter = entry
                .spec
                .filter
                .unwrap_or_else(|| CollisionFilter::for_body_type(binding.ctx.body_type));
            binding.world.set_collider_groups(*handle, filter.to_groups());
        }
    }

    /// Forgets collider handles after the engine body was destroyed.
    pub(crate) fn detach_engine(&mut self) {
        self.colliders.clear();
    }
}

fn resolve_all(entries: &[FixtureEntry], ctx: &ResolveContext<'_>) -> StageResult<Vec<Collider>> {
    entries.iter().map(|e| e.spec.resolve(ctx)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2;

    fn unit_box() -> FixtureSpec {
        FixtureSpec::new(ShapeDesc::rectangle(Vec2::ZERO, 1.0, 1.0))
    }

    #[test]
    fn material_resolution_order() {
        let profile = PhysicsProfile::default().with_friction(0.3);
        let spec = unit_box().with_density(2.0);
        let (density, friction, restitution) = spec.resolved_material(&profile);
        assert_eq!(density, 2.0);
        assert_eq!(friction, 0.3);
        assert_eq!(restitution, DEFAULT_RESTITUTION);
    }

    #[test]
    fn filters_follow_body_type() {
        assert_eq!(
            CollisionFilter::for_body_type(BodyType::Sensor).category,
            CATEGORY_SENSOR
        );
        assert_eq!(
            CollisionFilter::for_body_type(BodyType::Dynamic),
            CollisionFilter::new(CATEGORY_DYNAMIC, DEFAULT_MASK)
        );
    }

    #[test]
    fn detached_set_validates_on_replace() {
        let mut set = FixtureSet::new();
        set.replace_derived(vec![unit_box()], None).unwrap();
        let user = set.attach(unit_box().with_friction(1.0), None).unwrap();
        assert_eq!(set.len(), 2);

        let bad = FixtureSpec::new(ShapeDesc::circle(Vec2::ZERO, -1.0));
        assert!(set.replace_derived(vec![bad], None).is_err());
        assert_eq!(set.len(), 2);
        assert!(set.get(user).is_some());

        assert_eq!(set.detach(user, None).map(|s| s.friction), Some(Some(1.0)));
        assert!(set.is_derived());
    }

    #[test]
    fn rebuild_is_atomic_on_engine_side() {
        let units = UnitScale::default();
        let profile = PhysicsProfile::default();
        let mut world = PhysicsWorld::new(Vec2::ZERO, units);
        let actor = crate::actor::ActorId::from_u32(1);
        let body = world.create_body(actor, &crate::physics::BodySpec::new(BodyType::Dynamic));

        let mut set = FixtureSet::new();
        {
            let mut binding = Binding {
                world: &mut world,
                body,
                ctx: ResolveContext {
                    profile: &profile,
                    body_type: BodyType::Dynamic,
                    units,
                },
            };
            set.replace_all(vec![unit_box(), unit_box()], Some(&mut binding))
                .unwrap();
        }
        assert_eq!(world.collider_count(), 2);
        let before: Vec<_> = set.collider_handles().to_vec();

        let mut binding = Binding {
            world: &mut world,
            body,
            ctx: ResolveContext {
                profile: &profile,
                body_type: BodyType::Dynamic,
                units,
            },
        };
        let bad = FixtureSpec::new(ShapeDesc::polygon(vec![
            Vec2::ZERO,
            Vec2::new(1.0, 0.0),
            Vec2::new(2.0, 0.0),
        ]));
        assert!(set.replace_all(vec![bad], Some(&mut binding)).is_err());
        assert_eq!(set.collider_handles(), before.as_slice());
        assert_eq!(set.len(), 2);

        set.rebuild_all(&mut binding).unwrap();
        assert_eq!(binding.world.collider_count(), 2);
        assert_ne!(set.collider_handles(), before.as_slice());
    }
}
