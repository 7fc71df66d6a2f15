//! The scene: layers, actors and every registration that refers to them.
//!
//! The scene is the only owner of actors. Bodies, joints and listeners refer
//! to actors by [`ActorId`] and are cleaned up through the scene when an actor
//! goes away.

use std::collections::{HashMap, VecDeque};

use crate::actor::{Actor, ActorDesc, ActorId};
use crate::body::BodyState;
use crate::camera::{Camera, DEFAULT_METER};
use crate::collision::{CollisionListener, CollisionTarget};
use crate::compositor::{ActorSnapshot, Compositor, LayerSnapshot, SceneSnapshot};
use crate::error::{StageError, StageResult};
use crate::fixture::{FixtureSpec, PhysicsProfile};
use crate::joint::JointTable;
use crate::layer::{Layer, LayerId, WorldSettings};
use crate::math::Vec2;
use crate::physics::{DEFAULT_MAX_SUBSTEPS, DEFAULT_STEP};
use crate::registry::Registry;
use crate::resources::ResourceProvider;
use crate::scheduler::{DeferredAction, FrameScope, FrameUpdateListener, TaskTable};
use crate::units::UnitScale;

/// Physics and view defaults a scene starts from.
#[derive(Clone, Debug, PartialEq)]
pub struct SceneSettings {
    pub units: UnitScale,
    pub gravity: Vec2,
    pub physics_step: f32,
    pub max_substeps: u32,
    pub default_profile: PhysicsProfile,
    pub camera_meter: f32,
}

impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            units: UnitScale::default(),
            gravity: Vec2::ZERO,
            physics_step: DEFAULT_STEP,
            max_substeps: DEFAULT_MAX_SUBSTEPS,
            default_profile: PhysicsProfile::default(),
            camera_meter: DEFAULT_METER,
        }
    }
}

pub struct Scene {
    settings: SceneSettings,
    /// Sorted by layer position; equal positions keep insertion order.
    pub(crate) layers: Vec<Layer>,
    main_layer: LayerId,
    next_layer: u32,
    pub(crate) actors: HashMap<ActorId, Actor>,
    next_actor: u32,
    camera: Camera,
    compositor: Compositor,
    resources: Option<Box<dyn ResourceProvider>>,

    pub(crate) collision_listeners: Registry<CollisionTarget, dyn CollisionListener>,
    pub(crate) frame_listeners: Registry<FrameScope, dyn FrameUpdateListener>,
    pub(crate) tasks: TaskTable,
    pub(crate) joints: JointTable,
    pub(crate) deferred: VecDeque<DeferredAction>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self::with_settings(SceneSettings::default())
    }

    pub fn with_settings(settings: SceneSettings) -> Self {
        let main_layer = LayerId::from_u32(0);
        let camera = Camera::new(settings.camera_meter);
        Self {
            settings,
            layers: vec![Layer::new(main_layer, 0)],
            main_layer,
            next_layer: 1,
            actors: HashMap::new(),
            next_actor: 0,
            camera,
            compositor: Compositor::default(),
            resources: None,
            collision_listeners: Registry::default(),
            frame_listeners: Registry::default(),
            tasks: TaskTable::default(),
            joints: JointTable::default(),
            deferred: VecDeque::new(),
        }
    }

    pub fn settings(&self) -> &SceneSettings {
        &self.settings
    }

    pub fn units(&self) -> UnitScale {
        self.settings.units
    }

    pub(crate) fn world_settings(&self) -> WorldSettings {
        WorldSettings {
            gravity: self.settings.gravity,
            units: self.settings.units,
            step: self.settings.physics_step,
            max_substeps: self.settings.max_substeps,
        }
    }

    /// Provider used to size image and text actors.
    pub fn set_resources(&mut self, provider: impl ResourceProvider + 'static) {
        self.resources = Some(Box::new(provider));
    }

    // ------------------------------
    // Layers
    // ------------------------------

    pub fn main_layer(&self) -> LayerId {
        self.main_layer
    }

    pub fn add_layer(&mut self, position: i32) -> LayerId {
        let id = LayerId::from_u32(self.next_layer);
        self.next_layer += 1;
        self.layers.push(Layer::new(id, position));
        self.sort_layers();
        id
    }

    fn sort_layers(&mut self) {
        // Stable: equal positions keep insertion order.
        self.layers.sort_by_key(|l| l.position);
    }

    pub fn set_layer_position(&mut self, id: LayerId, position: i32) -> StageResult<()> {
        self.layer_mut(id)?.position = position;
        self.sort_layers();
        Ok(())
    }

    /// Removes a layer with all its actors. The main layer cannot be removed.
    pub fn remove_layer(&mut self, id: LayerId) -> StageResult<()> {
        if id == self.main_layer {
            return Err(StageError::argument("the main layer cannot be removed"));
        }
        let actors = self.layer(id)?.actors.clone();
        for actor in actors {
            self.remove_actor(actor)?;
        }
        self.frame_listeners
            .remove_where(|scope| *scope == FrameScope::Layer(id));
        self.layers.retain(|l| l.id() != id);
        Ok(())
    }

    pub fn layer(&self, id: LayerId) -> StageResult<&Layer> {
        self.layers
            .iter()
            .find(|l| l.id() == id)
            .ok_or(StageError::UnknownLayer(id))
    }

    pub fn layer_mut(&mut self, id: LayerId) -> StageResult<&mut Layer> {
        self.layers
            .iter_mut()
            .find(|l| l.id() == id)
            .ok_or(StageError::UnknownLayer(id))
    }

    /// Layers in update and draw order.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub(crate) fn layer_ids(&self) -> Vec<LayerId> {
        self.layers.iter().map(|l| l.id()).collect()
    }

    // ------------------------------
    // Actors
    // ------------------------------

    /// Adds an actor to the main layer.
    pub fn add_actor(&mut self, desc: ActorDesc) -> StageResult<ActorId> {
        self.add_actor_to(self.main_layer, desc)
    }

    /// Adds an actor to `layer`. If its profile names a body type, the body is
    /// created right away.
    pub fn add_actor_to(&mut self, layer: LayerId, desc: ActorDesc) -> StageResult<ActorId> {
        self.layer(layer)?;
        let shape = desc.kind.resolve(self.resources.as_deref())?;
        let mut profile = desc
            .profile
            .clone()
            .unwrap_or_else(|| self.settings.default_profile.clone());
        if desc.body_type.is_some() {
            profile.body_type = desc.body_type;
        }

        let id = ActorId::from_u32(self.next_actor);
        let mut actor = Actor::new(id, layer, &desc, shape, profile);
        match &desc.fixtures {
            Some(specs) => actor.fixtures.replace_all(specs.clone(), None)?,
            None => actor
                .fixtures
                .replace_derived(vec![FixtureSpec::new(actor.shape.fixture_shape())], None)?,
        }
        self.next_actor += 1;

        let initial = actor.profile.body_type;
        self.actors.insert(id, actor);
        self.layer_mut(layer)?.actors.push(id);

        if let Some(body_type) = initial {
            if let Err(err) = self.set_body_state(id, body_type.into()) {
                self.remove_actor(id)?;
                return Err(err);
            }
        }
        Ok(id)
    }

    /// Removes an actor together with its body, joints, listeners and tasks.
    pub fn remove_actor(&mut self, id: ActorId) -> StageResult<()> {
        let layer = self.actor(id)?.layer();
        self.release_joints_of(id);
        self.destroy_body(id);
        self.collision_listeners.remove_where(|t| t.involves(id));
        self.frame_listeners
            .remove_where(|scope| *scope == FrameScope::Actor(id));
        self.tasks.remove_scope(FrameScope::Actor(id));
        self.actors.remove(&id);
        if let Ok(l) = self.layer_mut(layer) {
            l.actors.retain(|a| *a != id);
        }
        log::debug!("removed actor {id}");
        Ok(())
    }

    /// Moves an actor to another layer. A body is recreated in the new layer's
    /// world; joints cannot span worlds and are released.
    pub fn move_actor_to_layer(&mut self, id: ActorId, layer: LayerId) -> StageResult<()> {
        self.layer(layer)?;
        let from = self.actor(id)?.layer();
        if from == layer {
            return Ok(());
        }
        let state = self.actor(id)?.state;
        let velocity = self.velocity(id)?;
        let angular = self.angular_velocity(id)?;
        if state != BodyState::None {
            self.release_joints_of(id);
            self.destroy_body(id);
        }

        self.layer_mut(from)?.actors.retain(|a| *a != id);
        self.layer_mut(layer)?.actors.push(id);
        self.actor_mut(id)?.layer = layer;

        if let Some(body_type) = state.body_type() {
            self.create_engine_body(id, body_type, velocity, angular)?;
        }
        Ok(())
    }

    pub fn actor(&self, id: ActorId) -> StageResult<&Actor> {
        self.actors.get(&id).ok_or(StageError::UnknownActor(id))
    }

    pub(crate) fn actor_mut(&mut self, id: ActorId) -> StageResult<&mut Actor> {
        self.actors.get_mut(&id).ok_or(StageError::UnknownActor(id))
    }

    pub fn contains_actor(&self, id: ActorId) -> bool {
        self.actors.contains_key(&id)
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Actors in layer order, then insertion order.
    pub fn actors(&self) -> impl Iterator<Item = &Actor> + '_ {
        self.layers
            .iter()
            .flat_map(|l| l.actors.iter())
            .filter_map(|id| self.actors.get(id))
    }

    pub fn find_actor(&self, name: &str) -> Option<ActorId> {
        self.actors().find(|a| a.name() == Some(name)).map(|a| a.id())
    }

    pub fn set_visible(&mut self, id: ActorId, visible: bool) -> StageResult<()> {
        self.actor_mut(id)?.visible = visible;
        Ok(())
    }

    // ------------------------------
    // View
    // ------------------------------

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    /// Read-only transforms for the renderer, grouped by layer in draw order.
    pub fn snapshot(&self) -> SceneSnapshot {
        let layers = self
            .layers
            .iter()
            .map(|layer| {
                let transform = self
                    .compositor
                    .get(layer.id())
                    .copied()
                    .unwrap_or_else(|| {
                        crate::compositor::LayerTransform::from_camera(&self.camera, layer)
                    });
                let actors = layer
                    .actors
                    .iter()
                    .filter_map(|id| self.actors.get(id))
                    .map(|a| ActorSnapshot {
                        id: a.id(),
                        position: a.position(),
                        rotation: a.rotation(),
                        shape: a.shape().clone(),
                        state: a.state(),
                        visible: a.is_visible(),
                    })
                    .collect();
                LayerSnapshot { transform, actors }
            })
            .collect();
        SceneSnapshot { layers }
    }

    /// Camera follow and layer transforms. Runs after the callback phase.
    pub(crate) fn update_view(&mut self, dt: f32) {
        let target = self
            .camera
            .following()
            .and_then(|f| self.actors.get(&f.target))
            .map(|a| a.center());
        self.camera.update(target, dt);
        self.compositor.recompute(&self.camera, &self.layers);
    }

    // ------------------------------
    // Physics stepping
    // ------------------------------

    /// Steps every layer world and mirrors body transforms onto actors.
    /// Returns the faults of worlds that could not be stepped.
    pub(crate) fn step_worlds(&mut self, dt: f32) -> Vec<StageError> {
        let mut faults = Vec::new();
        for layer in &mut self.layers {
            if let Err(err) = layer.step(dt) {
                faults.push(err);
            }
        }
        self.sync_transforms();
        faults
    }

    pub(crate) fn sync_transforms(&mut self) {
        for layer in &self.layers {
            let Some(world) = layer.world.as_ref().filter(|w| w.fault().is_none()) else {
                continue;
            };
            for (id, position, rotation) in world.body_transforms() {
                if let Some(actor) = self.actors.get_mut(&id) {
                    actor.position = position;
                    actor.rotation = rotation;
                }
            }
        }
    }

    /// Destroys every body, joint and registration. Joint release listeners
    /// are notified. Call before dropping a scene that is being replaced.
    pub fn teardown(&mut self) {
        let ids: Vec<ActorId> = self.actors().map(|a| a.id()).collect();
        for id in ids {
            // Release listeners may already have removed it.
            if !self.contains_actor(id) {
                continue;
            }
            if let Err(err) = self.remove_actor(id) {
                log::warn!("teardown could not remove actor {id}: {err}");
            }
        }
        self.joints.clear();
        self.collision_listeners.clear();
        self.frame_listeners.clear();
        self.tasks.clear();
        self.deferred.clear();
        for layer in &mut self.layers {
            layer.world = None;
        }
        log::debug!("scene torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyType;

    #[test]
    fn layers_sort_by_position_and_keep_insertion_order() {
        let mut scene = Scene::new();
        let back = scene.add_layer(-1);
        let front = scene.add_layer(5);
        let also_back = scene.add_layer(-1);
        let order: Vec<LayerId> = scene.layers().iter().map(|l| l.id()).collect();
        assert_eq!(order, vec![back, also_back, scene.main_layer(), front]);

        scene.set_layer_position(front, -10).unwrap();
        assert_eq!(scene.layers()[0].id(), front);
        assert!(scene.remove_layer(scene.main_layer()).is_err());
    }

    #[test]
    fn visual_actor_has_no_world() {
        let mut scene = Scene::new();
        let id = scene.add_actor(ActorDesc::rectangle(1.0, 1.0)).unwrap();
        assert_eq!(scene.actor(id).unwrap().state(), BodyState::None);
        assert!(!scene.layer(scene.main_layer()).unwrap().has_world());
    }

    #[test]
    fn profile_body_type_creates_body_on_insert() {
        let mut scene = Scene::new();
        let id = scene
            .add_actor(ActorDesc::circle(1.0).with_body_type(BodyType::Dynamic))
            .unwrap();
        assert_eq!(scene.actor(id).unwrap().state(), BodyState::Dynamic);
        assert_eq!(scene.layer(scene.main_layer()).unwrap().body_count(), 1);
    }

    #[test]
    fn moving_between_layers_recreates_the_body() {
        let mut scene = Scene::new();
        let other = scene.add_layer(1);
        let id = scene
            .add_actor(ActorDesc::circle(1.0).with_body_type(BodyType::Dynamic))
            .unwrap();
        scene.set_velocity(id, Vec2::new(2.0, 0.0)).unwrap();
        scene.move_actor_to_layer(id, other).unwrap();

        assert_eq!(scene.layer(scene.main_layer()).unwrap().body_count(), 0);
        assert_eq!(scene.layer(other).unwrap().body_count(), 1);
        assert_eq!(scene.layer(other).unwrap().actors(), &[id]);
        assert!(scene.velocity(id).unwrap().abs_diff_eq(Vec2::new(2.0, 0.0), 1e-5));
    }

    #[test]
    fn removing_a_layer_removes_its_actors() {
        let mut scene = Scene::new();
        let layer = scene.add_layer(2);
        let id = scene
            .add_actor_to(layer, ActorDesc::rectangle(1.0, 2.0).with_name("crate"))
            .unwrap();
        assert_eq!(scene.find_actor("crate"), Some(id));
        scene.remove_layer(layer).unwrap();
        assert!(!scene.contains_actor(id));
        assert!(scene.layer(layer).is_err());
    }
}
