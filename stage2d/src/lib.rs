//! Stage2D - actors on top of a rigid-body world, driven by a fixed-order
//! frame loop.
//!
//! A [`Stage`] owns the active [`Scene`]. A scene holds layers, each with its
//! own lazily created physics world, and the actors placed on them. Every
//! tick steps the worlds, dispatches collisions, runs frame listeners and
//! periodic tasks, then recomputes the per-layer camera transforms.

pub mod actor;
pub mod body;
pub mod camera;
pub mod collision;
pub mod compositor;
pub mod error;
pub mod fixture;
pub mod joint;
pub mod layer;
pub mod math;
pub mod registry;
pub mod resources;
pub mod scene;
pub mod scheduler;
pub mod stage;
pub mod units;

mod physics;

pub use crate::actor::{Actor, ActorDesc, ActorId, ActorKind, ActorShape};
pub use crate::body::{BodyState, BodyType};
pub use crate::camera::{Camera, CameraFollow};
pub use crate::collision::{CollisionEvent, CollisionListener, CollisionTarget, ContactCallbacks};
pub use crate::compositor::{ActorSnapshot, Compositor, LayerSnapshot, LayerTransform, SceneSnapshot};
pub use crate::error::{StageError, StageResult};
pub use crate::fixture::{CollisionFilter, FixtureId, FixtureSet, FixtureSpec, PhysicsProfile};
pub use crate::joint::{JointId, JointKind, JointParams, JointSpec};
pub use crate::layer::{Layer, LayerId, Parallax};
pub use crate::math::{Bounds, Transform2D, Vec2};
pub use crate::registry::ListenerId;
pub use crate::resources::{Resource, ResourceCache, ResourceProvider};
pub use crate::scene::{Scene, SceneSettings};
pub use crate::scheduler::{FrameScope, FrameUpdateListener, TaskId};
pub use crate::stage::{FrameClock, Stage, StageConfig};
pub use crate::units::{ShapeDesc, UnitScale};
