use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::camera::DEFAULT_METER;
use crate::error::{StageError, StageResult};
use crate::fixture::PhysicsProfile;
use crate::math::Vec2;
use crate::physics::{DEFAULT_MAX_SUBSTEPS, DEFAULT_STEP};
use crate::registry::ListenerId;
use crate::scene::{Scene, SceneSettings};
use crate::scheduler::{FrameUpdateListener, GlobalListeners};
use crate::units::UnitScale;

pub const DEFAULT_FRAME_RATE: f32 = 60.0;

/// Runtime configuration. Every field has a default, so partial JSON files work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub frame_rate: f32,
    /// Longest elapsed time a single tick will simulate, in seconds.
    pub max_frame_time: f32,
    pub physics_step: f32,
    pub max_substeps: u32,
    pub units_per_meter: f32,
    pub gravity: Vec2,
    pub camera_meter: f32,
    pub default_profile: PhysicsProfile,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            max_frame_time: 2.0 / DEFAULT_FRAME_RATE,
            physics_step: DEFAULT_STEP,
            max_substeps: DEFAULT_MAX_SUBSTEPS,
            units_per_meter: 1.0,
            gravity: Vec2::ZERO,
            camera_meter: DEFAULT_METER,
            default_profile: PhysicsProfile::default(),
        }
    }
}

impl StageConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading stage config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing stage config {}", path.display()))
    }

    /// Sets the frame rate and the matching two-frame clamp.
    #[must_use]
    pub fn with_frame_rate(mut self, frame_rate: f32) -> Self {
        self.frame_rate = frame_rate;
        self.max_frame_time = 2.0 / frame_rate;
        self
    }

    #[must_use]
    pub fn with_max_frame_time(mut self, seconds: f32) -> Self {
        self.max_frame_time = seconds;
        self
    }

    #[must_use]
    pub fn with_physics_step(mut self, step: f32, max_substeps: u32) -> Self {
        self.physics_step = step;
        self.max_substeps = max_substeps;
        self
    }

    #[must_use]
    pub fn with_units_per_meter(mut self, units: f32) -> Self {
        self.units_per_meter = units;
        self
    }

    #[must_use]
    pub fn with_gravity(mut self, x: f32, y: f32) -> Self {
        self.gravity = Vec2::new(x, y);
        self
    }

    #[must_use]
    pub fn with_camera_meter(mut self, meter: f32) -> Self {
        self.camera_meter = meter;
        self
    }

    #[must_use]
    pub fn with_default_profile(mut self, profile: PhysicsProfile) -> Self {
        self.default_profile = profile;
        self
    }

    pub fn validate(&self) -> StageResult<()> {
        let positive = |name: &str, v: f32| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(StageError::argument(format!("{name} must be positive, got {v}")))
            }
        };
        positive("frame_rate", self.frame_rate)?;
        positive("max_frame_time", self.max_frame_time)?;
        positive("physics_step", self.physics_step)?;
        positive("units_per_meter", self.units_per_meter)?;
        positive("camera_meter", self.camera_meter)?;
        if self.max_substeps == 0 {
            return Err(StageError::argument("max_substeps must be at least 1"));
        }
        if !self.gravity.is_finite() {
            return Err(StageError::argument("gravity must be finite"));
        }
        Ok(())
    }

    pub fn scene_settings(&self) -> StageResult<SceneSettings> {
        self.validate()?;
        Ok(SceneSettings {
            units: UnitScale::new(self.units_per_meter)?,
            gravity: self.gravity,
            physics_step: self.physics_step,
            max_substeps: self.max_substeps,
            default_profile: self.default_profile.clone(),
            camera_meter: self.camera_meter,
        })
    }
}

/// Wall-clock time between ticks, clamped so a stall does not turn into a
/// huge simulation step.
#[derive(Debug)]
pub struct FrameClock {
    last: Option<Instant>,
    max_frame_time: f32,
}

impl FrameClock {
    pub fn new(max_frame_time: f32) -> Self {
        Self {
            last: None,
            max_frame_time,
        }
    }

    pub fn clamp(&self, dt: f32) -> f32 {
        if dt.is_finite() {
            dt.clamp(0.0, self.max_frame_time)
        } else {
            0.0
        }
    }

    /// Seconds since the previous call, clamped. The first call returns 0.
    pub fn measure(&mut self) -> f32 {
        let now = Instant::now();
        let elapsed = self
            .last
            .replace(now)
            .map_or(0.0, |last| now.duration_since(last).as_secs_f32());
        self.clamp(elapsed)
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Runtime context: configuration, global listeners and the active scene.
pub struct Stage {
    config: StageConfig,
    clock: FrameClock,
    global_listeners: GlobalListeners,
    scene: Scene,
    frame: u64,
    delta_time: Duration,
    elapsed_time: Duration,
}

impl Stage {
    pub fn new(config: StageConfig) -> StageResult<Self> {
        let scene = Scene::with_settings(config.scene_settings()?);
        Ok(Self {
            clock: FrameClock::new(config.max_frame_time),
            config,
            global_listeners: GlobalListeners::default(),
            scene,
            frame: 0,
            delta_time: Duration::ZERO,
            elapsed_time: Duration::ZERO,
        })
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    /// A fresh scene using this stage's settings.
    pub fn new_scene(&self) -> StageResult<Scene> {
        Ok(Scene::with_settings(self.config.scene_settings()?))
    }

    /// Tears down the active scene (joints released with notifications,
    /// bodies destroyed, registrations cleared) and activates `scene`.
    pub fn replace_scene(&mut self, scene: Scene) {
        let mut old = std::mem::replace(&mut self.scene, scene);
        old.teardown();
        self.clock.reset();
        log::debug!("scene replaced at frame {}", self.frame);
    }

    /// Number of ticks run so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Time simulated by the last tick.
    pub fn delta_time(&self) -> Duration {
        self.delta_time
    }

    /// Total time simulated since the stage was created.
    pub fn elapsed_time(&self) -> Duration {
        self.elapsed_time
    }

    /// Runs before every scene-level listener, in registration order.
    pub fn add_global_listener(&mut self, listener: impl FrameUpdateListener + 'static) -> ListenerId {
        self.global_listeners.insert((), Box::new(listener))
    }

    pub fn on_frame<F>(&mut self, callback: F) -> ListenerId
    where
        F: FnMut(&mut Scene, f32) -> anyhow::Result<()> + 'static,
    {
        self.add_global_listener(callback)
    }

    pub fn remove_global_listener(&mut self, id: ListenerId) -> bool {
        self.global_listeners.remove(id)
    }

    /// Runs one tick of `dt` seconds. The caller's time is simulated in
    /// full; periodic tasks catch up on every interval it spans.
    pub fn tick(&mut self, dt: f32) -> StageResult<()> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(StageError::argument(format!(
                "tick duration must be finite and >= 0, got {dt}"
            )));
        }
        self.frame += 1;
        self.delta_time = Duration::from_secs_f32(dt);
        self.elapsed_time += self.delta_time;
        self.scene.tick_with(dt, &mut self.global_listeners)
    }

    /// Runs one tick with the wall time since the previous measured tick,
    /// clamped to `max_frame_time`.
    pub fn tick_measured(&mut self) -> StageResult<()> {
        let dt = self.clock.measure();
        self.tick(dt)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::scheduler::FrameScope;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = StageConfig::from_json(r#"{ "gravity": { "x": 0.0, "y": -9.81 } }"#).unwrap();
        assert_eq!(config.gravity, Vec2::new(0.0, -9.81));
        assert_eq!(config.physics_step, DEFAULT_STEP);
        assert!((config.max_frame_time - 2.0 / 60.0).abs() < 1e-6);
        assert!(StageConfig::from_json(r#"{ "physics_step": 0.0 }"#).is_err());
    }

    #[test]
    fn supplied_tick_time_is_not_clamped() {
        let mut stage = Stage::new(StageConfig::default().with_frame_rate(50.0)).unwrap();
        stage.tick(0.35).unwrap();
        assert_eq!(stage.frame(), 1);
        assert!((stage.delta_time().as_secs_f32() - 0.35).abs() < 1e-6);

        assert!(matches!(stage.tick(-1.0), Err(StageError::InvalidArgument(_))));
        assert!(stage.tick(f32::NAN).is_err());
        assert!(stage.tick(f32::INFINITY).is_err());
        assert_eq!(stage.frame(), 1);
        assert!((stage.elapsed_time().as_secs_f32() - 0.35).abs() < 1e-6);
    }

    #[test]
    fn default_config_task_catches_up_on_a_long_tick() {
        let mut stage = Stage::new(StageConfig::default()).unwrap();
        let runs = Rc::new(RefCell::new(0));
        let counter = runs.clone();
        stage
            .scene_mut()
            .repeat(0.1, move |_, _| {
                *counter.borrow_mut() += 1;
                Ok(())
            })
            .unwrap();
        stage.tick(0.35).unwrap();
        assert_eq!(*runs.borrow(), 3);
    }

    #[test]
    fn global_listeners_run_before_scene_listeners() {
        let mut stage = Stage::new(StageConfig::default()).unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));
        let (o1, o2) = (order.clone(), order.clone());
        stage
            .scene_mut()
            .on_frame(FrameScope::Scene, move |_, _| {
                o1.borrow_mut().push("scene");
                Ok(())
            })
            .unwrap();
        stage.on_frame(move |_, _| {
            o2.borrow_mut().push("global");
            Ok(())
        });
        stage.tick(0.016).unwrap();
        assert_eq!(*order.borrow(), vec!["global", "scene"]);
    }

    #[test]
    fn first_measured_tick_is_empty() {
        let mut clock = FrameClock::new(0.1);
        assert_eq!(clock.measure(), 0.0);
        assert!(clock.measure() <= 0.1);
        assert_eq!(clock.clamp(f32::NAN), 0.0);
    }
}
