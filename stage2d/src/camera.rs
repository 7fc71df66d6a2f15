//! Base camera shared by all layers, with actor following and dead-zone support.

use serde::{Deserialize, Serialize};

use crate::actor::ActorId;
use crate::error::{StageError, StageResult};
use crate::math::{wrap_degrees, Bounds, Vec2};

pub const DEFAULT_METER: f32 = 32.0;
pub const DEFAULT_ZOOM_FACTOR: f32 = 0.05;

/// Camera follow behavior configuration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraFollow {
    pub target: ActorId,
    /// Dead zone size in world units; the camera stays put while the target is inside.
    pub dead_zone: Vec2,
    /// Maximum camera speed in world units per second (for smooth following).
    pub max_speed: f32,
    pub smooth: bool,
    /// Fraction of the remaining distance covered per update (0..=1).
    pub smooth_factor: f32,
}

impl CameraFollow {
    pub fn new(target: ActorId) -> Self {
        Self {
            target,
            dead_zone: Vec2::ZERO,
            max_speed: f32::INFINITY,
            smooth: false,
            smooth_factor: 0.1,
        }
    }

    #[must_use]
    pub fn with_dead_zone(mut self, width: f32, height: f32) -> Self {
        self.dead_zone = Vec2::new(width, height);
        self
    }

    #[must_use]
    pub fn with_smoothing(mut self, factor: f32) -> Self {
        self.smooth = true;
        self.smooth_factor = factor.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn with_max_speed(mut self, speed: f32) -> Self {
        self.max_speed = speed;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    focus: Vec2,
    offset: Vec2,
    meter: f32,
    rotation: f32,
    bounds: Option<Bounds>,
    follow: Option<CameraFollow>,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(DEFAULT_METER)
    }
}

impl Camera {
    pub fn new(meter: f32) -> Self {
        Self {
            focus: Vec2::ZERO,
            offset: Vec2::ZERO,
            meter: if meter > 0.0 { meter } else { DEFAULT_METER },
            rotation: 0.0,
            bounds: None,
            follow: None,
        }
    }

    pub fn focus(&self) -> Vec2 {
        self.focus
    }

    /// Moves the focus, clamped into the bounds if any. Stops following.
    pub fn set_focus(&mut self, focus: Vec2) {
        self.follow = None;
        self.focus = self.clamp(focus);
    }

    pub fn move_by(&mut self, delta: Vec2) {
        self.set_focus(self.focus + delta);
    }

    pub fn offset(&self) -> Vec2 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: Vec2) {
        self.offset = offset;
    }

    /// Point shown at the center of the screen.
    pub fn center(&self) -> Vec2 {
        self.focus + self.offset
    }

    /// Pixels per meter.
    pub fn meter(&self) -> f32 {
        self.meter
    }

    pub fn set_meter(&mut self, meter: f32) -> StageResult<()> {
        if !meter.is_finite() || meter <= 0.0 {
            return Err(StageError::argument(format!(
                "pixels per meter must be positive, got {meter}"
            )));
        }
        self.meter = meter;
        Ok(())
    }

    pub fn zoom_in(&mut self, factor: f32) {
        self.meter *= 1.0 + factor.max(0.0);
    }

    pub fn zoom_out(&mut self, factor: f32) {
        self.meter /= 1.0 + factor.max(0.0);
    }

    /// Rotation in degrees, `[0, 360)`.
    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn set_rotation(&mut self, degrees: f32) {
        self.rotation = wrap_degrees(degrees);
    }

    pub fn rotate_by(&mut self, degrees: f32) {
        self.set_rotation(self.rotation + degrees);
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    pub fn set_bounds(&mut self, bounds: Option<Bounds>) {
        self.bounds = bounds;
        self.focus = self.clamp(self.focus);
    }

    pub fn follow(&mut self, follow: CameraFollow) {
        self.follow = Some(follow);
    }

    pub fn following(&self) -> Option<&CameraFollow> {
        self.follow.as_ref()
    }

    pub fn stop_following(&mut self) {
        self.follow = None;
    }

    fn clamp(&self, p: Vec2) -> Vec2 {
        match self.bounds {
            Some(b) => b.clamp(p),
            None => p,
        }
    }

    /// Moves toward the followed target. A vanished target ends following.
    pub(crate) fn update(&mut self, target: Option<Vec2>, dt: f32) {
        let Some(follow) = self.follow else {
            return;
        };
        let Some(target_pos) = target else {
            self.follow = None;
            return;
        };

        let offset = target_pos - self.focus;
        let half = follow.dead_zone * 0.5;
        if offset.x.abs() <= half.x && offset.y.abs() <= half.y {
            return;
        }

        let mut desired = self.focus;
        if offset.x.abs() > half.x {
            desired.x = target_pos.x - offset.x.signum() * half.x;
        }
        if offset.y.abs() > half.y {
            desired.y = target_pos.y - offset.y.signum() * half.y;
        }

        if follow.smooth {
            let diff = desired - self.focus;
            let step = diff * follow.smooth_factor;
            let max_move = follow.max_speed * dt;
            desired = if follow.max_speed.is_finite() && step.length() > max_move {
                self.focus + diff.normalized() * max_move
            } else {
                self.focus + step
            };
        }
        self.focus = self.clamp(desired);
    }
}
