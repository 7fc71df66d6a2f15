//! Actors: positioned visual objects that may carry a physics body.
//!
//! Actor geometry is relative to the actor position, which is the lower-left
//! corner of the bounding box. The default fixture mirrors the visual shape.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::body::{BodyState, BodyType};
use crate::error::{StageError, StageResult};
use crate::fixture::{FixtureSet, FixtureSpec, PhysicsProfile};
use crate::layer::LayerId;
use crate::math::{Bounds, Vec2};
use crate::resources::{Resource, ResourceProvider, DEFAULT_FONT_ADVANCE};
use crate::units::ShapeDesc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(u32);

impl ActorId {
    pub fn from_u32(id: u32) -> Self {
        Self(id)
    }

    pub fn to_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the actor looks like, before resources are resolved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ActorKind {
    Circle { diameter: f32 },
    Rectangle { width: f32, height: f32 },
    Polygon { points: Vec<Vec2> },
    /// Image sized from its pixel dimensions.
    Image {
        resource: String,
        pixels_per_meter: f32,
    },
    /// Single line of text of the given line height.
    Text {
        content: String,
        height: f32,
        font: Option<String>,
    },
}

/// Resolved visual extent of an actor, world units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ActorShape {
    Circle { diameter: f32 },
    Rectangle { width: f32, height: f32 },
    Polygon { points: Vec<Vec2> },
}

impl ActorShape {
    /// Fixture shape derived from the visual geometry.
    pub fn fixture_shape(&self) -> ShapeDesc {
        match self {
            ActorShape::Circle { diameter } => {
                let r = diameter * 0.5;
                ShapeDesc::circle(Vec2::new(r, r), r)
            }
            ActorShape::Rectangle { width, height } => {
                ShapeDesc::rectangle(Vec2::ZERO, *width, *height)
            }
            ActorShape::Polygon { points } => ShapeDesc::polygon(points.clone()),
        }
    }

    pub fn local_bounds(&self) -> Bounds {
        self.fixture_shape().bounds()
    }
}

impl ActorKind {
    pub(crate) fn resolve(&self, resources: Option<&dyn ResourceProvider>) -> StageResult<ActorShape> {
        let shape = match self {
            ActorKind::Circle { diameter } => ActorShape::Circle {
                diameter: *diameter,
            },
            ActorKind::Rectangle { width, height } => ActorShape::Rectangle {
                width: *width,
                height: *height,
            },
            ActorKind::Polygon { points } => ActorShape::Polygon {
                points: points.clone(),
            },
            ActorKind::Image {
                resource,
                pixels_per_meter,
            } => {
                if !pixels_per_meter.is_finite() || *pixels_per_meter <= 0.0 {
                    return Err(StageError::geometry(format!(
                        "pixels per meter must be positive, got {pixels_per_meter}"
                    )));
                }
                match resources.and_then(|r| r.get(resource)) {
                    Some(Resource::Image { width, height }) => ActorShape::Rectangle {
                        width: width as f32 / pixels_per_meter,
                        height: height as f32 / pixels_per_meter,
                    },
                    _ => {
                        return Err(StageError::argument(format!(
                            "no image resource named {resource:?}"
                        )))
                    }
                }
            }
            ActorKind::Text {
                content,
                height,
                font,
            } => {
                let advance = match font.as_deref().and_then(|f| resources?.get(f)) {
                    Some(Resource::Font { advance }) => advance,
                    _ => DEFAULT_FONT_ADVANCE,
                };
                let chars = content.chars().count().max(1) as f32;
                ActorShape::Rectangle {
                    width: chars * height * advance,
                    height: *height,
                }
            }
        };
        shape.fixture_shape().validate()?;
        Ok(shape)
    }
}

/// Builder for a new actor.
#[derive(Clone, Debug)]
pub struct ActorDesc {
    pub(crate) kind: ActorKind,
    pub(crate) name: Option<String>,
    pub(crate) position: Vec2,
    pub(crate) rotation: f32,
    pub(crate) profile: Option<PhysicsProfile>,
    pub(crate) body_type: Option<BodyType>,
    pub(crate) fixtures: Option<Vec<FixtureSpec>>,
    pub(crate) visible: bool,
}

impl ActorDesc {
    pub fn new(kind: ActorKind) -> Self {
        Self {
            kind,
            name: None,
            position: Vec2::ZERO,
            rotation: 0.0,
            profile: None,
            body_type: None,
            fixtures: None,
            visible: true,
        }
    }

    pub fn circle(diameter: f32) -> Self {
        Self::new(ActorKind::Circle { diameter })
    }

    pub fn rectangle(width: f32, height: f32) -> Self {
        Self::new(ActorKind::Rectangle { width, height })
    }

    pub fn polygon(points: impl Into<Vec<Vec2>>) -> Self {
        Self::new(ActorKind::Polygon {
            points: points.into(),
        })
    }

    pub fn image(resource: impl Into<String>, pixels_per_meter: f32) -> Self {
        Self::new(ActorKind::Image {
            resource: resource.into(),
            pixels_per_meter,
        })
    }

    pub fn text(content: impl Into<String>, height: f32) -> Self {
        Self::new(ActorKind::Text {
            content: content.into(),
            height,
            font: None,
        })
    }

    #[must_use]
    pub fn with_font(mut self, font: impl Into<String>) -> Self {
        if let ActorKind::Text { font: f, .. } = &mut self.kind {
            *f = Some(font.into());
        }
        self
    }

    #[must_use]
    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.position = Vec2::new(x, y);
        self
    }

    #[must_use]
    pub fn with_rotation(mut self, degrees: f32) -> Self {
        self.rotation = degrees;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_profile(mut self, profile: PhysicsProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Body type applied on insertion, overriding the profile's.
    #[must_use]
    pub fn with_body_type(mut self, body_type: BodyType) -> Self {
        self.body_type = Some(body_type);
        self
    }

    /// Custom fixtures replacing the one derived from the visual shape.
    #[must_use]
    pub fn with_fixtures(mut self, fixtures: Vec<FixtureSpec>) -> Self {
        self.fixtures = Some(fixtures);
        self
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

#[derive(Debug)]
pub struct Actor {
    id: ActorId,
    name: Option<String>,
    kind: ActorKind,
    pub(crate) shape: ActorShape,
    pub(crate) layer: LayerId,
    pub(crate) position: Vec2,
    pub(crate) rotation: f32,
    pub(crate) profile: PhysicsProfile,
    pub(crate) state: BodyState,
    pub(crate) fixtures: FixtureSet,
    pub(crate) visible: bool,
}

impl Actor {
    pub(crate) fn new(
        id: ActorId,
        layer: LayerId,
        desc: &ActorDesc,
        shape: ActorShape,
        profile: PhysicsProfile,
    ) -> Self {
        Self {
            id,
            name: desc.name.clone(),
            kind: desc.kind.clone(),
            shape,
            layer,
            position: desc.position,
            rotation: desc.rotation,
            profile,
            state: BodyState::None,
            fixtures: FixtureSet::new(),
            visible: desc.visible,
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> &ActorKind {
        &self.kind
    }

    pub fn shape(&self) -> &ActorShape {
        &self.shape
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    /// Lower-left corner in world units, as of the last physics sync.
    pub fn position(&self) -> Vec2 {
        self.position
    }

    /// Rotation in degrees.
    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn state(&self) -> BodyState {
        self.state
    }

    pub fn has_body(&self) -> bool {
        self.state.body_type().is_some()
    }

    pub fn profile(&self) -> &PhysicsProfile {
        &self.profile
    }

    pub fn fixtures(&self) -> &FixtureSet {
        &self.fixtures
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// World-space bounding box, ignoring rotation.
    pub fn bounds(&self) -> Bounds {
        let local = self.shape.local_bounds();
        Bounds::new(local.min + self.position, local.max + self.position)
    }

    /// Center of the bounding box in world units.
    pub fn center(&self) -> Vec2 {
        self.bounds().center()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceCache;

    #[test]
    fn circle_fixture_sits_inside_bounding_box() {
        let shape = ActorShape::Circle { diameter: 2.0 };
        assert_eq!(shape.fixture_shape(), ShapeDesc::circle(Vec2::new(1.0, 1.0), 1.0));
        assert_eq!(shape.local_bounds(), Bounds::new(Vec2::ZERO, Vec2::new(2.0, 2.0)));
    }

    #[test]
    fn image_size_comes_from_resource() {
        let cache = ResourceCache::new().with("crate.png", Resource::Image { width: 64, height: 32 });
        let kind = ActorKind::Image {
            resource: "crate.png".into(),
            pixels_per_meter: 32.0,
        };
        assert_eq!(
            kind.resolve(Some(&cache)).unwrap(),
            ActorShape::Rectangle {
                width: 2.0,
                height: 1.0
            }
        );
        assert!(kind.resolve(None).is_err());
    }

    #[test]
    fn text_width_uses_font_advance() {
        let cache = ResourceCache::new().with("mono", Resource::Font { advance: 0.5 });
        let desc = ActorDesc::text("abcd", 2.0).with_font("mono");
        assert_eq!(
            desc.kind.resolve(Some(&cache)).unwrap(),
            ActorShape::Rectangle {
                width: 4.0,
                height: 2.0
            }
        );
    }

    #[test]
    fn degenerate_geometry_is_rejected() {
        assert!(matches!(
            ActorKind::Rectangle {
                width: 0.0,
                height: 1.0
            }
            .resolve(None),
            Err(StageError::InvalidGeometry(_))
        ));
    }
}
