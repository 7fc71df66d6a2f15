//! World-unit <-> engine-unit translation.
//!
//! Every conversion between the public API (meters, degrees) and the embedded
//! rigid-body engine (engine units, radians) goes through [`UnitScale`].
//! Nothing else in the crate multiplies by the scale factor.

use serde::{Deserialize, Serialize};

use crate::error::{StageError, StageResult};
use crate::math::{Bounds, Vec2};

// Rapier is private implementation detail: do NOT re-export it.
use rapier2d::prelude::*;

/// Shape description in world units, relative to the owning body's origin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ShapeDesc {
    Circle { center: Vec2, radius: f32 },
    /// Axis-aligned rectangle whose lower-left corner sits at `offset`.
    Rectangle { offset: Vec2, width: f32, height: f32 },
    /// Convex polygon. Either winding is accepted; the engine side is always
    /// counter-clockwise.
    Polygon { points: Vec<Vec2> },
}

impl ShapeDesc {
    pub fn circle(center: Vec2, radius: f32) -> Self {
        Self::Circle { center, radius }
    }

    pub fn rectangle(offset: Vec2, width: f32, height: f32) -> Self {
        Self::Rectangle {
            offset,
            width,
            height,
        }
    }

    pub fn polygon(points: impl Into<Vec<Vec2>>) -> Self {
        Self::Polygon {
            points: points.into(),
        }
    }

    /// Checks the geometry without building anything.
    pub fn validate(&self) -> StageResult<()> {
        match self {
            ShapeDesc::Circle { center, radius } => {
                check_point(*center)?;
                check_extent("radius", *radius)
            }
            ShapeDesc::Rectangle {
                offset,
                width,
                height,
            } => {
                check_point(*offset)?;
                check_extent("width", *width)?;
                check_extent("height", *height)
            }
            ShapeDesc::Polygon { points } => convex_ccw(points).map(|_| ()),
        }
    }

    /// Local bounding box in world units.
    pub fn bounds(&self) -> Bounds {
        match self {
            ShapeDesc::Circle { center, radius } => Bounds::new(
                *center - Vec2::new(*radius, *radius),
                *center + Vec2::new(*radius, *radius),
            ),
            ShapeDesc::Rectangle {
                offset,
                width,
                height,
            } => Bounds::from_corner(*offset, *width, *height),
            ShapeDesc::Polygon { points } => {
                Bounds::enclosing(points).unwrap_or(Bounds::new(Vec2::ZERO, Vec2::ZERO))
            }
        }
    }

    /// Returns true when both shapes describe the same geometry within `eps`.
    pub fn approx_eq(&self, other: &ShapeDesc, eps: f32) -> bool {
        match (self, other) {
            (
                ShapeDesc::Circle { center, radius },
                ShapeDesc::Circle {
                    center: c2,
                    radius: r2,
                },
            ) => center.abs_diff_eq(*c2, eps) && (radius - r2).abs() <= eps,
            (
                ShapeDesc::Rectangle {
                    offset,
                    width,
                    height,
                },
                ShapeDesc::Rectangle {
                    offset: o2,
                    width: w2,
                    height: h2,
                },
            ) => {
                offset.abs_diff_eq(*o2, eps)
                    && (width - w2).abs() <= eps
                    && (height - h2).abs() <= eps
            }
            (ShapeDesc::Polygon { points }, ShapeDesc::Polygon { points: p2 }) => {
                points.len() == p2.len()
                    && points.iter().zip(p2).all(|(a, b)| a.abs_diff_eq(*b, eps))
            }
            _ => false,
        }
    }
}

/// Engine-side shape: the collision shape plus its translation on the body,
/// both in engine units.
#[derive(Clone)]
pub(crate) struct EngineShape {
    pub shape: SharedShape,
    pub offset: Vector<Real>,
}

impl std::fmt::Debug for EngineShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineShape")
            .field("shape", &self.shape.shape_type())
            .field("offset", &self.offset)
            .finish()
    }
}

/// Scale between world units (meters) and engine units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitScale {
    engine_units_per_meter: f32,
}

impl Default for UnitScale {
    fn default() -> Self {
        Self {
            engine_units_per_meter: 1.0,
        }
    }
}

impl UnitScale {
    pub fn new(engine_units_per_meter: f32) -> StageResult<Self> {
        if !engine_units_per_meter.is_finite() || engine_units_per_meter <= 0.0 {
            return Err(StageError::argument(format!(
                "unit scale must be positive, got {engine_units_per_meter}"
            )));
        }
        Ok(Self {
            engine_units_per_meter,
        })
    }

    pub fn engine_units_per_meter(&self) -> f32 {
        self.engine_units_per_meter
    }

    pub fn length_to_engine(&self, meters: f32) -> f32 {
        meters * self.engine_units_per_meter
    }

    pub fn length_to_world(&self, units: f32) -> f32 {
        units / self.engine_units_per_meter
    }

    pub fn angle_to_engine(&self, degrees: f32) -> f32 {
        degrees.to_radians()
    }

    pub fn angle_to_world(&self, radians: f32) -> f32 {
        radians.to_degrees()
    }

    /// Area density. Mass is preserved across the scale, so density shrinks
    /// with the square of the factor.
    pub fn density_to_engine(&self, density: f32) -> f32 {
        density / (self.engine_units_per_meter * self.engine_units_per_meter)
    }

    pub fn density_to_world(&self, density: f32) -> f32 {
        density * self.engine_units_per_meter * self.engine_units_per_meter
    }

    /// Forces and impulses scale linearly (mass is unit-free).
    pub fn force_to_engine(&self, v: Vec2) -> Vector<Real> {
        self.vector_to_engine(v)
    }

    pub fn torque_to_engine(&self, torque: f32) -> f32 {
        torque * self.engine_units_per_meter * self.engine_units_per_meter
    }

    pub fn vector_to_engine(&self, v: Vec2) -> Vector<Real> {
        vector![
            v.x * self.engine_units_per_meter,
            v.y * self.engine_units_per_meter
        ]
    }

    pub fn vector_to_world(&self, v: &Vector<Real>) -> Vec2 {
        Vec2::new(
            v.x / self.engine_units_per_meter,
            v.y / self.engine_units_per_meter,
        )
    }

    pub fn point_to_engine(&self, p: Vec2) -> Point<Real> {
        point![
            p.x * self.engine_units_per_meter,
            p.y * self.engine_units_per_meter
        ]
    }

    pub fn point_to_world(&self, p: &Point<Real>) -> Vec2 {
        Vec2::new(
            p.x / self.engine_units_per_meter,
            p.y / self.engine_units_per_meter,
        )
    }

    /// Builds the engine shape for a world-space description.
    pub(crate) fn to_engine_shape(&self, desc: &ShapeDesc) -> StageResult<EngineShape> {
        match desc {
            ShapeDesc::Circle { center, radius } => {
                desc.validate()?;
                Ok(EngineShape {
                    shape: SharedShape::ball(self.length_to_engine(*radius)),
                    offset: self.vector_to_engine(*center),
                })
            }
            ShapeDesc::Rectangle {
                offset,
                width,
                height,
            } => {
                desc.validate()?;
                let half = Vec2::new(width * 0.5, height * 0.5);
                Ok(EngineShape {
                    shape: SharedShape::cuboid(
                        self.length_to_engine(half.x),
                        self.length_to_engine(half.y),
                    ),
                    offset: self.vector_to_engine(*offset + half),
                })
            }
            ShapeDesc::Polygon { points } => {
                let ccw = convex_ccw(points)?;
                let engine_points: Vec<Point<Real>> =
                    ccw.iter().map(|p| self.point_to_engine(*p)).collect();
                let shape = SharedShape::convex_polyline(engine_points).ok_or_else(|| {
                    StageError::shape("engine rejected the polygon as degenerate")
                })?;
                Ok(EngineShape {
                    shape,
                    offset: vector![0.0, 0.0],
                })
            }
        }
    }

    /// Recovers the world-space description of an engine shape.
    pub(crate) fn to_world_shape(&self, engine: &EngineShape) -> StageResult<ShapeDesc> {
        let offset = self.vector_to_world(&engine.offset);
        match engine.shape.as_typed_shape() {
            TypedShape::Ball(ball) => Ok(ShapeDesc::Circle {
                center: offset,
                radius: self.length_to_world(ball.radius),
            }),
            TypedShape::Cuboid(cuboid) => {
                let half = self.vector_to_world(&cuboid.half_extents);
                Ok(ShapeDesc::Rectangle {
                    offset: offset - half,
                    width: half.x * 2.0,
                    height: half.y * 2.0,
                })
            }
            TypedShape::ConvexPolygon(poly) => Ok(ShapeDesc::Polygon {
                points: poly
                    .points()
                    .iter()
                    .map(|p| self.point_to_world(p) + offset)
                    .collect(),
            }),
            _ => Err(StageError::shape("engine shape has no world-space counterpart")),
        }
    }
}

fn check_point(p: Vec2) -> StageResult<()> {
    if p.is_finite() {
        Ok(())
    } else {
        Err(StageError::geometry(format!("non-finite coordinate {p:?}")))
    }
}

fn check_extent(name: &str, value: f32) -> StageResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(StageError::geometry(format!(
            "{name} must be positive, got {value}"
        )))
    }
}

/// Validates a convex polygon and returns its vertices in counter-clockwise order.
fn convex_ccw(points: &[Vec2]) -> StageResult<Vec<Vec2>> {
    if points.len() < 3 {
        return Err(StageError::geometry(format!(
            "polygon needs at least 3 vertices, got {}",
            points.len()
        )));
    }
    for p in points {
        check_point(*p)?;
    }

    let n = points.len();
    let mut winding = 0.0f32;
    let mut turning = 0.0f32;
    for i in 0..n {
        let e1 = points[(i + 1) % n] - points[i];
        let e2 = points[(i + 2) % n] - points[(i + 1) % n];
        let cross = e1.cross(e2);
        if cross.abs() <= 1e-7 * e1.length() * e2.length() || e1.length_squared() == 0.0 {
            return Err(StageError::geometry(
                "polygon has duplicate or collinear vertices",
            ));
        }
        if winding == 0.0 {
            winding = cross.signum();
        } else if cross.signum() != winding {
            return Err(StageError::shape("polygon is not convex"));
        }
        turning += cross.atan2(e1.dot(e2));
    }

    // A star-shaped self-intersection turns consistently but more than once.
    if (turning.abs() - std::f32::consts::TAU).abs() > 1e-3 {
        return Err(StageError::shape("polygon is self-intersecting"));
    }

    let mut ccw = points.to_vec();
    if winding < 0.0 {
        ccw.reverse();
    }
    Ok(ccw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale() -> UnitScale {
        UnitScale::new(32.0).unwrap()
    }

    fn round_trip(desc: &ShapeDesc) -> ShapeDesc {
        let s = scale();
        let engine = s.to_engine_shape(desc).unwrap();
        s.to_world_shape(&engine).unwrap()
    }

    #[test]
    fn supported_shapes_round_trip() {
        let shapes = [
            ShapeDesc::circle(Vec2::new(0.5, -0.25), 0.75),
            ShapeDesc::rectangle(Vec2::new(-1.0, 2.0), 3.0, 0.5),
            ShapeDesc::polygon(vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(2.0, 0.0),
                Vec2::new(2.5, 1.0),
                Vec2::new(0.5, 2.0),
            ]),
        ];
        for shape in &shapes {
            assert!(round_trip(shape).approx_eq(shape, 1e-5), "{shape:?}");
        }
    }

    #[test]
    fn clockwise_polygon_is_reordered() {
        let cw = ShapeDesc::polygon(vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 0.0),
        ]);
        let back = round_trip(&cw);
        let ShapeDesc::Polygon { points } = &back else {
            panic!("expected polygon, got {back:?}");
        };
        assert_eq!(points.len(), 3);
        assert!(back.bounds().width() > 0.99 && back.bounds().height() > 0.99);
        assert!(round_trip(&back).approx_eq(&back, 1e-5));
    }

    #[test]
    fn concave_polygon_is_a_shape_error() {
        let dart = ShapeDesc::polygon(vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(2.0, 1.0),
            Vec2::new(0.0, 2.0),
            Vec2::new(0.5, 1.0),
        ]);
        assert!(matches!(
            scale().to_engine_shape(&dart),
            Err(StageError::Shape(_))
        ));
    }

    #[test]
    fn self_intersecting_star_is_rejected() {
        let star: Vec<Vec2> = (0..5)
            .map(|i| Vec2::from_degrees(90.0 + 144.0 * i as f32))
            .collect();
        assert!(matches!(
            ShapeDesc::polygon(star).validate(),
            Err(StageError::Shape(_))
        ));
    }

    #[test]
    fn non_positive_dimensions_are_invalid_geometry() {
        let bad = [
            ShapeDesc::circle(Vec2::ZERO, 0.0),
            ShapeDesc::circle(Vec2::ZERO, -1.0),
            ShapeDesc::rectangle(Vec2::ZERO, 1.0, 0.0),
            ShapeDesc::rectangle(Vec2::ZERO, f32::NAN, 1.0),
            ShapeDesc::polygon(vec![Vec2::ZERO, Vec2::new(1.0, 0.0), Vec2::new(2.0, 0.0)]),
        ];
        for shape in &bad {
            assert!(
                matches!(scale().to_engine_shape(shape), Err(StageError::InvalidGeometry(_))),
                "{shape:?}"
            );
        }
    }

    #[test]
    fn scalar_conversions_preserve_mass() {
        let s = scale();
        // 1m x 1m box at density 10 weighs 10 kg in either unit system.
        let engine_area = s.length_to_engine(1.0) * s.length_to_engine(1.0);
        assert!((s.density_to_engine(10.0) * engine_area - 10.0).abs() < 1e-3);
        assert!((s.density_to_world(s.density_to_engine(2.5)) - 2.5).abs() < 1e-6);
        assert!((s.angle_to_world(s.angle_to_engine(123.0)) - 123.0).abs() < 1e-4);
    }

    #[test]
    fn zero_scale_is_rejected() {
        assert!(UnitScale::new(0.0).is_err());
        assert!(UnitScale::new(-2.0).is_err());
    }
}
