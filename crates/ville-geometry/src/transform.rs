//! 2-D affine frame transform between the simulation grid and the field.
//!
//! A [`CoordinateTransform`] maps a point from the *source* (simulation)
//! frame to the *target* (field) frame in five fixed steps:
//!
//! ```text
//! p' = R · F · (p − source_origin) · scale + target_origin
//! ```
//!
//! where `F` is the axis-reflection matrix and `R` the counter-clockwise
//! rotation.  Both matrices are derived once at construction.  The inverse
//! runs the same steps backwards using `Rᵀ` (rotations are orthonormal) and
//! `F` itself (reflections are involutions).
//!
//! # Example
//!
//! ```rust
//! use ville_geometry::transform::{AffineTransformConfig, CoordinateTransform};
//! use ville_types::Point2D;
//!
//! let tf = CoordinateTransform::new(AffineTransformConfig {
//!     source_origin: Point2D::new(0.0, 0.0),
//!     target_origin: Point2D::new(78.0, 14.5),
//!     rotation_angle: 90.0,
//!     scale_factor: 1.28,
//!     reflect_x: false,
//!     reflect_y: true,
//! }).unwrap();
//!
//! let field = tf.convert(Point2D::new(10.0, 0.0));
//! assert!((field.x - 78.0).abs() < 1e-9);
//! assert!((field.y - 27.3).abs() < 1e-9);
//!
//! let sim = tf.invert(field);
//! assert!((sim.x - 10.0).abs() < 1e-9);
//! ```

use serde::{Deserialize, Serialize};
use ville_types::{Point2D, VilleError};

/// Lengths below this are treated as zero when fitting point pairs.
const DEGENERATE_EPSILON: f64 = 1e-12;

// ────────────────────────────────────────────────────────────────────────────
// Mat2
// ────────────────────────────────────────────────────────────────────────────

/// Row-major 2×2 matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat2 {
    pub rows: [[f64; 2]; 2],
}

impl Mat2 {
    pub const fn new(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self {
            rows: [[a, b], [c, d]],
        }
    }

    pub fn rotation_deg(angle_deg: f64) -> Self {
        let (sin, cos) = angle_deg.to_radians().sin_cos();
        Self::new(cos, -sin, sin, cos)
    }

    pub fn reflection(reflect_x: bool, reflect_y: bool) -> Self {
        let sx = if reflect_x { -1.0 } else { 1.0 };
        let sy = if reflect_y { -1.0 } else { 1.0 };
        Self::new(sx, 0.0, 0.0, sy)
    }

    pub fn transpose(self) -> Self {
        let [[a, b], [c, d]] = self.rows;
        Self::new(a, c, b, d)
    }

    pub fn apply(self, p: Point2D) -> Point2D {
        let [[a, b], [c, d]] = self.rows;
        Point2D::new(a * p.x + b * p.y, c * p.x + d * p.y)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Parameters of a source → target frame mapping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransformConfig {
    /// Origin of the source frame, expressed in source coordinates.
    pub source_origin: Point2D,
    /// Where the source origin lands, expressed in target coordinates.
    pub target_origin: Point2D,
    /// Counter-clockwise rotation from source to target, in degrees.
    #[serde(default)]
    pub rotation_angle: f64,
    /// Target units per source unit.  Must be strictly positive.
    pub scale_factor: f64,
    /// Negate the x component before rotating.
    #[serde(default)]
    pub reflect_x: bool,
    /// Negate the y component before rotating.
    #[serde(default)]
    pub reflect_y: bool,
}

impl Default for AffineTransformConfig {
    fn default() -> Self {
        Self {
            source_origin: Point2D::default(),
            target_origin: Point2D::default(),
            rotation_angle: 0.0,
            scale_factor: 1.0,
            reflect_x: false,
            reflect_y: false,
        }
    }
}

impl AffineTransformConfig {
    /// Check the invariants required for an invertible mapping.
    pub fn validate(&self) -> Result<(), VilleError> {
        if !self.scale_factor.is_finite() || self.scale_factor <= 0.0 {
            return Err(VilleError::InvalidTransform(format!(
                "scale_factor must be a positive finite number, got {}",
                self.scale_factor
            )));
        }
        if !self.rotation_angle.is_finite() {
            return Err(VilleError::InvalidTransform(format!(
                "rotation_angle must be finite, got {}",
                self.rotation_angle
            )));
        }
        let origins = [self.source_origin, self.target_origin];
        if origins.iter().any(|o| !o.x.is_finite() || !o.y.is_finite()) {
            return Err(VilleError::InvalidTransform(
                "origins must have finite coordinates".to_string(),
            ));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CoordinateTransform
// ────────────────────────────────────────────────────────────────────────────

/// An immutable, validated frame mapping with cached matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateTransform {
    config: AffineTransformConfig,
    rotation: Mat2,
    reflection: Mat2,
}

impl CoordinateTransform {
    /// Build a transform, rejecting non-invertible configurations.
    ///
    /// # Errors
    ///
    /// Returns [`VilleError::InvalidTransform`] when `scale_factor` is not a
    /// positive finite number or any other parameter is non-finite.
    pub fn new(config: AffineTransformConfig) -> Result<Self, VilleError> {
        config.validate()?;
        Ok(Self {
            rotation: Mat2::rotation_deg(config.rotation_angle),
            reflection: Mat2::reflection(config.reflect_x, config.reflect_y),
            config,
        })
    }

    pub fn config(&self) -> &AffineTransformConfig {
        &self.config
    }

    /// Map a source-frame point into the target frame.
    pub fn convert(&self, p: Point2D) -> Point2D {
        let c = &self.config;
        let centered = Point2D::new(p.x - c.source_origin.x, p.y - c.source_origin.y);
        let reflected = self.reflection.apply(centered);
        let rotated = self.rotation.apply(reflected);
        Point2D::new(
            rotated.x * c.scale_factor + c.target_origin.x,
            rotated.y * c.scale_factor + c.target_origin.y,
        )
    }

    /// Map a target-frame point back into the source frame.
    pub fn invert(&self, p: Point2D) -> Point2D {
        let c = &self.config;
        let unscaled = Point2D::new(
            (p.x - c.target_origin.x) / c.scale_factor,
            (p.y - c.target_origin.y) / c.scale_factor,
        );
        let unrotated = self.rotation.transpose().apply(unscaled);
        let unreflected = self.reflection.apply(unrotated);
        Point2D::new(
            unreflected.x + c.source_origin.x,
            unreflected.y + c.source_origin.y,
        )
    }

    pub fn convert_many(&self, points: &[Point2D]) -> Vec<Point2D> {
        points.iter().map(|&p| self.convert(p)).collect()
    }

    pub fn invert_many(&self, points: &[Point2D]) -> Vec<Point2D> {
        points.iter().map(|&p| self.invert(p)).collect()
    }

    /// Fit a transform to known `(source, target)` point pairs.
    ///
    /// Origins are the two centroids.  Scale and rotation come from the first
    /// edge (`points[1] − points[0]`) of each set.  A reflection is inferred
    /// when a third, non-collinear point shows that the two sets have
    /// opposite handedness (the cross products of their first two edges
    /// differ in sign); it is expressed as `reflect_x`.  With only two pairs,
    /// or collinear points, no reflection is inferred.
    ///
    /// # Errors
    ///
    /// * [`VilleError::InsufficientPoints`] – fewer than two pairs.
    /// * [`VilleError::PointCountMismatch`] – the lists differ in length.
    /// * [`VilleError::DegeneratePoints`] – the first edge has zero length in
    ///   either frame.
    pub fn from_point_pairs(
        source_points: &[Point2D],
        target_points: &[Point2D],
    ) -> Result<Self, VilleError> {
        let found = source_points.len().min(target_points.len());
        if found < 2 {
            return Err(VilleError::InsufficientPoints { found });
        }
        if source_points.len() != target_points.len() {
            return Err(VilleError::PointCountMismatch {
                source_count: source_points.len(),
                target_count: target_points.len(),
            });
        }

        let source_edge = sub(source_points[1], source_points[0]);
        let target_edge = sub(target_points[1], target_points[0]);
        let source_len = norm(source_edge);
        let target_len = norm(target_edge);
        if source_len < DEGENERATE_EPSILON || target_len < DEGENERATE_EPSILON {
            return Err(VilleError::DegeneratePoints(
                "first two points coincide in at least one frame".to_string(),
            ));
        }

        let reflect_x = opposite_handedness(source_points, target_points, source_edge, target_edge);
        let oriented = if reflect_x {
            Point2D::new(-source_edge.x, source_edge.y)
        } else {
            source_edge
        };

        let angle = target_edge.y.atan2(target_edge.x) - oriented.y.atan2(oriented.x);

        CoordinateTransform::new(AffineTransformConfig {
            source_origin: centroid(source_points),
            target_origin: centroid(target_points),
            rotation_angle: normalize_degrees(angle.to_degrees()),
            scale_factor: target_len / source_len,
            reflect_x,
            reflect_y: false,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ────────────────────────────────────────────────────────────────────────────

fn sub(a: Point2D, b: Point2D) -> Point2D {
    Point2D::new(a.x - b.x, a.y - b.y)
}

fn norm(v: Point2D) -> f64 {
    v.x.hypot(v.y)
}

fn cross(a: Point2D, b: Point2D) -> f64 {
    a.x * b.y - a.y * b.x
}

fn centroid(points: &[Point2D]) -> Point2D {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point2D::new(sx / n, sy / n)
}

/// Compare the orientation of the first non-collinear triangle in each set.
fn opposite_handedness(
    source_points: &[Point2D],
    target_points: &[Point2D],
    source_edge: Point2D,
    target_edge: Point2D,
) -> bool {
    for (s, t) in source_points.iter().zip(target_points).skip(2) {
        let source_second = sub(*s, source_points[0]);
        let target_second = sub(*t, target_points[0]);
        let source_cross = cross(source_edge, source_second);
        let tolerance = DEGENERATE_EPSILON * norm(source_edge) * norm(source_second).max(1.0);
        if source_cross.abs() <= tolerance {
            continue;
        }
        return source_cross * cross(target_edge, target_second) < 0.0;
    }
    false
}

/// Wrap into `(-180, 180]`.
fn normalize_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped > 180.0 { wrapped - 360.0 } else { wrapped }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn assert_close(a: Point2D, b: Point2D) {
        assert!(
            (a.x - b.x).abs() < EPS && (a.y - b.y).abs() < EPS,
            "expected {b:?}, got {a:?}"
        );
    }

    fn sample_points() -> Vec<Point2D> {
        let mut points = Vec::new();
        for x in [-140.0, -17.5, 0.0, 0.25, 42.0, 139.0] {
            for y in [-99.0, -1.0, 0.0, 13.75, 100.0] {
                points.push(Point2D::new(x, y));
            }
        }
        points
    }

    fn configs() -> Vec<AffineTransformConfig> {
        let mut out = Vec::new();
        for (angle, scale) in [(0.0, 1.0), (90.0, 1.28), (-37.5, 0.5), (213.0, 4.185)] {
            for (rx, ry) in [(false, false), (true, false), (false, true), (true, true)] {
                out.push(AffineTransformConfig {
                    source_origin: Point2D::new(5.0, -3.0),
                    target_origin: Point2D::new(77.93, 14.49),
                    rotation_angle: angle,
                    scale_factor: scale,
                    reflect_x: rx,
                    reflect_y: ry,
                });
            }
        }
        out
    }

    // ── Construction ────────────────────────────────────────────────────────

    #[test]
    fn zero_scale_is_rejected() {
        let cfg = AffineTransformConfig {
            scale_factor: 0.0,
            ..AffineTransformConfig::default()
        };
        assert!(matches!(
            CoordinateTransform::new(cfg),
            Err(VilleError::InvalidTransform(_))
        ));
    }

    #[test]
    fn negative_and_nan_scale_are_rejected() {
        for scale in [-1.0, f64::NAN, f64::INFINITY] {
            let cfg = AffineTransformConfig {
                scale_factor: scale,
                ..AffineTransformConfig::default()
            };
            assert!(CoordinateTransform::new(cfg).is_err(), "scale {scale} accepted");
        }
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let cfg: AffineTransformConfig = serde_json::from_str(
            r#"{"source_origin":{"x":0,"y":0},"target_origin":{"x":1,"y":2},"scale_factor":2}"#,
        )
        .unwrap();
        assert_eq!(cfg.rotation_angle, 0.0);
        assert!(!cfg.reflect_x && !cfg.reflect_y);
    }

    // ── Forward / inverse ───────────────────────────────────────────────────

    #[test]
    fn identity_config_is_noop() {
        let tf = CoordinateTransform::new(AffineTransformConfig {
            source_origin: Point2D::new(4.0, 4.0),
            target_origin: Point2D::new(4.0, 4.0),
            ..AffineTransformConfig::default()
        })
        .unwrap();
        for p in sample_points() {
            assert_close(tf.convert(p), p);
        }
        let default = CoordinateTransform::new(AffineTransformConfig::default()).unwrap();
        assert_close(default.convert(Point2D::new(3.0, 7.0)), Point2D::new(3.0, 7.0));
    }

    #[test]
    fn round_trip_in_both_directions() {
        for cfg in configs() {
            let tf = CoordinateTransform::new(cfg).unwrap();
            for p in sample_points() {
                assert_close(tf.invert(tf.convert(p)), p);
                assert_close(tf.convert(tf.invert(p)), p);
            }
        }
    }

    #[test]
    fn double_reflection_equals_half_turn() {
        let reflected = CoordinateTransform::new(AffineTransformConfig {
            reflect_x: true,
            reflect_y: true,
            ..AffineTransformConfig::default()
        })
        .unwrap();
        let rotated = CoordinateTransform::new(AffineTransformConfig {
            rotation_angle: 180.0,
            ..AffineTransformConfig::default()
        })
        .unwrap();
        for p in sample_points() {
            assert_close(reflected.convert(p), rotated.convert(p));
        }
    }

    #[test]
    fn deployed_style_scenario_is_pinned() {
        let tf = CoordinateTransform::new(AffineTransformConfig {
            source_origin: Point2D::new(0.0, 0.0),
            target_origin: Point2D::new(78.0, 14.5),
            rotation_angle: 90.0,
            scale_factor: 1.28,
            reflect_x: false,
            reflect_y: true,
        })
        .unwrap();

        let field = tf.convert(Point2D::new(10.0, 0.0));
        assert!((field.x - 78.0).abs() < 1e-9, "x = {}", field.x);
        assert!((field.y - 27.3).abs() < 1e-9, "y = {}", field.y);

        // A unit step along simulation +y goes to field +x after the flip.
        let step = tf.convert(Point2D::new(0.0, 1.0));
        assert!((step.x - 79.28).abs() < 1e-9);
        assert!((step.y - 14.5).abs() < 1e-9);
    }

    #[test]
    fn batch_preserves_order() {
        let tf = CoordinateTransform::new(configs()[5]).unwrap();
        let points = sample_points();
        let converted = tf.convert_many(&points);
        assert_eq!(converted.len(), points.len());
        for (p, c) in points.iter().zip(&converted) {
            assert_close(*c, tf.convert(*p));
        }
        let back = tf.invert_many(&converted);
        for (p, b) in points.iter().zip(&back) {
            assert_close(*b, *p);
        }
    }

    // ── from_point_pairs ────────────────────────────────────────────────────

    #[test]
    fn from_point_pairs_recovers_known_transform() {
        let held_out = [Point2D::new(-50.0, 80.0), Point2D::new(11.0, -7.0), Point2D::new(140.0, 99.0)];
        let fit_sources = [Point2D::new(0.0, 0.0), Point2D::new(10.0, 2.0), Point2D::new(3.0, 9.0), Point2D::new(-4.0, 6.0)];

        for cfg in configs() {
            let known = CoordinateTransform::new(cfg).unwrap();
            let targets = known.convert_many(&fit_sources);
            let fitted = CoordinateTransform::from_point_pairs(&fit_sources, &targets).unwrap();
            for p in held_out {
                assert_close(fitted.convert(p), known.convert(p));
            }
        }
    }

    #[test]
    fn clockwise_rotation_is_not_mistaken_for_reflection() {
        let known = CoordinateTransform::new(AffineTransformConfig {
            rotation_angle: -30.0,
            scale_factor: 2.0,
            ..AffineTransformConfig::default()
        })
        .unwrap();
        let sources = [Point2D::new(0.0, 0.0), Point2D::new(1.0, 0.0), Point2D::new(0.0, 1.0)];
        let fitted = CoordinateTransform::from_point_pairs(&sources, &known.convert_many(&sources)).unwrap();
        assert!(!fitted.config().reflect_x);
        assert!((fitted.config().rotation_angle + 30.0).abs() < EPS);
        assert!((fitted.config().scale_factor - 2.0).abs() < EPS);
    }

    #[test]
    fn two_pairs_fit_a_similarity() {
        let sources = [Point2D::new(0.0, 0.0), Point2D::new(2.0, 0.0)];
        let targets = [Point2D::new(10.0, 10.0), Point2D::new(10.0, 14.0)];
        let fitted = CoordinateTransform::from_point_pairs(&sources, &targets).unwrap();
        assert!((fitted.config().rotation_angle - 90.0).abs() < EPS);
        assert!((fitted.config().scale_factor - 2.0).abs() < EPS);
        assert_close(fitted.convert(sources[1]), targets[1]);
    }

    #[test]
    fn from_point_pairs_rejects_bad_input() {
        let one = [Point2D::new(0.0, 0.0)];
        assert!(matches!(
            CoordinateTransform::from_point_pairs(&one, &one),
            Err(VilleError::InsufficientPoints { found: 1 })
        ));

        let two = [Point2D::new(0.0, 0.0), Point2D::new(1.0, 0.0)];
        let three = [Point2D::new(0.0, 0.0), Point2D::new(1.0, 0.0), Point2D::new(0.0, 1.0)];
        assert!(matches!(
            CoordinateTransform::from_point_pairs(&two, &three),
            Err(VilleError::PointCountMismatch { source_count: 2, target_count: 3 })
        ));

        let same = [Point2D::new(1.0, 1.0), Point2D::new(1.0, 1.0)];
        assert!(matches!(
            CoordinateTransform::from_point_pairs(&same, &two),
            Err(VilleError::DegeneratePoints(_))
        ));
    }

    #[test]
    fn normalize_degrees_wraps_into_half_open_range() {
        assert!((normalize_degrees(270.0) + 90.0).abs() < EPS);
        assert!((normalize_degrees(-190.0) - 170.0).abs() < EPS);
        assert!((normalize_degrees(180.0) - 180.0).abs() < EPS);
    }
}
