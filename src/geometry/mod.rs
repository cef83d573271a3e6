use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::model::{validation, CoefficientVector, LensFitError};

/// A selected point in image pixel coordinates.
pub type Point = Point2<f64>;

/// Image center and the scale that normalizes radii.
///
/// The scale is the smaller half-dimension, so normalized radius 1 touches the
/// nearest image border.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationFrame {
    pub cx: f64,
    pub cy: f64,
    pub scale: f64,
}

/// A point in normalized polar form around the image center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolarObservation {
    /// Distance from the center divided by [`NormalizationFrame::scale`].
    pub radius: f64,
    /// Sine of the angle from the center (not normalized).
    pub sin: f64,
    /// Cosine of the angle from the center (not normalized).
    pub cos: f64,
}

impl NormalizationFrame {
    pub fn new(width: u32, height: u32) -> Result<Self, LensFitError> {
        validation::validate_image_size(width, height)?;
        let cx = width as f64 / 2.0;
        let cy = height as f64 / 2.0;
        Ok(NormalizationFrame {
            cx,
            cy,
            scale: cx.min(cy),
        })
    }

    /// Converts one pixel point; `index` only labels the error.
    pub fn observe(&self, index: usize, point: &Point) -> Result<PolarObservation, LensFitError> {
        let dx = point.x - self.cx;
        let dy = point.y - self.cy;
        let distance = (dx * dx + dy * dy).sqrt();

        if distance == 0.0 {
            return Err(LensFitError::DegenerateInput(format!(
                "point {index} ({}, {}) coincides with the image center, its direction is undefined",
                point.x, point.y
            )));
        }
        if !distance.is_finite() {
            return Err(LensFitError::InvalidParams(format!(
                "point {index} has non-finite coordinates"
            )));
        }

        Ok(PolarObservation {
            radius: distance / self.scale,
            sin: dy / distance,
            cos: dx / distance,
        })
    }

    /// Pixel position of a normalized radius along a direction.
    pub fn to_pixel(&self, radius: f64, sin: f64, cos: f64) -> Point {
        Point::new(
            self.cx + self.scale * radius * cos,
            self.cy + self.scale * radius * sin,
        )
    }
}

impl PolarObservation {
    /// Angle from the image center, `atan2(sin, cos)`.
    pub fn angle(&self) -> f64 {
        self.sin.atan2(self.cos)
    }

    /// Normalized Cartesian position `(x, y)` relative to the center.
    pub fn to_cartesian(&self) -> (f64, f64) {
        (self.radius * self.cos, self.radius * self.sin)
    }
}

/// Converts selected pixel points into normalized polar observations.
///
/// # Arguments
///
/// * `points` - The selected points, in selection order
/// * `width` - The width of the image in pixels
/// * `height` - The height of the image in pixels
///
/// # Errors
///
/// * [`LensFitError::InvalidImageSize`] if either dimension is zero.
/// * [`LensFitError::DegenerateInput`] if a point sits exactly on the image center.
pub fn normalize_points(
    points: &[Point],
    width: u32,
    height: u32,
) -> Result<Vec<PolarObservation>, LensFitError> {
    let frame = NormalizationFrame::new(width, height)?;
    points
        .iter()
        .enumerate()
        .map(|(index, point)| frame.observe(index, point))
        .collect()
}

/// Generate pixel points on a straight line seen through a distortion model.
///
/// The undistorted line is `y = p*x + q` in normalized coordinates. For each
/// angle the ray from the image center is intersected with the line, the
/// resulting radius is pushed through `coefficients` and converted back to
/// pixels.
///
/// # Arguments
///
/// * `coefficients` - The distortion applied to the line
/// * `p`, `q` - Slope and intercept of the undistorted line
/// * `angles` - Ray angles in radians, in the order the points are returned
/// * `width`, `height` - Image size in pixels
///
/// # Returns
///
/// One pixel point per angle, or [`LensFitError::InvalidParams`] when a ray
/// misses the line.
pub fn sample_line_points(
    coefficients: &CoefficientVector,
    p: f64,
    q: f64,
    angles: &[f64],
    width: u32,
    height: u32,
) -> Result<Vec<Point>, LensFitError> {
    let frame = NormalizationFrame::new(width, height)?;

    angles
        .iter()
        .map(|&angle| {
            let (sin, cos) = angle.sin_cos();
            let r = q / (sin - p * cos);
            if !r.is_finite() || r <= 0.0 {
                return Err(LensFitError::InvalidParams(format!(
                    "ray at angle {angle} does not meet the line y = {p}*x + {q}"
                )));
            }
            Ok(frame.to_pixel(coefficients.distort(r), sin, cos))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelVariant;
    use approx::assert_relative_eq;

    #[test]
    fn test_frame() {
        let frame = NormalizationFrame::new(1000, 800).unwrap();
        assert_eq!(frame.cx, 500.0);
        assert_eq!(frame.cy, 400.0);
        assert_eq!(frame.scale, 400.0);

        let tall = NormalizationFrame::new(300, 900).unwrap();
        assert_eq!(tall.scale, 150.0);
    }

    #[test]
    fn test_frame_rejects_empty_image() {
        assert!(matches!(
            NormalizationFrame::new(0, 800),
            Err(LensFitError::InvalidImageSize { width: 0, height: 800 })
        ));
    }

    #[test]
    fn test_normalize_points() {
        let points = vec![Point::new(900.0, 400.0), Point::new(500.0, 100.0), Point::new(200.0, 800.0)];
        let observations = normalize_points(&points, 1000, 800).unwrap();

        assert_eq!(observations.len(), 3);

        assert_relative_eq!(observations[0].radius, 1.0);
        assert_relative_eq!(observations[0].cos, 1.0);
        assert_relative_eq!(observations[0].sin, 0.0);

        assert_relative_eq!(observations[1].radius, 0.75);
        assert_relative_eq!(observations[1].sin, -1.0);
        assert_relative_eq!(observations[1].cos, 0.0);

        // 3-4-5 triangle: dx = -300, dy = 400
        assert_relative_eq!(observations[2].radius, 1.25);
        assert_relative_eq!(observations[2].sin, 0.8);
        assert_relative_eq!(observations[2].cos, -0.6);
        assert_relative_eq!(
            observations[2].angle(),
            400.0_f64.atan2(-300.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_point_at_center_is_degenerate() {
        let points = vec![Point::new(100.0, 100.0), Point::new(500.0, 400.0)];
        match normalize_points(&points, 1000, 800) {
            Err(LensFitError::DegenerateInput(msg)) => assert!(msg.contains("point 1")),
            other => panic!("Expected DegenerateInput, got {:?}", other),
        }
    }

    #[test]
    fn test_sample_line_points_round_trip() {
        let coefficients = CoefficientVector::new(ModelVariant::QuarticForward, [0.02, -0.01, 0.0, 0.99]);
        let angles: Vec<f64> = [45.0_f64, 90.0, 135.0].iter().map(|a| a.to_radians()).collect();
        let points = sample_line_points(&coefficients, 0.1, 0.6, &angles, 1000, 800).unwrap();
        let observations = normalize_points(&points, 1000, 800).unwrap();

        for (obs, angle) in observations.iter().zip(angles.iter()) {
            assert_relative_eq!(obs.angle(), *angle, epsilon = 1e-12);
            let r = coefficients.undistort(obs.radius).unwrap();
            // The undistorted point lies on y = 0.1*x + 0.6.
            assert_relative_eq!(r * obs.sin, 0.1 * r * obs.cos + 0.6, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_sample_line_points_rejects_missed_ray() {
        let identity = CoefficientVector::identity(ModelVariant::Linear);
        // The ray pointing away from the line never meets it.
        let result = sample_line_points(&identity, 0.0, 0.5, &[-std::f64::consts::FRAC_PI_2], 1000, 800);
        assert!(matches!(result, Err(LensFitError::InvalidParams(_))));
    }
}
