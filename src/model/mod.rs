//! Radial lens-distortion models and their constraint equations.
//!
//! Every model maps an undistorted normalized radius `r` to the observed
//! radius `R` through the barrel polynomial
//!
//! ```text
//! forward:  R = r * (A*r^3 + B*r^2 + C*r + D)
//! inverse:  R = r / (A*r^3 + B*r^2 + C*r + D)
//! ```
//!
//! with `A + B + C + D = 1`, so that a point at normalized radius 1 stays put.
//! The variants differ in which coefficients are free and in how the solver's
//! variables are substituted back into `(A, B, C, D)`.
//!
//! Each variant implements [`ModelEquations`], which bundles the closed-form
//! initial guess, the residual system used by the solver and the coefficient
//! reconstruction.

use nalgebra::{DVector, RealField};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::geometry::PolarObservation;

pub mod linear;
pub mod quadratic;
pub mod quartic;

pub use linear::LinearModel;
pub use quadratic::QuadraticModel;
pub use quartic::{QuarticForwardModel, QuarticGeneralModel, QuarticInverseModel};

#[derive(thiserror::Error, Debug)]
pub enum LensFitError {
    #[error("Expected {expected} points for this model, found {found}")]
    WrongPointCount { expected: usize, found: usize },
    #[error("Degenerate input: {0}")]
    DegenerateInput(String),
    #[error("Solver did not converge: {0}")]
    SolverDidNotConverge(String),
    #[error("Image size must be positive, got {width}x{height}")]
    InvalidImageSize { width: u32, height: u32 },
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("IO Error: {0}")]
    IOError(String),
    #[error("Failed to serialize: {0}")]
    SerializationError(String),
}

impl From<std::io::Error> for LensFitError {
    fn from(err: std::io::Error) -> Self {
        LensFitError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for LensFitError {
    fn from(err: yaml_rust::ScanError) -> Self {
        LensFitError::YamlError(err.to_string())
    }
}

/// The distortion model a set of selected points is fitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    /// `R = r*(A*r^3 + B*r^2 + C*r + D)` solved for `A, E, F` and the line.
    QuarticForward,
    /// `R = r/(A*r^3 + B*r^2 + C*r + D)` solved for `A, E, F` and the line.
    QuarticInverse,
    /// `R = r*(A*r^3 + B*r^2 + C*r + D)` solved for `A, G, H` and the line,
    /// with `D` left unconstrained in sign.
    QuarticGeneral,
    /// `R = r*((1 - E^2)*r^2 + E^2)`.
    Quadratic,
    /// `R = r*(C*r + 1 - C)`.
    Linear,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 5] = [
        ModelVariant::QuarticForward,
        ModelVariant::QuarticInverse,
        ModelVariant::QuarticGeneral,
        ModelVariant::Quadratic,
        ModelVariant::Linear,
    ];

    /// Number of selected points the variant needs. The residual system is
    /// square, so this is also the number of solver variables.
    pub fn required_points(&self) -> usize {
        match self {
            ModelVariant::QuarticForward
            | ModelVariant::QuarticInverse
            | ModelVariant::QuarticGeneral => 5,
            ModelVariant::Quadratic | ModelVariant::Linear => 3,
        }
    }

    /// Whether the fitted polynomial divides rather than multiplies `r`.
    pub fn is_inverse(&self) -> bool {
        matches!(self, ModelVariant::QuarticInverse)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModelVariant::QuarticForward => "quartic_forward",
            ModelVariant::QuarticInverse => "quartic_inverse",
            ModelVariant::QuarticGeneral => "quartic_general",
            ModelVariant::Quadratic => "quadratic",
            ModelVariant::Linear => "linear",
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelVariant {
    type Err = LensFitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quartic" | "quartic_forward" | "forward" => Ok(ModelVariant::QuarticForward),
            "quartic_inverse" | "inverse" => Ok(ModelVariant::QuarticInverse),
            "quartic_general" | "general" => Ok(ModelVariant::QuarticGeneral),
            "quadratic" => Ok(ModelVariant::Quadratic),
            "linear" => Ok(ModelVariant::Linear),
            other => Err(LensFitError::InvalidParams(format!(
                "Unsupported model type: {other}. Supported types: quartic_forward, quartic_inverse, quartic_general, quadratic, linear"
            ))),
        }
    }
}

/// Fitted barrel coefficients `(A, B, C, D)` together with the variant that
/// produced them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoefficientVector {
    pub variant: ModelVariant,
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

/// Newton iterations allowed when inverting the remap.
const NEWTON_MAX_ITERATIONS: usize = 20;
const NEWTON_EPS: f64 = 1e-12;

impl CoefficientVector {
    pub fn new(variant: ModelVariant, coefficients: [f64; 4]) -> Self {
        let [a, b, c, d] = coefficients;
        CoefficientVector {
            variant,
            a,
            b,
            c,
            d,
        }
    }

    /// The remap that leaves every radius unchanged.
    pub fn identity(variant: ModelVariant) -> Self {
        CoefficientVector::new(variant, [0.0, 0.0, 0.0, 1.0])
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.a, self.b, self.c, self.d]
    }

    /// Maps an undistorted normalized radius to the observed one.
    pub fn distort(&self, r: f64) -> f64 {
        let poly = barrel_polynomial(&self.as_array(), r);
        if self.variant.is_inverse() {
            r / poly
        } else {
            r * poly
        }
    }

    /// Derivative of [`Self::distort`] with respect to `r`.
    fn distort_derivative(&self, r: f64) -> f64 {
        let poly = barrel_polynomial(&self.as_array(), r);
        let poly_prime = (3.0 * self.a * r + 2.0 * self.b) * r + self.c;
        if self.variant.is_inverse() {
            (poly - r * poly_prime) / (poly * poly)
        } else {
            poly + r * poly_prime
        }
    }

    /// Inverts [`Self::distort`] with Newton's method, starting from the
    /// observed radius. Returns `None` when the iteration does not settle or
    /// lands on a negative radius.
    pub fn undistort(&self, radius: f64) -> Option<f64> {
        if radius == 0.0 {
            return Some(0.0);
        }

        let mut r = radius;
        for _ in 0..NEWTON_MAX_ITERATIONS {
            let f = self.distort(r) - radius;
            if f.abs() < NEWTON_EPS {
                return (r >= 0.0).then_some(r);
            }
            let slope = self.distort_derivative(r);
            if slope.abs() < f64::EPSILON || !slope.is_finite() {
                return None;
            }
            r -= f / slope;
        }
        None
    }

    /// The distortion operator and argument for the external barrel remap,
    /// e.g. `-distort Barrel "0.02 -0.01 0 0.99"`.
    pub fn barrel_argument(&self) -> String {
        let operator = if self.variant.is_inverse() {
            "BarrelInverse"
        } else {
            "Barrel"
        };
        format!(
            "-distort {} \"{} {} {} {}\"",
            operator, self.a, self.b, self.c, self.d
        )
    }

    pub fn validate(&self) -> Result<(), LensFitError> {
        if self.as_array().iter().any(|v| !v.is_finite()) {
            return Err(LensFitError::InvalidParams(format!(
                "Coefficients must be finite: {:?}",
                self.as_array()
            )));
        }
        Ok(())
    }
}

/// Residual system, initial guess and coefficient reconstruction of one
/// model variant.
///
/// The solver variables always end with the target line `(p, q)`: the
/// straight line `y = p*x + q` in normalized coordinates that the selected
/// points are mapped onto.
pub trait ModelEquations: Clone + Send + Sync + 'static {
    fn variant(&self) -> ModelVariant;

    /// Closed-form starting point for the solver: the line through the first
    /// and last observation, with shape variables at zero distortion.
    fn initial_guess(
        &self,
        observations: &[PolarObservation],
    ) -> Result<DVector<f64>, LensFitError>;

    /// One residual `prediction(r_i) - R_i` per observation.
    fn residuals<T: RealField>(
        &self,
        variables: &DVector<T>,
        observations: &[PolarObservation],
    ) -> DVector<T>;

    fn reconstruct_coefficients(&self, variables: &DVector<f64>) -> CoefficientVector;

    /// The solved target line `(p, q)`.
    fn target_line(&self, variables: &DVector<f64>) -> (f64, f64) {
        let n = variables.len();
        (variables[n - 2], variables[n - 1])
    }
}

pub(crate) fn constant<T: RealField>(value: f64) -> T {
    nalgebra::convert(value)
}

/// `A*r^3 + B*r^2 + C*r + D`
pub(crate) fn barrel_polynomial<T: RealField>(coefficients: &[T; 4], r: T) -> T {
    let [a, b, c, d] = coefficients.clone();
    ((a * r.clone() + b) * r.clone() + c) * r + d
}

/// Radius at which the ray with direction `(c, s)` meets the line
/// `y = p*x + q`.
pub(crate) fn line_radius<T: RealField>(p: T, q: T, observation: &PolarObservation) -> T {
    q / (constant::<T>(observation.sin) - p * constant::<T>(observation.cos))
}

/// Residuals of a forward barrel model whose coefficients are derived from
/// the leading variables; `p` and `q` are the last two variables.
pub(crate) fn forward_residuals<T: RealField>(
    coefficients: &[T; 4],
    variables: &DVector<T>,
    observations: &[PolarObservation],
) -> DVector<T> {
    let n = variables.len();
    let p = variables[n - 2].clone();
    let q = variables[n - 1].clone();

    DVector::from_iterator(
        observations.len(),
        observations.iter().map(|obs| {
            let r = line_radius(p.clone(), q.clone(), obs);
            r.clone() * barrel_polynomial(coefficients, r) - constant::<T>(obs.radius)
        }),
    )
}

/// Line `(p, q)` through the first and last observation in normalized
/// Cartesian coordinates.
pub(crate) fn target_line_guess(
    observations: &[PolarObservation],
) -> Result<(f64, f64), LensFitError> {
    let (first, last) = match (observations.first(), observations.last()) {
        (Some(first), Some(last)) if observations.len() >= 2 => (first, last),
        _ => {
            return Err(LensFitError::InvalidParams(
                "At least two observations are needed for the line guess".to_string(),
            ))
        }
    };

    let (x0, y0) = first.to_cartesian();
    let (x1, y1) = last.to_cartesian();
    let p = (y1 - y0) / (x1 - x0);
    let q = y0 - p * x0;

    if !p.is_finite() || !q.is_finite() {
        return Err(LensFitError::DegenerateInput(
            "first and last points lie on a vertical line, which the target line y = p*x + q cannot represent"
                .to_string(),
        ));
    }
    Ok((p, q))
}

/// Common validation functions for fitted models
pub mod validation {
    use super::*;

    pub fn validate_image_size(width: u32, height: u32) -> Result<(), LensFitError> {
        if width == 0 || height == 0 {
            return Err(LensFitError::InvalidImageSize { width, height });
        }
        Ok(())
    }

    pub fn validate_point_count(
        variant: ModelVariant,
        found: usize,
    ) -> Result<(), LensFitError> {
        let expected = variant.required_points();
        if found != expected {
            return Err(LensFitError::WrongPointCount { expected, found });
        }
        Ok(())
    }

    pub fn validate_variables(
        variant: ModelVariant,
        variables: &DVector<f64>,
    ) -> Result<(), LensFitError> {
        if variables.len() != variant.required_points() {
            return Err(LensFitError::InvalidParams(format!(
                "{} model expects {} variables, got {}",
                variant,
                variant.required_points(),
                variables.len()
            )));
        }
        Ok(())
    }
}
