//! The `optimization` module fits barrel distortion models to selected points.
//!
//! This module defines the [`Optimizer`] trait, which outlines the common
//! interface for fitting one model variant, and the top-level [`solve`] and
//! [`solve_with_options`] entry points that dispatch on [`ModelVariant`].
//!
//! The fitting process involves:
//! 1. A closed-form estimation step giving the initial guess (the line through
//!    the first and last point, no distortion).
//! 2. A non-linear solve (Levenberg-Marquardt from `tiny_solver`) of the
//!    square residual system.
//! 3. Reconstruction of the barrel coefficients from the solved variables.

use log::info;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use tiny_solver::optimizer::OptimizerOptions;
use yaml_rust::{Yaml, YamlLoader};

pub mod lens_correction;

pub use lens_correction::LensCorrectionOptimizer;

use crate::geometry::{normalize_points, Point};
use crate::model::{
    validation, CoefficientVector, LensFitError, LinearModel, ModelEquations, ModelVariant,
    QuadraticModel, QuarticForwardModel, QuarticGeneralModel, QuarticInverseModel,
};
use crate::util::ResidualStats;

/// A trait for fitting one distortion model to a set of observations.
pub trait Optimizer {
    /// Computes the closed-form initial guess for the solver variables.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the guess was computed and stored.
    /// * `Err(LensFitError)` - If the observations do not admit a guess, e.g.
    ///   the first and last point define a vertical line.
    fn linear_estimation(&mut self) -> Result<(), LensFitError>
    where
        Self: Sized;

    /// Performs the non-linear solve starting from the initial guess.
    ///
    /// # Arguments
    ///
    /// * `options` - Iteration budget, acceptance tolerance and verbosity.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If every residual was driven below the tolerance.
    /// * `Err(LensFitError)` - [`LensFitError::SolverDidNotConverge`] if not.
    fn optimize(&mut self, options: &SolverOptions) -> Result<(), LensFitError>;

    /// The solved variables, model shape variables followed by `(p, q)`.
    fn get_variables(&self) -> Result<DVector<f64>, LensFitError>;

    /// The barrel coefficients reconstructed from the solved variables.
    fn get_coefficients(&self) -> Result<CoefficientVector, LensFitError>;
}

/// Solver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Maximum number of Levenberg-Marquardt iterations.
    pub max_iterations: usize,
    /// Largest absolute residual (normalized radius units) accepted as a
    /// converged fit.
    pub residual_tolerance: f64,
    /// Log solver progress at info level.
    pub verbose: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            max_iterations: 100,
            residual_tolerance: 1e-9,
            verbose: false,
        }
    }
}

fn yaml_usize(node: &Yaml, key: &str, default: usize) -> Result<usize, LensFitError> {
    match &node[key] {
        Yaml::BadValue => Ok(default),
        value => value
            .as_i64()
            .filter(|v| *v >= 0)
            .map(|v| v as usize)
            .ok_or_else(|| LensFitError::InvalidParams(format!("Invalid {key}"))),
    }
}

fn yaml_f64(node: &Yaml, key: &str, default: f64) -> Result<f64, LensFitError> {
    match &node[key] {
        Yaml::BadValue => Ok(default),
        value => value
            .as_f64()
            .or_else(|| value.as_i64().map(|v| v as f64))
            .ok_or_else(|| LensFitError::InvalidParams(format!("Invalid {key}"))),
    }
}

fn yaml_bool(node: &Yaml, key: &str, default: bool) -> Result<bool, LensFitError> {
    match &node[key] {
        Yaml::BadValue => Ok(default),
        value => value
            .as_bool()
            .ok_or_else(|| LensFitError::InvalidParams(format!("Invalid {key}"))),
    }
}

impl SolverOptions {
    /// Reads the `solver` section of a YAML file. Missing keys keep their
    /// defaults.
    ///
    /// ```yaml
    /// solver:
    ///   max_iterations: 50
    ///   residual_tolerance: 1.0e-10
    ///   verbose: true
    /// ```
    pub fn load_from_yaml(path: &str) -> Result<Self, LensFitError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;
        let doc = docs
            .first()
            .ok_or_else(|| LensFitError::YamlError("Empty YAML document".to_string()))?;
        let node = &doc["solver"];
        if node.is_badvalue() {
            return Err(LensFitError::InvalidParams(
                "Missing solver section".to_string(),
            ));
        }

        let defaults = SolverOptions::default();
        let options = SolverOptions {
            max_iterations: yaml_usize(node, "max_iterations", defaults.max_iterations)?,
            residual_tolerance: yaml_f64(node, "residual_tolerance", defaults.residual_tolerance)?,
            verbose: yaml_bool(node, "verbose", defaults.verbose)?,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), LensFitError> {
        if self.max_iterations == 0 {
            return Err(LensFitError::InvalidParams(
                "max_iterations must be positive".to_string(),
            ));
        }
        if !self.residual_tolerance.is_finite() || self.residual_tolerance <= 0.0 {
            return Err(LensFitError::InvalidParams(
                "residual_tolerance must be finite and positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Maps onto tiny-solver settings. The decrease thresholds are pushed
    /// far below the tolerance so the solver keeps iterating until the
    /// residuals bottom out.
    pub(crate) fn to_optimizer_options(&self) -> OptimizerOptions {
        OptimizerOptions {
            max_iteration: self.max_iterations,
            verbosity_level: 0,
            min_abs_error_decrease_threshold: 1e-32,
            min_rel_error_decrease_threshold: 1e-14,
            min_error_threshold: (self.residual_tolerance * 1e-6).powi(2),
            ..OptimizerOptions::default()
        }
    }
}

/// Result of a successful fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LensFit {
    pub coefficients: CoefficientVector,
    /// The straight line `y = p*x + q`, in normalized coordinates, that the
    /// selected points map onto.
    pub target_line: (f64, f64),
    pub initial_guess: Vec<f64>,
    pub variables: Vec<f64>,
    pub residuals: ResidualStats,
}

impl LensFit {
    pub fn save_to_yaml(&self, path: &str) -> Result<(), LensFitError> {
        let yaml_string = serde_yaml::to_string(self)
            .map_err(|e| LensFitError::SerializationError(e.to_string()))?;

        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, LensFitError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LensFitError::SerializationError(e.to_string()))
    }
}

fn fit_model<M: ModelEquations>(
    model: M,
    points: &[Point],
    width: u32,
    height: u32,
    options: &SolverOptions,
) -> Result<LensFit, LensFitError> {
    let observations = normalize_points(points, width, height)?;
    let mut optimizer = LensCorrectionOptimizer::new(model, observations)?;
    optimizer.linear_estimation()?;
    optimizer.optimize(options)?;
    optimizer.report()
}

/// Fits `variant` to the selected points and returns the full report.
///
/// # Arguments
///
/// * `points` - Selected pixel points, first to last along the curve
/// * `variant` - The model to fit
/// * `width`, `height` - Image size in pixels
/// * `options` - Solver configuration
///
/// # Errors
///
/// * [`LensFitError::WrongPointCount`] if `points.len()` differs from
///   [`ModelVariant::required_points`].
/// * [`LensFitError::DegenerateInput`] if a point is at the image center or
///   the first and last point admit no target line guess.
/// * [`LensFitError::SolverDidNotConverge`] if the solve fails.
pub fn solve_with_options(
    points: &[Point],
    variant: ModelVariant,
    width: u32,
    height: u32,
    options: &SolverOptions,
) -> Result<LensFit, LensFitError> {
    options.validate()?;
    validation::validate_point_count(variant, points.len())?;

    if options.verbose {
        info!(
            "Fitting {} model to {} points on a {}x{} image",
            variant,
            points.len(),
            width,
            height
        );
    }

    let fit = match variant {
        ModelVariant::QuarticForward => {
            fit_model(QuarticForwardModel, points, width, height, options)
        }
        ModelVariant::QuarticInverse => {
            fit_model(QuarticInverseModel, points, width, height, options)
        }
        ModelVariant::QuarticGeneral => {
            fit_model(QuarticGeneralModel, points, width, height, options)
        }
        ModelVariant::Quadratic => fit_model(QuadraticModel, points, width, height, options),
        ModelVariant::Linear => fit_model(LinearModel, points, width, height, options),
    }?;

    if options.verbose {
        info!(
            "Coefficients: {:?}, {:?}",
            fit.coefficients.as_array(),
            fit.residuals
        );
    }
    Ok(fit)
}

/// Fits `variant` to the selected points with default [`SolverOptions`].
pub fn solve(
    points: &[Point],
    variant: ModelVariant,
    width: u32,
    height: u32,
) -> Result<CoefficientVector, LensFitError> {
    solve_with_options(points, variant, width, height, &SolverOptions::default())
        .map(|fit| fit.coefficients)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::sample_line_points;
    use approx::assert_relative_eq;

    const WIDTH: u32 = 1000;
    const HEIGHT: u32 = 800;

    fn points_on_line(
        coefficients: &CoefficientVector,
        p: f64,
        q: f64,
        angles_deg: &[f64],
    ) -> Vec<Point> {
        let angles: Vec<f64> = angles_deg.iter().map(|a| a.to_radians()).collect();
        sample_line_points(coefficients, p, q, &angles, WIDTH, HEIGHT).unwrap()
    }

    fn assert_coefficients_near(got: &CoefficientVector, want: &CoefficientVector, tol: f64) {
        for (g, w) in got.as_array().iter().zip(want.as_array().iter()) {
            assert_relative_eq!(*g, *w, epsilon = tol);
        }
    }

    #[test]
    fn test_quartic_forward_scenario() {
        // Center (500, 400), scale 400; the angles span 90 degrees.
        let seed = CoefficientVector::new(ModelVariant::QuarticForward, [0.02, -0.01, 0.0, 0.99]);
        let points = points_on_line(&seed, 0.1, 0.6, &[45.0, 67.5, 90.0, 112.5, 135.0]);

        let fitted = solve(&points, ModelVariant::QuarticForward, WIDTH, HEIGHT).unwrap();
        assert_eq!(fitted.variant, ModelVariant::QuarticForward);
        assert_coefficients_near(&fitted, &seed, 1e-4);
    }

    #[test]
    fn test_quartic_inverse_round_trip() {
        let seed = CoefficientVector::new(ModelVariant::QuarticInverse, [0.02, -0.01, 0.0, 0.99]);
        let points = points_on_line(&seed, 0.3, 0.5, &[30.0, 60.0, 90.0, 120.0, 150.0]);

        let fitted = solve(&points, ModelVariant::QuarticInverse, WIDTH, HEIGHT).unwrap();
        assert_coefficients_near(&fitted, &seed, 1e-6);
        assert!(fitted.barrel_argument().starts_with("-distort BarrelInverse"));
    }

    #[test]
    fn test_quartic_general_scenario() {
        let seed = CoefficientVector::new(ModelVariant::QuarticGeneral, [0.02, -0.01, 0.0, 0.99]);
        let points = points_on_line(&seed, 0.1, 0.6, &[45.0, 67.5, 90.0, 112.5, 135.0]);

        let fitted = solve(&points, ModelVariant::QuarticGeneral, WIDTH, HEIGHT).unwrap();
        assert_coefficients_near(&fitted, &seed, 1e-6);
    }

    #[test]
    fn test_linear_scenario() {
        let seed = CoefficientVector::new(ModelVariant::Linear, [0.0, 0.0, 0.1, 0.9]);
        let points = points_on_line(&seed, 0.1, 0.6, &[45.0, 90.0, 135.0]);

        let fitted = solve(&points, ModelVariant::Linear, WIDTH, HEIGHT).unwrap();
        assert_relative_eq!(fitted.c, 0.1, epsilon = 1e-6);
        assert_relative_eq!(fitted.d, 0.9, epsilon = 1e-6);
        assert_eq!(fitted.a, 0.0);
        assert_eq!(fitted.b, 0.0);
    }

    #[test]
    fn test_quadratic_round_trip() {
        let seed = CoefficientVector::new(ModelVariant::Quadratic, [0.0, 0.05, 0.0, 0.95]);
        let points = points_on_line(&seed, 0.3, 0.5, &[30.0, 90.0, 150.0]);

        let fitted = solve(&points, ModelVariant::Quadratic, WIDTH, HEIGHT).unwrap();
        assert_coefficients_near(&fitted, &seed, 1e-6);
    }

    #[test]
    fn test_identity_for_every_variant() {
        for variant in ModelVariant::ALL {
            let identity = CoefficientVector::identity(variant);
            let angles: &[f64] = if variant.required_points() == 5 {
                &[45.0, 67.5, 90.0, 112.5, 135.0]
            } else {
                &[45.0, 90.0, 135.0]
            };
            let points = points_on_line(&identity, 0.1, 0.6, angles);

            let fitted = solve(&points, variant, WIDTH, HEIGHT).unwrap();
            assert_coefficients_near(&fitted, &identity, 1e-9);
        }
    }

    #[test]
    fn test_nearly_straight_line_runs_solver() {
        // Identity points rounded to a millionth of a pixel: the guess misses
        // by 1e-11 to 1e-9, above the tolerance, so the fit has to go through
        // Levenberg-Marquardt.
        let options = SolverOptions {
            residual_tolerance: 1e-12,
            ..SolverOptions::default()
        };
        for variant in ModelVariant::ALL {
            let identity = CoefficientVector::identity(variant);
            let angles: &[f64] = if variant.required_points() == 5 {
                &[45.0, 67.5, 90.0, 112.5, 135.0]
            } else {
                &[45.0, 90.0, 135.0]
            };
            let points: Vec<Point> = points_on_line(&identity, 0.1, 0.6, angles)
                .iter()
                .map(|p| {
                    Point::new(
                        (p.x * 1e6).round() / 1e6,
                        (p.y * 1e6).round() / 1e6,
                    )
                })
                .collect();

            let fit = solve_with_options(&points, variant, WIDTH, HEIGHT, &options).unwrap();
            assert_ne!(fit.variables, fit.initial_guess, "{variant} skipped the solver");
            assert!(fit.residuals.max <= options.residual_tolerance);
            assert_coefficients_near(&fit.coefficients, &identity, 1e-4);
        }
    }

    #[test]
    fn test_wrong_point_count_for_every_variant() {
        let identity = CoefficientVector::identity(ModelVariant::QuarticForward);
        let six = points_on_line(&identity, 0.1, 0.6, &[40.0, 60.0, 80.0, 100.0, 120.0, 140.0]);

        for variant in ModelVariant::ALL {
            let required = variant.required_points();
            for count in [required - 1, required + 1] {
                match solve(&six[..count], variant, WIDTH, HEIGHT) {
                    Err(LensFitError::WrongPointCount { expected, found }) => {
                        assert_eq!(expected, required);
                        assert_eq!(found, count);
                    }
                    other => panic!("Expected WrongPointCount for {variant}, got {:?}", other),
                }
            }
        }
    }

    #[test]
    fn test_point_at_center_is_rejected() {
        let points = vec![
            Point::new(700.0, 600.0),
            Point::new(500.0, 400.0),
            Point::new(300.0, 600.0),
        ];
        for variant in [ModelVariant::Quadratic, ModelVariant::Linear] {
            assert!(matches!(
                solve(&points, variant, WIDTH, HEIGHT),
                Err(LensFitError::DegenerateInput(_))
            ));
        }
    }

    #[test]
    fn test_vertical_guess_line_is_rejected() {
        // First and last point share x, so the guessed line is vertical.
        let points = vec![
            Point::new(800.0, 200.0),
            Point::new(820.0, 400.0),
            Point::new(800.0, 600.0),
        ];
        assert!(matches!(
            solve(&points, ModelVariant::Linear, WIDTH, HEIGHT),
            Err(LensFitError::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_iteration_budget_exhausted() {
        let seed = CoefficientVector::new(ModelVariant::QuarticForward, [0.02, -0.01, 0.0, 0.99]);
        let points = points_on_line(&seed, 0.3, 0.5, &[30.0, 60.0, 90.0, 120.0, 150.0]);
        let options = SolverOptions {
            max_iterations: 1,
            ..SolverOptions::default()
        };

        assert!(matches!(
            solve_with_options(&points, ModelVariant::QuarticForward, WIDTH, HEIGHT, &options),
            Err(LensFitError::SolverDidNotConverge(_))
        ));
    }

    #[test]
    fn test_invalid_options() {
        let identity = CoefficientVector::identity(ModelVariant::Linear);
        let points = points_on_line(&identity, 0.1, 0.6, &[45.0, 90.0, 135.0]);
        let options = SolverOptions {
            residual_tolerance: -1.0,
            ..SolverOptions::default()
        };
        assert!(matches!(
            solve_with_options(&points, ModelVariant::Linear, WIDTH, HEIGHT, &options),
            Err(LensFitError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_load_options_from_yaml() {
        let path = std::env::temp_dir().join("lens_tools_solver_options.yaml");
        fs::write(
            &path,
            "solver:\n  max_iterations: 50\n  residual_tolerance: 1.0e-10\n",
        )
        .unwrap();

        let options = SolverOptions::load_from_yaml(path.to_str().unwrap()).unwrap();
        assert_eq!(options.max_iterations, 50);
        assert_relative_eq!(options.residual_tolerance, 1e-10);
        assert!(!options.verbose);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_fit_report_serialization() {
        let seed = CoefficientVector::new(ModelVariant::Linear, [0.0, 0.0, 0.1, 0.9]);
        let points = points_on_line(&seed, 0.1, 0.6, &[45.0, 90.0, 135.0]);
        let fit =
            solve_with_options(&points, ModelVariant::Linear, WIDTH, HEIGHT, &SolverOptions::default())
                .unwrap();

        let json = fit.to_json().unwrap();
        let parsed: LensFit = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.coefficients.variant, ModelVariant::Linear);
        assert!(json.contains("\"variant\": \"linear\""));

        let path = std::env::temp_dir().join("lens_tools_fit.yaml");
        fit.save_to_yaml(path.to_str().unwrap()).unwrap();
        let saved = fs::read_to_string(&path).unwrap();
        assert!(saved.contains("target_line"));
        fs::remove_file(&path).ok();
    }
}
