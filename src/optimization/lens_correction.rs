//! Cost function and optimizer for fitting a barrel model to selected points.
//!
//! The residual system is square (one equation per point, as many points as
//! variables), so Levenberg-Marquardt acts as a root finder here: a fit is
//! only accepted when every residual is driven below the configured
//! tolerance.

use crate::geometry::PolarObservation;
use crate::model::{validation, CoefficientVector, LensFitError, ModelEquations};
use crate::optimization::{LensFit, Optimizer, SolverOptions};
use crate::util::compute_residual_stats;

use log::{debug, info, warn};
use nalgebra::DVector;
use std::collections::HashMap;
use std::fmt;
use tiny_solver::factors::Factor;
use tiny_solver::{LevenbergMarquardtOptimizer, Optimizer as TinySolverOptimizer};

/// Name of the single parameter block holding the model variables.
const PARAMS_KEY: &str = "lens";

/// Residuals below this (or below the configured tolerance, whichever is
/// smaller) are treated as an exact fit and skip the solver.
const EXACT_FIT_EPS: f64 = 1e-14;

/// Cost function for `tiny_solver` optimization of a [`ModelEquations`]
/// variant.
#[derive(Debug, Clone)]
struct LensCorrectionCost<M: ModelEquations> {
    model: M,
    observations: Vec<PolarObservation>,
}

impl<T: nalgebra::RealField, M: ModelEquations> Factor<T> for LensCorrectionCost<M> {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        self.model.residuals(&params[0], &self.observations)
    }
}

/// Fits one model variant to a fixed set of observations.
#[derive(Clone)]
pub struct LensCorrectionOptimizer<M: ModelEquations> {
    model: M,
    observations: Vec<PolarObservation>,
    initial_guess: Option<DVector<f64>>,
    variables: Option<DVector<f64>>,
}

impl<M: ModelEquations> LensCorrectionOptimizer<M> {
    /// Creates a new optimizer.
    ///
    /// # Errors
    ///
    /// [`LensFitError::WrongPointCount`] if the number of observations does
    /// not match what the model variant needs.
    pub fn new(model: M, observations: Vec<PolarObservation>) -> Result<Self, LensFitError> {
        validation::validate_point_count(model.variant(), observations.len())?;
        Ok(LensCorrectionOptimizer {
            model,
            observations,
            initial_guess: None,
            variables: None,
        })
    }

    /// Builds the fit report once [`Optimizer::optimize`] has succeeded.
    pub fn report(&self) -> Result<LensFit, LensFitError> {
        let variables = self.solved_variables()?;
        let initial_guess = self.initial_guess.clone().unwrap_or_else(|| variables.clone());
        let residuals = self.model.residuals(variables, &self.observations);
        let stats = compute_residual_stats(residuals.as_slice())
            .map_err(|e| LensFitError::SolverDidNotConverge(e.to_string()))?;

        Ok(LensFit {
            coefficients: self.model.reconstruct_coefficients(variables),
            target_line: self.model.target_line(variables),
            initial_guess: initial_guess.iter().copied().collect(),
            variables: variables.iter().copied().collect(),
            residuals: stats,
        })
    }

    fn solved_variables(&self) -> Result<&DVector<f64>, LensFitError> {
        self.variables.as_ref().ok_or_else(|| {
            LensFitError::InvalidParams("The model has not been optimized yet".to_string())
        })
    }
}

fn max_abs(values: &DVector<f64>) -> f64 {
    values.iter().fold(0.0_f64, |m, v| m.max(v.abs()))
}

fn all_finite(values: &DVector<f64>) -> bool {
    values.iter().all(|v| v.is_finite())
}

impl<M: ModelEquations> fmt::Debug for LensCorrectionOptimizer<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LensCorrectionOptimizer Summary:\n model: {}\n observations: {}\n initial guess: {:?}\n variables: {:?}",
            self.model.variant(),
            self.observations.len(),
            self.initial_guess.as_ref().map(|v| v.as_slice().to_vec()),
            self.variables.as_ref().map(|v| v.as_slice().to_vec()),
        )
    }
}

impl<M: ModelEquations> Optimizer for LensCorrectionOptimizer<M> {
    /// Computes the closed-form initial guess: the line through the first
    /// and last observation with zero distortion.
    fn linear_estimation(&mut self) -> Result<(), LensFitError>
    where
        Self: Sized,
    {
        let guess = self.model.initial_guess(&self.observations)?;
        validation::validate_variables(self.model.variant(), &guess)?;
        debug!(
            "{} initial guess: {:?}",
            self.model.variant(),
            guess.as_slice()
        );
        self.initial_guess = Some(guess);
        Ok(())
    }

    /// Solves the residual system with Levenberg-Marquardt from the initial
    /// guess, running [`Optimizer::linear_estimation`] first if needed.
    ///
    /// # Errors
    ///
    /// [`LensFitError::SolverDidNotConverge`] if the residuals are not finite
    /// at the guess, if the solver fails, or if the largest residual after
    /// solving exceeds `options.residual_tolerance`.
    fn optimize(&mut self, options: &SolverOptions) -> Result<(), LensFitError> {
        options.validate()?;
        if self.initial_guess.is_none() {
            self.linear_estimation()?;
        }
        let initial = match &self.initial_guess {
            Some(guess) => guess.clone(),
            None => {
                return Err(LensFitError::InvalidParams(
                    "Initial guess is missing".to_string(),
                ))
            }
        };

        debug!("Observations: {:?}", self.observations);

        let initial_residuals = self.model.residuals(&initial, &self.observations);
        if !all_finite(&initial_residuals) {
            warn!(
                "{} residuals are not finite at the initial guess {:?}",
                self.model.variant(),
                initial.as_slice()
            );
            return Err(LensFitError::SolverDidNotConverge(
                "residuals are not finite at the initial guess".to_string(),
            ));
        }

        if max_abs(&initial_residuals) <= EXACT_FIT_EPS.min(options.residual_tolerance) {
            debug!("Initial guess already fits the observations");
            self.variables = Some(initial);
            return Ok(());
        }

        let mut problem = tiny_solver::Problem::new();
        let cost_function = LensCorrectionCost {
            model: self.model.clone(),
            observations: self.observations.clone(),
        };
        problem.add_residual_block(
            self.observations.len(),
            &[PARAMS_KEY],
            Box::new(cost_function),
            None,
        );

        let mut initial_values = HashMap::new();
        initial_values.insert(PARAMS_KEY.to_string(), initial);

        if options.verbose {
            info!(
                "Starting {} fit with tiny-solver Levenberg-Marquardt...",
                self.model.variant()
            );
        }

        let optimizer = LevenbergMarquardtOptimizer::default();
        let result = optimizer
            .optimize(
                &problem,
                &initial_values,
                Some(options.to_optimizer_options()),
            )
            .ok_or_else(|| {
                warn!("Levenberg-Marquardt reported failure");
                LensFitError::SolverDidNotConverge("Levenberg-Marquardt failed".to_string())
            })?;

        let solved = result.get(PARAMS_KEY).cloned().ok_or_else(|| {
            LensFitError::SolverDidNotConverge("solver returned no variables".to_string())
        })?;

        let residuals = self.model.residuals(&solved, &self.observations);
        if !all_finite(&solved) || !all_finite(&residuals) {
            warn!("{} fit produced non-finite values", self.model.variant());
            return Err(LensFitError::SolverDidNotConverge(
                "solution is not finite".to_string(),
            ));
        }

        let max_residual = max_abs(&residuals);
        if max_residual > options.residual_tolerance {
            warn!(
                "{} fit rejected: max residual {:e} exceeds tolerance {:e}",
                self.model.variant(),
                max_residual,
                options.residual_tolerance
            );
            return Err(LensFitError::SolverDidNotConverge(format!(
                "max residual {max_residual:e} exceeds tolerance {:e}",
                options.residual_tolerance
            )));
        }

        if options.verbose {
            info!(
                "Optimization finished, max residual {:e}, variables {:?}",
                max_residual,
                solved.as_slice()
            );
        }

        self.variables = Some(solved);
        Ok(())
    }

    fn get_variables(&self) -> Result<DVector<f64>, LensFitError> {
        self.solved_variables().cloned()
    }

    fn get_coefficients(&self) -> Result<CoefficientVector, LensFitError> {
        let variables = self.solved_variables()?;
        let coefficients = self.model.reconstruct_coefficients(variables);
        coefficients.validate()?;
        Ok(coefficients)
    }
}
