//! Quadratic barrel model fitted through three points.
//!
//! `R = r*((1 - E^2)*r^2 + E^2)`, i.e. `B = 1 - E^2`, `D = E^2` and
//! `A = C = 0`. Variables are `[E, p, q]`.

use nalgebra::{DVector, RealField};

use crate::geometry::PolarObservation;
use crate::model::{
    constant, forward_residuals, target_line_guess, CoefficientVector, LensFitError,
    ModelEquations, ModelVariant,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct QuadraticModel;

impl QuadraticModel {
    pub fn coefficients<T: RealField>(variables: &DVector<T>) -> [T; 4] {
        let d = variables[0].clone() * variables[0].clone();
        let b = constant::<T>(1.0) - d.clone();
        [constant::<T>(0.0), b, constant::<T>(0.0), d]
    }
}

impl ModelEquations for QuadraticModel {
    fn variant(&self) -> ModelVariant {
        ModelVariant::Quadratic
    }

    // E starts at 1 (no distortion). E = 0 would be a stationary point of
    // E^2 and the solver could never leave it.
    fn initial_guess(
        &self,
        observations: &[PolarObservation],
    ) -> Result<DVector<f64>, LensFitError> {
        let (p, q) = target_line_guess(observations)?;
        Ok(DVector::from_vec(vec![1.0, p, q]))
    }

    fn residuals<T: RealField>(
        &self,
        variables: &DVector<T>,
        observations: &[PolarObservation],
    ) -> DVector<T> {
        forward_residuals(&Self::coefficients(variables), variables, observations)
    }

    fn reconstruct_coefficients(&self, variables: &DVector<f64>) -> CoefficientVector {
        CoefficientVector::new(self.variant(), Self::coefficients(variables))
    }
}
