//! Linear barrel model fitted through three points.
//!
//! `R = r*(C*r + 1 - C)`: `D = 1 - C` and `A = B = 0`. Variables are
//! `[C, p, q]`.

use nalgebra::{DVector, RealField};

use crate::geometry::PolarObservation;
use crate::model::{
    constant, forward_residuals, target_line_guess, CoefficientVector, LensFitError,
    ModelEquations, ModelVariant,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct LinearModel;

impl LinearModel {
    pub fn coefficients<T: RealField>(variables: &DVector<T>) -> [T; 4] {
        let c = variables[0].clone();
        let d = constant::<T>(1.0) - c.clone();
        [constant::<T>(0.0), constant::<T>(0.0), c, d]
    }
}

impl ModelEquations for LinearModel {
    fn variant(&self) -> ModelVariant {
        ModelVariant::Linear
    }

    fn initial_guess(
        &self,
        observations: &[PolarObservation],
    ) -> Result<DVector<f64>, LensFitError> {
        let (p, q) = target_line_guess(observations)?;
        Ok(DVector::from_vec(vec![0.0, p, q]))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconstruction_shape() {
        let coefficients =
            LinearModel.reconstruct_coefficients(&DVector::from_vec(vec![0.1, 0.0, 0.5]));
        assert_eq!(coefficients.as_array(), [0.0, 0.0, 0.1, 0.9]);
        assert_eq!(coefficients.variant, ModelVariant::Linear);
    }

    #[test]
    fn test_guess_on_horizontal_line() {
        let observations = vec![
            PolarObservation {
                radius: 2.0_f64.sqrt(),
                sin: 0.5_f64.sqrt(),
                cos: 0.5_f64.sqrt(),
            },
            PolarObservation {
                radius: 1.0,
                sin: 1.0,
                cos: 0.0,
            },
            PolarObservation {
                radius: 2.0_f64.sqrt(),
                sin: 0.5_f64.sqrt(),
                cos: -(0.5_f64.sqrt()),
            },
        ];
        let guess = LinearModel.initial_guess(&observations).unwrap();
        assert_eq!(guess[0], 0.0);
        assert!(guess[1].abs() < 1e-12);
        assert!((guess[2] - 1.0).abs() < 1e-12);
    }
}
