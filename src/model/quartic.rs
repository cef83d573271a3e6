//! Quartic barrel models with all four coefficients free.
//!
//! The solver does not work on `(A, B, C, D)` directly. It solves for
//! `[A, E, F, p, q]` and derives the remaining coefficients so that
//! `A + B + C + D = 1` always holds and `D = E^2` stays non-negative:
//!
//! | model   | B                  | C                   | D     |
//! |---------|--------------------|---------------------|-------|
//! | forward | `F² + E² − 2 − 2A` | `3 + A − F² − 2E²`  | `E²`  |
//! | inverse | `E² − F² − 2A`     | `1 + A + F² − 2E²`  | `E²`  |
//!
//! `A = 0, E = 1, F = 1` gives the identity remap for both.
//!
//! The general forward model solves for `[A, G, H, p, q]` instead, with
//! `B = G² − 2 − 2A`, `C = 3 − A − H²` and `D = 1 − A − B − C`. `D` can turn
//! negative there. `A = 0, G = √2, H = √3` is its identity.

use nalgebra::{DVector, RealField};

use crate::geometry::PolarObservation;
use crate::model::{
    barrel_polynomial, constant, forward_residuals, line_radius, target_line_guess,
    CoefficientVector, LensFitError, ModelEquations, ModelVariant,
};

/// `R = r*(A*r^3 + B*r^2 + C*r + D)` fitted through five points.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuarticForwardModel;

/// `R = r/(A*r^3 + B*r^2 + C*r + D)` fitted through five points.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuarticInverseModel;

/// Forward quartic without the `D = E²` constraint.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuarticGeneralModel;

fn quartic_guess(observations: &[PolarObservation]) -> Result<DVector<f64>, LensFitError> {
    let (p, q) = target_line_guess(observations)?;
    Ok(DVector::from_vec(vec![0.0, 1.0, 1.0, p, q]))
}

impl QuarticForwardModel {
    pub fn coefficients<T: RealField>(variables: &DVector<T>) -> [T; 4] {
        let a = variables[0].clone();
        let e2 = variables[1].clone() * variables[1].clone();
        let f2 = variables[2].clone() * variables[2].clone();
        let two = constant::<T>(2.0);

        let b = f2.clone() + e2.clone() - two.clone() - two.clone() * a.clone();
        let c = constant::<T>(3.0) + a.clone() - f2 - two * e2.clone();
        [a, b, c, e2]
    }
}

impl ModelEquations for QuarticForwardModel {
    fn variant(&self) -> ModelVariant {
        ModelVariant::QuarticForward
    }

    fn initial_guess(
        &self,
        observations: &[PolarObservation],
    ) -> Result<DVector<f64>, LensFitError> {
        quartic_guess(observations)
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

impl QuarticInverseModel {
    pub fn coefficients<T: RealField>(variables: &DVector<T>) -> [T; 4] {
        let a = variables[0].clone();
        let e2 = variables[1].clone() * variables[1].clone();
        let f2 = variables[2].clone() * variables[2].clone();
        let two = constant::<T>(2.0);

        let b = e2.clone() - f2.clone() - two.clone() * a.clone();
        let c = constant::<T>(1.0) + a.clone() + f2 - two * e2.clone();
        [a, b, c, e2]
    }
}

impl ModelEquations for QuarticInverseModel {
    fn variant(&self) -> ModelVariant {
        ModelVariant::QuarticInverse
    }

    fn initial_guess(
        &self,
        observations: &[PolarObservation],
    ) -> Result<DVector<f64>, LensFitError> {
        quartic_guess(observations)
    }

    fn residuals<T: RealField>(
        &self,
        variables: &DVector<T>,
        observations: &[PolarObservation],
    ) -> DVector<T> {
        let coefficients = Self::coefficients(variables);
        let p = variables[3].clone();
        let q = variables[4].clone();

        DVector::from_iterator(
            observations.len(),
            observations.iter().map(|obs| {
                let r = line_radius(p.clone(), q.clone(), obs);
                r.clone() / barrel_polynomial(&coefficients, r) - constant::<T>(obs.radius)
            }),
        )
    }

    fn reconstruct_coefficients(&self, variables: &DVector<f64>) -> CoefficientVector {
        CoefficientVector::new(self.variant(), Self::coefficients(variables))
    }
}

impl QuarticGeneralModel {
    pub fn coefficients<T: RealField>(variables: &DVector<T>) -> [T; 4] {
        let a = variables[0].clone();
        let g2 = variables[1].clone() * variables[1].clone();
        let h2 = variables[2].clone() * variables[2].clone();
        let two = constant::<T>(2.0);

        let b = g2 - two.clone() - two * a.clone();
        let c = constant::<T>(3.0) - a.clone() - h2;
        let d = constant::<T>(1.0) - a.clone() - b.clone() - c.clone();
        [a, b, c, d]
    }
}

impl ModelEquations for QuarticGeneralModel {
    fn variant(&self) -> ModelVariant {
        ModelVariant::QuarticGeneral
    }

    fn initial_guess(
        &self,
        observations: &[PolarObservation],
    ) -> Result<DVector<f64>, LensFitError> {
        let (p, q) = target_line_guess(observations)?;
        Ok(DVector::from_vec(vec![
            0.0,
            std::f64::consts::SQRT_2,
            3.0_f64.sqrt(),
            p,
            q,
        ]))
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
