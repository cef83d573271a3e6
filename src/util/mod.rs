use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(thiserror::Error, Debug)]
pub enum UtilError {
    #[error("No residuals to summarize")]
    ZeroResiduals,
    #[error("Numerical error in computation: {0}")]
    NumericalError(String),
}

/// Summary of the absolute residuals of a fit, in normalized radius units.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualStats {
    pub rmse: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

impl fmt::Debug for ResidualStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Residuals [ rmse: {:e}, min: {:e}, max: {:e}, mean: {:e}, stddev: {:e}, median: {:e} ]",
            self.rmse, self.min, self.max, self.mean, self.stddev, self.median
        )
    }
}

pub fn compute_residual_stats(residuals: &[f64]) -> Result<ResidualStats, UtilError> {
    if residuals.is_empty() {
        return Err(UtilError::ZeroResiduals);
    }
    if residuals.iter().any(|r| !r.is_finite()) {
        return Err(UtilError::NumericalError(
            "residuals contain non-finite values".to_string(),
        ));
    }

    let errors: Vec<f64> = residuals.iter().map(|r| r.abs()).collect();

    let n = errors.len() as f64;
    let mean = errors.iter().sum::<f64>() / n;

    let variance: f64 = errors.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    let sum_squared: f64 = errors.iter().map(|x| x.powi(2)).sum::<f64>();
    let rmse = (sum_squared / n).sqrt();

    let min = errors.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max = errors.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

    let mut sorted_errors = errors.clone();
    sorted_errors.sort_by(|a, b| a.total_cmp(b));
    let median = if sorted_errors.len() % 2 == 0 {
        let mid = sorted_errors.len() / 2;
        (sorted_errors[mid - 1] + sorted_errors[mid]) / 2.0
    } else {
        sorted_errors[sorted_errors.len() / 2]
    };

    Ok(ResidualStats {
        rmse,
        min,
        max,
        mean,
        stddev,
        median,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_residual_stats() {
        let stats = compute_residual_stats(&[3.0, -4.0, 0.0, 1.0]).unwrap();
        assert_relative_eq!(stats.min, 0.0);
        assert_relative_eq!(stats.max, 4.0);
        assert_relative_eq!(stats.mean, 2.0);
        assert_relative_eq!(stats.median, 2.0);
        assert_relative_eq!(stats.rmse, (26.0_f64 / 4.0).sqrt());
        assert_relative_eq!(stats.stddev, (10.0_f64 / 4.0).sqrt());
    }

    #[test]
    fn test_residual_stats_rejects_empty_and_nan() {
        assert!(matches!(
            compute_residual_stats(&[]),
            Err(UtilError::ZeroResiduals)
        ));
        assert!(matches!(
            compute_residual_stats(&[0.1, f64::NAN]),
            Err(UtilError::NumericalError(_))
        ));
    }
}
