//! Lens Tools Library
//!
//! Estimates barrel distortion correction coefficients `(A, B, C, D)` from a
//! handful of points picked along a straight edge that the lens renders as a
//! curve. The radial remap is
//!
//! ```text
//! R = r * (A*r^3 + B*r^2 + C*r + D)        (forward)
//! R = r / (A*r^3 + B*r^2 + C*r + D)        (inverse)
//! ```
//!
//! with `A + B + C + D = 1`, so the unit radius stays fixed. Supported models:
//! - Quartic forward (five points)
//! - Quartic inverse (five points)
//! - Quartic general, `D` unconstrained in sign (five points)
//! - Quadratic, `A = C = 0` (three points)
//! - Linear, `A = B = 0` (three points)
//!
//! The selected points are normalized around the image center, a square
//! residual system is assembled for the chosen model and solved with the
//! tiny-solver Levenberg-Marquardt optimizer.

pub mod geometry;
pub mod model;
pub mod optimization;
pub mod selection;
pub mod util;

// Re-export commonly used types
pub use geometry::{normalize_points, sample_line_points, NormalizationFrame, Point, PolarObservation};
pub use model::{
    CoefficientVector, LensFitError, LinearModel, ModelEquations, ModelVariant, QuadraticModel,
    QuarticForwardModel, QuarticGeneralModel, QuarticInverseModel,
};
pub use optimization::{
    solve, solve_with_options, LensCorrectionOptimizer, LensFit, Optimizer, SolverOptions,
};
pub use selection::PointSelection;
pub use util::ResidualStats;
