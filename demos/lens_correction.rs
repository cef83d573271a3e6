//! Lens Correction Tool
//!
//! Fits barrel distortion coefficients to points picked along a straight edge
//! that appears curved in an image, and prints the coefficients together with
//! the `-distort Barrel` argument that straightens the image.
//!
//! Usage:
//! ```bash
//! cargo run --example lens_correction -- \
//!   --selection samples/selection.yaml \
//!   --solver samples/solver.yaml
//! ```
//!
//! Without `--selection` the tool synthesizes a selection from known
//! coefficients and checks that the fit recovers them.

use clap::Parser;
use lens_tools::geometry::sample_line_points;
use lens_tools::model::{CoefficientVector, ModelVariant};
use lens_tools::optimization::SolverOptions;
use lens_tools::selection::PointSelection;
use log::info;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Barrel distortion estimation tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a point selection YAML file
    #[arg(short = 's', long)]
    selection: Option<PathBuf>,

    /// Path to a YAML file with a `solver` section
    #[arg(long)]
    solver: Option<PathBuf>,

    /// Model for the synthetic selection (quartic_forward, quartic_inverse, quartic_general, quadratic, linear)
    #[arg(short = 'm', long, default_value = "quartic_forward")]
    model: String,

    /// Print the full fit report as JSON
    #[arg(long)]
    json: bool,

    /// Write the full fit report to this YAML file
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
}

fn path_str(path: &Path) -> Result<&str, Box<dyn std::error::Error>> {
    Ok(path.to_str().ok_or("Invalid path string")?)
}

/// A selection on a 1000x800 image, seeded with known coefficients.
fn synthetic_selection(
    variant: ModelVariant,
) -> Result<(PointSelection, CoefficientVector), Box<dyn std::error::Error>> {
    let (seed, angles_deg): (CoefficientVector, Vec<f64>) = match variant {
        ModelVariant::QuarticForward
        | ModelVariant::QuarticInverse
        | ModelVariant::QuarticGeneral => (
            CoefficientVector::new(variant, [0.02, -0.01, 0.0, 0.99]),
            vec![45.0, 67.5, 90.0, 112.5, 135.0],
        ),
        ModelVariant::Quadratic => (
            CoefficientVector::new(variant, [0.0, 0.05, 0.0, 0.95]),
            vec![45.0, 90.0, 135.0],
        ),
        ModelVariant::Linear => (
            CoefficientVector::new(variant, [0.0, 0.0, 0.1, 0.9]),
            vec![45.0, 90.0, 135.0],
        ),
    };

    let angles: Vec<f64> = angles_deg.iter().map(|a| a.to_radians()).collect();
    let points = sample_line_points(&seed, 0.1, 0.6, &angles, 1000, 800)?;
    Ok((
        PointSelection {
            variant,
            width: 1000,
            height: 800,
            points,
        },
        seed,
    ))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cli = Cli::parse();

    let options = match &cli.solver {
        Some(path) => SolverOptions::load_from_yaml(path_str(path)?)?,
        None => SolverOptions::default(),
    };

    let (selection, seed) = match &cli.selection {
        Some(path) => {
            info!("Loading point selection from: {:?}", path);
            (PointSelection::load_from_yaml(path_str(path)?)?, None)
        }
        None => {
            let variant: ModelVariant = cli.model.parse()?;
            info!("Synthesizing a {} selection", variant);
            let (selection, seed) = synthetic_selection(variant)?;
            (selection, Some(seed))
        }
    };

    println!("LENS CORRECTION");
    println!("===============");
    println!("Model: {}", selection.variant);
    println!("Image: {}x{}", selection.width, selection.height);
    for (index, point) in selection.points.iter().enumerate() {
        println!("  point {}: ({:.3}, {:.3})", index, point.x, point.y);
    }

    let start = Instant::now();
    let fit = selection.solve(&options)?;
    let elapsed = start.elapsed();

    let c = &fit.coefficients;
    println!("\nCoefficients:");
    println!("  A = {:.10}", c.a);
    println!("  B = {:.10}", c.b);
    println!("  C = {:.10}", c.c);
    println!("  D = {:.10}", c.d);
    println!(
        "Target line: y = {:.6} * x + {:.6}",
        fit.target_line.0, fit.target_line.1
    );
    println!("{:?}", fit.residuals);
    println!("Solve time: {:.2?}", elapsed);
    println!("\n{}", c.barrel_argument());

    if let Some(seed) = seed {
        let max_error = c
            .as_array()
            .iter()
            .zip(seed.as_array().iter())
            .map(|(got, want)| (got - want).abs())
            .fold(0.0_f64, f64::max);
        println!("Max coefficient error against the seed: {:e}", max_error);
    }

    if cli.json {
        println!("\n{}", fit.to_json()?);
    }

    if let Some(path) = &cli.output {
        fit.save_to_yaml(path_str(path)?)?;
        info!("Fit report written to: {:?}", path);
    }

    Ok(())
}
