//! Point selections stored on disk.
//!
//! A selection file names the model to fit, the image size and the points
//! picked along one distorted straight line:
//!
//! ```yaml
//! model: quartic_forward
//! width: 1000
//! height: 800
//! points:
//!   - [766.1, 666.1]
//!   - [602.8, 648.3]
//!   - [500.0, 637.8]
//!   - [405.4, 628.4]
//!   - [283.3, 616.7]
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use yaml_rust::{Yaml, YamlLoader};

use crate::geometry::Point;
use crate::model::{validation, LensFitError, ModelVariant};
use crate::optimization::{solve_with_options, LensFit, SolverOptions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSelection {
    #[serde(rename = "model")]
    pub variant: ModelVariant,
    pub width: u32,
    pub height: u32,
    /// Pixel points, first to last along the curve.
    pub points: Vec<Point>,
}

fn yaml_number(value: &Yaml) -> Option<f64> {
    value.as_f64().or_else(|| value.as_i64().map(|v| v as f64))
}

fn yaml_dimension(doc: &Yaml, key: &str) -> Result<u32, LensFitError> {
    doc[key]
        .as_i64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| {
            LensFitError::InvalidParams(format!("Invalid {key}: not a non-negative integer"))
        })
}

impl PointSelection {
    /// Loads a selection from a YAML file.
    ///
    /// # Errors
    ///
    /// * [`LensFitError::IOError`] if the file cannot be read.
    /// * [`LensFitError::YamlError`] if the YAML is malformed.
    /// * [`LensFitError::InvalidParams`] for missing keys, an unknown model
    ///   name or points that are not `[x, y]` pairs.
    /// * [`LensFitError::InvalidImageSize`] if a dimension is zero.
    pub fn load_from_yaml(path: &str) -> Result<Self, LensFitError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, LensFitError> {
        let docs = YamlLoader::load_from_str(contents)?;
        let doc = docs
            .first()
            .ok_or_else(|| LensFitError::YamlError("Empty YAML document".to_string()))?;

        let variant: ModelVariant = doc["model"]
            .as_str()
            .ok_or_else(|| LensFitError::InvalidParams("YAML missing 'model'".to_string()))?
            .parse()?;

        let width = yaml_dimension(doc, "width")?;
        let height = yaml_dimension(doc, "height")?;
        validation::validate_image_size(width, height)?;

        let points_yaml = doc["points"].as_vec().ok_or_else(|| {
            LensFitError::InvalidParams("YAML missing 'points' or not an array".to_string())
        })?;

        let points = points_yaml
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let pair = entry
                    .as_vec()
                    .filter(|pair| pair.len() == 2)
                    .ok_or_else(|| {
                        LensFitError::InvalidParams(format!("point {index} is not an [x, y] pair"))
                    })?;
                match (yaml_number(&pair[0]), yaml_number(&pair[1])) {
                    (Some(x), Some(y)) => Ok(Point::new(x, y)),
                    _ => Err(LensFitError::InvalidParams(format!(
                        "point {index} has non-numeric coordinates"
                    ))),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PointSelection {
            variant,
            width,
            height,
            points,
        })
    }

    pub fn solve(&self, options: &SolverOptions) -> Result<LensFit, LensFitError> {
        solve_with_options(&self.points, self.variant, self.width, self.height, options)
    }
}
