//! Filter lifespan prediction from a pre-trained regression artifact.
//!
//! The model and its input scaler are exported to JSON once, offline, and
//! loaded here at startup. Inputs always follow the five-feature schema in
//! [`FEATURE_NAMES`].

use crate::error::{Result, SystemError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Number of model input features.
pub const FEATURE_COUNT: usize = 5;

/// Feature order the scaler and model were fit on.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] =
    ["tds", "turbidity", "ph", "depth", "flow_rate"];

/// Fixed process parameters fed to the model alongside turbidity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessParameters {
    /// Total dissolved solids (ppm)
    pub tds: f64,
    /// pH of the feed water
    pub ph: f64,
    /// Equipment depth (m)
    pub depth: f64,
    /// Flow rate (L/min)
    pub flow_rate: f64,
}

impl Default for ProcessParameters {
    fn default() -> Self {
        Self {
            tds: 250.0,
            ph: 7.0,
            depth: 1.5,
            flow_rate: 2.0,
        }
    }
}

impl ProcessParameters {
    /// Build the model input row for a turbidity value.
    pub fn features(&self, turbidity: f64) -> [f64; FEATURE_COUNT] {
        [self.tds, turbidity, self.ph, self.depth, self.flow_rate]
    }
}

/// Standardization fitted on the training data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    fn validate(&self) -> Result<()> {
        if self.mean.len() != FEATURE_COUNT || self.scale.len() != FEATURE_COUNT {
            return Err(SystemError::model_error(format!(
                "scaler expects {} features, found mean={} scale={}",
                FEATURE_COUNT,
                self.mean.len(),
                self.scale.len()
            )));
        }
        Ok(())
    }

    /// Standardize one input row.
    pub fn transform(&self, features: &[f64; FEATURE_COUNT]) -> Result<[f64; FEATURE_COUNT]> {
        let mut scaled = [0.0; FEATURE_COUNT];
        for (i, slot) in scaled.iter_mut().enumerate() {
            // Constant features were fit with a zero scale.
            let scale = if self.scale[i] == 0.0 { 1.0 } else { self.scale[i] };
            *slot = (features[i] - self.mean[i]) / scale;
            if !slot.is_finite() {
                return Err(SystemError::model_error(format!(
                    "scaled feature {} is not finite",
                    FEATURE_NAMES[i]
                )));
            }
        }
        Ok(scaled)
    }
}

/// Anything that maps a scaled input row to a prediction.
pub trait Regressor: Send + Sync {
    /// Number of input features the regressor was trained on.
    fn feature_count(&self) -> usize;

    /// Predict a single value.
    fn predict(&self, features: &[f64]) -> Result<f64>;
}

/// One node of an exported decision tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// Regression models the artifact loader understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegressionModel {
    Linear {
        coefficients: Vec<f64>,
        intercept: f64,
    },
    /// Averaged decision trees, as exported from a random forest.
    TreeEnsemble {
        trees: Vec<Vec<TreeNode>>,
        #[serde(default)]
        base_score: f64,
    },
}

impl RegressionModel {
    fn validate(&self) -> Result<()> {
        match self {
            Self::Linear { coefficients, .. } => {
                if coefficients.len() != FEATURE_COUNT {
                    return Err(SystemError::model_error(format!(
                        "model has {} coefficients, expected {}",
                        coefficients.len(),
                        FEATURE_COUNT
                    )));
                }
            }
            Self::TreeEnsemble { trees, .. } => {
                if trees.is_empty() {
                    return Err(SystemError::model_error("tree ensemble has no trees"));
                }
                if let Some(index) = trees.iter().position(|tree| tree.is_empty()) {
                    return Err(SystemError::model_error(format!(
                        "tree {} has no nodes",
                        index
                    )));
                }
                for node in trees.iter().flatten() {
                    if let TreeNode::Split { feature, .. } = node {
                        if *feature >= FEATURE_COUNT {
                            return Err(SystemError::model_error(format!(
                                "tree splits on feature {} of {}",
                                feature, FEATURE_COUNT
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn eval_tree(nodes: &[TreeNode], features: &[f64]) -> Result<f64> {
    let mut index = 0;
    // A well-formed tree reaches a leaf in fewer steps than it has nodes.
    for _ in 0..nodes.len() {
        match nodes.get(index) {
            Some(TreeNode::Leaf { value }) => return Ok(*value),
            Some(TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            }) => {
                let x = features.get(*feature).copied().ok_or_else(|| {
                    SystemError::model_error(format!("missing feature {}", feature))
                })?;
                index = if x <= *threshold { *left } else { *right };
            }
            None => {
                return Err(SystemError::model_error(format!(
                    "tree references missing node {}",
                    index
                )))
            }
        }
    }
    Err(SystemError::model_error("tree does not terminate"))
}

impl Regressor for RegressionModel {
    fn feature_count(&self) -> usize {
        FEATURE_COUNT
    }

    fn predict(&self, features: &[f64]) -> Result<f64> {
        if features.len() != FEATURE_COUNT {
            return Err(SystemError::model_error(format!(
                "expected {} features, got {}",
                FEATURE_COUNT,
                features.len()
            )));
        }

        match self {
            Self::Linear {
                coefficients,
                intercept,
            } => Ok(coefficients
                .iter()
                .zip(features)
                .fold(*intercept, |acc, (c, x)| acc + c * x)),
            Self::TreeEnsemble { trees, base_score } => {
                let mut sum = 0.0;
                for tree in trees {
                    sum += eval_tree(tree, features)?;
                }
                Ok(base_score + sum / trees.len() as f64)
            }
        }
    }
}

/// Scaler, model and fixed parameters bundled for serving.
pub struct LifespanPredictor {
    scaler: StandardScaler,
    model: Box<dyn Regressor>,
    params: ProcessParameters,
}

impl std::fmt::Debug for LifespanPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifespanPredictor")
            .field("scaler", &self.scaler)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl LifespanPredictor {
    /// Bundle a scaler and regressor, rejecting any schema mismatch.
    pub fn new(
        scaler: StandardScaler,
        model: Box<dyn Regressor>,
        params: ProcessParameters,
    ) -> Result<Self> {
        scaler.validate()?;
        if model.feature_count() != FEATURE_COUNT {
            return Err(SystemError::model_error(format!(
                "model expects {} features, schema has {}",
                model.feature_count(),
                FEATURE_COUNT
            )));
        }
        Ok(Self {
            scaler,
            model,
            params,
        })
    }

    /// Load the model and scaler artifacts from JSON files.
    pub fn load(
        model_path: impl AsRef<Path>,
        scaler_path: impl AsRef<Path>,
        params: ProcessParameters,
    ) -> Result<Self> {
        let model: RegressionModel = read_json(model_path.as_ref())?;
        model.validate()?;
        let scaler: StandardScaler = read_json(scaler_path.as_ref())?;
        Self::new(scaler, Box::new(model), params)
    }

    /// Fixed parameters used for every prediction.
    pub fn params(&self) -> &ProcessParameters {
        &self.params
    }

    /// Predict remaining filter life in hours for a turbidity value.
    pub fn predict(&self, turbidity: f64) -> Result<f64> {
        let features = self.params.features(turbidity);
        let scaled = self.scaler.transform(&features)?;
        let hours = self.model.predict(&scaled)?;
        if !hours.is_finite() {
            return Err(SystemError::model_error("prediction is not finite"));
        }
        Ok(hours.max(0.0))
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).map_err(|e| {
        SystemError::config_error(format!("Failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| SystemError::parse_error(format!("{}: {}", path.display(), e)))
}

/// Round to two decimal places for presentation.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
