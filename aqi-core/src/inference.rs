//! Trained model artifact and the adapter that feeds it feature vectors.
//!
//! The artifact is a JSON tree ensemble:
//!
//! ```json
//! {
//!   "n_features": 8,
//!   "aggregation": "mean",
//!   "base_score": 0.0,
//!   "trees": [
//!     { "nodes": [
//!       { "type": "split", "feature": 0, "threshold": 12.5, "left": 1, "right": 2, "default_left": true },
//!       { "type": "leaf", "value": 31.0 },
//!       { "type": "leaf", "value": 58.5 }
//!     ] }
//!   ]
//! }
//! ```

use std::{fmt::Debug, fs, path::Path, sync::Arc};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::{error::PredictError, features::FeatureSchema, model::FeatureVector};

/// Runtime that turns one dense row into a prediction.
pub trait Regressor: Send + Sync + Debug {
    /// Row width the regressor was trained on.
    fn n_features(&self) -> usize;

    /// Predict a single row. Missing values are NaN.
    fn predict_row(&self, row: &[f64]) -> Result<f64>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Average of tree outputs (random forest).
    #[default]
    Mean,
    /// Sum of tree outputs (boosted ensemble).
    Sum,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        #[serde(default)]
        default_left: bool,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    fn validate(&self, n_features: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(anyhow!("tree has no nodes"));
        }

        for (idx, node) in self.nodes.iter().enumerate() {
            if let Node::Split { feature, left, right, .. } = *node {
                if feature >= n_features {
                    return Err(anyhow!(
                        "node {idx} splits on feature {feature}, but the model has {n_features}"
                    ));
                }
                // Children after parents: every walk terminates.
                for child in [left, right] {
                    if child <= idx || child >= self.nodes.len() {
                        return Err(anyhow!("node {idx} has invalid child index {child}"));
                    }
                }
            }
        }

        Ok(())
    }

    fn predict_row(&self, row: &[f64]) -> f64 {
        let mut idx = 0;

        loop {
            match self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split { feature, threshold, left, right, default_left } => {
                    let fvalue = row[feature];
                    idx = if fvalue.is_nan() {
                        if default_left { left } else { right }
                    } else if fvalue < threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }
}

/// Tree ensemble regressor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TreeEnsemble {
    pub n_features: usize,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default)]
    pub base_score: f64,
    pub trees: Vec<Tree>,
}

impl TreeEnsemble {
    pub fn from_json(json: &str) -> Result<Self> {
        let ensemble: TreeEnsemble =
            serde_json::from_str(json).context("Failed to parse model JSON")?;
        ensemble.validate()?;
        Ok(ensemble)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read model file: {}", path.display()))?;

        Self::from_json(&contents)
            .with_context(|| format!("Invalid model file: {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        if self.trees.is_empty() {
            return Err(anyhow!("model has no trees"));
        }

        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features).with_context(|| format!("tree {i}"))?;
        }

        Ok(())
    }
}

impl Regressor for TreeEnsemble {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_row(&self, row: &[f64]) -> Result<f64> {
        if row.len() != self.n_features {
            return Err(anyhow!(
                "row has {} features, model expects {}",
                row.len(),
                self.n_features
            ));
        }

        let total: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();

        let out = match self.aggregation {
            Aggregation::Mean => total / self.trees.len() as f64,
            Aggregation::Sum => total,
        };

        Ok(self.base_score + out)
    }
}

/// The regressor together with its frozen column schema.
///
/// Built once at startup and shared read-only by every request.
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    regressor: Arc<dyn Regressor>,
    schema: FeatureSchema,
}

impl ModelArtifact {
    pub fn new(regressor: Arc<dyn Regressor>, schema: FeatureSchema) -> Result<Self> {
        if regressor.n_features() != schema.len() {
            return Err(anyhow!(
                "Model expects {} features but the column schema lists {}",
                regressor.n_features(),
                schema.len()
            ));
        }

        Ok(Self { regressor, schema })
    }

    /// Load the tree ensemble and its columns file.
    pub fn load(model_path: &Path, columns_path: &Path) -> Result<Self> {
        let ensemble = TreeEnsemble::load(model_path)?;
        let schema = FeatureSchema::load(columns_path)?;

        tracing::info!(
            model = %model_path.display(),
            trees = ensemble.trees.len(),
            columns = ?schema.columns(),
            "Loaded model artifact"
        );

        Self::new(Arc::new(ensemble), schema)
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Run the model on one schema-ordered feature vector.
    pub fn predict(&self, features: &FeatureVector) -> Result<f64, PredictError> {
        if features.len() != self.schema.len() {
            return Err(PredictError::Inference(format!(
                "feature vector has {} values, schema has {} columns",
                features.len(),
                self.schema.len()
            )));
        }

        let row = features.to_row();
        let value = self
            .regressor
            .predict_row(&row)
            .map_err(|e| PredictError::Inference(format!("{e:#}")))?;

        if !value.is_finite() {
            return Err(PredictError::Inference(format!("model produced non-finite output {value}")));
        }

        Ok(value)
    }
}
