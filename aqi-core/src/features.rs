use std::{collections::HashSet, fs, path::Path, str::FromStr};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::{
    error::PredictError,
    model::{FeatureVector, Pollutant, PollutantRecord},
};

/// Provider reports CO at 100x the scale the model was trained on.
pub const CO_SCALE_DIVISOR: f64 = 100.0;

/// What to do when the provider omitted one or more readings the schema needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingPolicy {
    /// Pass the gap through to the model as a missing value.
    #[default]
    Tolerate,
    /// Fail the request before inference.
    Reject,
}

/// Ordered column names the model was trained on. Frozen after load.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    columns: Vec<String>,
    // Resolved once so mapping never re-parses names.
    resolved: Vec<Option<Pollutant>>,
}

impl FeatureSchema {
    pub fn new(columns: Vec<String>) -> Result<Self> {
        if columns.is_empty() {
            return Err(anyhow!("Feature schema has no columns"));
        }

        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.as_str()) {
                return Err(anyhow!("Feature schema lists column '{col}' more than once"));
            }
        }

        let resolved = columns.iter().map(|c| Pollutant::from_str(c).ok()).collect();

        Ok(Self { columns, resolved })
    }

    /// Load the schema from a JSON array of column names.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read feature columns file: {}", path.display()))?;

        let columns: Vec<String> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse feature columns file: {}", path.display()))?;

        Self::new(columns)
            .with_context(|| format!("Invalid feature columns file: {}", path.display()))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Build the model input for `record`, strictly in schema order.
///
/// Columns with no matching reading (including names outside the pollutant
/// vocabulary) become missing slots; readings the schema doesn't ask for are
/// ignored.
pub fn to_feature_vector(record: &PollutantRecord, schema: &FeatureSchema) -> FeatureVector {
    let values = schema
        .resolved
        .iter()
        .map(|slot| slot.and_then(|p| record.get(p).map(|v| scale(p, v))))
        .collect();

    FeatureVector { values }
}

fn scale(pollutant: Pollutant, value: f64) -> f64 {
    match pollutant {
        Pollutant::Co => value / CO_SCALE_DIVISOR,
        _ => value,
    }
}

/// Apply `policy` to a mapped vector.
pub fn check_missing(
    features: &FeatureVector,
    schema: &FeatureSchema,
    policy: MissingPolicy,
) -> Result<(), PredictError> {
    if policy == MissingPolicy::Tolerate || features.missing_count() == 0 {
        return Ok(());
    }

    let missing: Vec<&str> = schema
        .columns
        .iter()
        .zip(&features.values)
        .filter(|(_, v)| v.is_none())
        .map(|(c, _)| c.as_str())
        .collect();

    Err(PredictError::Validation(format!("Missing pollutant data: {}", missing.join(", "))))
}
