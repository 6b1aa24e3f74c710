use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    error::PredictError,
    features::{self, MissingPolicy},
    inference::ModelArtifact,
    model::PredictionResult,
    provider::{Geocoder, PollutionSource},
};

/// City name in, AQI out: geocode, fetch pollutants, map features, infer.
///
/// Holds no per-request state; every field is shared read-only.
#[derive(Debug, Clone)]
pub struct AqiPipeline {
    geocoder: Arc<dyn Geocoder>,
    pollution: Arc<dyn PollutionSource>,
    model: Arc<ModelArtifact>,
    missing_policy: MissingPolicy,
}

impl AqiPipeline {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        pollution: Arc<dyn PollutionSource>,
        model: Arc<ModelArtifact>,
    ) -> Self {
        Self { geocoder, pollution, model, missing_policy: MissingPolicy::default() }
    }

    pub fn with_missing_policy(mut self, policy: MissingPolicy) -> Self {
        self.missing_policy = policy;
        self
    }

    /// Every stage is terminal on failure: no retries here, no partial results.
    pub async fn predict_aqi(&self, city: &str) -> Result<PredictionResult, PredictError> {
        let city = city.trim();
        if city.is_empty() {
            return Err(PredictError::Validation("City name is required".to_string()));
        }

        let geo = self.geocoder.resolve(city).await?;

        let record = self.pollution.fetch_pollutants(geo.latitude, geo.longitude).await?;

        let schema = self.model.schema();
        let feature_vec = features::to_feature_vector(&record, schema);
        let mapped: Vec<_> = schema.columns().iter().zip(&feature_vec.values).collect();
        debug!(
            city,
            features = ?mapped,
            observed_at = ?record.observed_at,
            "Mapped pollutant features"
        );
        features::check_missing(&feature_vec, schema, self.missing_policy)?;

        let raw = self.model.predict(&feature_vec)?;
        let aqi = round2(raw);

        info!(city, lat = geo.latitude, lon = geo.longitude, aqi, "Predicted AQI");

        Ok(PredictionResult { city: city.to_string(), aqi })
    }
}

/// Round to 2 decimal places. Values too large to scale have no fractional
/// part left and are returned unchanged.
fn round2(value: f64) -> f64 {
    let scaled = value * 100.0;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / 100.0
}
