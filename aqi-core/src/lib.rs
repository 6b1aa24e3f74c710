//! Core library for the `aqi` service.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - OpenWeather geocoding and air pollution clients
//! - Mapping of pollutant readings onto the model's feature schema
//! - The trained model artifact and inference adapter
//! - The prediction pipeline tying those stages together
//!
//! It is used by `aqi-server`, but can also be reused by other binaries or services.

pub mod config;
pub mod error;
pub mod features;
pub mod inference;
pub mod model;
pub mod pipeline;
pub mod provider;

pub use config::Config;
pub use error::{PredictError, Upstream};
pub use features::{FeatureSchema, MissingPolicy};
pub use inference::{ModelArtifact, Regressor, TreeEnsemble};
pub use model::{
    AqiCategory, CityRequest, FeatureVector, GeoResult, Pollutant, PollutantRecord, PredictionResult,
};
pub use pipeline::AqiPipeline;
pub use provider::{Geocoder, OpenWeatherClient, PollutionSource};
