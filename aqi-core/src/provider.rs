use async_trait::async_trait;
use std::fmt::Debug;

use crate::{
    error::PredictError,
    model::{GeoResult, PollutantRecord},
};

pub mod openweather;

pub use openweather::OpenWeatherClient;

/// Resolves a city name to coordinates.
#[async_trait]
pub trait Geocoder: Send + Sync + Debug {
    /// `city` is already trimmed and non-empty. Returns the first match only.
    async fn resolve(&self, city: &str) -> Result<GeoResult, PredictError>;
}

/// Current pollutant concentrations for a location.
#[async_trait]
pub trait PollutionSource: Send + Sync + Debug {
    async fn fetch_pollutants(&self, lat: f64, lon: f64) -> Result<PollutantRecord, PredictError>;
}
