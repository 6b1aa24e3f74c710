use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coordinates of the best geocoding match for a city name.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoResult {
    pub latitude: f64,
    pub longitude: f64,
    /// Provider's name for the match, when it reports one. Informational only.
    pub name: Option<String>,
    pub country: Option<String>,
}

/// The fixed pollutant vocabulary understood by the mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Pollutant {
    Pm25,
    Pm10,
    No,
    No2,
    Nh3,
    Co,
    So2,
    O3,
}

impl Pollutant {
    pub const fn all() -> &'static [Pollutant] {
        &[
            Pollutant::Pm25,
            Pollutant::Pm10,
            Pollutant::No,
            Pollutant::No2,
            Pollutant::Nh3,
            Pollutant::Co,
            Pollutant::So2,
            Pollutant::O3,
        ]
    }

    /// Column name used in the model's feature schema.
    pub fn column_name(&self) -> &'static str {
        match self {
            Pollutant::Pm25 => "PM2.5",
            Pollutant::Pm10 => "PM10",
            Pollutant::No => "NO",
            Pollutant::No2 => "NO2",
            Pollutant::Nh3 => "NH3",
            Pollutant::Co => "CO",
            Pollutant::So2 => "SO2",
            Pollutant::O3 => "O3",
        }
    }
}

impl fmt::Display for Pollutant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

impl FromStr for Pollutant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pollutant::all()
            .iter()
            .copied()
            .find(|p| p.column_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("Unknown pollutant column '{s}'"))
    }
}

/// Current pollutant concentrations at one location, in provider units.
///
/// A pollutant the provider did not report is simply absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollutantRecord {
    readings: BTreeMap<Pollutant, f64>,
    pub observed_at: Option<DateTime<Utc>>,
}

impl PollutantRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, pollutant: Pollutant, value: f64) -> Self {
        self.set(pollutant, Some(value));
        self
    }

    pub fn set(&mut self, pollutant: Pollutant, value: Option<f64>) {
        match value {
            Some(v) => {
                self.readings.insert(pollutant, v);
            }
            None => {
                self.readings.remove(&pollutant);
            }
        }
    }

    pub fn get(&self, pollutant: Pollutant) -> Option<f64> {
        self.readings.get(&pollutant).copied()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Model input, one slot per schema column in schema order. `None` marks a
/// missing reading.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub values: Vec<Option<f64>>,
}

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }

    /// Dense row for the model runtime, missing slots as NaN.
    pub fn to_row(&self) -> Vec<f64> {
        self.values.iter().map(|v| v.unwrap_or(f64::NAN)).collect()
    }
}

/// Inbound request body. An absent or null `city` is treated like a blank one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CityRequest {
    #[serde(default)]
    pub city: Option<String>,
}

impl CityRequest {
    pub fn city(&self) -> &str {
        self.city.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub city: String,
    pub aqi: f64,
}

/// Health band for an AQI value. Upper bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AqiCategory {
    Good,
    Satisfactory,
    Moderate,
    Poor,
    VeryPoor,
    Severe,
}

impl AqiCategory {
    pub fn from_aqi(aqi: f64) -> Self {
        match aqi {
            v if v <= 50.0 => AqiCategory::Good,
            v if v <= 100.0 => AqiCategory::Satisfactory,
            v if v <= 200.0 => AqiCategory::Moderate,
            v if v <= 300.0 => AqiCategory::Poor,
            v if v <= 400.0 => AqiCategory::VeryPoor,
            _ => AqiCategory::Severe,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Satisfactory => "Satisfactory",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::Poor => "Poor",
            AqiCategory::VeryPoor => "VeryPoor",
            AqiCategory::Severe => "Severe",
        }
    }
}

impl fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PredictionResult {
    pub fn category(&self) -> AqiCategory {
        AqiCategory::from_aqi(self.aqi)
    }
}
