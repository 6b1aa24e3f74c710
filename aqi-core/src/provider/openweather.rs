use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{
    config::UpstreamConfig,
    error::{PredictError, Upstream},
    model::{GeoResult, Pollutant, PollutantRecord},
};

use super::{Geocoder, PollutionSource};

/// OpenWeather geocoding + air pollution client. One credential serves both APIs.
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    api_key: String,
    http: Client,
    geocode_url: String,
    air_pollution_url: String,
    max_retries: u32,
}

/// A failed attempt, before retry budget is applied.
struct Attempt {
    retryable: bool,
    detail: String,
}

impl OpenWeatherClient {
    pub fn new(api_key: String, upstream: &UpstreamConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(upstream.timeout_secs))
            .build()?;

        Ok(Self {
            api_key,
            http,
            geocode_url: upstream.geocode_url.clone(),
            air_pollution_url: upstream.air_pollution_url.clone(),
            max_retries: upstream.max_retries,
        })
    }

    async fn get(
        &self,
        service: Upstream,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<String, PredictError> {
        let mut attempt = 0;

        loop {
            match self.try_get(url, query).await {
                Ok(body) => return Ok(body),
                Err(failed) if failed.retryable && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        service = %service,
                        attempt,
                        max_retries = self.max_retries,
                        error = %failed.detail,
                        "Upstream request failed, retrying"
                    );
                }
                Err(failed) => return Err(PredictError::upstream(service, failed.detail)),
            }
        }
    }

    async fn try_get(&self, url: &str, query: &[(&str, String)]) -> Result<String, Attempt> {
        let res = self
            .http
            .get(url)
            .query(query)
            .query(&[("appid", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| Attempt { retryable: true, detail: transport_detail(&e) })?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| Attempt { retryable: true, detail: transport_detail(&e) })?;

        if !status.is_success() {
            return Err(Attempt {
                retryable: status.is_server_error(),
                detail: format!("status {}: {}", status, truncate_body(&body)),
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl Geocoder for OpenWeatherClient {
    async fn resolve(&self, city: &str) -> Result<GeoResult, PredictError> {
        let body = self
            .get(
                Upstream::Geocoding,
                &self.geocode_url,
                &[("q", city.to_string()), ("limit", "1".to_string())],
            )
            .await?;

        let geo = parse_geocode(&body)?;
        debug!(
            city,
            lat = geo.latitude,
            lon = geo.longitude,
            matched = geo.name.as_deref().unwrap_or("?"),
            country = geo.country.as_deref().unwrap_or("?"),
            "Geocoded city"
        );
        Ok(geo)
    }
}

#[async_trait]
impl PollutionSource for OpenWeatherClient {
    async fn fetch_pollutants(&self, lat: f64, lon: f64) -> Result<PollutantRecord, PredictError> {
        let body = self
            .get(
                Upstream::Pollution,
                &self.air_pollution_url,
                &[("lat", lat.to_string()), ("lon", lon.to_string())],
            )
            .await?;

        parse_air_pollution(&body)
    }
}

#[derive(Debug, Deserialize)]
struct OwGeoMatch {
    lat: f64,
    lon: f64,
    name: Option<String>,
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwComponents {
    pm2_5: Option<f64>,
    pm10: Option<f64>,
    no: Option<f64>,
    no2: Option<f64>,
    nh3: Option<f64>,
    co: Option<f64>,
    so2: Option<f64>,
    o3: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwAirEntry {
    dt: Option<i64>,
    components: OwComponents,
}

#[derive(Debug, Deserialize)]
struct OwAirResponse {
    list: Vec<OwAirEntry>,
}

impl From<OwComponents> for PollutantRecord {
    fn from(c: OwComponents) -> Self {
        let mut record = PollutantRecord::new();
        record.set(Pollutant::Pm25, c.pm2_5);
        record.set(Pollutant::Pm10, c.pm10);
        record.set(Pollutant::No, c.no);
        record.set(Pollutant::No2, c.no2);
        record.set(Pollutant::Nh3, c.nh3);
        record.set(Pollutant::Co, c.co);
        record.set(Pollutant::So2, c.so2);
        record.set(Pollutant::O3, c.o3);
        record
    }
}

/// First match wins; later matches are dropped.
fn parse_geocode(body: &str) -> Result<GeoResult, PredictError> {
    let matches: Vec<serde_json::Value> = serde_json::from_str(body)
        .map_err(|e| PredictError::malformed(Upstream::Geocoding, e.to_string()))?;

    let first = matches.into_iter().next().ok_or(PredictError::NotFound("City"))?;
    let first: OwGeoMatch = serde_json::from_value(first)
        .map_err(|e| PredictError::malformed(Upstream::Geocoding, e.to_string()))?;

    Ok(GeoResult {
        latitude: first.lat,
        longitude: first.lon,
        name: first.name,
        country: first.country,
    })
}

/// Only the first (current) entry of the list is used.
fn parse_air_pollution(body: &str) -> Result<PollutantRecord, PredictError> {
    let parsed: OwAirResponse = serde_json::from_str(body)
        .map_err(|e| PredictError::malformed(Upstream::Pollution, e.to_string()))?;

    let entry = parsed.list.into_iter().next().ok_or_else(|| {
        PredictError::malformed(Upstream::Pollution, "response contained no readings")
    })?;

    let observed_at = entry.dt.and_then(unix_to_utc);
    let mut record = PollutantRecord::from(entry.components);
    record.observed_at = observed_at;
    Ok(record)
}

fn unix_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

fn transport_detail(err: &reqwest::Error) -> String {
    if err.is_timeout() { format!("timed out: {err}") } else { err.to_string() }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}
