use std::sync::Arc;

use anyhow::Context;
use aqi_core::{AqiPipeline, CityRequest, PredictError, PredictionResult};
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::HeaderValue,
    routing::{get, post},
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::error::ApiError;

/// Shared, read-only state handed to every request.
#[derive(Debug)]
pub struct AppState {
    pub pipeline: AqiPipeline,
}

pub fn router(state: Arc<AppState>, allowed_origins: &[String]) -> anyhow::Result<Router> {
    let origins = allowed_origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o).with_context(|| format!("Invalid allowed origin '{o}'"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request());

    Ok(Router::new()
        .route("/predict", post(predict_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state))
}

async fn predict_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CityRequest>, JsonRejection>,
) -> Result<Json<PredictionResult>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| {
        PredictError::Validation(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    let result = state.pipeline.predict_aqi(payload.city()).await?;
    Ok(Json(result))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqi_core::{
        Geocoder, GeoResult, ModelArtifact, OpenWeatherClient, Pollutant, PollutantRecord,
        PollutionSource, TreeEnsemble, Upstream, config::UpstreamConfig,
        features::FeatureSchema,
    };
    use async_trait::async_trait;
    use axum::{
        body::Body,
        extract::Query,
        http::{Request, StatusCode, header},
        response::IntoResponse,
    };
    use http_body_util::BodyExt;
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use tower::ServiceExt;

    const ORIGIN: &str = "http://localhost:5173";

    // Single tree: CO (column 5) below 2.5 -> 10.0, otherwise 42.371.
    const CO_TREE: &str = r#"{
        "n_features": 8,
        "trees": [ { "nodes": [
            { "type": "split", "feature": 5, "threshold": 2.5, "left": 1, "right": 2, "default_left": true },
            { "type": "leaf", "value": 10.0 },
            { "type": "leaf", "value": 42.371 }
        ] } ]
    }"#;

    fn model() -> Arc<ModelArtifact> {
        let schema = FeatureSchema::new(
            Pollutant::all().iter().map(|p| p.column_name().to_string()).collect(),
        )
        .unwrap();
        let ensemble = TreeEnsemble::from_json(CO_TREE).unwrap();
        Arc::new(ModelArtifact::new(Arc::new(ensemble), schema).unwrap())
    }

    #[derive(Debug)]
    struct FakeProviders;

    #[async_trait]
    impl Geocoder for FakeProviders {
        async fn resolve(&self, city: &str) -> Result<GeoResult, PredictError> {
            match city {
                "London" => {
                    Ok(GeoResult { latitude: 51.5, longitude: -0.1, name: None, country: None })
                }
                "Boom" => Err(PredictError::upstream(Upstream::Geocoding, "status 500")),
                _ => Err(PredictError::NotFound("City")),
            }
        }
    }

    #[async_trait]
    impl PollutionSource for FakeProviders {
        async fn fetch_pollutants(
            &self,
            _lat: f64,
            _lon: f64,
        ) -> Result<PollutantRecord, PredictError> {
            Ok(PollutantRecord::new().with(Pollutant::Co, 300.0))
        }
    }

    fn app_with(pipeline: AqiPipeline) -> Router {
        let state = Arc::new(AppState { pipeline });
        router(state, &[ORIGIN.to_string()]).unwrap()
    }

    fn fake_app() -> Router {
        let providers = Arc::new(FakeProviders);
        app_with(AqiPipeline::new(providers.clone(), providers, model()))
    }

    fn predict_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/predict")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn predict_returns_rounded_aqi() {
        let (status, body) = call(fake_app(), predict_request(r#"{"city": " London "}"#)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "city": "London", "aqi": 42.37 }));
    }

    #[tokio::test]
    async fn blank_city_is_bad_request() {
        let (status, body) = call(fake_app(), predict_request(r#"{"city": "  "}"#)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "City name is required");
    }

    #[tokio::test]
    async fn absent_or_null_city_is_bad_request() {
        for body in ["{}", r#"{"city": null}"#] {
            let (status, body) = call(fake_app(), predict_request(body)).await;

            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["detail"], "City name is required");
        }
    }

    #[tokio::test]
    async fn unparsable_body_is_bad_request_with_detail() {
        for body in ["not json", r#"{"city": 5}"#, r#"["London"]"#] {
            let (status, json) = call(fake_app(), predict_request(body)).await;

            assert_eq!(status, StatusCode::BAD_REQUEST, "body {body}");
            let detail = json["detail"].as_str().unwrap_or_default();
            assert!(detail.starts_with("Invalid request body"), "body {body} gave {detail}");
        }
    }

    #[tokio::test]
    async fn missing_content_type_is_bad_request_with_detail() {
        let req = Request::builder()
            .method("POST")
            .uri("/predict")
            .body(Body::from(r#"{"city": "London"}"#))
            .unwrap();
        let (status, json) = call(fake_app(), req).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["detail"].as_str().unwrap_or_default().starts_with("Invalid request body"));
    }

    #[tokio::test]
    async fn unknown_city_is_not_found() {
        let (status, body) =
            call(fake_app(), predict_request(r#"{"city": "Nonexistentville"}"#)).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "City not found");
    }

    #[tokio::test]
    async fn upstream_failure_is_internal_error() {
        let (status, body) = call(fake_app(), predict_request(r#"{"city": "Boom"}"#)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "Geocoding API failed");
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = call(fake_app(), req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn cors_allows_only_listed_origins() {
        let preflight = |origin: &str| {
            Request::builder()
                .method("OPTIONS")
                .uri("/predict")
                .header(header::ORIGIN, origin)
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                .body(Body::empty())
                .unwrap()
        };

        let resp = fake_app().oneshot(preflight(ORIGIN)).await.unwrap();
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], ORIGIN);
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");

        let resp = fake_app().oneshot(preflight("http://evil.example")).await.unwrap();
        assert!(resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[test]
    fn router_rejects_invalid_origin() {
        let providers = Arc::new(FakeProviders);
        let state =
            Arc::new(AppState { pipeline: AqiPipeline::new(providers.clone(), providers, model()) });

        assert!(router(state, &["bad\norigin".to_string()]).is_err());
    }

    // --- real OpenWeather client against a local stub ---

    #[derive(Default)]
    struct Stub {
        geocode_calls: AtomicUsize,
        pollution_calls: AtomicUsize,
    }

    async fn stub_geocode(
        State(stub): State<Arc<Stub>>,
        Query(q): Query<HashMap<String, String>>,
    ) -> axum::response::Response {
        let n = stub.geocode_calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(q.get("appid").map(String::as_str), Some("TEST_KEY"));
        assert_eq!(q.get("limit").map(String::as_str), Some("1"));

        match q.get("q").map(String::as_str) {
            Some("London") => Json(serde_json::json!([
                { "name": "London", "lat": 51.5, "lon": -0.1, "country": "GB" }
            ]))
            .into_response(),
            Some("Flaky") if n == 0 => StatusCode::SERVICE_UNAVAILABLE.into_response(),
            Some("Flaky") => {
                Json(serde_json::json!([{ "lat": 51.5, "lon": -0.1 }])).into_response()
            }
            Some("Slow") => {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Json(serde_json::json!([])).into_response()
            }
            Some("Boom") => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            Some("Denied") => StatusCode::UNAUTHORIZED.into_response(),
            _ => Json(serde_json::json!([])).into_response(),
        }
    }

    async fn stub_pollution(
        State(stub): State<Arc<Stub>>,
        Query(q): Query<HashMap<String, String>>,
    ) -> Json<serde_json::Value> {
        stub.pollution_calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(q.get("lat").map(String::as_str), Some("51.5"));
        assert_eq!(q.get("lon").map(String::as_str), Some("-0.1"));

        Json(serde_json::json!({
            "coord": { "lon": -0.1, "lat": 51.5 },
            "list": [{
                "main": { "aqi": 2 },
                "components": {
                    "co": 300.0, "no": 1.0, "no2": 5.0, "o3": 40.0,
                    "so2": 3.0, "pm2_5": 10.0, "pm10": 20.0, "nh3": 2.0
                },
                "dt": 1700000000
            }]
        }))
    }

    async fn spawn_stub() -> (Arc<Stub>, String) {
        let stub = Arc::new(Stub::default());
        let app = Router::new()
            .route("/geo/1.0/direct", get(stub_geocode))
            .route("/data/2.5/air_pollution", get(stub_pollution))
            .with_state(stub.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (stub, format!("http://{addr}"))
    }

    fn live_app(base: &str, timeout_secs: u64, max_retries: u32) -> Router {
        let upstream = UpstreamConfig {
            geocode_url: format!("{base}/geo/1.0/direct"),
            air_pollution_url: format!("{base}/data/2.5/air_pollution"),
            timeout_secs,
            max_retries,
        };
        let client = Arc::new(OpenWeatherClient::new("TEST_KEY".to_string(), &upstream).unwrap());
        app_with(AqiPipeline::new(client.clone(), client, model()))
    }

    #[tokio::test]
    async fn live_client_end_to_end() {
        let (stub, base) = spawn_stub().await;

        let (status, body) =
            call(live_app(&base, 5, 0), predict_request(r#"{"city": "London"}"#)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "city": "London", "aqi": 42.37 }));
        assert_eq!(stub.geocode_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stub.pollution_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn live_client_not_found_skips_pollution() {
        let (stub, base) = spawn_stub().await;

        let (status, _) =
            call(live_app(&base, 5, 0), predict_request(r#"{"city": "Nonexistentville"}"#)).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(stub.pollution_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn live_client_upstream_error_without_retry() {
        let (stub, base) = spawn_stub().await;

        let (status, body) =
            call(live_app(&base, 5, 0), predict_request(r#"{"city": "Flaky"}"#)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "Geocoding API failed");
        assert_eq!(stub.geocode_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stub.pollution_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn live_client_retries_server_errors_within_budget() {
        let (stub, base) = spawn_stub().await;

        let (status, _) =
            call(live_app(&base, 5, 1), predict_request(r#"{"city": "Flaky"}"#)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(stub.geocode_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn live_client_never_retries_client_errors() {
        let (stub, base) = spawn_stub().await;

        let (status, body) =
            call(live_app(&base, 5, 3), predict_request(r#"{"city": "Denied"}"#)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "Geocoding API failed");
        assert_eq!(stub.geocode_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stub.pollution_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn live_client_deadline_becomes_upstream_error() {
        let (_stub, base) = spawn_stub().await;

        let (status, body) =
            call(live_app(&base, 1, 0), predict_request(r#"{"city": "Slow"}"#)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "Geocoding API failed");
    }
}
