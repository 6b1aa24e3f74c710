use aqi_core::PredictError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

/// HTTP face of a pipeline failure.
#[derive(Debug)]
pub struct ApiError(pub PredictError);

impl From<PredictError> for ApiError {
    fn from(err: PredictError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            PredictError::Validation(_) => StatusCode::BAD_REQUEST,
            PredictError::NotFound(_) => StatusCode::NOT_FOUND,
            PredictError::Upstream { .. }
            | PredictError::MalformedResponse { .. }
            | PredictError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let err = &self.0;

        if err.is_client_error() {
            warn!(kind = err.kind(), "Prediction rejected: {err}");
        } else {
            error!(kind = err.kind(), detail = err.detail().unwrap_or(""), "Prediction failed: {err}");
        }

        (status, Json(serde_json::json!({ "detail": err.to_string() }))).into_response()
    }
}
