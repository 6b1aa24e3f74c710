use std::fmt;

use thiserror::Error;

/// External service a pipeline stage depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Geocoding,
    Pollution,
}

impl Upstream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Upstream::Geocoding => "geocoding",
            Upstream::Pollution => "pollution",
        }
    }

    fn api_name(&self) -> &'static str {
        match self {
            Upstream::Geocoding => "Geocoding API",
            Upstream::Pollution => "Air Pollution API",
        }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single prediction request.
///
/// `Display` is the message shown to callers; `detail` fields are for logs only.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{} failed", .service.api_name())]
    Upstream { service: Upstream, detail: String },

    #[error("Invalid {service} API response")]
    MalformedResponse { service: Upstream, detail: String },

    #[error("Model prediction failed")]
    Inference(String),
}

impl PredictError {
    pub fn upstream(service: Upstream, detail: impl Into<String>) -> Self {
        PredictError::Upstream { service, detail: detail.into() }
    }

    pub fn malformed(service: Upstream, detail: impl Into<String>) -> Self {
        PredictError::MalformedResponse { service, detail: detail.into() }
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::Validation(_) => "validation",
            PredictError::NotFound(_) => "not_found",
            PredictError::Upstream { .. } => "upstream",
            PredictError::MalformedResponse { .. } => "malformed_response",
            PredictError::Inference(_) => "inference",
        }
    }

    /// Client-side fault (bad input or unknown entity) rather than a service failure.
    pub fn is_client_error(&self) -> bool {
        matches!(self, PredictError::Validation(_) | PredictError::NotFound(_))
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            PredictError::Upstream { detail, .. }
            | PredictError::MalformedResponse { detail, .. }
            | PredictError::Inference(detail) => Some(detail),
            _ => None,
        }
    }
}
