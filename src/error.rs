use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

use crate::web::models::Envelope;

/// Failure kinds reported by the upstream generative API.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream rate limit: {0}")]
    RateLimited(String),

    #[error("upstream deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("upstream rejected the request: {0}")]
    InvalidArgument(String),

    #[error("upstream API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("upstream transport error: {0}")]
    Transport(reqwest::Error),

    #[error("malformed upstream response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed upstream event stream: {0}")]
    Stream(String),
}

impl UpstreamError {
    /// Only throttling and deadline failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamError::RateLimited(_) | UpstreamError::DeadlineExceeded(_)
        )
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::DeadlineExceeded(err.to_string())
        } else if err.is_decode() {
            UpstreamError::Api {
                status: err.status().map(|s| s.as_u16()).unwrap_or(502),
                message: err.to_string(),
            }
        } else {
            UpstreamError::Transport(err)
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("{0} is not available in this mode")]
    NotAvailable(&'static str),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Text safe to hand to the client. Upstream and internal detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            RelayError::InvalidRequest(reason) => format!("Invalid request: {reason}"),
            RelayError::PayloadTooLarge(_) | RelayError::NotAvailable(_) => self.to_string(),
            RelayError::Upstream(err) if err.is_retryable() => {
                "The model is busy right now. Please try again shortly.".to_string()
            }
            RelayError::Upstream(UpstreamError::InvalidArgument(_)) => {
                "The model rejected the request as invalid.".to_string()
            }
            RelayError::Upstream(_) => "The upstream model service returned an error.".to_string(),
            RelayError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl ResponseError for RelayError {
    fn status_code(&self) -> StatusCode {
        match self {
            RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::NotAvailable(_) => StatusCode::NOT_FOUND,
            RelayError::Upstream(err) if err.is_retryable() => StatusCode::TOO_MANY_REQUESTS,
            RelayError::Upstream(UpstreamError::InvalidArgument(_)) => StatusCode::BAD_REQUEST,
            RelayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        HttpResponse::build(status).json(Envelope::new(status.as_u16(), self.public_message()))
    }
}
