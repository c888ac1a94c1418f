//! # API Error Responses
//!
//! Every failure an HTTP handler can return, with its status code and body. JSON
//! errors share one shape: `{"error_type": "...", "message": "..."}`. The throttle
//! response is the exception: plain text with a `Retry-After` header.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::dispatcher::DispatchError;
use crate::core::validator::InvalidReading;

/// Handler errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The actor exhausted its admission window.
    #[error("too many requests, retry after {retry_after:?}")]
    Throttled {
        /// Time until the window resets.
        retry_after: Duration,
    },
    /// The route segment is not a UUID.
    #[error("invalid actor id: {0}")]
    InvalidActorId(String),
    /// The body is not a well-formed reading.
    #[error("malformed request body: {0}")]
    MalformedBody(String),
    /// Coordinates out of range.
    #[error(transparent)]
    InvalidReading(#[from] InvalidReading),
    /// The reading was not fully queued and broadcast.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Whole seconds for `Retry-After`, rounded up and never zero.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ApiError::Throttled { retry_after } => {
                debug!(retry_after_ms = retry_after.as_millis() as u64, "Request throttled");
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry_after_secs(*retry_after).to_string())],
                    "Too many requests. Please slow down.",
                )
                    .into_response();
            }
            ApiError::InvalidActorId(_) => (StatusCode::BAD_REQUEST, "InvalidActorId"),
            ApiError::MalformedBody(_) => (StatusCode::BAD_REQUEST, "MalformedBody"),
            ApiError::InvalidReading(_) => (StatusCode::BAD_REQUEST, "InvalidReading"),
            ApiError::Dispatch(DispatchError::Timeout(_)) => (StatusCode::SERVICE_UNAVAILABLE, "DispatchTimeout"),
            ApiError::Dispatch(DispatchError::PartialFailure { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "DispatchPartialFailure")
            }
            ApiError::Dispatch(DispatchError::Encode(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "DispatchEncodeError"),
        };

        if status.is_server_error() {
            warn!(error_type, error = %self, "Request failed");
        } else {
            debug!(error_type, error = %self, "Request rejected");
        }

        (
            status,
            Json(json!({
                "error_type": error_type,
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_rounds_up_to_whole_seconds() {
        assert_eq!(retry_after_secs(Duration::from_millis(40)), 1);
        assert_eq!(retry_after_secs(Duration::from_secs(2)), 2);
        assert_eq!(retry_after_secs(Duration::from_millis(2001)), 3);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }

    #[test]
    fn dispatch_errors_map_to_service_unavailable() {
        let timeout = ApiError::from(DispatchError::Timeout(Duration::from_millis(200))).into_response();
        assert_eq!(timeout.status(), StatusCode::SERVICE_UNAVAILABLE);

        let partial =
            ApiError::from(DispatchError::PartialFailure { queued: true, broadcast: false }).into_response();
        assert_eq!(partial.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn throttled_carries_retry_after_header() {
        let response = ApiError::Throttled { retry_after: Duration::from_millis(300) }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }
}
