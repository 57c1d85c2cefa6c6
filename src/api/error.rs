//! JSON error envelope for `/api/*`.
//!
//! Every failure is rendered as
//! `{"error": {"code": "...", "message": "...", "details": {...}}}` with the
//! status code of the underlying domain error.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Error;

/// The inner error object in the response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// The full error response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<Value>,
    retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
            retry_after: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_input", message)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let mut api = ApiError::new(err.status_code(), err.kind(), err.user_message());
        api.details = match &err {
            Error::DuplicateAssignment {
                driver,
                vehicle,
                route_id,
            } => Some(json!({
                "driver": driver,
                "vehicle": vehicle,
                "route_id": route_id,
            })),
            Error::DriverRouteConflict {
                driver,
                route_id,
                period,
            } => Some(json!({
                "driver": driver,
                "route_id": route_id,
                "period": period,
            })),
            Error::VehicleDoubleBooked {
                vehicle,
                route_id,
                period,
                holder,
            } => Some(json!({
                "vehicle": vehicle,
                "route_id": route_id,
                "period": period,
                "holder": holder,
            })),
            _ => err
                .report()
                .map(|correlation_id| json!({ "correlation_id": correlation_id })),
        };
        if let Error::RateLimited { retry_after } = err {
            api.retry_after = Some(retry_after);
        }
        api
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code.to_string(),
                message: self.message,
                details: self.details,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(seconds) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}
