//! Shared API types
//!
//! Every response, success or failure, is the JSON envelope
//! `{ok, data, error, pagination}` with `ok ⇔ error == null`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::broker::BrokerError;
use crate::data::StoreError;
use crate::data::types::Cursor;

/// Default rows per inbox page
pub const fn default_inbox_limit() -> u32 {
    crate::core::constants::DEFAULT_INBOX_LIMIT
}

/// Default rows per claim
pub const fn default_claim_limit() -> u32 {
    crate::core::constants::DEFAULT_CLAIM_LIMIT
}

/// Wire error body
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Cursor pagination block
#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub cursor: String,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(cursor: Cursor, next_cursor: Option<Cursor>, has_more: bool) -> Self {
        Self {
            cursor: cursor.to_string(),
            next_cursor: next_cursor.map(|c| c.to_string()),
            has_more,
        }
    }
}

/// The response envelope
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<ErrorBody>,
    pub pagination: Option<Pagination>,
}

/// Success envelope
pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        ok: true,
        data: Some(data),
        error: None,
        pagination: None,
    })
}

/// Success envelope with pagination
pub fn ok_paged<T: Serialize>(data: T, pagination: Pagination) -> Json<Envelope<T>> {
    Json(Envelope {
        ok: true,
        data: Some(data),
        error: None,
        pagination: Some(pagination),
    })
}

/// Typed API error; kinds map 1:1 to wire codes
#[derive(Debug)]
pub enum ApiError {
    Unauthorized { message: String },
    Forbidden { message: String },
    NotFound { message: String },
    Validation { message: String },
    Conflict { message: String },
    RateLimited { message: String },
    Internal { message: String },
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation { .. } => "VALIDATION",
            Self::Conflict { .. } => "CONFLICT",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::Unauthorized { message }
            | Self::Forbidden { message }
            | Self::NotFound { message }
            | Self::Validation { message }
            | Self::Conflict { message }
            | Self::RateLimited { message }
            | Self::Internal { message } => message,
        }
    }

    /// The wire body, also used by stream error frames
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.message().to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope: Envelope<()> = Envelope {
            ok: false,
            data: None,
            error: Some(self.body()),
            pagination: None,
        };
        (self.status(), Json(envelope)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(message) => Self::Conflict { message },
            other => {
                tracing::error!(error = %other, "Store error");
                Self::internal("store operation failed")
            }
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::Validation(message) => Self::Validation { message },
            BrokerError::NotFound(message) => Self::NotFound { message },
            BrokerError::Forbidden(message) => Self::Forbidden { message },
            BrokerError::Store(store) => store.into(),
        }
    }
}

/// Parse a client-supplied cursor string
pub fn parse_cursor(raw: &Option<String>) -> Result<Cursor, ApiError> {
    match raw {
        None => Ok(0),
        Some(s) => s
            .parse::<Cursor>()
            .map_err(|_| ApiError::validation(format!("invalid cursor: {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_invariant_ok_xor_error() {
        let success = ok(serde_json::json!({"x": 1}));
        assert!(success.0.ok);
        assert!(success.0.error.is_none());

        let failure: Envelope<()> = Envelope {
            ok: false,
            data: None,
            error: Some(ApiError::not_found("nope").body()),
            pagination: None,
        };
        assert!(!failure.ok);
        assert!(failure.error.is_some());
    }

    #[test]
    fn test_codes() {
        assert_eq!(ApiError::unauthorized("x").code(), "UNAUTHORIZED");
        assert_eq!(ApiError::forbidden("x").code(), "FORBIDDEN");
        assert_eq!(ApiError::not_found("x").code(), "NOT_FOUND");
        assert_eq!(ApiError::validation("x").code(), "VALIDATION");
        assert_eq!(ApiError::conflict("x").code(), "CONFLICT");
        assert_eq!(ApiError::rate_limited("x").code(), "RATE_LIMITED");
        assert_eq!(ApiError::internal("x").code(), "INTERNAL");
    }

    #[test]
    fn test_store_conflict_maps_to_conflict() {
        let api: ApiError = StoreError::conflict("token mismatch").into();
        assert_eq!(api.code(), "CONFLICT");
    }

    #[test]
    fn test_broker_errors_map() {
        assert_eq!(
            ApiError::from(BrokerError::validation("bad")).code(),
            "VALIDATION"
        );
        assert_eq!(
            ApiError::from(BrokerError::not_found("gone")).code(),
            "NOT_FOUND"
        );
        assert_eq!(
            ApiError::from(BrokerError::forbidden("no")).code(),
            "FORBIDDEN"
        );
    }

    #[test]
    fn test_parse_cursor() {
        assert_eq!(parse_cursor(&None).unwrap(), 0);
        assert_eq!(parse_cursor(&Some("42".to_string())).unwrap(), 42);
        assert!(parse_cursor(&Some("nope".to_string())).is_err());
    }

    #[test]
    fn test_pagination_strings() {
        let p = Pagination::new(10, Some(20), true);
        assert_eq!(p.cursor, "10");
        assert_eq!(p.next_cursor.as_deref(), Some("20"));
        assert!(p.has_more);
    }
}
