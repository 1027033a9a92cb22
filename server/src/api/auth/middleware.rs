//! Authentication middleware

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use crate::api::types::ApiError;
use crate::core::constants::API_KEY_QUERY_PARAM;
use crate::utils::crypto::extract_bearer;

use super::gate::{AuthGate, GateError};

/// Shared auth state for middleware
#[derive(Clone)]
pub struct AuthState {
    pub gate: Arc<AuthGate>,
}

/// Pull the credential from the Authorization header or, for stream
/// upgrades, the `api_key` query parameter.
pub fn extract_token(request: &Request) -> Option<String> {
    if let Some(header_value) = request.headers().get(header::AUTHORIZATION)
        && let Ok(raw) = header_value.to_str()
        && let Some(token) = extract_bearer(raw)
    {
        return Some(token);
    }

    request.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            pair.strip_prefix(API_KEY_QUERY_PARAM)
                .and_then(|rest| rest.strip_prefix('='))
                .map(|value| value.to_string())
        })
    })
}

/// Authentication middleware: resolves the credential and injects
/// `Identity` into request extensions.
pub async fn require_auth(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(&request)
        .ok_or_else(|| ApiError::unauthorized("missing credential"))?;

    let identity = state.gate.authenticate(&token).await.map_err(|e| match e {
        GateError::Unauthorized => ApiError::unauthorized("invalid credential"),
        GateError::Store(store) => store.into(),
    })?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    use super::*;

    fn request(uri: &str, auth: Option<&str>) -> Request {
        let mut builder = HttpRequest::builder().uri(uri);
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_extract_token_from_header() {
        let req = request("/messages", Some("Bearer oc_abc"));
        assert_eq!(extract_token(&req).as_deref(), Some("oc_abc"));
    }

    #[test]
    fn test_extract_token_from_query() {
        let req = request("/ws?api_key=oc_xyz&cursor=5", None);
        assert_eq!(extract_token(&req).as_deref(), Some("oc_xyz"));
    }

    #[test]
    fn test_header_wins_over_query() {
        let req = request("/ws?api_key=oc_query", Some("Bearer oc_header"));
        assert_eq!(extract_token(&req).as_deref(), Some("oc_header"));
    }

    #[test]
    fn test_missing_token() {
        let req = request("/messages", None);
        assert_eq!(extract_token(&req), None);
        let req = request("/messages", Some("Basic dXNlcg=="));
        assert_eq!(extract_token(&req), None);
    }

    #[test]
    fn test_query_param_must_match_exactly() {
        // api_key_extra must not be mistaken for api_key
        let req = request("/ws?api_key_extra=zzz", None);
        assert_eq!(extract_token(&req), None);
    }
}
