//! API server initialization

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use super::auth::{AuthGate, AuthState, require_auth};
use super::middleware;
use super::rate_limit::{RateLimitState, RateLimiter, rate_limit_middleware};
use super::routes::{agents, groups, health, messages, stats, topics};
use super::ws;
use crate::broker::BrokerService;
use crate::core::CoreApp;
use crate::core::config::RateLimitConfig;
use crate::core::constants::DEFAULT_BODY_LIMIT;
use crate::data::StoreService;

pub struct ApiServer {
    app: CoreApp,
}

/// Assemble the full router
///
/// The unauthenticated surface is health, loopback self-registration, and
/// the stream upgrade (which authenticates inside, via header or `api_key`
/// query param). Everything else sits behind the auth layer, with rate
/// limiting inside it so the limit keys off the authenticated identity.
pub(crate) fn build_router(
    store: Arc<StoreService>,
    broker: Arc<BrokerService>,
    gate: Arc<AuthGate>,
    cancel: CancellationToken,
    rate_limit: &RateLimitConfig,
) -> Router {
    let public_routes = Router::new()
        .merge(health::routes())
        .merge(agents::register_routes(Arc::clone(&store), Arc::clone(&gate)))
        .merge(ws::routes(
            Arc::clone(&broker),
            Arc::clone(&gate),
            cancel.clone(),
        ));

    let mut protected_routes = Router::new()
        .merge(messages::routes(Arc::clone(&broker), cancel))
        .merge(topics::routes(Arc::clone(&broker)))
        .merge(groups::routes(Arc::clone(&broker)))
        .merge(agents::routes(store, Arc::clone(&gate)))
        .merge(stats::routes(broker));

    if rate_limit.enabled {
        let limiter = Arc::new(RateLimiter::new(rate_limit.rpm));
        protected_routes = protected_routes.layer(axum::middleware::from_fn_with_state(
            RateLimitState { limiter },
            rate_limit_middleware,
        ));
    }

    let protected_routes = protected_routes.layer(axum::middleware::from_fn_with_state(
        AuthState { gate },
        require_auth,
    ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(middleware::handle_404)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(middleware::cors())
        .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT))
}

impl ApiServer {
    pub fn new(app: CoreApp) -> Self {
        Self { app }
    }

    /// Serve until shutdown; returns the CoreApp for graceful teardown
    pub async fn start(self) -> Result<CoreApp> {
        let app = self.app;

        let shutdown = app.shutdown.clone();
        let addr = SocketAddr::new(app.config.server.host.parse()?, app.config.server.port);

        let router = build_router(
            Arc::clone(&app.store),
            Arc::clone(&app.broker),
            Arc::clone(&app.gate),
            app.cancel.clone(),
            &app.config.rate_limit,
        );

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "Server listening");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.wait())
        .await?;

        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::extract::connect_info::ConnectInfo;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    use super::*;
    use crate::bus::MailboxBus;
    use crate::core::config::BrokerConfig;

    const LOOPBACK: &str = "127.0.0.1:50000";
    const REMOTE: &str = "203.0.113.9:50000";

    /// Full router over an in-memory store, with the peer address pinned
    async fn test_router(peer: &str) -> Router {
        let store = Arc::new(StoreService::open_in_memory().await.unwrap());
        let bus = Arc::new(MailboxBus::new());
        let broker = Arc::new(
            BrokerService::init(Arc::clone(&store), bus, BrokerConfig::default())
                .await
                .unwrap(),
        );
        let gate = Arc::new(
            AuthGate::init(Arc::clone(&store), broker.broadcast_topic_id().to_string())
                .await
                .unwrap(),
        );
        let rate_limit = RateLimitConfig::default();

        build_router(store, broker, gate, CancellationToken::new(), &rate_limit)
            .layer(axum::Extension(ConnectInfo(
                peer.parse::<SocketAddr>().unwrap(),
            )))
    }

    fn request(
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    async fn register(router: &Router, name: &str) -> String {
        let (status, body) = send(
            router,
            request(
                "POST",
                "/agents/auto-register",
                None,
                Some(serde_json::json!({
                    "name": name,
                    "host": "testhost",
                    "executable": format!("/usr/bin/{name}"),
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "register failed: {body}");
        body["data"]["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_healthz_envelope() {
        let router = test_router(LOOPBACK).await;
        let (status, body) = send(&router, request("GET", "/healthz", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert!(body["error"].is_null());
        assert_eq!(body["data"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_credential_is_enveloped_401() {
        let router = test_router(LOOPBACK).await;
        let (status, body) = send(&router, request("GET", "/messages", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_auto_register_rejected_off_loopback() {
        let router = test_router(REMOTE).await;
        let (status, body) = send(
            &router,
            request(
                "POST",
                "/agents/auto-register",
                None,
                Some(serde_json::json!({
                    "name": "intruder",
                    "host": "h",
                    "executable": "/bin/x",
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_unknown_route_is_enveloped_404() {
        let router = test_router(LOOPBACK).await;
        let (status, body) = send(&router, request("GET", "/nope", None, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_direct_publish_claim_ack_flow() {
        let router = test_router(LOOPBACK).await;
        let publisher = register(&router, "publisher").await;
        let worker = register(&router, "worker").await;

        // publish to the worker by name
        let (status, body) = send(
            &router,
            request(
                "POST",
                "/messages",
                Some(&publisher),
                Some(serde_json::json!({"to_agent": "worker", "content": "x"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "publish failed: {body}");
        assert_eq!(body["data"]["deliveries"], 1);

        // claim with a lease
        let (status, body) = send(
            &router,
            request(
                "POST",
                "/messages/claim",
                Some(&worker),
                Some(serde_json::json!({"limit": 1, "lease_seconds": 60})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let delivery = &body["data"][0]["delivery"];
        let delivery_id = delivery["id"].as_i64().unwrap();
        let token = delivery["claim_token"].as_str().unwrap().to_string();
        assert_eq!(delivery["status"], "leased");

        // ack with the claim token
        let (status, body) = send(
            &router,
            request(
                "POST",
                &format!("/messages/{delivery_id}/ack"),
                Some(&worker),
                Some(serde_json::json!({"claim_token": token})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);

        // a second ack with the same token is a conflict
        let (status, body) = send(
            &router,
            request(
                "POST",
                &format!("/messages/{delivery_id}/ack"),
                Some(&worker),
                Some(serde_json::json!({"claim_token": token})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "CONFLICT");

        // the acked row shows up only under all=true
        let (_, body) = send(
            &router,
            request("GET", "/messages?all=true", Some(&worker), None),
        )
        .await;
        assert_eq!(body["data"][0]["delivery"]["status"], "acked");
        let (_, body) = send(&router, request("GET", "/messages", Some(&worker), None)).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_publish_to_missing_agent_is_404() {
        let router = test_router(LOOPBACK).await;
        let publisher = register(&router, "publisher").await;

        let (status, body) = send(
            &router,
            request(
                "POST",
                "/messages",
                Some(&publisher),
                Some(serde_json::json!({"to_agent": "ghost", "content": "x"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_rate_limit_headers_present() {
        let router = test_router(LOOPBACK).await;
        let worker = register(&router, "worker").await;

        let response = router
            .clone()
            .oneshot(request("GET", "/messages", Some(&worker), None))
            .await
            .unwrap();
        assert!(response.headers().contains_key("X-RateLimit-Limit"));
        assert!(response.headers().contains_key("X-RateLimit-Remaining"));
    }
}
