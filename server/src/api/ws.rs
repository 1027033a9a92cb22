//! Stream hub
//!
//! One duplex WebSocket per connection. The hub authenticates the upgrade,
//! sends an `initial_image` frame (cursor plus immediately available
//! deliveries), then forwards mailbox and topic hints as `delta` frames
//! followed by `message` frames for the connection's own deliveries.
//! Pushing a full message marks the delivery `delivered` if still pending.
//!
//! The socket writer is shared behind a mutex and every write carries a
//! deadline; a connection that cannot drain is closed and the client
//! reconnects and re-reads by cursor. Unknown client frames get a typed
//! `error` frame without closing the connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::api::auth::{AuthGate, GateError, Identity};
use crate::api::routes::messages::PublishRequest;
use crate::api::types::ApiError;
use crate::broker::BrokerService;
use crate::bus::DeliveryHint;
use crate::core::constants::{WS_INITIAL_IMAGE_LIMIT, WS_WRITE_DEADLINE_SECS};
use crate::data::repositories::deliveries::{self, InboxFilter};
use crate::data::types::InboxEntry;
use crate::utils::crypto::extract_bearer;

/// Shared state for the stream hub
#[derive(Clone)]
pub struct WsApiState {
    pub broker: Arc<BrokerService>,
    pub gate: Arc<AuthGate>,
    pub cancel: CancellationToken,
}

pub fn routes(
    broker: Arc<BrokerService>,
    gate: Arc<AuthGate>,
    cancel: CancellationToken,
) -> Router<()> {
    let state = WsApiState {
        broker,
        gate,
        cancel,
    };
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}

// =============================================================================
// Frames
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Ack {
        op: String,
    },
    InitialImage {
        cursor: String,
        messages: Vec<InboxEntry>,
    },
    Delta {
        topic_id: Option<String>,
        data: DeliveryHint,
    },
    Message {
        data: InboxEntry,
    },
    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
    Subscribe {
        topic_id: String,
        #[allow(dead_code)]
        cursor: Option<String>,
    },
    Unsubscribe {
        topic_id: String,
    },
    Send {
        payload: PublishRequest,
    },
}

// =============================================================================
// Upgrade
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub api_key: Option<String>,
    pub cursor: Option<String>,
}

pub async fn ws_upgrade(
    State(state): State<WsApiState>,
    Query(query): Query<WsQuery>,
    headers: axum::http::HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer)
        .or_else(|| query.api_key.clone())
        .ok_or_else(|| ApiError::unauthorized("missing credential"))?;

    let identity = state.gate.authenticate(&token).await.map_err(|e| match e {
        GateError::Unauthorized => ApiError::unauthorized("invalid credential"),
        GateError::Store(store) => store.into(),
    })?;

    let cursor = crate::api::types::parse_cursor(&query.cursor)?;

    Ok(ws.on_upgrade(move |socket| run_connection(state, identity, cursor, socket)))
}

// =============================================================================
// Connection
// =============================================================================

type SharedSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Serialize and write one frame under the per-frame deadline
///
/// Returns false when the connection should be closed (stalled or gone).
async fn send_frame(sink: &SharedSink, frame: &ServerFrame) -> bool {
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize stream frame");
            return true;
        }
    };

    let deadline = Duration::from_secs(WS_WRITE_DEADLINE_SECS);
    let mut guard = sink.lock().await;
    match tokio::time::timeout(deadline, guard.send(Message::Text(json.into()))).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Stream write failed");
            false
        }
        Err(_) => {
            tracing::debug!("Stream write deadline exceeded, closing connection");
            false
        }
    }
}

fn spawn_forwarder(
    mut rx: broadcast::Receiver<DeliveryHint>,
    hints_tx: mpsc::Sender<DeliveryHint>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Ok(hint) => {
                        if hints_tx.send(hint).await.is_err() {
                            break;
                        }
                    }
                    // missed hints; the client reconverges by cursor
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!(lagged = n, "Stream forwarder lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });
}

async fn run_connection(
    state: WsApiState,
    identity: Identity,
    cursor: i64,
    socket: WebSocket,
) {
    let agent_id = identity.agent_id.clone();
    tracing::debug!(agent = %agent_id, "Stream connected");

    let (sink, stream) = socket.split();
    let sink: SharedSink = Arc::new(Mutex::new(sink));
    let conn_cancel = state.cancel.child_token();

    // Hints from the mailbox and subscribed topic channels funnel into one
    // queue owned by this connection.
    let (hints_tx, mut hints_rx) = mpsc::channel::<DeliveryHint>(256);
    spawn_forwarder(
        state.broker.bus().subscribe_mailbox(&agent_id),
        hints_tx.clone(),
        conn_cancel.clone(),
    );
    // every connection observes the broadcast topic
    spawn_forwarder(
        state
            .broker
            .bus()
            .subscribe_topic(state.broker.broadcast_topic_id()),
        hints_tx.clone(),
        conn_cancel.clone(),
    );

    // initial_image: last known cursor plus immediately available rows
    match state
        .broker
        .read_inbox(&agent_id, &InboxFilter::default(), cursor, WS_INITIAL_IMAGE_LIMIT)
        .await
    {
        Ok(page) => {
            let frame = ServerFrame::InitialImage {
                cursor: page.next_cursor.unwrap_or(cursor).to_string(),
                messages: page.entries,
            };
            if !send_frame(&sink, &frame).await {
                conn_cancel.cancel();
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Initial image read failed");
            conn_cancel.cancel();
        }
    }

    let mut topic_subs: HashMap<String, CancellationToken> = HashMap::new();
    // A delivery routed to both the mailbox and a subscribed topic channel
    // arrives twice; remember recent ids so each delta goes out once.
    let mut recent_ids: std::collections::VecDeque<i64> = std::collections::VecDeque::new();
    let mut reader = stream;

    while !conn_cancel.is_cancelled() {
        tokio::select! {
            biased;
            _ = conn_cancel.cancelled() => break,
            frame = reader.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_client_frame(
                            &state,
                            &identity,
                            &sink,
                            &hints_tx,
                            &conn_cancel,
                            &mut topic_subs,
                            text.as_str(),
                        )
                        .await
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong/binary handled by axum or ignored
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Stream read failed");
                        break;
                    }
                }
            }
            hint = hints_rx.recv() => {
                match hint {
                    Some(hint) => {
                        if recent_ids.contains(&hint.delivery_id) {
                            continue;
                        }
                        recent_ids.push_back(hint.delivery_id);
                        if recent_ids.len() > 128 {
                            recent_ids.pop_front();
                        }
                        if !handle_hint(&state, &agent_id, &sink, hint).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    // releases the mailbox and every topic forwarder
    conn_cancel.cancel();
    tracing::debug!(agent = %agent_id, "Stream disconnected");
}

async fn handle_client_frame(
    state: &WsApiState,
    identity: &Identity,
    sink: &SharedSink,
    hints_tx: &mpsc::Sender<DeliveryHint>,
    conn_cancel: &CancellationToken,
    topic_subs: &mut HashMap<String, CancellationToken>,
    raw: &str,
) -> bool {
    let frame = match serde_json::from_str::<ClientFrame>(raw) {
        Ok(frame) => frame,
        Err(e) => {
            // typed error, connection stays open
            return send_frame(
                sink,
                &ServerFrame::Error {
                    code: "VALIDATION".to_string(),
                    message: format!("unknown frame: {}", e),
                },
            )
            .await;
        }
    };

    match frame {
        ClientFrame::Ping => {
            send_frame(sink, &ServerFrame::Ack { op: "ping".to_string() }).await
        }
        ClientFrame::Subscribe { topic_id, .. } => {
            if !topic_subs.contains_key(&topic_id) {
                let cancel = conn_cancel.child_token();
                spawn_forwarder(
                    state.broker.bus().subscribe_topic(&topic_id),
                    hints_tx.clone(),
                    cancel.clone(),
                );
                topic_subs.insert(topic_id, cancel);
            }
            send_frame(sink, &ServerFrame::Ack { op: "subscribe".to_string() }).await
        }
        ClientFrame::Unsubscribe { topic_id } => {
            if let Some(cancel) = topic_subs.remove(&topic_id) {
                cancel.cancel();
            }
            send_frame(sink, &ServerFrame::Ack { op: "unsubscribe".to_string() }).await
        }
        ClientFrame::Send { payload } => {
            let spec = payload.into_spec(false);
            match state.broker.publish(&identity.agent_id, &spec).await {
                Ok(_) => send_frame(sink, &ServerFrame::Ack { op: "send".to_string() }).await,
                Err(e) => {
                    let body = ApiError::from(e).body();
                    send_frame(
                        sink,
                        &ServerFrame::Error {
                            code: body.code,
                            message: body.message,
                        },
                    )
                    .await
                }
            }
        }
    }
}

/// Push delta + message frames for one hint
async fn handle_hint(
    state: &WsApiState,
    agent_id: &str,
    sink: &SharedSink,
    hint: DeliveryHint,
) -> bool {
    let delivery_id = hint.delivery_id;
    let own = hint.recipient_agent_id.as_deref() == Some(agent_id);
    let delta = ServerFrame::Delta {
        topic_id: hint.topic_id.clone(),
        data: hint,
    };
    if !send_frame(sink, &delta).await {
        return false;
    }

    // full message only for this connection's own deliveries
    if !own {
        return true;
    }
    match deliveries::get_entry(state.broker.store().pool(), delivery_id).await {
        Ok(Some(entry)) => {
            if !send_frame(sink, &ServerFrame::Message { data: entry }).await {
                return false;
            }
            // stream observation without a claim
            if let Err(e) = state.broker.mark_delivered(delivery_id).await {
                tracing::warn!(error = %e, "Failed to mark delivery delivered");
            }
            true
        }
        Ok(None) => true, // purged between hint and read
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load delivery for stream");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frame_parsing() {
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"type": "ping"}"#).unwrap(),
            ClientFrame::Ping
        ));

        let subscribe =
            serde_json::from_str::<ClientFrame>(r#"{"type": "subscribe", "topic_id": "t1"}"#)
                .unwrap();
        assert!(matches!(subscribe, ClientFrame::Subscribe { ref topic_id, .. } if topic_id == "t1"));

        let send = serde_json::from_str::<ClientFrame>(
            r#"{"type": "send", "payload": {"to_agent": "bob", "content": "hi"}}"#,
        )
        .unwrap();
        assert!(matches!(send, ClientFrame::Send { .. }));

        assert!(serde_json::from_str::<ClientFrame>(r#"{"type": "warp"}"#).is_err());
    }

    #[test]
    fn test_server_frame_wire_shapes() {
        let initial = ServerFrame::InitialImage {
            cursor: "7".to_string(),
            messages: vec![],
        };
        let json = serde_json::to_value(&initial).unwrap();
        assert_eq!(json["type"], "initial_image");
        assert_eq!(json["cursor"], "7");

        let error = ServerFrame::Error {
            code: "VALIDATION".to_string(),
            message: "unknown frame".to_string(),
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "VALIDATION");

        let delta = ServerFrame::Delta {
            topic_id: Some("t1".to_string()),
            data: DeliveryHint {
                message_id: 1,
                delivery_id: 2,
                recipient_agent_id: Some("a1".to_string()),
                topic_id: Some("t1".to_string()),
            },
        };
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["type"], "delta");
        assert_eq!(json["data"]["delivery_id"], 2);
    }
}
