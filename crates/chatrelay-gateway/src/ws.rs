use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use chatrelay_protocol::gateway::{ClientFrame, ServerFrame};
use chatrelay_security::hmac_sig;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::hub::Hub;

/// Invoked when a connected user toggles availability. Implemented by
/// `chatrelay-server`, which owns the transfer manager, so this crate
/// never needs to depend on `chatrelay-transfer`.
#[async_trait]
pub trait AvailabilityHook: Send + Sync {
    async fn on_availability_changed(&self, org_id: &str, user_id: &str, away: bool);
}

pub struct WsState {
    pub hub: Arc<Hub>,
    pub token_secret: String,
    pub availability: Option<Arc<dyn AvailabilityHook>>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub org_id: String,
    pub user_id: String,
    pub token: String,
}

/// `GET /ws?org_id=...&user_id=...&token=...` — upgrades to a WebSocket
/// connection scoped to one org and user. The token is a short-lived
/// `org_id`+`user_id`-bound HMAC, not a general-purpose credential, so it
/// can be safely carried as a query parameter (it's meant to be used
/// once, from one place, and expire quickly) — binding `user_id` into
/// the signature, not just `org_id`, matters now that a connection can
/// toggle that user's own availability. Grounded on
/// `crates/gateway/src/ws.rs`'s connection lifecycle (split socket, spawn
/// write task, handshake-then-serve), with the teacher's multi-tier
/// credential-store auth replaced by this simpler signed-token model per
/// `SPEC_FULL.md` §4.3.
pub async fn upgrade(
    State(state): State<Arc<WsState>>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if !verify_connect_token(&query.org_id, &query.user_id, &query.token, &state.token_secret) {
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    }

    ws.on_upgrade(move |socket| handle_connection(socket, state, query.org_id, query.user_id))
}

/// Signs `org_id`+`user_id` with the gateway token secret; the client
/// obtains this token from an authenticated HTTP endpoint (outside this
/// crate) before opening the socket.
#[must_use]
pub fn sign_connect_token(org_id: &str, user_id: &str, secret: &str) -> String {
    hmac_sig::sign(connect_token_payload(org_id, user_id).as_bytes(), secret)
}

fn verify_connect_token(org_id: &str, user_id: &str, token: &str, secret: &str) -> bool {
    hmac_sig::verify(connect_token_payload(org_id, user_id).as_bytes(), token, secret)
}

fn connect_token_payload(org_id: &str, user_id: &str) -> String {
    format!("{org_id}:{user_id}")
}

async fn handle_connection(socket: WebSocket, state: Arc<WsState>, org_id: String, user_id: String) {
    let (mut ws_tx, mut ws_rx) = futures::StreamExt::split(socket);
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let write_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if futures::SinkExt::send(&mut ws_tx, Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let conn_id = state.hub.register(org_id.clone(), tx.clone()).await;
    debug!(%conn_id, "gateway client connected");

    while let Some(Ok(message)) = futures::StreamExt::next(&mut ws_rx).await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::Ping) => {
                    if let Ok(json) = serde_json::to_string(&ServerFrame::Pong) {
                        let _ = tx.send(json);
                    }
                }
                Ok(ClientFrame::Subscribe { .. }) => {
                    // Subscription scope is fixed to the org at connect
                    // time; re-subscribing is a no-op.
                }
                Ok(ClientFrame::SetAvailability { away }) => {
                    if let Some(hook) = &state.availability {
                        hook.on_availability_changed(&org_id, &user_id, away).await;
                    }
                }
                Err(err) => warn!(%err, "ignoring malformed client frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.hub.remove(conn_id).await;
    write_task.abort();
    debug!(%conn_id, "gateway client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_token_roundtrips() {
        let token = sign_connect_token("org-123", "user-456", "secret");
        assert!(verify_connect_token("org-123", "user-456", &token, "secret"));
        assert!(!verify_connect_token("org-999", "user-456", &token, "secret"));
        assert!(!verify_connect_token("org-123", "user-999", &token, "secret"));
    }
}
