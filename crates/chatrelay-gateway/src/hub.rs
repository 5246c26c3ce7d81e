use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicU64, Ordering},
};

use chatrelay_common::events::DomainEvent;
use chatrelay_protocol::gateway::ServerFrame;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

/// One live WebSocket connection. `sender` feeds a per-connection write
/// task; sends are best-effort and never block the hub — a client that
/// can't keep up gets dropped rather than back-pressuring every other
/// connection, mirroring the teacher's `ConnectedClient::send`.
struct ConnectedClient {
    org_id: String,
    sender: mpsc::UnboundedSender<String>,
}

/// The WebSocket fan-out hub: tracks connected clients per org and
/// broadcasts domain events to whichever of them have subscribed.
///
/// Grounded on `crates/gateway/src/state.rs`'s `GatewayState` (client
/// registry + `next_seq`) and `crates/gateway/src/broadcast.rs`'s
/// drop-if-slow fan-out, simplified: clients here subscribe to a single
/// org rather than carrying scopes/roles, since presence and automation
/// events are already tenant-scoped by construction.
pub struct Hub {
    clients: RwLock<HashMap<Uuid, ConnectedClient>>,
    org_index: RwLock<HashMap<String, HashSet<Uuid>>>,
    seq: AtomicU64,
}

impl Hub {
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            org_index: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a newly-authenticated connection, returning its id.
    pub async fn register(&self, org_id: String, sender: mpsc::UnboundedSender<String>) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.clients
            .write()
            .await
            .insert(conn_id, ConnectedClient { org_id: org_id.clone(), sender });
        self.org_index.write().await.entry(org_id).or_default().insert(conn_id);
        conn_id
    }

    pub async fn remove(&self, conn_id: Uuid) {
        let mut clients = self.clients.write().await;
        if let Some(client) = clients.remove(&conn_id) {
            drop(clients);
            if let Some(set) = self.org_index.write().await.get_mut(&client.org_id) {
                set.remove(&conn_id);
            }
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Delivers `event` to every connection subscribed to `org_id`.
    /// Best-effort: a send failure just means that one client is gone or
    /// backed up, and is silently skipped rather than failing the whole
    /// broadcast.
    pub async fn broadcast_to_org(&self, org_id: &str, event: &str, payload: serde_json::Value) {
        let frame = ServerFrame::event(event, payload);
        let Ok(json) = serde_json::to_string(&frame) else {
            return;
        };

        let conn_ids: Vec<Uuid> = self
            .org_index
            .read()
            .await
            .get(org_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        let clients = self.clients.read().await;
        for conn_id in conn_ids {
            if let Some(client) = clients.get(&conn_id) {
                if client.sender.send(json.clone()).is_err() {
                    debug!(%conn_id, "dropping slow or disconnected gateway client");
                }
            }
        }
    }

    /// Routes a [`DomainEvent`] to the right WS event name/payload and
    /// broadcasts it to that event's org.
    pub async fn dispatch(&self, event: &DomainEvent) {
        let org_id = event.org_id().to_string();
        let (name, payload) = match event {
            DomainEvent::InboundMessageReceived { message_id, contact_id, .. } => (
                "message_received",
                serde_json::json!({ "message_id": message_id, "contact_id": contact_id }),
            ),
            DomainEvent::OutboundMessageSent { message_id, contact_id, .. } => (
                "message_sent",
                serde_json::json!({ "message_id": message_id, "contact_id": contact_id }),
            ),
            DomainEvent::ContactPresenceChanged { contact_id, online, .. } => (
                "contact_presence_changed",
                serde_json::json!({ "contact_id": contact_id, "online": online }),
            ),
            DomainEvent::AgentTransferCreated { transfer_id, contact_id, .. } => (
                "agent_transfer_created",
                serde_json::json!({ "transfer_id": transfer_id, "contact_id": contact_id }),
            ),
            DomainEvent::AgentTransferResolved { transfer_id, .. } => (
                "agent_transfer_resolved",
                serde_json::json!({ "transfer_id": transfer_id }),
            ),
            DomainEvent::AgentTransferRequeued { transfer_id, contact_id, reassigned_to, .. } => (
                "agent_transfer_requeued",
                serde_json::json!({
                    "transfer_id": transfer_id, "contact_id": contact_id, "reassigned_to": reassigned_to,
                }),
            ),
            DomainEvent::CampaignProgressed { campaign_id, sent, failed, total, .. } => (
                "campaign_progressed",
                serde_json::json!({
                    "campaign_id": campaign_id, "sent": sent, "failed": failed, "total": total,
                }),
            ),
            DomainEvent::CampaignCompleted { campaign_id, .. } => (
                "campaign_completed",
                serde_json::json!({ "campaign_id": campaign_id }),
            ),
        };
        self.broadcast_to_org(&org_id, name, payload).await;
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_common::ids::{ContactId, OrgId};

    #[tokio::test]
    async fn broadcast_reaches_subscribed_org_only() {
        let hub = Hub::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        hub.register("org-a".to_string(), tx_a).await;
        hub.register("org-b".to_string(), tx_b).await;

        hub.broadcast_to_org("org-a", "ping", serde_json::json!({})).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn remove_stops_future_delivery() {
        let hub = Hub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn_id = hub.register("org-a".to_string(), tx).await;
        hub.remove(conn_id).await;

        hub.broadcast_to_org("org-a", "ping", serde_json::json!({})).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispatch_routes_presence_event_to_its_org() {
        let hub = Hub::new();
        let org_id = OrgId::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(org_id.to_string(), tx).await;

        hub.dispatch(&DomainEvent::ContactPresenceChanged {
            org_id,
            contact_id: ContactId::new(),
            online: true,
        })
        .await;

        let received = rx.try_recv().expect("event delivered");
        assert!(received.contains("contact_presence_changed"));
    }
}
