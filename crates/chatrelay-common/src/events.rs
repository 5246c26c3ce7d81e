use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, CampaignId, ContactId, MessageId, OrgId, TransferId, UserId};

/// Domain events raised by the inbound/outbound pipelines.
///
/// Consumers (the WebSocket hub, the automation pipeline, the webhook
/// outbox) subscribe to the subset they care about. This is an in-process
/// notification, not a wire format — [`chatrelay_protocol`] defines what
/// crosses the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    InboundMessageReceived {
        org_id: OrgId,
        account_id: AccountId,
        contact_id: ContactId,
        message_id: MessageId,
    },
    OutboundMessageSent {
        org_id: OrgId,
        account_id: AccountId,
        contact_id: ContactId,
        message_id: MessageId,
    },
    ContactPresenceChanged {
        org_id: OrgId,
        contact_id: ContactId,
        online: bool,
    },
    AgentTransferCreated {
        org_id: OrgId,
        transfer_id: TransferId,
        contact_id: ContactId,
    },
    AgentTransferResolved {
        org_id: OrgId,
        transfer_id: TransferId,
    },
    /// An agent went away and this transfer was bumped back to `queued`
    /// (and, if a backup agent was found immediately, reassigned to them).
    AgentTransferRequeued {
        org_id: OrgId,
        transfer_id: TransferId,
        contact_id: ContactId,
        reassigned_to: Option<UserId>,
    },
    CampaignProgressed {
        org_id: OrgId,
        campaign_id: CampaignId,
        sent: u64,
        failed: u64,
        total: u64,
    },
    CampaignCompleted {
        org_id: OrgId,
        campaign_id: CampaignId,
    },
}

impl DomainEvent {
    #[must_use]
    pub fn org_id(&self) -> OrgId {
        match self {
            Self::InboundMessageReceived { org_id, .. }
            | Self::OutboundMessageSent { org_id, .. }
            | Self::ContactPresenceChanged { org_id, .. }
            | Self::AgentTransferCreated { org_id, .. }
            | Self::AgentTransferResolved { org_id, .. }
            | Self::AgentTransferRequeued { org_id, .. }
            | Self::CampaignProgressed { org_id, .. }
            | Self::CampaignCompleted { org_id, .. } => *org_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn org_id_extracted_for_every_variant() {
        let org_id = OrgId::new();
        let event = DomainEvent::CampaignCompleted {
            org_id,
            campaign_id: CampaignId::new(),
        };
        assert_eq!(event.org_id(), org_id);
    }

    #[test]
    fn serializes_with_kind_tag() {
        let event = DomainEvent::ContactPresenceChanged {
            org_id: OrgId::new(),
            contact_id: ContactId::new(),
            online: true,
        };
        let json = serde_json::to_value(&event).expect("serializes");
        assert_eq!(json["kind"], "contact_presence_changed");
    }
}
