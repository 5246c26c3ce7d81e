use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a campaign worker hands to its recipient-sender for one claimed
/// recipient. Kept separate from the DB row shape (owned by
/// `chatrelay-db`) so the send-time payload can evolve independently of
/// the `campaign_recipients` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSendJob {
    pub campaign_id: Uuid,
    pub recipient_id: Uuid,
    pub contact_id: Uuid,
    pub template_payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_json() {
        let job = CampaignSendJob {
            campaign_id: Uuid::nil(),
            recipient_id: Uuid::nil(),
            contact_id: Uuid::nil(),
            template_payload: serde_json::json!({"name": "Ada"}),
        };
        let json = serde_json::to_string(&job).expect("serializes");
        let back: CampaignSendJob = serde_json::from_str(&json).expect("parses");
        assert_eq!(back.template_payload["name"], "Ada");
    }
}
