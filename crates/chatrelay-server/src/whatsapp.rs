use std::sync::Arc;

use async_trait::async_trait;
use chatrelay_db::{Database, entities::Account};
use chatrelay_security::SafeHttpClient;
use reqwest::Method;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

/// Outbound sender backed by the WhatsApp Cloud API's `/messages` endpoint.
/// Implements [`chatrelay_campaigns::worker::RecipientSender`] so campaign
/// workers can send through it without depending on this crate; also used
/// directly by the automation router for flow/keyword replies.
pub struct WhatsAppSender {
    http: Arc<SafeHttpClient>,
    db: Arc<dyn Database>,
    org_id: Uuid,
    account_id: Uuid,
}

impl WhatsAppSender {
    #[must_use]
    pub fn new(http: Arc<SafeHttpClient>, db: Arc<dyn Database>, org_id: Uuid, account_id: Uuid) -> Self {
        Self { http, db, org_id, account_id }
    }

    pub async fn send_text(&self, contact_id: Uuid, text: &str) -> anyhow::Result<()> {
        self.dispatch(contact_id, json!({"type": "text", "text": {"body": text}})).await
    }

    async fn dispatch(&self, contact_id: Uuid, mut message: Value) -> anyhow::Result<()> {
        let account = self.db.get_account(self.org_id, self.account_id).await?;
        let contact = self.db.get_contact(self.org_id, contact_id).await?;

        if let Some(obj) = message.as_object_mut() {
            obj.insert("messaging_product".to_string(), json!("whatsapp"));
            obj.insert("to".to_string(), json!(contact.wa_id));
        }

        let url = graph_messages_url(&account);
        let body = serde_json::to_vec(&message)?;
        let auth = format!("Bearer {}", account.access_token);

        let response = self
            .http
            .send(
                Method::POST,
                &url,
                &[("authorization", auth.as_str()), ("content-type", "application/json")],
                Some(body),
            )
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(%status, %contact_id, "whatsapp send returned non-success status");
            anyhow::bail!("whatsapp api returned {status}");
        }
        Ok(())
    }
}

fn graph_messages_url(account: &Account) -> String {
    format!("https://graph.facebook.com/v19.0/{}/messages", account.phone_number_id)
}

#[async_trait]
impl chatrelay_campaigns::worker::RecipientSender for WhatsAppSender {
    async fn send(&self, job: &chatrelay_protocol::campaign::CampaignSendJob) -> chatrelay_campaigns::Result<()> {
        self.dispatch(job.contact_id, job.template_payload.clone())
            .await
            .map_err(|err| chatrelay_campaigns::Error::Message(err.to_string()))
    }
}
