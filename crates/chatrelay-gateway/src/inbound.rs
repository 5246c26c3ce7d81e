use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chatrelay_common::{
    events::DomainEvent,
    ids::{AccountId, ContactId, MessageId, OrgId},
};
use chatrelay_db::{Database, entities::MessageDirection};
use chatrelay_security::hmac_sig;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::hub::Hub;

/// Runs the automation cascade for one inbound message, decoupling this
/// crate from `chatrelay-automation`/`chatrelay-transfer` the same way
/// `chatrelay-campaigns::RecipientSender` decouples campaign sends from
/// the WhatsApp API. `chatrelay-server` supplies the real implementation.
#[async_trait]
pub trait AutomationHook: Send + Sync {
    async fn on_message(
        &self,
        org_id: Uuid,
        account_id: Uuid,
        contact_id: Uuid,
        text: &str,
        button_title: Option<&str>,
    );
}

/// Shared state for the inbound webhook endpoints.
pub struct InboundState {
    pub db: Arc<dyn Database>,
    pub hub: Arc<Hub>,
    pub verify_token: String,
    pub automation: Option<Arc<dyn AutomationHook>>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// `GET /webhooks/whatsapp` — Meta's subscription verification handshake.
/// Grounded on `crates/whatsapp-business/src/webhook.rs`'s
/// `verify_webhook_subscription`.
pub async fn verify_subscription(
    State(state): State<Arc<InboundState>>,
    Query(query): Query<VerifyQuery>,
) -> impl IntoResponse {
    match (query.mode.as_deref(), query.verify_token.as_deref(), query.challenge) {
        (Some("subscribe"), Some(token), Some(challenge)) if token == state.verify_token => {
            (StatusCode::OK, challenge).into_response()
        }
        _ => {
            warn!("webhook subscription verification failed");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

/// Minimal shape of a WhatsApp Cloud API webhook delivery: enough to
/// route to the right account and extract one inbound message. Full
/// payload is still recorded in `messages.body` for later inspection.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    pub field: String,
    pub value: WebhookValue,
}

#[derive(Debug, Deserialize)]
pub struct WebhookValue {
    pub metadata: WebhookMetadata,
    #[serde(default)]
    pub messages: Vec<WebhookMessage>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMetadata {
    pub phone_number_id: String,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMessage {
    pub from: String,
    pub id: String,
    #[serde(flatten)]
    pub body: serde_json::Value,
}

/// `POST /webhooks/whatsapp` — inbound message ingress.
///
/// The raw body is captured and HMAC-verified *before* JSON parsing, so a
/// malformed-but-unsigned payload is rejected for the right reason (bad
/// signature, not bad JSON) and a signed-but-malformed payload never
/// reaches the dedup/insert path. Grounded on
/// `crates/whatsapp-business/src/webhook.rs`'s `process_webhook`.
pub async fn receive_webhook(
    State(state): State<Arc<InboundState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let account_phone_hint = extract_phone_number_id(&body);
    let Some(phone_number_id) = account_phone_hint else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let account = match state.db.get_account_by_phone_number_id(&phone_number_id).await {
        Ok(account) => account,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };

    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !hmac_sig::verify(&body, signature, &account.app_secret) {
        warn!(phone_number_id, "rejected webhook with invalid signature");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    // Meta retries (with backoff, then eventual unsubscription) on anything
    // but 200, so a malformed-but-signed payload is logged and swallowed
    // rather than rejected — there's no sender on the other end to fix it.
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(%err, "malformed webhook payload after signature check passed");
            return StatusCode::OK.into_response();
        }
    };

    for entry in payload.entry {
        for change in entry.changes {
            if change.field != "messages" {
                continue;
            }
            for message in change.value.messages {
                handle_inbound_message(&state, &account, &message).await;
            }
        }
    }

    StatusCode::OK.into_response()
}

async fn handle_inbound_message(
    state: &InboundState,
    account: &chatrelay_db::entities::Account,
    message: &WebhookMessage,
) {
    let org_id = OrgId(account.org_id);
    let account_id = AccountId(account.id);

    let contact = match state.db.upsert_contact(account.id, account.org_id, &message.from).await {
        Ok(contact) => contact,
        Err(err) => {
            warn!(%err, "failed to upsert contact for inbound message");
            return;
        }
    };

    let record = chatrelay_db::entities::Message {
        id: Uuid::new_v4(),
        org_id: account.org_id,
        account_id: account.id,
        contact_id: contact.id,
        direction: MessageDirection::Inbound,
        wa_message_id: Some(message.id.clone()),
        body: message.body.clone(),
        created_at: chrono::Utc::now(),
    };

    match state.db.insert_message_deduped(&record).await {
        Ok(Some(inserted)) => {
            info!(message_id = %inserted.id, "recorded inbound message");
            state
                .hub
                .dispatch(&DomainEvent::InboundMessageReceived {
                    org_id,
                    account_id,
                    contact_id: ContactId(contact.id),
                    message_id: MessageId(inserted.id),
                })
                .await;

            if let Some(automation) = &state.automation {
                let content = extract_content(&message.body).unwrap_or_default();
                automation
                    .on_message(account.org_id, account.id, contact.id, &content.text, content.button_title.as_deref())
                    .await;
            }
        }
        Ok(None) => {
            info!(wa_message_id = %message.id, "duplicate inbound message, ignored");
        }
        Err(err) => warn!(%err, "failed to record inbound message"),
    }
}

/// Text content extracted from an inbound message for the automation
/// cascade. `button_title` is set only for interactive replies, carrying
/// the human-readable label shown on the button/list row the contact
/// picked — distinct from `text`, which is the id/payload a flow step
/// matches on.
#[derive(Debug, Default, Clone, PartialEq)]
struct InboundContent {
    text: String,
    button_title: Option<String>,
}

/// Pulls routable text out of a WhatsApp message: the plain body for
/// `{"type":"text","text":{"body":"..."}}`, or the selected id/title pair
/// for `{"type":"interactive", "interactive":{"type":"button_reply"|"list_reply", ...}}`.
/// Other message types (media, location, etc.) yield `None` and are only
/// persisted, not routed through the keyword/flow cascade.
fn extract_content(body: &serde_json::Value) -> Option<InboundContent> {
    if let Some(text) = body.get("text").and_then(|t| t.get("body")).and_then(|v| v.as_str()) {
        return Some(InboundContent { text: text.to_string(), button_title: None });
    }

    let interactive = body.get("interactive")?;
    let reply = interactive
        .get("button_reply")
        .or_else(|| interactive.get("list_reply"))?;
    let id = reply.get("id")?.as_str()?.to_string();
    let title = reply.get("title").and_then(|v| v.as_str()).map(String::from);
    Some(InboundContent { text: id, button_title: title })
}

/// Pulls `entry[0].changes[0].value.metadata.phone_number_id` out of the
/// raw body without fully deserializing it, so a request for an unknown
/// account is rejected before any signature work happens.
fn extract_phone_number_id(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("entry")?
        .get(0)?
        .get("changes")?
        .get(0)?
        .get("value")?
        .get("metadata")?
        .get("phone_number_id")?
        .as_str()
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_phone_number_id_from_nested_payload() {
        let body = serde_json::json!({
            "entry": [{
                "changes": [{
                    "field": "messages",
                    "value": { "metadata": { "phone_number_id": "123456" } },
                }],
            }],
        });
        let bytes = serde_json::to_vec(&body).unwrap();
        assert_eq!(extract_phone_number_id(&bytes), Some("123456".to_string()));
    }

    #[test]
    fn returns_none_for_unrelated_payload() {
        assert_eq!(extract_phone_number_id(b"{}"), None);
    }

    #[test]
    fn extracts_plain_text_body() {
        let body = serde_json::json!({"type": "text", "text": {"body": "hi there"}});
        let content = extract_content(&body).unwrap();
        assert_eq!(content.text, "hi there");
        assert_eq!(content.button_title, None);
    }

    #[test]
    fn extracts_button_reply_id_and_title() {
        let body = serde_json::json!({
            "type": "interactive",
            "interactive": {"type": "button_reply", "button_reply": {"id": "opt_1", "title": "Book a demo"}},
        });
        let content = extract_content(&body).unwrap();
        assert_eq!(content.text, "opt_1");
        assert_eq!(content.button_title, Some("Book a demo".to_string()));
    }

    #[test]
    fn extracts_list_reply_id_and_title() {
        let body = serde_json::json!({
            "type": "interactive",
            "interactive": {"type": "list_reply", "list_reply": {"id": "row_3", "title": "Billing"}},
        });
        let content = extract_content(&body).unwrap();
        assert_eq!(content.text, "row_3");
        assert_eq!(content.button_title, Some("Billing".to_string()));
    }

    #[test]
    fn returns_none_for_unsupported_message_type() {
        let body = serde_json::json!({"type": "image", "image": {"id": "media_1"}});
        assert_eq!(extract_content(&body), None);
    }
}
