use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    entities::{
        Account, AgentTransfer, BulkCampaign, CampaignRecipient, CampaignStatus, ChatbotFlow,
        ChatbotSession, Contact, DeliveryStatus, FlowStep, KeywordRule, Message,
        OrganizationSettings, RecipientStatus, Role, User, Webhook, WebhookDelivery,
    },
    error::{Error, Result},
    repo::Database,
};

/// In-process, `Mutex<HashMap<...>>`-backed stand-in for [`PgDatabase`],
/// used by tests in the crates built on top of [`Database`] so they don't
/// need a live Postgres instance.
#[derive(Default)]
pub struct InMemoryDatabase {
    accounts: Mutex<HashMap<Uuid, Account>>,
    contacts: Mutex<HashMap<Uuid, Contact>>,
    messages: Mutex<HashMap<Uuid, Message>>,
    message_dedup: Mutex<HashMap<(Uuid, String), Uuid>>,
    sessions: Mutex<HashMap<Uuid, ChatbotSession>>,
    keyword_rules: Mutex<HashMap<Uuid, KeywordRule>>,
    ai_contexts: Mutex<HashMap<Uuid, crate::entities::AiContext>>,
    flows: Mutex<HashMap<Uuid, ChatbotFlow>>,
    flow_steps: Mutex<HashMap<Uuid, FlowStep>>,
    transfers: Mutex<HashMap<Uuid, AgentTransfer>>,
    campaigns: Mutex<HashMap<Uuid, BulkCampaign>>,
    recipients: Mutex<HashMap<Uuid, CampaignRecipient>>,
    webhooks: Mutex<HashMap<Uuid, Webhook>>,
    deliveries: Mutex<HashMap<Uuid, WebhookDelivery>>,
    users: Mutex<HashMap<Uuid, User>>,
    roles: Mutex<HashMap<Uuid, Role>>,
    org_settings: Mutex<HashMap<Uuid, OrganizationSettings>>,
}

impl InMemoryDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::unwrap_used)]
    pub fn seed_account(&self, account: Account) {
        self.accounts.lock().unwrap().insert(account.id, account);
    }

    #[allow(clippy::unwrap_used)]
    pub fn seed_contact(&self, contact: Contact) {
        self.contacts.lock().unwrap().insert(contact.id, contact);
    }

    #[allow(clippy::unwrap_used)]
    pub fn seed_keyword_rule(&self, rule: KeywordRule) {
        self.keyword_rules.lock().unwrap().insert(rule.id, rule);
    }

    #[allow(clippy::unwrap_used)]
    pub fn seed_ai_context(&self, ctx: crate::entities::AiContext) {
        self.ai_contexts.lock().unwrap().insert(ctx.id, ctx);
    }

    #[allow(clippy::unwrap_used)]
    pub fn seed_flow(&self, flow: ChatbotFlow) {
        self.flows.lock().unwrap().insert(flow.id, flow);
    }

    #[allow(clippy::unwrap_used)]
    pub fn seed_flow_step(&self, step: FlowStep) {
        self.flow_steps.lock().unwrap().insert(step.id, step);
    }

    #[allow(clippy::unwrap_used)]
    pub fn seed_campaign(&self, campaign: BulkCampaign) {
        self.campaigns.lock().unwrap().insert(campaign.id, campaign);
    }

    #[allow(clippy::unwrap_used)]
    pub fn seed_recipient(&self, recipient: CampaignRecipient) {
        self.recipients.lock().unwrap().insert(recipient.id, recipient);
    }

    #[allow(clippy::unwrap_used)]
    pub fn seed_webhook(&self, webhook: Webhook) {
        self.webhooks.lock().unwrap().insert(webhook.id, webhook);
    }

    #[allow(clippy::unwrap_used)]
    pub fn seed_org_settings(&self, settings: OrganizationSettings) {
        self.org_settings.lock().unwrap().insert(settings.org_id, settings);
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    #[allow(clippy::unwrap_used)]
    async fn get_account_by_phone_number_id(&self, phone_number_id: &str) -> Result<Account> {
        self.accounts
            .lock()
            .unwrap()
            .values()
            .find(|a| a.phone_number_id == phone_number_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("account {phone_number_id}")))
    }

    #[allow(clippy::unwrap_used)]
    async fn get_account(&self, org_id: Uuid, account_id: Uuid) -> Result<Account> {
        self.accounts
            .lock()
            .unwrap()
            .get(&account_id)
            .filter(|a| a.org_id == org_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("account {account_id}")))
    }

    #[allow(clippy::unwrap_used)]
    async fn upsert_contact(&self, account_id: Uuid, org_id: Uuid, wa_id: &str) -> Result<Contact> {
        let mut contacts = self.contacts.lock().unwrap();
        if let Some(existing) = contacts
            .values()
            .find(|c| c.account_id == account_id && c.wa_id == wa_id)
            .cloned()
        {
            return Ok(existing);
        }
        let contact = Contact {
            id: Uuid::new_v4(),
            org_id,
            account_id,
            wa_id: wa_id.to_string(),
            display_name: None,
            assigned_user_id: None,
            unread_count: 0,
            tags: serde_json::json!([]),
            last_seen_at: None,
            created_at: Utc::now(),
        };
        contacts.insert(contact.id, contact.clone());
        Ok(contact)
    }

    #[allow(clippy::unwrap_used)]
    async fn get_contact(&self, org_id: Uuid, contact_id: Uuid) -> Result<Contact> {
        self.contacts
            .lock()
            .unwrap()
            .get(&contact_id)
            .filter(|c| c.org_id == org_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("contact {contact_id}")))
    }

    #[allow(clippy::unwrap_used)]
    async fn insert_message_deduped(&self, message: &Message) -> Result<Option<Message>> {
        if let Some(wa_id) = &message.wa_message_id {
            let mut dedup = self.message_dedup.lock().unwrap();
            let key = (message.account_id, wa_id.clone());
            if dedup.contains_key(&key) {
                return Ok(None);
            }
            dedup.insert(key, message.id);
        }
        self.messages.lock().unwrap().insert(message.id, message.clone());
        Ok(Some(message.clone()))
    }

    #[allow(clippy::unwrap_used)]
    async fn get_chatbot_session(&self, contact_id: Uuid) -> Result<Option<ChatbotSession>> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .find(|s| s.contact_id == contact_id)
            .cloned())
    }

    #[allow(clippy::unwrap_used)]
    async fn upsert_chatbot_session(&self, session: &ChatbotSession) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.retain(|_, s| s.contact_id != session.contact_id);
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    #[allow(clippy::unwrap_used)]
    async fn clear_chatbot_session(&self, contact_id: Uuid) -> Result<()> {
        self.sessions.lock().unwrap().retain(|_, s| s.contact_id != contact_id);
        Ok(())
    }

    #[allow(clippy::unwrap_used)]
    async fn list_keyword_rules(&self, account_id: Uuid) -> Result<Vec<KeywordRule>> {
        let mut rules: Vec<_> = self
            .keyword_rules
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.account_id == account_id && r.enabled)
            .cloned()
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(rules)
    }

    #[allow(clippy::unwrap_used)]
    async fn list_enabled_flows(&self, account_id: Uuid) -> Result<Vec<ChatbotFlow>> {
        Ok(self
            .flows
            .lock()
            .unwrap()
            .values()
            .filter(|f| f.account_id == account_id && f.enabled && f.trigger_keyword.is_some())
            .cloned()
            .collect())
    }

    #[allow(clippy::unwrap_used)]
    async fn list_enabled_ai_contexts(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<crate::entities::AiContext>> {
        Ok(self
            .ai_contexts
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.account_id == account_id && c.enabled)
            .cloned()
            .collect())
    }

    #[allow(clippy::unwrap_used)]
    async fn get_flow(&self, flow_id: Uuid) -> Result<ChatbotFlow> {
        self.flows
            .lock()
            .unwrap()
            .get(&flow_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("flow {flow_id}")))
    }

    #[allow(clippy::unwrap_used)]
    async fn get_flow_step(&self, step_id: Uuid) -> Result<FlowStep> {
        self.flow_steps
            .lock()
            .unwrap()
            .get(&step_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("flow step {step_id}")))
    }

    #[allow(clippy::unwrap_used)]
    async fn create_transfer(&self, transfer: &AgentTransfer) -> Result<()> {
        self.transfers.lock().unwrap().insert(transfer.id, transfer.clone());
        Ok(())
    }

    #[allow(clippy::unwrap_used)]
    async fn assign_transfer(&self, transfer_id: Uuid, user_id: Uuid) -> Result<()> {
        let mut transfers = self.transfers.lock().unwrap();
        let transfer = transfers
            .get_mut(&transfer_id)
            .ok_or_else(|| Error::NotFound(format!("transfer {transfer_id}")))?;
        transfer.assigned_user_id = Some(user_id);
        transfer.status = crate::entities::TransferStatus::Assigned;
        transfer.assigned_at = Some(Utc::now());
        Ok(())
    }

    #[allow(clippy::unwrap_used)]
    async fn resume_transfer(&self, transfer_id: Uuid) -> Result<()> {
        let mut transfers = self.transfers.lock().unwrap();
        let transfer = transfers
            .get_mut(&transfer_id)
            .ok_or_else(|| Error::NotFound(format!("transfer {transfer_id}")))?;
        transfer.status = crate::entities::TransferStatus::Resumed;
        transfer.resumed_at = Some(Utc::now());
        Ok(())
    }

    #[allow(clippy::unwrap_used)]
    async fn pending_transfers(&self, org_id: Uuid) -> Result<Vec<AgentTransfer>> {
        Ok(self
            .transfers
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.org_id == org_id && t.status == crate::entities::TransferStatus::Queued)
            .cloned()
            .collect())
    }

    #[allow(clippy::unwrap_used)]
    async fn assigned_transfers_for_agent(&self, org_id: Uuid, user_id: Uuid) -> Result<Vec<AgentTransfer>> {
        Ok(self
            .transfers
            .lock()
            .unwrap()
            .values()
            .filter(|t| {
                t.org_id == org_id
                    && t.status == crate::entities::TransferStatus::Assigned
                    && t.assigned_user_id == Some(user_id)
            })
            .cloned()
            .collect())
    }

    #[allow(clippy::unwrap_used)]
    async fn requeue_transfers(&self, transfer_ids: &[Uuid]) -> Result<()> {
        let mut transfers = self.transfers.lock().unwrap();
        for id in transfer_ids {
            if let Some(transfer) = transfers.get_mut(id) {
                transfer.status = crate::entities::TransferStatus::Queued;
                transfer.assigned_user_id = None;
                transfer.assigned_at = None;
            }
        }
        Ok(())
    }

    #[allow(clippy::unwrap_used)]
    async fn active_transfer_for_contact(
        &self,
        org_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Option<AgentTransfer>> {
        Ok(self
            .transfers
            .lock()
            .unwrap()
            .values()
            .find(|t| t.org_id == org_id && t.contact_id == contact_id && t.status.is_active())
            .cloned())
    }

    #[allow(clippy::unwrap_used)]
    async fn get_campaign(&self, campaign_id: Uuid) -> Result<BulkCampaign> {
        self.campaigns
            .lock()
            .unwrap()
            .get(&campaign_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("campaign {campaign_id}")))
    }

    #[allow(clippy::unwrap_used)]
    async fn list_running_campaigns(&self) -> Result<Vec<BulkCampaign>> {
        Ok(self
            .campaigns
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.status == CampaignStatus::Running)
            .cloned()
            .collect())
    }

    #[allow(clippy::unwrap_used)]
    async fn set_campaign_status(&self, campaign_id: Uuid, status: CampaignStatus) -> Result<()> {
        let mut campaigns = self.campaigns.lock().unwrap();
        let campaign = campaigns
            .get_mut(&campaign_id)
            .ok_or_else(|| Error::NotFound(format!("campaign {campaign_id}")))?;
        campaign.status = status;
        Ok(())
    }

    #[allow(clippy::unwrap_used)]
    async fn claim_campaign_recipients(
        &self,
        campaign_id: Uuid,
        limit: i64,
        stale_after: DateTime<Utc>,
    ) -> Result<Vec<CampaignRecipient>> {
        let mut recipients = self.recipients.lock().unwrap();
        let mut claimed = Vec::new();
        for recipient in recipients.values_mut() {
            let due = recipient.status == RecipientStatus::Pending;
            let stale = recipient.status == RecipientStatus::InProgress
                && recipient.claimed_at.is_some_and(|at| at <= stale_after);
            if recipient.campaign_id == campaign_id && (due || stale) && (claimed.len() as i64) < limit {
                recipient.status = RecipientStatus::InProgress;
                recipient.claimed_at = Some(Utc::now());
                recipient.attempts += 1;
                claimed.push(recipient.clone());
            }
        }
        Ok(claimed)
    }

    #[allow(clippy::unwrap_used)]
    async fn mark_recipient_sent(&self, recipient_id: Uuid) -> Result<()> {
        let mut recipients = self.recipients.lock().unwrap();
        let recipient = recipients
            .get_mut(&recipient_id)
            .ok_or_else(|| Error::NotFound(format!("recipient {recipient_id}")))?;
        recipient.status = RecipientStatus::Sent;
        recipient.sent_at = Some(Utc::now());
        recipient.claimed_at = None;
        Ok(())
    }

    #[allow(clippy::unwrap_used)]
    async fn mark_recipient_failed(&self, recipient_id: Uuid, error: &str) -> Result<()> {
        let mut recipients = self.recipients.lock().unwrap();
        let recipient = recipients
            .get_mut(&recipient_id)
            .ok_or_else(|| Error::NotFound(format!("recipient {recipient_id}")))?;
        recipient.status = RecipientStatus::Failed;
        recipient.error = Some(error.to_string());
        recipient.claimed_at = None;
        Ok(())
    }

    #[allow(clippy::unwrap_used)]
    async fn count_campaign_recipients_by_status(
        &self,
        campaign_id: Uuid,
    ) -> Result<(i64, i64, i64)> {
        let recipients = self.recipients.lock().unwrap();
        let relevant: Vec<_> = recipients.values().filter(|r| r.campaign_id == campaign_id).collect();
        let sent = relevant.iter().filter(|r| r.status == RecipientStatus::Sent).count() as i64;
        let failed = relevant.iter().filter(|r| r.status == RecipientStatus::Failed).count() as i64;
        Ok((sent, failed, relevant.len() as i64))
    }

    #[allow(clippy::unwrap_used)]
    async fn list_webhooks_for_event(&self, org_id: Uuid, event: &str) -> Result<Vec<Webhook>> {
        Ok(self
            .webhooks
            .lock()
            .unwrap()
            .values()
            .filter(|w| {
                w.org_id == org_id
                    && w.enabled
                    && w.subscribed_events
                        .as_array()
                        .is_some_and(|events| events.iter().any(|e| e == event))
            })
            .cloned()
            .collect())
    }

    #[allow(clippy::unwrap_used)]
    async fn enqueue_delivery(&self, delivery: &WebhookDelivery) -> Result<()> {
        self.deliveries.lock().unwrap().insert(delivery.id, delivery.clone());
        Ok(())
    }

    #[allow(clippy::unwrap_used)]
    async fn claim_due_deliveries(
        &self,
        limit: i64,
        stale_after: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>> {
        let mut deliveries = self.deliveries.lock().unwrap();
        let mut claimed = Vec::new();
        for delivery in deliveries.values_mut() {
            let due = delivery.status == DeliveryStatus::Pending
                && delivery.next_attempt_at <= Utc::now();
            let stale = delivery.status == DeliveryStatus::InProgress
                && delivery.claimed_at.is_some_and(|at| at <= stale_after);
            if (due || stale) && (claimed.len() as i64) < limit {
                delivery.status = DeliveryStatus::InProgress;
                delivery.claimed_at = Some(Utc::now());
                claimed.push(delivery.clone());
            }
        }
        Ok(claimed)
    }

    #[allow(clippy::unwrap_used)]
    async fn mark_delivery_status(
        &self,
        delivery_id: Uuid,
        status: DeliveryStatus,
        next_attempt_at: Option<DateTime<Utc>>,
        error: Option<&str>,
        status_code: Option<i32>,
    ) -> Result<()> {
        let mut deliveries = self.deliveries.lock().unwrap();
        let delivery = deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| Error::NotFound(format!("delivery {delivery_id}")))?;
        delivery.status = status;
        delivery.attempts += 1;
        if let Some(next) = next_attempt_at {
            delivery.next_attempt_at = next;
        }
        delivery.last_error = error.map(String::from);
        delivery.last_status_code = status_code;
        delivery.claimed_at = None;
        Ok(())
    }

    #[allow(clippy::unwrap_used)]
    async fn retry_delivery_now(&self, delivery_id: Uuid) -> Result<()> {
        let mut deliveries = self.deliveries.lock().unwrap();
        let delivery = deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| Error::NotFound(format!("delivery {delivery_id}")))?;
        delivery.status = DeliveryStatus::Pending;
        delivery.next_attempt_at = Utc::now();
        delivery.claimed_at = None;
        Ok(())
    }

    #[allow(clippy::unwrap_used)]
    async fn get_user(&self, org_id: Uuid, user_id: Uuid) -> Result<User> {
        self.users
            .lock()
            .unwrap()
            .get(&user_id)
            .filter(|u| u.org_id == org_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("user {user_id}")))
    }

    #[allow(clippy::unwrap_used)]
    async fn get_user_by_email(&self, org_id: Uuid, email: &str) -> Result<User> {
        self.users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.org_id == org_id && u.email == email)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("user {email}")))
    }

    #[allow(clippy::unwrap_used)]
    async fn get_role(&self, org_id: Uuid, role_id: Uuid) -> Result<Role> {
        self.roles
            .lock()
            .unwrap()
            .get(&role_id)
            .filter(|r| r.org_id == org_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("role {role_id}")))
    }

    #[allow(clippy::unwrap_used)]
    async fn get_organization_settings(&self, org_id: Uuid) -> Result<OrganizationSettings> {
        self.org_settings
            .lock()
            .unwrap()
            .get(&org_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("organization_settings {org_id}")))
    }

    #[allow(clippy::unwrap_used)]
    async fn set_user_availability(
        &self,
        user_id: Uuid,
        is_away: bool,
        break_started_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if let Some(user) = self.users.lock().unwrap().get_mut(&user_id) {
            user.is_away = is_away;
            user.break_started_at = break_started_at;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_account(org_id: Uuid) -> Account {
        Account {
            id: Uuid::new_v4(),
            org_id,
            phone_number_id: "123".to_string(),
            display_name: "Acme".to_string(),
            app_secret: "secret".to_string(),
            access_token: "token".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn dedup_prevents_double_insert_of_same_wa_message_id() {
        let db = InMemoryDatabase::new();
        let account = sample_account(Uuid::new_v4());
        let contact_id = Uuid::new_v4();
        let message = Message {
            id: Uuid::new_v4(),
            org_id: account.org_id,
            account_id: account.id,
            contact_id,
            direction: crate::entities::MessageDirection::Inbound,
            wa_message_id: Some("wamid.1".to_string()),
            status: crate::entities::MessageStatus::Queued,
            media_url: None,
            body: serde_json::json!({"text": "hi"}),
            created_at: Utc::now(),
        };

        let first = db.insert_message_deduped(&message).await.unwrap();
        assert!(first.is_some());

        let mut dup = message.clone();
        dup.id = Uuid::new_v4();
        let second = db.insert_message_deduped(&dup).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn cross_tenant_contact_lookup_is_not_found() {
        let db = InMemoryDatabase::new();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        let contact = Contact {
            id: Uuid::new_v4(),
            org_id: org_a,
            account_id: Uuid::new_v4(),
            wa_id: "1555".to_string(),
            display_name: None,
            assigned_user_id: None,
            unread_count: 0,
            tags: serde_json::json!([]),
            last_seen_at: None,
            created_at: Utc::now(),
        };
        db.seed_contact(contact.clone());

        let result = db.get_contact(org_b, contact.id).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
