use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{
    entities::{
        Account, AgentTransfer, BulkCampaign, CampaignRecipient, CampaignStatus, ChatbotFlow,
        ChatbotSession, Contact, DeliveryStatus, FlowStep, KeywordRule, Message,
        OrganizationSettings, Role, User, Webhook, WebhookDelivery,
    },
    error::{Error, Result},
    repo::Database,
};

/// Postgres-backed implementation of [`Database`]. Every write that can
/// race with another worker (recipient claiming, delivery claiming) runs
/// inside an explicit transaction using `FOR UPDATE SKIP LOCKED` rather
/// than relying on optimistic retries.
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn get_account_by_phone_number_id(&self, phone_number_id: &str) -> Result<Account> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE phone_number_id = $1")
            .bind(phone_number_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("account {phone_number_id}")))
    }

    async fn get_account(&self, org_id: Uuid, account_id: Uuid) -> Result<Account> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1 AND org_id = $2")
            .bind(account_id)
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("account {account_id}")))
    }

    async fn upsert_contact(&self, account_id: Uuid, org_id: Uuid, wa_id: &str) -> Result<Contact> {
        sqlx::query_as::<_, Contact>(
            "INSERT INTO contacts (id, org_id, account_id, wa_id, created_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (account_id, wa_id) DO UPDATE SET wa_id = excluded.wa_id
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(org_id)
        .bind(account_id)
        .bind(wa_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)
    }

    async fn get_contact(&self, org_id: Uuid, contact_id: Uuid) -> Result<Contact> {
        sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE id = $1 AND org_id = $2")
            .bind(contact_id)
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("contact {contact_id}")))
    }

    async fn insert_message_deduped(&self, message: &Message) -> Result<Option<Message>> {
        let result = sqlx::query_as::<_, Message>(
            "INSERT INTO messages
                (id, org_id, account_id, contact_id, direction, wa_message_id, status, media_url, body, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (account_id, wa_message_id) WHERE wa_message_id IS NOT NULL DO NOTHING
             RETURNING *",
        )
        .bind(message.id)
        .bind(message.org_id)
        .bind(message.account_id)
        .bind(message.contact_id)
        .bind(message.direction)
        .bind(&message.wa_message_id)
        .bind(message.status)
        .bind(&message.media_url)
        .bind(&message.body)
        .bind(message.created_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(result)
    }

    async fn get_chatbot_session(&self, contact_id: Uuid) -> Result<Option<ChatbotSession>> {
        let session =
            sqlx::query_as::<_, ChatbotSession>("SELECT * FROM chatbot_sessions WHERE contact_id = $1")
                .bind(contact_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(session)
    }

    async fn upsert_chatbot_session(&self, session: &ChatbotSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO chatbot_sessions (id, org_id, contact_id, flow_id, current_step_id, context, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, now())
             ON CONFLICT (contact_id) DO UPDATE SET
                flow_id = excluded.flow_id,
                current_step_id = excluded.current_step_id,
                context = excluded.context,
                updated_at = now()",
        )
        .bind(session.id)
        .bind(session.org_id)
        .bind(session.contact_id)
        .bind(session.flow_id)
        .bind(session.current_step_id)
        .bind(&session.context)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_chatbot_session(&self, contact_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM chatbot_sessions WHERE contact_id = $1")
            .bind(contact_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_keyword_rules(&self, account_id: Uuid) -> Result<Vec<KeywordRule>> {
        let rules = sqlx::query_as::<_, KeywordRule>(
            "SELECT * FROM keyword_rules
             WHERE account_id = $1 AND enabled
             ORDER BY priority DESC, created_at",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rules)
    }

    async fn list_enabled_ai_contexts(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<crate::entities::AiContext>> {
        let contexts = sqlx::query_as::<_, crate::entities::AiContext>(
            "SELECT * FROM ai_contexts WHERE account_id = $1 AND enabled",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(contexts)
    }

    async fn list_enabled_flows(&self, account_id: Uuid) -> Result<Vec<ChatbotFlow>> {
        let flows = sqlx::query_as::<_, ChatbotFlow>(
            "SELECT * FROM chatbot_flows
             WHERE account_id = $1 AND enabled AND trigger_keyword IS NOT NULL",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(flows)
    }

    async fn get_flow(&self, flow_id: Uuid) -> Result<ChatbotFlow> {
        sqlx::query_as::<_, ChatbotFlow>("SELECT * FROM chatbot_flows WHERE id = $1")
            .bind(flow_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("flow {flow_id}")))
    }

    async fn get_flow_step(&self, step_id: Uuid) -> Result<FlowStep> {
        sqlx::query_as::<_, FlowStep>("SELECT * FROM flow_steps WHERE id = $1")
            .bind(step_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("flow step {step_id}")))
    }

    async fn create_transfer(&self, transfer: &AgentTransfer) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_transfers
                (id, org_id, contact_id, source, reason, status, assigned_user_id, created_at, assigned_at, resumed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, now(), $8, NULL)",
        )
        .bind(transfer.id)
        .bind(transfer.org_id)
        .bind(transfer.contact_id)
        .bind(transfer.source)
        .bind(&transfer.reason)
        .bind(transfer.status)
        .bind(transfer.assigned_user_id)
        .bind(transfer.assigned_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn assign_transfer(&self, transfer_id: Uuid, user_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE agent_transfers
             SET assigned_user_id = $1, status = 'assigned', assigned_at = now()
             WHERE id = $2",
        )
        .bind(user_id)
        .bind(transfer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn resume_transfer(&self, transfer_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE agent_transfers SET status = 'resumed', resumed_at = now() WHERE id = $1")
            .bind(transfer_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn pending_transfers(&self, org_id: Uuid) -> Result<Vec<AgentTransfer>> {
        let transfers = sqlx::query_as::<_, AgentTransfer>(
            "SELECT * FROM agent_transfers WHERE org_id = $1 AND status = 'queued' ORDER BY created_at",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(transfers)
    }

    async fn assigned_transfers_for_agent(&self, org_id: Uuid, user_id: Uuid) -> Result<Vec<AgentTransfer>> {
        let transfers = sqlx::query_as::<_, AgentTransfer>(
            "SELECT * FROM agent_transfers
             WHERE org_id = $1 AND assigned_user_id = $2 AND status = 'assigned'
             ORDER BY created_at",
        )
        .bind(org_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(transfers)
    }

    async fn requeue_transfers(&self, transfer_ids: &[Uuid]) -> Result<()> {
        sqlx::query(
            "UPDATE agent_transfers
             SET status = 'queued', assigned_user_id = NULL, assigned_at = NULL
             WHERE id = ANY($1)",
        )
        .bind(transfer_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_transfer_for_contact(
        &self,
        org_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Option<AgentTransfer>> {
        let transfer = sqlx::query_as::<_, AgentTransfer>(
            "SELECT * FROM agent_transfers
             WHERE org_id = $1 AND contact_id = $2 AND status IN ('queued', 'assigned')",
        )
        .bind(org_id)
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(transfer)
    }

    async fn get_campaign(&self, campaign_id: Uuid) -> Result<BulkCampaign> {
        sqlx::query_as::<_, BulkCampaign>("SELECT * FROM bulk_campaigns WHERE id = $1")
            .bind(campaign_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("campaign {campaign_id}")))
    }

    async fn list_running_campaigns(&self) -> Result<Vec<BulkCampaign>> {
        let campaigns = sqlx::query_as::<_, BulkCampaign>(
            "SELECT * FROM bulk_campaigns WHERE status = 'running' ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(campaigns)
    }

    async fn set_campaign_status(&self, campaign_id: Uuid, status: CampaignStatus) -> Result<()> {
        sqlx::query("UPDATE bulk_campaigns SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(campaign_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn claim_campaign_recipients(
        &self,
        campaign_id: Uuid,
        limit: i64,
        stale_after: DateTime<Utc>,
    ) -> Result<Vec<CampaignRecipient>> {
        let mut tx = self.pool.begin().await?;
        let claimed = sqlx::query_as::<_, CampaignRecipient>(
            "SELECT * FROM campaign_recipients
             WHERE campaign_id = $1
                AND (status = 'pending' OR (status = 'in_progress' AND claimed_at <= $3))
             ORDER BY id
             LIMIT $2
             FOR UPDATE SKIP LOCKED",
        )
        .bind(campaign_id)
        .bind(limit)
        .bind(stale_after)
        .fetch_all(&mut *tx)
        .await?;

        for recipient in &claimed {
            sqlx::query(
                "UPDATE campaign_recipients
                 SET status = 'in_progress', claimed_at = now(), attempts = attempts + 1
                 WHERE id = $1",
            )
            .bind(recipient.id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(claimed)
    }

    async fn mark_recipient_sent(&self, recipient_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE campaign_recipients
             SET status = 'sent', sent_at = now(), claimed_at = NULL
             WHERE id = $1",
        )
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_recipient_failed(&self, recipient_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE campaign_recipients
             SET status = 'failed', error = $1, claimed_at = NULL
             WHERE id = $2",
        )
        .bind(error)
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_campaign_recipients_by_status(
        &self,
        campaign_id: Uuid,
    ) -> Result<(i64, i64, i64)> {
        let row = sqlx::query(
            "SELECT
                count(*) FILTER (WHERE status = 'sent')    AS sent,
                count(*) FILTER (WHERE status = 'failed')  AS failed,
                count(*)                                   AS total
             FROM campaign_recipients WHERE campaign_id = $1",
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.try_get("sent")?, row.try_get("failed")?, row.try_get("total")?))
    }

    async fn list_webhooks_for_event(&self, org_id: Uuid, event: &str) -> Result<Vec<Webhook>> {
        let webhooks = sqlx::query_as::<_, Webhook>(
            "SELECT * FROM webhooks
             WHERE org_id = $1 AND enabled AND subscribed_events @> to_jsonb($2::text)",
        )
        .bind(org_id)
        .bind(event)
        .fetch_all(&self.pool)
        .await?;
        Ok(webhooks)
    }

    async fn enqueue_delivery(&self, delivery: &WebhookDelivery) -> Result<()> {
        sqlx::query(
            "INSERT INTO webhook_deliveries
                (id, webhook_id, org_id, event, payload, status, attempts, max_attempts, next_attempt_at, created_at)
             VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6, now(), now())",
        )
        .bind(delivery.id)
        .bind(delivery.webhook_id)
        .bind(delivery.org_id)
        .bind(&delivery.event)
        .bind(&delivery.payload)
        .bind(delivery.max_attempts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_due_deliveries(
        &self,
        limit: i64,
        stale_after: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>> {
        let mut tx = self.pool.begin().await?;
        let claimed = sqlx::query_as::<_, WebhookDelivery>(
            "SELECT * FROM webhook_deliveries
             WHERE (status = 'pending' AND next_attempt_at <= now())
                OR (status = 'in_progress' AND claimed_at <= $2)
             ORDER BY next_attempt_at
             LIMIT $1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(limit)
        .bind(stale_after)
        .fetch_all(&mut *tx)
        .await?;

        for delivery in &claimed {
            sqlx::query(
                "UPDATE webhook_deliveries SET status = 'in_progress', claimed_at = now() WHERE id = $1",
            )
            .bind(delivery.id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(claimed)
    }

    async fn mark_delivery_status(
        &self,
        delivery_id: Uuid,
        status: DeliveryStatus,
        next_attempt_at: Option<DateTime<Utc>>,
        error: Option<&str>,
        status_code: Option<i32>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE webhook_deliveries
             SET status = $1, attempts = attempts + 1, next_attempt_at = coalesce($2, next_attempt_at),
                 last_error = $3, last_status_code = $4, claimed_at = NULL
             WHERE id = $5",
        )
        .bind(status)
        .bind(next_attempt_at)
        .bind(error)
        .bind(status_code)
        .bind(delivery_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn retry_delivery_now(&self, delivery_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE webhook_deliveries
             SET status = 'pending', next_attempt_at = now(), claimed_at = NULL
             WHERE id = $1",
        )
        .bind(delivery_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, org_id: Uuid, user_id: Uuid) -> Result<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 AND org_id = $2")
            .bind(user_id)
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {user_id}")))
    }

    async fn get_user_by_email(&self, org_id: Uuid, email: &str) -> Result<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE org_id = $1 AND email = $2")
            .bind(org_id)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {email}")))
    }

    async fn get_role(&self, org_id: Uuid, role_id: Uuid) -> Result<Role> {
        sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1 AND org_id = $2")
            .bind(role_id)
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("role {role_id}")))
    }

    async fn get_organization_settings(&self, org_id: Uuid) -> Result<OrganizationSettings> {
        sqlx::query_as::<_, OrganizationSettings>(
            "SELECT * FROM organization_settings WHERE org_id = $1",
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("organization_settings {org_id}")))
    }

    async fn set_user_availability(
        &self,
        user_id: Uuid,
        is_away: bool,
        break_started_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query("UPDATE users SET is_away = $1, break_started_at = $2 WHERE id = $3")
            .bind(is_away)
            .bind(break_started_at)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
