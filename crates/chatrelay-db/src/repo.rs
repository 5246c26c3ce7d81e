use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    entities::{
        Account, AgentTransfer, BulkCampaign, CampaignRecipient, ChatbotFlow, ChatbotSession,
        Contact, DeliveryStatus, FlowStep, KeywordRule, Message, OrganizationSettings, Role,
        User, Webhook, WebhookDelivery,
    },
    error::Result,
};

/// The persistence surface every other crate depends on. One trait rather
/// than per-entity traits, because almost every operation needs to join
/// across a couple of tables (e.g. a campaign recipient batch claim also
/// needs the owning campaign's `org_id`) and a single `dyn Database` is
/// easy to hand around as an `Arc`.
#[async_trait]
pub trait Database: Send + Sync {
    async fn get_account_by_phone_number_id(&self, phone_number_id: &str) -> Result<Account>;
    async fn get_account(&self, org_id: Uuid, account_id: Uuid) -> Result<Account>;

    async fn upsert_contact(&self, account_id: Uuid, org_id: Uuid, wa_id: &str) -> Result<Contact>;
    async fn get_contact(&self, org_id: Uuid, contact_id: Uuid) -> Result<Contact>;

    /// Inserts an inbound or outbound message. Returns `Ok(None)` without
    /// inserting when `wa_message_id` is `Some` and already recorded for
    /// this account — the caller's dedup path, backed by the database's
    /// unique index rather than an in-process cache so dedup survives
    /// across gateway replicas.
    async fn insert_message_deduped(&self, message: &Message) -> Result<Option<Message>>;

    async fn get_chatbot_session(&self, contact_id: Uuid) -> Result<Option<ChatbotSession>>;
    async fn upsert_chatbot_session(&self, session: &ChatbotSession) -> Result<()>;
    async fn clear_chatbot_session(&self, contact_id: Uuid) -> Result<()>;

    async fn list_keyword_rules(&self, account_id: Uuid) -> Result<Vec<KeywordRule>>;
    async fn list_enabled_ai_contexts(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<crate::entities::AiContext>>;

    /// Every enabled flow for `account_id` with a non-null `trigger_keyword`,
    /// scanned by the automation pipeline's stage-4 flow-trigger check once
    /// no keyword rule has matched.
    async fn list_enabled_flows(&self, account_id: Uuid) -> Result<Vec<ChatbotFlow>>;

    async fn get_flow(&self, flow_id: Uuid) -> Result<ChatbotFlow>;
    async fn get_flow_step(&self, step_id: Uuid) -> Result<FlowStep>;

    async fn create_transfer(&self, transfer: &AgentTransfer) -> Result<()>;
    async fn assign_transfer(&self, transfer_id: Uuid, user_id: Uuid) -> Result<()>;
    /// Closes a transfer via the agent's explicit resume action, setting
    /// `status = Resumed` and stamping `resumed_at`.
    async fn resume_transfer(&self, transfer_id: Uuid) -> Result<()>;
    async fn pending_transfers(&self, org_id: Uuid) -> Result<Vec<AgentTransfer>>;
    async fn assigned_transfers_for_agent(&self, org_id: Uuid, user_id: Uuid) -> Result<Vec<AgentTransfer>>;

    /// The contact's currently open (`Queued` or `Assigned`) transfer, if
    /// any. Backs both the open-transfer-per-contact constraint in
    /// [`Self::create_transfer`]'s callers and the automation pipeline's
    /// session-resume short-circuit.
    async fn active_transfer_for_contact(
        &self,
        org_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Option<AgentTransfer>>;

    /// Atomically unassigns every listed transfer back to `Pending` with no
    /// assignee, in one statement — the away-mode requeue invariant requires
    /// an agent's whole assigned count to drop to zero and the org's pending
    /// count to rise by the same amount as a single observable step.
    async fn requeue_transfers(&self, transfer_ids: &[Uuid]) -> Result<()>;

    async fn get_campaign(&self, campaign_id: Uuid) -> Result<BulkCampaign>;

    /// Campaigns currently `Running` across every org, so the server's
    /// supervisory loop knows which ones need an active worker.
    async fn list_running_campaigns(&self) -> Result<Vec<BulkCampaign>>;
    async fn set_campaign_status(
        &self,
        campaign_id: Uuid,
        status: crate::entities::CampaignStatus,
    ) -> Result<()>;

    /// Atomically claims up to `limit` recipients for `campaign_id` that are
    /// either pending or stuck `InProgress` past `stale_after`, transitioning
    /// them to `InProgress` with a fresh `claimed_at` in the same statement
    /// (mirroring [`Self::claim_due_deliveries`]) via `SELECT ... FOR UPDATE
    /// SKIP LOCKED`, so concurrent workers never claim the same recipient
    /// twice and a crashed worker's claims are eventually retried.
    async fn claim_campaign_recipients(
        &self,
        campaign_id: Uuid,
        limit: i64,
        stale_after: DateTime<Utc>,
    ) -> Result<Vec<CampaignRecipient>>;

    async fn mark_recipient_sent(&self, recipient_id: Uuid) -> Result<()>;
    async fn mark_recipient_failed(&self, recipient_id: Uuid, error: &str) -> Result<()>;
    async fn count_campaign_recipients_by_status(
        &self,
        campaign_id: Uuid,
    ) -> Result<(i64, i64, i64)>;

    async fn list_webhooks_for_event(&self, org_id: Uuid, event: &str) -> Result<Vec<Webhook>>;
    async fn enqueue_delivery(&self, delivery: &WebhookDelivery) -> Result<()>;

    /// Claims deliveries that are either pending-and-due or stuck
    /// in-progress past `stale_after`, using `SELECT ... FOR UPDATE SKIP
    /// LOCKED` so a crashed worker's claimed-but-unfinished deliveries are
    /// eventually retried by someone else.
    async fn claim_due_deliveries(
        &self,
        limit: i64,
        stale_after: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>>;

    async fn mark_delivery_status(
        &self,
        delivery_id: Uuid,
        status: DeliveryStatus,
        next_attempt_at: Option<DateTime<Utc>>,
        error: Option<&str>,
        status_code: Option<i32>,
    ) -> Result<()>;

    /// Resets a failed delivery back to pending-and-due-now while
    /// preserving `attempts`, per the "retry failed" action.
    async fn retry_delivery_now(&self, delivery_id: Uuid) -> Result<()>;

    async fn get_user(&self, org_id: Uuid, user_id: Uuid) -> Result<User>;
    async fn get_user_by_email(&self, org_id: Uuid, email: &str) -> Result<User>;

    /// Persists the `available <-> away` transition and its break-start
    /// timestamp (`Some(now)` going away, `None` coming back).
    async fn set_user_availability(
        &self,
        user_id: Uuid,
        is_away: bool,
        break_started_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn get_role(&self, org_id: Uuid, role_id: Uuid) -> Result<Role>;
    async fn get_organization_settings(&self, org_id: Uuid) -> Result<OrganizationSettings>;
}
