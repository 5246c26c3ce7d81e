use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A WhatsApp-Cloud-API business account belonging to one org.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub org_id: Uuid,
    pub phone_number_id: String,
    pub display_name: String,
    pub app_secret: String,
    pub access_token: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Contact {
    pub id: Uuid,
    pub org_id: Uuid,
    pub account_id: Uuid,
    pub wa_id: String,
    pub display_name: Option<String>,
    pub assigned_user_id: Option<Uuid>,
    pub unread_count: i32,
    pub tags: serde_json::Value,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Sent,
    Delivered,
    Read,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub org_id: Uuid,
    pub account_id: Uuid,
    pub contact_id: Uuid,
    pub direction: MessageDirection,
    pub wa_message_id: Option<String>,
    pub status: MessageStatus,
    pub media_url: Option<String>,
    pub body: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatbotSession {
    pub id: Uuid,
    pub org_id: Uuid,
    pub contact_id: Uuid,
    pub flow_id: Option<Uuid>,
    pub current_step_id: Option<Uuid>,
    pub context: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum KeywordMatchMode {
    Exact,
    Contains,
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum KeywordResponseKind {
    Text,
    Transfer,
}

/// A rule matched against inbound text. `keywords` holds one or more
/// trigger words (JSON array of strings) — `contains`/`exact` match against
/// any of them. Grounded on `SPEC_FULL.md` §4.5's keyword stage, distinct
/// from a [`ChatbotFlow`]'s own `trigger_keyword` (stage 4 of the cascade).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct KeywordRule {
    pub id: Uuid,
    pub org_id: Uuid,
    pub account_id: Uuid,
    pub keywords: serde_json::Value,
    pub match_mode: KeywordMatchMode,
    pub response_kind: KeywordResponseKind,
    pub response_text: Option<String>,
    pub priority: i32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AiContext {
    pub id: Uuid,
    pub org_id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    pub system_prompt: String,
    pub trigger_keywords: serde_json::Value,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatbotFlow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    /// Stage-4 trigger per `SPEC_FULL.md` §4.5: when no keyword rule
    /// matched, an enabled flow whose `trigger_keyword` matches the
    /// message starts a fresh session at `entry_step_id`.
    pub trigger_keyword: Option<String>,
    pub entry_step_id: Option<Uuid>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FlowStep {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub step_type: String,
    pub config: serde_json::Value,
    pub next_step_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TransferStrategy {
    RoundRobin,
    LoadBalanced,
    Manual,
}

/// What triggered the handoff, per `SPEC_FULL.md` §3's `AgentTransfer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TransferSource {
    Keyword,
    Flow,
    Ai,
    Manual,
}

/// `Queued`/`Assigned` are the two "active" states the open-transfer
/// constraint and the automation session-resume check both key off.
/// `Resumed` closes the transfer via C10's explicit resume action;
/// `Returned` is reserved for a contact handed back to automation by an
/// agent outside that explicit resume path (no producer in this workspace
/// yet — see `DESIGN.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TransferStatus {
    Queued,
    Assigned,
    Resumed,
    Returned,
}

impl TransferStatus {
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Assigned)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AgentTransfer {
    pub id: Uuid,
    pub org_id: Uuid,
    pub contact_id: Uuid,
    pub source: TransferSource,
    pub reason: Option<String>,
    pub status: TransferStatus,
    pub assigned_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Queued,
    Running,
    Paused,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BulkCampaign {
    pub id: Uuid,
    pub org_id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    pub template_payload: serde_json::Value,
    pub status: CampaignStatus,
    pub total_count: i32,
    pub sent_count: i32,
    pub delivered_count: i32,
    pub read_count: i32,
    pub failed_count: i32,
    /// Offset into the recipient batch the worker resumes from after a
    /// pause/resume cycle, per `SPEC_FULL.md` §4.6's "without losing the
    /// cursor" requirement.
    pub retry_cursor: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    InProgress,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CampaignRecipient {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub contact_id: Uuid,
    pub status: RecipientStatus,
    pub error: Option<String>,
    pub attempts: i32,
    pub claimed_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Webhook {
    pub id: Uuid,
    pub org_id: Uuid,
    pub url: String,
    pub signing_secret: String,
    pub subscribed_events: serde_json::Value,
    /// Custom headers merged into every outbound delivery request, on top
    /// of `Content-Type`/`User-Agent`/`X-Webhook-Signature`. JSON object of
    /// header name to value.
    pub headers: serde_json::Value,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    InProgress,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub org_id: Uuid,
    pub event: String,
    pub payload: serde_json::Value,
    pub status: DeliveryStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_status_code: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub org_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub active: bool,
    /// Crosses the tenant boundary read-only per `SPEC_FULL.md` §3; never
    /// granted by any in-tenant operation in this workspace.
    pub is_super_admin: bool,
    /// `SPEC_FULL.md` §2's per-user availability state. Flipped by
    /// `chatrelay-server::automation_router::AutomationRouter`'s
    /// `AvailabilityHook` impl alongside the away-mode transfer requeue.
    pub is_away: bool,
    pub break_started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub permissions: serde_json::Value,
}

/// A single permission string, e.g. `"messages.read"`. Stored inline as a
/// JSON array on [`Role`] rather than a join table: permission sets are
/// small, read far more than written, and never queried independently of
/// their owning role.
pub type Permission = String;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrganizationSettings {
    pub org_id: Uuid,
    pub business_hours: serde_json::Value,
    pub default_transfer_strategy: TransferStrategy,
    pub automation_enabled: bool,
    pub ai_enabled: bool,
    /// Stage-6 fallback per `SPEC_FULL.md` §4.5: sent verbatim when no
    /// earlier cascade stage produced a reply; `None` means stay silent.
    pub default_fallback_reply: Option<String>,
    /// Idle window (minutes) after which an untouched `ChatbotSession` is
    /// cleared back to no-flow, per §4.5's session termination rule.
    pub session_idle_minutes: i32,
    pub auto_delete_media_enabled: bool,
    pub auto_delete_media_days: i32,
    /// Per-tenant override of `chatrelay_webhooks::outbox::RETRY_SCHEDULE_SECS`;
    /// `null` means use the process-wide default.
    pub webhook_retry_schedule: Option<serde_json::Value>,
}
