use std::{sync::Arc, time::Duration};

use chatrelay_db::{
    Database,
    entities::{DeliveryStatus, Webhook, WebhookDelivery},
};
use chatrelay_protocol::webhook::WebhookEnvelope;
use chatrelay_security::{SafeHttpClient, hmac_sig};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;

/// Default backoff schedule for retrying a failed delivery, indexed by
/// `attempts - 1`. The last entry repeats once `attempts` exceeds the
/// schedule's length, so a delivery keeps retrying once a day forever
/// rather than being abandoned. An organization can override this via
/// `OrganizationSettings.webhook_retry_schedule`.
pub const RETRY_SCHEDULE_SECS: &[i64] = &[60, 5 * 60, 15 * 60, 60 * 60, 6 * 60 * 60, 24 * 60 * 60];

/// Default cap on delivery attempts before a delivery is marked
/// permanently `Failed` instead of rescheduled; matches
/// `webhook_deliveries.max_attempts`'s column default.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 6;

const CLAIM_BATCH_SIZE: i64 = 50;
const STALE_AFTER: Duration = Duration::from_secs(5 * 60);
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const USER_AGENT: &str = concat!("chatrelay-webhooks/", env!("CARGO_PKG_VERSION"));

#[must_use]
pub fn next_attempt_delay(attempts: i32, schedule: &[i64]) -> ChronoDuration {
    let schedule = if schedule.is_empty() { RETRY_SCHEDULE_SECS } else { schedule };
    let idx = (attempts.max(1) as usize - 1).min(schedule.len() - 1);
    ChronoDuration::seconds(schedule[idx])
}

fn org_retry_schedule(settings: Option<&chatrelay_db::entities::OrganizationSettings>) -> Vec<i64> {
    settings
        .and_then(|s| s.webhook_retry_schedule.as_ref())
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(serde_json::Value::as_i64).collect())
        .unwrap_or_default()
}

/// Enqueues one delivery per webhook subscribed to `event`, inside the
/// same transactional context as the write that produced the event
/// wherever the caller arranges it (the `Database` trait doesn't force a
/// shared transaction here, but every `enqueue_delivery` call is a single
/// insert so callers can wrap it in their own transaction if needed).
pub async fn enqueue_for_event(
    db: &dyn Database,
    org_id: Uuid,
    event: &str,
    data: serde_json::Value,
) -> Result<()> {
    let webhooks = db.list_webhooks_for_event(org_id, event).await?;
    for webhook in webhooks {
        let delivery = WebhookDelivery {
            id: Uuid::new_v4(),
            webhook_id: webhook.id,
            org_id,
            event: event.to_string(),
            payload: data.clone(),
            status: DeliveryStatus::Pending,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            next_attempt_at: Utc::now(),
            claimed_at: None,
            last_error: None,
            last_status_code: None,
            created_at: Utc::now(),
        };
        db.enqueue_delivery(&delivery).await?;
    }
    Ok(())
}

/// Background loop claiming due/stale deliveries and attempting them.
/// Grounded on the teacher's general worker-loop shape (poll, claim,
/// process, sleep) seen in `crates/cron`'s scheduler, adapted to the
/// `FOR UPDATE SKIP LOCKED` claim pattern `SPEC_FULL.md` §4.7 requires.
pub async fn run_delivery_loop(
    db: Arc<dyn Database>,
    http: Arc<SafeHttpClient>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let stale_after = Utc::now() - ChronoDuration::from_std(STALE_AFTER).unwrap_or_default();
        match db.claim_due_deliveries(CLAIM_BATCH_SIZE, stale_after).await {
            Ok(batch) if batch.is_empty() => {
                tokio::select! {
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    () = cancel.cancelled() => return,
                }
            }
            Ok(batch) => {
                for delivery in batch {
                    attempt_delivery(&*db, &http, &delivery).await;
                }
            }
            Err(err) => {
                warn!(%err, "failed to claim webhook deliveries");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
}

async fn attempt_delivery(db: &dyn Database, http: &SafeHttpClient, delivery: &WebhookDelivery) {
    let webhook = match load_webhook(db, delivery).await {
        Some(webhook) => webhook,
        None => return,
    };

    let envelope = WebhookEnvelope::new(delivery.id, delivery.event.clone(), delivery.payload.clone());
    let body = match envelope.to_signed_body() {
        Ok(body) => body,
        Err(err) => {
            warn!(%err, delivery_id = %delivery.id, "failed to serialize webhook envelope");
            return;
        }
    };

    let signature = hmac_sig::sign(&body, &webhook.signing_secret);
    let mut headers = vec![
        ("content-type".to_string(), "application/json".to_string()),
        ("user-agent".to_string(), USER_AGENT.to_string()),
        ("x-webhook-signature".to_string(), signature),
    ];
    if let Some(custom) = webhook.headers.as_object() {
        for (name, value) in custom {
            if let Some(value) = value.as_str() {
                headers.push((name.to_lowercase(), value.to_string()));
            }
        }
    }
    let header_refs: Vec<(&str, &str)> = headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    let send_result = http.send(Method::POST, &webhook.url, &header_refs, Some(body)).await;

    let attempts = delivery.attempts + 1;
    match send_result {
        Ok(response) if response.status().is_success() => {
            let status_code = Some(i32::from(response.status().as_u16()));
            if let Err(err) = db
                .mark_delivery_status(delivery.id, DeliveryStatus::Delivered, None, None, status_code)
                .await
            {
                warn!(%err, delivery_id = %delivery.id, "failed to mark delivery delivered");
            } else {
                info!(delivery_id = %delivery.id, "webhook delivered");
            }
        }
        Ok(response) => {
            let status = response.status();
            let status_code = Some(i32::from(status.as_u16()));
            record_failure(db, delivery, attempts, &format!("http status {status}"), status_code).await;
        }
        Err(err) => {
            record_failure(db, delivery, attempts, &err.to_string(), None).await;
        }
    }
}

/// Either reschedules the delivery per the org's retry schedule (or the
/// process-wide default) or, once `attempts` reaches the delivery's
/// `max_attempts`, marks it permanently `Failed`.
async fn record_failure(
    db: &dyn Database,
    delivery: &WebhookDelivery,
    attempts: i32,
    error: &str,
    status_code: Option<i32>,
) {
    if attempts >= delivery.max_attempts {
        if let Err(err) = db
            .mark_delivery_status(delivery.id, DeliveryStatus::Failed, None, Some(error), status_code)
            .await
        {
            warn!(%err, delivery_id = %delivery.id, "failed to mark delivery permanently failed");
        } else {
            warn!(delivery_id = %delivery.id, attempts, "webhook delivery exhausted max_attempts, giving up");
        }
        return;
    }

    let settings = db.get_organization_settings(delivery.org_id).await.ok();
    let schedule = org_retry_schedule(settings.as_ref());
    let next_attempt_at: DateTime<Utc> = Utc::now() + next_attempt_delay(attempts, &schedule);
    if let Err(err) = db
        .mark_delivery_status(delivery.id, DeliveryStatus::Pending, Some(next_attempt_at), Some(error), status_code)
        .await
    {
        warn!(%err, delivery_id = %delivery.id, "failed to record delivery failure");
    }
}

async fn load_webhook(db: &dyn Database, delivery: &WebhookDelivery) -> Option<Webhook> {
    match db.list_webhooks_for_event(delivery.org_id, &delivery.event).await {
        Ok(webhooks) => webhooks.into_iter().find(|w| w.id == delivery.webhook_id),
        Err(err) => {
            warn!(%err, delivery_id = %delivery.id, "failed to load webhook for delivery");
            None
        }
    }
}

/// Manually retries a failed delivery, resetting it to pending-and-due
/// while preserving `attempts` (and therefore the backoff position) —
/// the Open Question resolution recorded in `DESIGN.md`.
pub async fn retry_failed(db: &dyn Database, delivery_id: Uuid) -> Result<()> {
    db.retry_delivery_now(delivery_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_follows_fixed_schedule() {
        assert_eq!(next_attempt_delay(1, &[]), ChronoDuration::seconds(60));
        assert_eq!(next_attempt_delay(2, &[]), ChronoDuration::seconds(300));
        assert_eq!(next_attempt_delay(6, &[]), ChronoDuration::seconds(24 * 60 * 60));
    }

    #[test]
    fn backoff_caps_at_last_entry_beyond_schedule_length() {
        assert_eq!(next_attempt_delay(99, &[]), ChronoDuration::seconds(24 * 60 * 60));
    }

    #[test]
    fn backoff_uses_org_override_schedule_when_present() {
        assert_eq!(next_attempt_delay(1, &[30, 120]), ChronoDuration::seconds(30));
        assert_eq!(next_attempt_delay(5, &[30, 120]), ChronoDuration::seconds(120));
    }

    #[tokio::test]
    async fn enqueue_for_event_creates_one_delivery_per_subscribed_webhook() {
        let db = chatrelay_db::InMemoryDatabase::new();
        let org_id = Uuid::new_v4();
        db.seed_webhook(Webhook {
            id: Uuid::new_v4(),
            org_id,
            url: "https://example.com/hook".to_string(),
            signing_secret: "secret".to_string(),
            subscribed_events: serde_json::json!(["message.received"]),
            headers: serde_json::json!({}),
            enabled: true,
        });

        enqueue_for_event(&db, org_id, "message.received", serde_json::json!({"a": 1}))
            .await
            .unwrap();

        let stale_after = Utc::now() - ChronoDuration::seconds(1);
        let claimed = db.claim_due_deliveries(10, stale_after).await.unwrap();
        assert_eq!(claimed.len(), 1);
    }
}
