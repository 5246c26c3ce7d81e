use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chatrelay_common::{
    events::DomainEvent,
    ids::{CampaignId, OrgId},
};
use chatrelay_db::{
    Database,
    entities::{CampaignStatus, CampaignRecipient},
};
use chatrelay_protocol::campaign::CampaignSendJob;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;

const DEFAULT_BATCH_SIZE: i64 = 25;
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Abstraction over actually delivering one campaign message, so this
/// crate doesn't need to know about the WhatsApp Cloud API's request
/// shape or auth. `chatrelay-server` supplies the real implementation,
/// built on `chatrelay-security::SafeHttpClient`.
#[async_trait]
pub trait RecipientSender: Send + Sync {
    async fn send(&self, job: &CampaignSendJob) -> Result<()>;
}

/// One worker in the campaign send pool. Many workers can run
/// concurrently against the same campaign: `claim_campaign_recipients`'s
/// `FOR UPDATE SKIP LOCKED` guarantees no two workers claim the same
/// recipient, so each worker here is a plain sequential loop rather than
/// needing its own coordination.
pub struct CampaignWorker {
    db: Arc<dyn Database>,
    sender: Arc<dyn RecipientSender>,
    events: mpsc::UnboundedSender<DomainEvent>,
    batch_size: i64,
}

impl CampaignWorker {
    #[must_use]
    pub fn new(
        db: Arc<dyn Database>,
        sender: Arc<dyn RecipientSender>,
        events: mpsc::UnboundedSender<DomainEvent>,
    ) -> Self {
        Self { db, sender, events, batch_size: DEFAULT_BATCH_SIZE }
    }

    /// Runs until the campaign completes, is paused, or `cancel` fires.
    /// Returns normally in all three cases; the caller decides whether
    /// that's "done" or "try again later" (a paused campaign is resumed
    /// by calling this again after [`resume`]).
    pub async fn run(&self, org_id: OrgId, campaign_id: CampaignId, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let campaign = self.db.get_campaign(campaign_id.0).await?;
            if campaign.status == CampaignStatus::Paused {
                info!(%campaign_id, "campaign paused, worker stopping");
                return Ok(());
            }
            if campaign.status == CampaignStatus::Completed {
                return Ok(());
            }

            let batch = self.db.claim_campaign_recipients(campaign_id.0, self.batch_size).await?;
            if batch.is_empty() {
                if self.is_exhausted(campaign_id.0).await? {
                    self.db.set_campaign_status(campaign_id.0, CampaignStatus::Completed).await?;
                    let _ = self.events.send(DomainEvent::CampaignCompleted { org_id, campaign_id });
                    return Ok(());
                }
                tokio::select! {
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    () = cancel.cancelled() => return Ok(()),
                }
                continue;
            }

            for recipient in &batch {
                self.send_one(campaign_id.0, &campaign.template_payload, recipient).await;
            }

            self.emit_progress(org_id, campaign_id).await?;
        }
    }

    async fn send_one(&self, campaign_id: Uuid, template_payload: &serde_json::Value, recipient: &CampaignRecipient) {
        let job = CampaignSendJob {
            campaign_id,
            recipient_id: recipient.id,
            contact_id: recipient.contact_id,
            template_payload: template_payload.clone(),
        };
        match self.sender.send(&job).await {
            Ok(()) => {
                if let Err(err) = self.db.mark_recipient_sent(recipient.id).await {
                    warn!(%err, recipient_id = %recipient.id, "failed to mark recipient sent");
                }
            }
            Err(err) => {
                warn!(%err, recipient_id = %recipient.id, "failed to send campaign message");
                if let Err(db_err) = self.db.mark_recipient_failed(recipient.id, &err.to_string()).await {
                    warn!(%db_err, recipient_id = %recipient.id, "failed to mark recipient failed");
                }
            }
        }
    }

    async fn is_exhausted(&self, campaign_id: Uuid) -> Result<bool> {
        let (sent, failed, total) = self.db.count_campaign_recipients_by_status(campaign_id).await?;
        Ok(sent + failed >= total)
    }

    async fn emit_progress(&self, org_id: OrgId, campaign_id: CampaignId) -> Result<()> {
        let (sent, failed, total) = self.db.count_campaign_recipients_by_status(campaign_id.0).await?;
        let _ = self.events.send(DomainEvent::CampaignProgressed {
            org_id,
            campaign_id,
            sent: sent as u64,
            failed: failed as u64,
            total: total as u64,
        });
        Ok(())
    }
}

/// Pauses a running campaign; in-flight sends from workers already mid-batch
/// complete, but no new batch is claimed.
pub async fn pause(db: &dyn Database, campaign_id: Uuid) -> Result<()> {
    db.set_campaign_status(campaign_id, CampaignStatus::Paused).await?;
    Ok(())
}

/// Resumes a paused campaign. The caller must separately spawn a worker
/// loop (e.g. via [`CampaignWorker::run`]) to actually continue sending.
pub async fn resume(db: &dyn Database, campaign_id: Uuid) -> Result<()> {
    db.set_campaign_status(campaign_id, CampaignStatus::Running).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_db::InMemoryDatabase;
    use chatrelay_db::entities::{BulkCampaign, RecipientStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysSucceeds(Arc<AtomicUsize>);

    #[async_trait]
    impl RecipientSender for AlwaysSucceeds {
        async fn send(&self, _job: &CampaignSendJob) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn seed_campaign_with_recipients(db: &InMemoryDatabase, n: usize) -> Uuid {
        let org_id = Uuid::new_v4();
        let account_id = Uuid::new_v4();
        let campaign_id = Uuid::new_v4();
        db.seed_campaign(BulkCampaign {
            id: campaign_id,
            org_id,
            account_id,
            name: "promo".to_string(),
            template_payload: serde_json::json!({}),
            status: CampaignStatus::Running,
            created_at: chrono::Utc::now(),
        });
        for _ in 0..n {
            db.seed_recipient(CampaignRecipient {
                id: Uuid::new_v4(),
                campaign_id,
                contact_id: Uuid::new_v4(),
                status: RecipientStatus::Pending,
                error: None,
                attempts: 0,
                sent_at: None,
            });
        }
        campaign_id
    }

    #[tokio::test]
    async fn worker_drains_all_recipients_then_completes() {
        let db = Arc::new(InMemoryDatabase::new());
        let campaign_id = seed_campaign_with_recipients(&db, 5);
        let sent_count = Arc::new(AtomicUsize::new(0));
        let sender = Arc::new(AlwaysSucceeds(sent_count.clone()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let worker = CampaignWorker::new(db.clone(), sender, tx);
        let cancel = CancellationToken::new();
        worker
            .run(OrgId::new(), CampaignId(campaign_id), &cancel)
            .await
            .unwrap();

        assert_eq!(sent_count.load(Ordering::SeqCst), 5);
        let campaign = db.get_campaign(campaign_id).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Completed);

        let mut saw_completed = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, DomainEvent::CampaignCompleted { .. }) {
                saw_completed = true;
            }
        }
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn paused_campaign_stops_worker_without_claiming() {
        let db = Arc::new(InMemoryDatabase::new());
        let campaign_id = seed_campaign_with_recipients(&db, 3);
        chatrelay_db::repo::Database::set_campaign_status(
            &*db,
            campaign_id,
            CampaignStatus::Paused,
        )
        .await
        .unwrap();

        let sent_count = Arc::new(AtomicUsize::new(0));
        let sender = Arc::new(AlwaysSucceeds(sent_count.clone()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let worker = CampaignWorker::new(db, sender, tx);
        let cancel = CancellationToken::new();
        worker
            .run(OrgId::new(), CampaignId(campaign_id), &cancel)
            .await
            .unwrap();

        assert_eq!(sent_count.load(Ordering::SeqCst), 0);
    }
}
