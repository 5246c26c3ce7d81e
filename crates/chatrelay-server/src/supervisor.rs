use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use chatrelay_campaigns::CampaignWorker;
use chatrelay_common::ids::{CampaignId, OrgId};
use chatrelay_db::Database;
use chatrelay_security::SafeHttpClient;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::whatsapp::WhatsAppSender;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Polls for campaigns in `Running` status and keeps one [`CampaignWorker`]
/// alive per campaign, so resuming a paused campaign (or starting a new
/// one) picks up automatically without restarting the process. Grounded on
/// the teacher's `moltis-cron` scheduler loop shape, adapted from
/// wall-clock jobs to a claim-based worker pool.
pub async fn run(
    db: Arc<dyn Database>,
    http: Arc<SafeHttpClient>,
    events: mpsc::UnboundedSender<chatrelay_common::events::DomainEvent>,
    cancel: CancellationToken,
) {
    let active: Arc<Mutex<HashSet<Uuid>>> = Arc::new(Mutex::new(HashSet::new()));

    loop {
        if cancel.is_cancelled() {
            return;
        }

        match db.list_running_campaigns().await {
            Ok(campaigns) => {
                for campaign in campaigns {
                    let already_running = active.lock().unwrap_or_else(|e| e.into_inner()).contains(&campaign.id);
                    if already_running {
                        continue;
                    }
                    active.lock().unwrap_or_else(|e| e.into_inner()).insert(campaign.id);

                    let db = db.clone();
                    let http = http.clone();
                    let events = events.clone();
                    let worker_cancel = cancel.child_token();
                    let active = active.clone();
                    let campaign_id = campaign.id;
                    let org_id = campaign.org_id;
                    let account_id = campaign.account_id;

                    tokio::spawn(async move {
                        let sender = Arc::new(WhatsAppSender::new(http, db.clone(), org_id, account_id));
                        let worker = CampaignWorker::new(db, sender, events);
                        if let Err(err) =
                            worker.run(OrgId(org_id), CampaignId(campaign_id), &worker_cancel).await
                        {
                            warn!(%err, %campaign_id, "campaign worker exited with error");
                        }
                        active.lock().unwrap_or_else(|e| e.into_inner()).remove(&campaign_id);
                    });
                }
            }
            Err(err) => warn!(%err, "failed to list running campaigns"),
        }

        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            () = cancel.cancelled() => return,
        }
    }
}
