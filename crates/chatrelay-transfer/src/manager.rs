use std::{collections::HashMap, sync::atomic::AtomicUsize, sync::Arc};

use chatrelay_db::{
    entities::{AgentTransfer, TransferSource, TransferStatus, TransferStrategy},
    Database,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    strategy::{pick_load_balanced, pick_round_robin},
};

/// Opens and routes agent transfers. One `TransferManager` per process is
/// enough — the round-robin cursor is shared across every org, which is
/// fine because [`pick_round_robin`] only cares about relative rotation
/// among whatever candidate list is passed for a given call.
pub struct TransferManager {
    db: Arc<dyn Database>,
    rr_cursor: AtomicUsize,
}

impl TransferManager {
    #[must_use]
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db, rr_cursor: AtomicUsize::new(0) }
    }

    /// Opens a transfer for `contact_id` and routes it to a candidate agent
    /// per `strategy`. `loads` is consulted only for [`TransferStrategy::LoadBalanced`]
    /// and should map agent user id to its count of currently-assigned open
    /// transfers. A `Manual` strategy (or an empty/fully-loaded candidate
    /// list) leaves the transfer `Queued` with no assignee.
    ///
    /// Fails with [`Error::ActiveTransferExists`] if the contact already has
    /// an open (`Queued`/`Assigned`) transfer — at most one is allowed at a
    /// time, so an agent can't lose a handoff to a second one opened while
    /// the first is still outstanding.
    pub async fn create(
        &self,
        org_id: Uuid,
        contact_id: Uuid,
        source: TransferSource,
        reason: Option<String>,
        strategy: TransferStrategy,
        candidates: &[Uuid],
        loads: Option<&HashMap<Uuid, u32>>,
    ) -> Result<AgentTransfer> {
        if self.db.active_transfer_for_contact(org_id, contact_id).await?.is_some() {
            return Err(Error::ActiveTransferExists { contact_id });
        }

        let assignee = self.pick(strategy, candidates, loads);
        let now = Utc::now();

        let transfer = AgentTransfer {
            id: Uuid::new_v4(),
            org_id,
            contact_id,
            source,
            reason,
            status: if assignee.is_some() { TransferStatus::Assigned } else { TransferStatus::Queued },
            assigned_user_id: assignee,
            created_at: now,
            assigned_at: assignee.is_some().then_some(now),
            resumed_at: None,
        };

        self.db.create_transfer(&transfer).await?;
        info!(transfer_id = %transfer.id, ?source, ?strategy, assignee = ?assignee, "transfer created");
        Ok(transfer)
    }

    /// Assigns a queued transfer to a specific agent, for the `Manual`
    /// strategy where routing is a human decision made outside this crate.
    pub async fn assign_manual(&self, transfer_id: Uuid, user_id: Uuid) -> Result<()> {
        self.db.assign_transfer(transfer_id, user_id).await?;
        Ok(())
    }

    /// Closes a transfer via the agent's explicit resume action.
    pub async fn resume(&self, transfer_id: Uuid) -> Result<()> {
        self.db.resume_transfer(transfer_id).await?;
        Ok(())
    }

    /// Called when an assigned agent goes away (e.g. their presence flips
    /// to unavailable). Every transfer currently assigned to `agent_id` is
    /// unassigned back to `Queued` in one call — so an observer sees the
    /// agent's assigned count drop to zero and the org's queued count rise
    /// by the same amount as a single step, not one transfer at a time —
    /// and then each is immediately re-offered to `remaining_candidates`
    /// (which must exclude `agent_id`) via the org's `default_transfer_strategy`
    /// (a transfer no longer carries its own strategy once opened).
    /// Transfers with no eligible backup stay `Queued` for the next queue
    /// tick rather than erroring, since "agent away" must always succeed.
    pub async fn agent_went_away(
        &self,
        org_id: Uuid,
        agent_id: Uuid,
        remaining_candidates: &[Uuid],
        loads: Option<&HashMap<Uuid, u32>>,
    ) -> Result<Vec<AgentTransfer>> {
        let assigned = self.db.assigned_transfers_for_agent(org_id, agent_id).await?;
        if assigned.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = assigned.iter().map(|t| t.id).collect();
        self.db.requeue_transfers(&ids).await?;

        let strategy = self.db.get_organization_settings(org_id).await?.default_transfer_strategy;

        let mut results = Vec::with_capacity(assigned.len());
        for transfer in assigned {
            let mut updated = transfer.clone();
            updated.status = TransferStatus::Queued;
            updated.assigned_user_id = None;
            updated.assigned_at = None;

            if let Some(new_agent) = self.pick(strategy, remaining_candidates, loads) {
                self.db.assign_transfer(transfer.id, new_agent).await?;
                updated.status = TransferStatus::Assigned;
                updated.assigned_user_id = Some(new_agent);
            }
            results.push(updated);
        }
        Ok(results)
    }

    pub async fn pending_for_org(&self, org_id: Uuid) -> Result<Vec<AgentTransfer>> {
        Ok(self.db.pending_transfers(org_id).await?)
    }

    fn pick(
        &self,
        strategy: TransferStrategy,
        candidates: &[Uuid],
        loads: Option<&HashMap<Uuid, u32>>,
    ) -> Option<Uuid> {
        match strategy {
            TransferStrategy::RoundRobin => pick_round_robin(candidates, &self.rr_cursor),
            TransferStrategy::LoadBalanced => {
                pick_load_balanced(candidates, loads.unwrap_or(&HashMap::new()))
            }
            TransferStrategy::Manual => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chatrelay_db::{entities::OrganizationSettings, InMemoryDatabase};

    use super::*;

    fn seed_org_settings(db: &InMemoryDatabase, org_id: Uuid, strategy: TransferStrategy) {
        db.seed_org_settings(OrganizationSettings {
            org_id,
            business_hours: serde_json::json!({}),
            default_transfer_strategy: strategy,
            automation_enabled: true,
            ai_enabled: false,
            default_fallback_reply: None,
            session_idle_minutes: 30,
            auto_delete_media_enabled: false,
            auto_delete_media_days: 30,
            webhook_retry_schedule: None,
        });
    }

    #[tokio::test]
    async fn round_robin_assigns_immediately_when_candidates_present() {
        let db = Arc::new(InMemoryDatabase::new());
        let manager = TransferManager::new(db);
        let org_id = Uuid::new_v4();
        let contact_id = Uuid::new_v4();
        let agent = Uuid::new_v4();

        let transfer = manager
            .create(org_id, contact_id, TransferSource::Keyword, None, TransferStrategy::RoundRobin, &[agent], None)
            .await
            .unwrap();

        assert_eq!(transfer.status, TransferStatus::Assigned);
        assert_eq!(transfer.assigned_user_id, Some(agent));
    }

    #[tokio::test]
    async fn manual_strategy_leaves_transfer_queued() {
        let db = Arc::new(InMemoryDatabase::new());
        let manager = TransferManager::new(db);
        let agent = Uuid::new_v4();

        let transfer = manager
            .create(
                Uuid::new_v4(),
                Uuid::new_v4(),
                TransferSource::Manual,
                None,
                TransferStrategy::Manual,
                &[agent],
                None,
            )
            .await
            .unwrap();

        assert_eq!(transfer.status, TransferStatus::Queued);
        assert_eq!(transfer.assigned_user_id, None);
    }

    #[tokio::test]
    async fn no_candidates_leaves_transfer_queued_unassigned() {
        let db = Arc::new(InMemoryDatabase::new());
        let manager = TransferManager::new(db);

        let transfer = manager
            .create(
                Uuid::new_v4(),
                Uuid::new_v4(),
                TransferSource::Flow,
                None,
                TransferStrategy::RoundRobin,
                &[],
                None,
            )
            .await
            .unwrap();

        assert_eq!(transfer.status, TransferStatus::Queued);
    }

    #[tokio::test]
    async fn second_transfer_for_same_contact_is_rejected() {
        let db = Arc::new(InMemoryDatabase::new());
        let manager = TransferManager::new(db);
        let org_id = Uuid::new_v4();
        let contact_id = Uuid::new_v4();

        manager
            .create(org_id, contact_id, TransferSource::Keyword, None, TransferStrategy::Manual, &[], None)
            .await
            .unwrap();

        let err = manager
            .create(org_id, contact_id, TransferSource::Ai, None, TransferStrategy::Manual, &[], None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ActiveTransferExists { .. }));
    }

    #[tokio::test]
    async fn away_transition_reassigns_to_remaining_candidate() {
        let db = Arc::new(InMemoryDatabase::new());
        let org_id = Uuid::new_v4();
        seed_org_settings(&db, org_id, TransferStrategy::RoundRobin);
        let manager = TransferManager::new(db);
        let away_agent = Uuid::new_v4();
        let backup_agent = Uuid::new_v4();

        manager
            .create(
                org_id,
                Uuid::new_v4(),
                TransferSource::Keyword,
                None,
                TransferStrategy::RoundRobin,
                &[away_agent],
                None,
            )
            .await
            .unwrap();

        let requeued = manager.agent_went_away(org_id, away_agent, &[backup_agent], None).await.unwrap();

        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].assigned_user_id, Some(backup_agent));
        assert_eq!(requeued[0].status, TransferStatus::Assigned);
    }

    #[tokio::test]
    async fn away_transition_with_no_backup_leaves_transfer_queued() {
        let db = Arc::new(InMemoryDatabase::new());
        let org_id = Uuid::new_v4();
        seed_org_settings(&db, org_id, TransferStrategy::RoundRobin);
        let manager = TransferManager::new(db);
        let away_agent = Uuid::new_v4();

        manager
            .create(
                org_id,
                Uuid::new_v4(),
                TransferSource::Keyword,
                None,
                TransferStrategy::RoundRobin,
                &[away_agent],
                None,
            )
            .await
            .unwrap();

        let requeued = manager.agent_went_away(org_id, away_agent, &[], None).await.unwrap();

        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].assigned_user_id, None);
        assert_eq!(requeued[0].status, TransferStatus::Queued);
    }

    #[tokio::test]
    async fn away_transition_with_no_assigned_transfers_is_a_no_op() {
        let db = Arc::new(InMemoryDatabase::new());
        let manager = TransferManager::new(db);

        let requeued = manager.agent_went_away(Uuid::new_v4(), Uuid::new_v4(), &[], None).await.unwrap();
        assert!(requeued.is_empty());
    }

    #[tokio::test]
    async fn resume_clears_pending_list() {
        let db = Arc::new(InMemoryDatabase::new());
        let manager = TransferManager::new(db);
        let org_id = Uuid::new_v4();

        let transfer = manager
            .create(org_id, Uuid::new_v4(), TransferSource::Manual, None, TransferStrategy::Manual, &[], None)
            .await
            .unwrap();

        manager.resume(transfer.id).await.unwrap();
        let pending = manager.pending_for_org(org_id).await.unwrap();
        assert!(pending.is_empty());
    }
}
