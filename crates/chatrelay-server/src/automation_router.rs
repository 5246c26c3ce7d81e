use std::sync::Arc;

use async_trait::async_trait;
use chatrelay_automation::{FlowEngine, Pipeline, PipelineOutcome, StepAction};
use chatrelay_db::{Database, entities::TransferSource};
use chatrelay_gateway::{Hub, inbound::AutomationHook, ws::AvailabilityHook};
use chatrelay_security::SafeHttpClient;
use chatrelay_transfer::TransferManager;
use tracing::warn;
use uuid::Uuid;

use crate::whatsapp::WhatsAppSender;

/// Runs the keyword → flow → AI → transfer cascade for each inbound
/// message and carries out whatever the cascade decides: sending a flow
/// step's text back out, opening an agent transfer, or sending the org's
/// configured fallback reply when nothing automated applies.
pub struct AutomationRouter {
    db: Arc<dyn Database>,
    pipeline: Arc<Pipeline>,
    flow_engine: Arc<FlowEngine>,
    transfers: Arc<TransferManager>,
    http: Arc<SafeHttpClient>,
    hub: Arc<Hub>,
}

impl AutomationRouter {
    #[must_use]
    pub fn new(db: Arc<dyn Database>, http: Arc<SafeHttpClient>, hub: Arc<Hub>) -> Self {
        Self {
            pipeline: Arc::new(Pipeline::new(db.clone())),
            flow_engine: Arc::new(FlowEngine::new(db.clone())),
            transfers: Arc::new(TransferManager::new(db.clone())),
            db,
            http,
            hub,
        }
    }

    async fn run_step_action(&self, org_id: Uuid, account_id: Uuid, contact_id: Uuid, action: StepAction) {
        let sender = WhatsAppSender::new(self.http.clone(), self.db.clone(), org_id, account_id);
        match action {
            StepAction::SendText { text } => {
                if let Err(err) = sender.send_text(contact_id, &text).await {
                    warn!(%err, %contact_id, "failed to send flow step text");
                }
            }
            StepAction::SendButtons { text, options } => {
                let text = format!("{text}\n{}", options.join(" / "));
                if let Err(err) = sender.send_text(contact_id, &text).await {
                    warn!(%err, %contact_id, "failed to send flow step buttons");
                }
            }
            StepAction::WaitForInput | StepAction::FlowComplete => {}
        }
    }

    /// A keyword rule asked for a transfer (`PipelineOutcome::KeywordTransfer`):
    /// opens one with no preset candidate list, since agent presence is
    /// tracked outside this crate. `chatrelay-server` operators wire a real
    /// candidate/load source here once an availability directory exists.
    async fn open_transfer(&self, org_id: Uuid, contact_id: Uuid, source: TransferSource, reason: Option<String>) {
        let strategy = match self.db.get_organization_settings(org_id).await {
            Ok(settings) => settings.default_transfer_strategy,
            Err(err) => {
                warn!(%err, %contact_id, "failed to load org settings, defaulting to manual transfer strategy");
                chatrelay_db::entities::TransferStrategy::Manual
            }
        };

        match self.transfers.create(org_id, contact_id, source, reason, strategy, &[], None).await {
            Ok(transfer) => {
                self.hub
                    .dispatch(&chatrelay_common::events::DomainEvent::AgentTransferCreated {
                        org_id: org_id.into(),
                        transfer_id: transfer.id.into(),
                        contact_id: contact_id.into(),
                    })
                    .await;
            }
            Err(chatrelay_transfer::Error::ActiveTransferExists { .. }) => {
                // Contact already has one outstanding; nothing to do.
            }
            Err(err) => warn!(%err, %contact_id, "failed to open agent transfer"),
        }
    }

    /// Nothing automated applies and no transfer was requested: sends the
    /// org's configured fallback reply if one is set, otherwise stays
    /// silent rather than opening a transfer on every unmatched message.
    async fn send_fallback_reply(&self, org_id: Uuid, account_id: Uuid, contact_id: Uuid) {
        let reply = match self.db.get_organization_settings(org_id).await {
            Ok(settings) => settings.default_fallback_reply,
            Err(err) => {
                warn!(%err, %contact_id, "failed to load org settings for fallback reply");
                return;
            }
        };
        let Some(text) = reply else {
            return;
        };
        let sender = WhatsAppSender::new(self.http.clone(), self.db.clone(), org_id, account_id);
        if let Err(err) = sender.send_text(contact_id, &text).await {
            warn!(%err, %contact_id, "failed to send fallback reply");
        }
    }
}

#[async_trait]
impl AutomationHook for AutomationRouter {
    async fn on_message(
        &self,
        org_id: Uuid,
        account_id: Uuid,
        contact_id: Uuid,
        text: &str,
        button_title: Option<&str>,
    ) {
        let outcome = match self.pipeline.handle(org_id, account_id, contact_id, text).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(%err, %contact_id, "automation pipeline failed, sending fallback reply");
                self.send_fallback_reply(org_id, account_id, contact_id).await;
                return;
            }
        };

        match outcome {
            PipelineOutcome::TransferActive => {}
            PipelineOutcome::FlowStarted { flow_id } => {
                match self.flow_engine.start_flow(org_id, contact_id, flow_id).await {
                    Ok(action) => self.run_step_action(org_id, account_id, contact_id, action).await,
                    Err(err) => warn!(%err, %contact_id, "failed to start flow"),
                }
            }
            PipelineOutcome::FlowAdvanced { session } => {
                match self.flow_engine.advance(&session, text, button_title).await {
                    Ok(action) => self.run_step_action(org_id, account_id, contact_id, action).await,
                    Err(err) => warn!(%err, %contact_id, "failed to advance flow"),
                }
            }
            PipelineOutcome::KeywordText { text } => {
                let sender = WhatsAppSender::new(self.http.clone(), self.db.clone(), org_id, account_id);
                if let Err(err) = sender.send_text(contact_id, &text).await {
                    warn!(%err, %contact_id, "failed to send keyword rule reply");
                }
            }
            PipelineOutcome::KeywordTransfer { reason } => {
                self.open_transfer(org_id, contact_id, TransferSource::Keyword, reason).await;
            }
            PipelineOutcome::AiResponse { system_prompts } => {
                // Composing and calling the AI provider itself is a
                // capability adapter left as a narrow trait for the
                // deployer to implement; degrading to the fallback reply
                // mirrors "AI provider failures degrade to the fallback
                // stage" without forcing an agent handoff.
                warn!(
                    contexts = system_prompts.len(),
                    %contact_id,
                    "ai stage matched but no ai provider is wired; sending fallback reply"
                );
                self.send_fallback_reply(org_id, account_id, contact_id).await;
            }
            PipelineOutcome::Fallback => {
                self.send_fallback_reply(org_id, account_id, contact_id).await;
            }
        }
    }
}

#[async_trait]
impl AvailabilityHook for AutomationRouter {
    /// Persists the `available <-> away` transition (with its break-start
    /// timestamp per `SPEC_FULL.md` §2), then — only when the transition
    /// is into `away` — requeues every transfer assigned to the user and
    /// fans out one `agent_transfer_requeued` event per transfer. No
    /// directory of other available agents exists in this crate yet, so
    /// the backup candidate list is always empty here — requeued
    /// transfers land `Queued` for the next queue tick rather than being
    /// reassigned immediately, same scope decision as `open_transfer`.
    async fn on_availability_changed(&self, org_id: &str, user_id: &str, away: bool) {
        let (Ok(org_id), Ok(user_id)) = (Uuid::parse_str(org_id), Uuid::parse_str(user_id)) else {
            warn!(%org_id, %user_id, "ignoring availability change with non-uuid id");
            return;
        };

        let break_started_at = away.then(chrono::Utc::now);
        if let Err(err) = self.db.set_user_availability(user_id, away, break_started_at).await {
            warn!(%err, %user_id, "failed to persist availability change");
        }

        if !away {
            return;
        }

        match self.transfers.agent_went_away(org_id, user_id, &[], None).await {
            Ok(requeued) => {
                for transfer in requeued {
                    self.hub
                        .dispatch(&chatrelay_common::events::DomainEvent::AgentTransferRequeued {
                            org_id: org_id.into(),
                            transfer_id: transfer.id.into(),
                            contact_id: transfer.contact_id.into(),
                            reassigned_to: transfer.assigned_user_id.map(Into::into),
                        })
                        .await;
                }
            }
            Err(err) => warn!(%err, %user_id, "failed to requeue transfers for away agent"),
        }
    }
}
