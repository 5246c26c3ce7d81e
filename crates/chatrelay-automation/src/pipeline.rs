use std::sync::Arc;

use chatrelay_db::{
    Database,
    entities::{ChatbotSession, KeywordMatchMode, KeywordResponseKind, KeywordRule},
};
use dashmap::DashMap;
use regex::Regex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

/// What the automation pipeline decided to do with an inbound message.
/// The caller (`chatrelay-server`'s `AutomationRouter`) is responsible for
/// actually sending any reply or opening a transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// The contact already has an open agent transfer; automation stays
    /// out of the way entirely until it's resumed.
    TransferActive,
    /// An in-progress flow consumed the message; `session` is its new state.
    FlowAdvanced { session: ChatbotSession },
    /// A keyword rule or a flow's own trigger keyword started a new flow.
    FlowStarted { flow_id: Uuid },
    /// A keyword rule's `response_kind` is `Text`; send `text` verbatim.
    KeywordText { text: String },
    /// A keyword rule's `response_kind` is `Transfer`; open one with this
    /// optional reason.
    KeywordTransfer { reason: Option<String> },
    /// One or more AI contexts matched; their system prompts are
    /// aggregated (per the Open Question resolution in `DESIGN.md`)
    /// rather than picking just the first match.
    AiResponse { system_prompts: Vec<String> },
    /// Nothing matched; the message falls through with no automated
    /// response.
    Fallback,
}

/// Runs the early-return automation cascade: an open transfer short-circuits
/// everything, then an in-progress flow, then keyword rules, then a flow's
/// own trigger keyword, then AI context matching, then fallback. Grounded
/// on the general orchestrator-cascade shape in
/// `other_examples/.../pytake-core/orchestration.rs` (try the cheapest,
/// most specific match first; only fall through to AI once rule-based
/// matches are exhausted).
pub struct Pipeline {
    db: Arc<dyn Database>,
    regex_cache: DashMap<Uuid, Arc<Vec<Regex>>>,
}

impl Pipeline {
    #[must_use]
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            regex_cache: DashMap::new(),
        }
    }

    pub async fn handle(
        &self,
        org_id: Uuid,
        account_id: Uuid,
        contact_id: Uuid,
        text: &str,
    ) -> Result<PipelineOutcome> {
        if self.db.active_transfer_for_contact(org_id, contact_id).await?.is_some() {
            debug!(%contact_id, "contact has an open transfer, skipping automation");
            return Ok(PipelineOutcome::TransferActive);
        }

        if let Some(session) = self.db.get_chatbot_session(contact_id).await? {
            if session.flow_id.is_some() {
                debug!(%contact_id, "resuming in-progress flow");
                return Ok(PipelineOutcome::FlowAdvanced { session });
            }
        }

        let rules = self.db.list_keyword_rules(account_id).await?;
        for rule in &rules {
            if self.matches_rule(rule, text) {
                debug!(rule_id = %rule.id, "keyword rule matched");
                return Ok(match rule.response_kind {
                    KeywordResponseKind::Text => PipelineOutcome::KeywordText {
                        text: rule.response_text.clone().unwrap_or_default(),
                    },
                    KeywordResponseKind::Transfer => {
                        PipelineOutcome::KeywordTransfer { reason: rule.response_text.clone() }
                    }
                });
            }
        }

        let flows = self.db.list_enabled_flows(account_id).await?;
        let lower = text.trim().to_lowercase();
        if let Some(flow) = flows.iter().find(|f| {
            f.trigger_keyword.as_deref().is_some_and(|k| k.trim().to_lowercase() == lower)
        }) {
            debug!(flow_id = %flow.id, "flow trigger keyword matched");
            return Ok(PipelineOutcome::FlowStarted { flow_id: flow.id });
        }

        let contexts = self.db.list_enabled_ai_contexts(account_id).await?;
        let matching_prompts: Vec<String> = contexts
            .into_iter()
            .filter(|ctx| context_matches(ctx, text))
            .map(|ctx| ctx.system_prompt)
            .collect();

        if !matching_prompts.is_empty() {
            return Ok(PipelineOutcome::AiResponse { system_prompts: matching_prompts });
        }

        Ok(PipelineOutcome::Fallback)
    }

    fn matches_rule(&self, rule: &KeywordRule, text: &str) -> bool {
        let Some(keywords) = rule.keywords.as_array() else {
            return false;
        };
        let keywords: Vec<&str> = keywords.iter().filter_map(|k| k.as_str()).collect();

        match rule.match_mode {
            KeywordMatchMode::Exact => {
                keywords.iter().any(|k| text.trim().eq_ignore_ascii_case(k.trim()))
            }
            KeywordMatchMode::Contains => {
                let lower = text.to_lowercase();
                keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
            }
            KeywordMatchMode::Regex => {
                self.compiled_regexes(rule, &keywords).iter().any(|re| re.is_match(text))
            }
        }
    }

    /// Compiles and caches every regex pattern for a keyword rule. Regex
    /// compilation is the expensive part of matching, so it's done once per
    /// rule id and reused across every inbound message, mirroring the
    /// `DashMap`-backed caches used elsewhere in the teacher's codebase. A
    /// pattern that fails to compile is logged and dropped rather than
    /// aborting the whole pipeline — one bad rule must never block every
    /// other rule's matching.
    fn compiled_regexes(&self, rule: &KeywordRule, patterns: &[&str]) -> Arc<Vec<Regex>> {
        if let Some(existing) = self.regex_cache.get(&rule.id) {
            return existing.clone();
        }
        let compiled: Vec<Regex> = patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(err) => {
                    warn!(rule_id = %rule.id, %pattern, %err, "invalid keyword rule regex, skipping");
                    None
                }
            })
            .collect();
        let compiled = Arc::new(compiled);
        self.regex_cache.insert(rule.id, compiled.clone());
        compiled
    }
}

fn context_matches(ctx: &chatrelay_db::entities::AiContext, text: &str) -> bool {
    let Some(keywords) = ctx.trigger_keywords.as_array() else {
        return false;
    };
    if keywords.is_empty() {
        // No trigger keywords means "always eligible" — a catch-all
        // assistant context.
        return true;
    }
    let lower = text.to_lowercase();
    keywords
        .iter()
        .filter_map(|k| k.as_str())
        .any(|k| lower.contains(&k.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_db::InMemoryDatabase;
    use chatrelay_db::entities::{AiContext, ChatbotSession};
    use chrono::Utc;

    fn make_rule(
        account_id: Uuid,
        keywords: &[&str],
        mode: KeywordMatchMode,
        response_kind: KeywordResponseKind,
    ) -> KeywordRule {
        KeywordRule {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            account_id,
            keywords: serde_json::json!(keywords),
            match_mode: mode,
            response_kind,
            response_text: Some("hello".to_string()),
            priority: 0,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn open_transfer_short_circuits_everything() {
        let db = Arc::new(InMemoryDatabase::new());
        let org_id = Uuid::new_v4();
        let contact_id = Uuid::new_v4();

        let transfer = chatrelay_db::entities::AgentTransfer {
            id: Uuid::new_v4(),
            org_id,
            contact_id,
            source: chatrelay_db::entities::TransferSource::Manual,
            reason: None,
            status: chatrelay_db::entities::TransferStatus::Queued,
            assigned_user_id: None,
            created_at: Utc::now(),
            assigned_at: None,
            resumed_at: None,
        };
        db.create_transfer(&transfer).await.unwrap();

        let pipeline = Pipeline::new(db);
        let outcome = pipeline.handle(org_id, Uuid::new_v4(), contact_id, "hello").await.unwrap();
        assert_eq!(outcome, PipelineOutcome::TransferActive);
    }

    #[tokio::test]
    async fn in_progress_flow_takes_priority_over_keyword_rules() {
        let db = Arc::new(InMemoryDatabase::new());
        let contact_id = Uuid::new_v4();
        let account_id = Uuid::new_v4();
        let org_id = Uuid::new_v4();
        db.upsert_chatbot_session(&ChatbotSession {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            contact_id,
            flow_id: Some(Uuid::new_v4()),
            current_step_id: None,
            context: serde_json::json!({}),
            updated_at: Utc::now(),
        })
        .await
        .unwrap();

        let pipeline = Pipeline::new(db);
        let outcome = pipeline.handle(org_id, account_id, contact_id, "hello").await.unwrap();
        assert!(matches!(outcome, PipelineOutcome::FlowAdvanced { .. }));
    }

    #[tokio::test]
    async fn exact_keyword_rule_with_text_response() {
        let db = Arc::new(InMemoryDatabase::new());
        let account_id = Uuid::new_v4();
        db.seed_keyword_rule(make_rule(
            account_id,
            &["start"],
            KeywordMatchMode::Exact,
            KeywordResponseKind::Text,
        ));

        let pipeline = Pipeline::new(db);
        let outcome =
            pipeline.handle(Uuid::new_v4(), account_id, Uuid::new_v4(), "start").await.unwrap();
        assert_eq!(outcome, PipelineOutcome::KeywordText { text: "hello".to_string() });
    }

    #[tokio::test]
    async fn keyword_rule_with_transfer_response() {
        let db = Arc::new(InMemoryDatabase::new());
        let account_id = Uuid::new_v4();
        db.seed_keyword_rule(make_rule(
            account_id,
            &["agent"],
            KeywordMatchMode::Contains,
            KeywordResponseKind::Transfer,
        ));

        let pipeline = Pipeline::new(db);
        let outcome = pipeline
            .handle(Uuid::new_v4(), account_id, Uuid::new_v4(), "let me talk to an agent")
            .await
            .unwrap();
        assert_eq!(outcome, PipelineOutcome::KeywordTransfer { reason: Some("hello".to_string()) });
    }

    #[tokio::test]
    async fn flow_trigger_keyword_starts_flow_when_no_rule_matches() {
        let db = Arc::new(InMemoryDatabase::new());
        let account_id = Uuid::new_v4();
        let flow_id = Uuid::new_v4();
        db.seed_flow(chatrelay_db::entities::ChatbotFlow {
            id: flow_id,
            org_id: Uuid::new_v4(),
            account_id,
            name: "onboarding".to_string(),
            trigger_keyword: Some("menu".to_string()),
            entry_step_id: None,
            enabled: true,
        });

        let pipeline = Pipeline::new(db);
        let outcome =
            pipeline.handle(Uuid::new_v4(), account_id, Uuid::new_v4(), "menu").await.unwrap();
        assert_eq!(outcome, PipelineOutcome::FlowStarted { flow_id });
    }

    #[tokio::test]
    async fn ai_contexts_aggregate_all_matches_not_just_first() {
        let db = Arc::new(InMemoryDatabase::new());
        let account_id = Uuid::new_v4();
        db.seed_ai_context(AiContext {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            account_id,
            name: "billing".to_string(),
            system_prompt: "You handle billing.".to_string(),
            trigger_keywords: serde_json::json!(["invoice"]),
            enabled: true,
        });
        db.seed_ai_context(AiContext {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            account_id,
            name: "support".to_string(),
            system_prompt: "You handle support.".to_string(),
            trigger_keywords: serde_json::json!(["invoice", "help"]),
            enabled: true,
        });

        let pipeline = Pipeline::new(db);
        let outcome = pipeline
            .handle(Uuid::new_v4(), account_id, Uuid::new_v4(), "where is my invoice")
            .await
            .unwrap();

        match outcome {
            PipelineOutcome::AiResponse { system_prompts } => assert_eq!(system_prompts.len(), 2),
            other => panic!("expected AiResponse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_match_falls_back() {
        let db = Arc::new(InMemoryDatabase::new());
        let pipeline = Pipeline::new(db);
        let outcome = pipeline
            .handle(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "asdkjfh")
            .await
            .unwrap();
        assert_eq!(outcome, PipelineOutcome::Fallback);
    }

    #[tokio::test]
    async fn regex_rule_is_cached_and_still_matches() {
        let db = Arc::new(InMemoryDatabase::new());
        let account_id = Uuid::new_v4();
        db.seed_keyword_rule(make_rule(
            account_id,
            &[r"^order\s+\d+$"],
            KeywordMatchMode::Regex,
            KeywordResponseKind::Text,
        ));

        let pipeline = Pipeline::new(db);
        let first =
            pipeline.handle(Uuid::new_v4(), account_id, Uuid::new_v4(), "order 42").await.unwrap();
        let second =
            pipeline.handle(Uuid::new_v4(), account_id, Uuid::new_v4(), "order 99").await.unwrap();
        assert_eq!(first, PipelineOutcome::KeywordText { text: "hello".to_string() });
        assert_eq!(second, PipelineOutcome::KeywordText { text: "hello".to_string() });
    }
}
