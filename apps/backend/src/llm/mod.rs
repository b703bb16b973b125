//! Decision/chat agent for AI-controlled patient slots.
//!
//! The agent keeps one append-only conversation context per session
//! (system persona + roleplay profile + round summaries + chat) and turns
//! completion responses into decisions or short chat lines. All external
//! calls pass through the shared [`RateLimiter`]; transport failures are
//! retried with exponential backoff and, for decisions, exhausted retries
//! fall back to `WITHDRAW` so a round can always finalize.

pub mod client;
pub mod limiter;
pub mod parse;
pub mod profile;
pub mod prompts;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{ChatMessage, Decision, GameMode, Payoffs, PlayerProfile};
pub use client::{
    CompletionBackend, CompletionError, OpenAiBackend, PromptMessage, Role,
    DEFAULT_COMPLETION_MODEL,
};
pub use limiter::RateLimiter;
pub use parse::parse_decision;
pub use profile::generate_profile;
pub use prompts::STAY_SILENT_SENTINEL;

/// Total completion attempts per decision before defaulting.
pub const MAX_DECISION_ATTEMPTS: u32 = 3;
/// Chance that the agent speaks up unprompted when a chat phase opens.
pub const PROACTIVE_CHAT_PROBABILITY: f64 = 0.35;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const DECISION_MAX_TOKENS: u32 = 64;
const CHAT_MAX_TOKENS: u32 = 96;

/// Inputs for one decision request.
#[derive(Debug, Clone)]
pub struct RoundBrief {
    pub round_number: u32,
    pub mode: GameMode,
    pub last_summary: String,
    /// Sequential mode: masked prior actions this round.
    pub prior_actions: Vec<Decision>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDecision {
    pub decision: Decision,
    pub raw: String,
    /// True when every attempt failed and the impatience default was used.
    pub defaulted: bool,
}

pub struct DecisionAgent {
    backend: Arc<dyn CompletionBackend>,
    limiter: Arc<RateLimiter>,
    contexts: DashMap<Uuid, Vec<PromptMessage>>,
}

impl DecisionAgent {
    pub fn new(backend: Arc<dyn CompletionBackend>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            backend,
            limiter,
            contexts: DashMap::new(),
        }
    }

    pub fn model(&self) -> String {
        self.backend.model().to_string()
    }

    /// Seed the session context with the system prompt and roleplay
    /// profile.
    pub fn init_profile(
        &self,
        session_id: Uuid,
        profile: &PlayerProfile,
        partner_type: &str,
        payoffs: &Payoffs,
    ) {
        let context = vec![
            PromptMessage::system(prompts::SYSTEM_PROMPT),
            PromptMessage::user(prompts::roleplay_prompt(profile, partner_type, payoffs)),
        ];
        self.contexts.insert(session_id, context);
        info!(session_id = %session_id, "agent profile initialized");
    }

    /// Produce a decision for the current round.
    ///
    /// Parse failures append a corrective instruction and retry; transport
    /// failures back off 1s/2s. After [`MAX_DECISION_ATTEMPTS`] the agent
    /// defaults to `WITHDRAW` and records that as its own turn so the
    /// round can still finalize.
    pub async fn decide(&self, session_id: Uuid, brief: RoundBrief) -> AgentDecision {
        let observation = match brief.mode {
            GameMode::Simultaneous => {
                prompts::round_prompt_simultaneous(brief.round_number, &brief.last_summary)
            }
            GameMode::Sequential => prompts::round_prompt_sequential(
                brief.round_number,
                &brief.last_summary,
                &brief.prior_actions,
            ),
        };

        let mut messages = self.context_snapshot(session_id);
        messages.push(PromptMessage::user(observation));

        let mut last_error: Option<CompletionError> = None;

        for attempt in 0..MAX_DECISION_ATTEMPTS {
            let permit = self.limiter.acquire().await;
            let response = self
                .backend
                .complete(&messages, DECISION_MAX_TOKENS)
                .await;
            drop(permit);

            match response {
                Ok(raw) => match parse_decision(&raw) {
                    Some(decision) => {
                        messages.push(PromptMessage::assistant(raw.clone()));
                        self.contexts.insert(session_id, messages);
                        info!(
                            session_id = %session_id,
                            round = brief.round_number,
                            decision = %decision,
                            attempt,
                            "agent decided"
                        );
                        return AgentDecision {
                            decision,
                            raw,
                            defaulted: false,
                        };
                    }
                    None => {
                        warn!(
                            session_id = %session_id,
                            round = brief.round_number,
                            attempt,
                            "agent response had no parseable action, reprompting"
                        );
                        messages.push(PromptMessage::user(prompts::CORRECTIVE_PROMPT));
                    }
                },
                Err(err) => {
                    warn!(
                        session_id = %session_id,
                        round = brief.round_number,
                        attempt,
                        error = %err,
                        "completion call failed"
                    );
                    let retryable = err.is_retryable();
                    last_error = Some(err);
                    if retryable && attempt + 1 < MAX_DECISION_ATTEMPTS {
                        tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt)).await;
                    }
                }
            }
        }

        warn!(
            session_id = %session_id,
            round = brief.round_number,
            last_error = last_error.as_ref().map(|e| e.to_string()),
            "agent attempts exhausted, defaulting to WITHDRAW"
        );
        let raw = Decision::Withdraw.as_str().to_string();
        messages.push(PromptMessage::assistant(raw.clone()));
        self.contexts.insert(session_id, messages);

        AgentDecision {
            decision: Decision::Withdraw,
            raw,
            defaulted: true,
        }
    }

    /// Produce a short in-persona chat line, or None to stay silent.
    ///
    /// Chat is cosmetic: every failure is swallowed so it can never block
    /// the decision pipeline.
    pub async fn chat_line(
        &self,
        session_id: Uuid,
        round_number: u32,
        transcript: &[ChatMessage],
        incoming: Option<&ChatMessage>,
    ) -> Option<String> {
        let mut messages = self.context_snapshot(session_id);
        messages.push(PromptMessage::user(prompts::chat_prompt(
            round_number,
            transcript,
            incoming,
        )));

        let permit = self.limiter.acquire().await;
        let response = self.backend.complete(&messages, CHAT_MAX_TOKENS).await;
        drop(permit);

        let raw = match response {
            Ok(raw) => raw,
            Err(err) => {
                debug!(
                    session_id = %session_id,
                    round = round_number,
                    error = %err,
                    "agent chat call failed, staying silent"
                );
                return None;
            }
        };

        messages.push(PromptMessage::assistant(raw.clone()));
        self.contexts.insert(session_id, messages);

        let line = raw.trim();
        if line.is_empty() || line.contains(STAY_SILENT_SENTINEL) {
            return None;
        }
        Some(line.to_string())
    }

    /// Append the finalized round's outcome to the session context.
    pub fn inform_outcome(&self, session_id: Uuid, outcome_text: String) {
        if let Some(mut context) = self.contexts.get_mut(&session_id) {
            context.push(PromptMessage::user(outcome_text));
        }
    }

    /// Raw assistant turns so far, for the result document.
    pub fn assistant_responses(&self, session_id: Uuid) -> Vec<String> {
        self.contexts
            .get(&session_id)
            .map(|context| {
                context
                    .iter()
                    .filter(|message| message.role == Role::Assistant)
                    .map(|message| message.content.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn clear(&self, session_id: Uuid) {
        self.contexts.remove(&session_id);
        debug!(session_id = %session_id, "agent context cleared");
    }

    fn context_snapshot(&self, session_id: Uuid) -> Vec<PromptMessage> {
        self.contexts
            .get(&session_id)
            .map(|context| context.clone())
            .unwrap_or_else(|| vec![PromptMessage::system(prompts::SYSTEM_PROMPT)])
    }
}
