//! Round and game lifecycle driving.
//!
//! Everything here runs behind the target session's lock; async work
//! (completion calls, delays) happens outside it and re-enters with the
//! round number it was started for, so continuations that outlived their
//! round are discarded instead of applied.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{timers, GameFlowService};
use crate::config::ExperimentConfig;
use crate::domain::{ConfigOverrides, Decision, GameMode, GameStatus, SlotId, TimerPhase};
use crate::errors::GameError;
use crate::llm::{generate_profile, prompts, RoundBrief};
use crate::services::storage::build_result_document;
use crate::session::{PatientSlot, Session};
use crate::ws::hub::Topic;
use crate::ws::protocol::ServerMsg;

/// Display name given to the synthesized opponent in vs-AI games.
const AGENT_PLAYER_NAME: &str = "AI Opponent";

impl GameFlowService {
    /// Start the game for a waiting room.
    ///
    /// One seated player means vs-AI: the second patient slot is
    /// synthesized as agent-controlled with a generated persona. Two
    /// seated players means human-vs-human. The room is consumed; its
    /// code now identifies the session.
    pub async fn start_game(
        self: Arc<Self>,
        conn: Uuid,
        room_code: &str,
        overrides: Option<ConfigOverrides>,
    ) -> Result<Uuid, GameError> {
        let overrides = overrides.unwrap_or_default();
        ExperimentConfig::validate_overrides(&overrides)?;

        let players = self.matchmaker.players(room_code)?;
        if !players.iter().any(|player| player.conn == conn) {
            return Err(GameError::unauthorized(
                "only a seated player can start the game",
            ));
        }

        let room = self.matchmaker.take_room(room_code)?;
        let mut config = overrides.apply(&self.defaults.game_config());
        config.mode = room.mode;

        let (patient_one, patient_two, agent_profile) = match room.players.as_slice() {
            [human] => {
                let profile = generate_profile();
                (
                    PatientSlot::human(human.name.clone(), human.conn),
                    PatientSlot::agent(AGENT_PLAYER_NAME, profile.clone()),
                    Some(profile),
                )
            }
            [first, second] => (
                PatientSlot::human(first.name.clone(), first.conn),
                PatientSlot::human(second.name.clone(), second.conn),
                None,
            ),
            _ => {
                return Err(GameError::validation(
                    "a game needs one seated player (vs AI) or two",
                ))
            }
        };

        let session = Session::new(
            room.code.clone(),
            room.mode,
            patient_one,
            patient_two,
            config.clone(),
        )?;
        let session_id = session.session_id;

        if let Some(profile) = &agent_profile {
            self.agent
                .init_profile(session_id, profile, "Human", &config.payoffs);
        }

        let handle = self.registry.insert(session);
        let session = handle.lock().await;
        for slot in SlotId::PATIENTS {
            if let Some(conn) = session.conn_of_slot(slot) {
                self.hub.subscribe(Topic::Session(session_id), conn);
                self.hub.send_to(
                    conn,
                    ServerMsg::SessionCredentials {
                        session_id,
                        slot,
                        reconnect_token: session.reconnect_token(slot),
                    },
                );
            }
        }
        let snapshot = session.snapshot();
        drop(session);

        self.hub.drop_topic(&Topic::Room(room.code.clone()));
        self.hub.broadcast(
            &Topic::Session(session_id),
            ServerMsg::GameStarting { session: snapshot },
        );
        info!(session_id = %session_id, room_code = %room.code, "game starting");

        let delay = self.pacing.start_delay;
        timers::spawn_first_round(self, session_id, delay);
        Ok(session_id)
    }

    /// Open the next round: reset round state, then enter chat or go
    /// straight to decisions.
    pub async fn start_round(self: Arc<Self>, session_id: Uuid) -> Result<(), GameError> {
        let handle = self.registry.get(session_id)?;
        let mut session = handle.lock().await;
        let status = session.begin_round();
        let round_number = session.current_round.round_number;
        let chat_duration = Duration::from_secs(session.config.chat_duration_secs);

        self.hub.broadcast(
            &Topic::Session(session_id),
            ServerMsg::RoundStarting { round_number },
        );

        if status == GameStatus::RoundChat {
            self.hub.broadcast(
                &Topic::Session(session_id),
                ServerMsg::ChatStarting {
                    round_number,
                    duration_secs: chat_duration.as_secs(),
                },
            );
            let token = timers::spawn_countdown(
                self.clone(),
                session_id,
                round_number,
                TimerPhase::Chat,
                chat_duration,
            );
            session.timers.arm(TimerPhase::Chat, token);
            drop(session);
            self.spawn_agent_chat(
                session_id,
                round_number,
                None,
                crate::llm::PROACTIVE_CHAT_PROBABILITY,
            );
            Ok(())
        } else {
            drop(session);
            self.enter_decision_phase(session_id).await
        }
    }

    /// Open the decision phase: arm its countdown and hand the turn to
    /// whoever must act (sequence walk, or a parallel agent decision).
    async fn enter_decision_phase(self: Arc<Self>, session_id: Uuid) -> Result<(), GameError> {
        let handle = self.registry.get(session_id)?;
        let mut session = handle.lock().await;
        if session.status == GameStatus::RoundChat {
            session.begin_decision_phase()?;
        }
        let round_number = session.current_round.round_number;
        let timeout = Duration::from_millis(session.config.decision_timeout_ms);
        let token = timers::spawn_countdown(
            self.clone(),
            session_id,
            round_number,
            TimerPhase::Decision,
            timeout,
        );
        session.timers.arm(TimerPhase::Decision, token);

        match session.mode {
            GameMode::Sequential => {
                drop(session);
                self.continue_sequence(session_id).await
            }
            GameMode::Simultaneous => {
                if let Some(slot) = session.agent_slot() {
                    let brief = round_brief(&session);
                    drop(session);
                    self.spawn_agent_decision(session_id, round_number, slot, brief);
                }
                Ok(())
            }
        }
    }

    /// Sequential drive: reveal decided slots in order, then either ask
    /// the next undecided participant to act or finalize.
    ///
    /// Re-entered after every recorded decision (human, agent, or the
    /// automaton's pre-recorded one).
    pub(super) async fn continue_sequence(self: Arc<Self>, session_id: Uuid) -> Result<(), GameError> {
        let handle = self.registry.get(session_id)?;
        let mut session = handle.lock().await;
        if !matches!(
            session.status,
            GameStatus::RoundDecision | GameStatus::RoundRevealing
        ) {
            return Ok(());
        }
        let round_number = session.current_round.round_number;
        let order = session.current_round.decision_order;

        for slot in order {
            match session.current_round.decisions[slot] {
                Some(decision) => {
                    if !session.current_round.revealed.contains(&slot) {
                        let position = session.mark_revealed(slot);
                        self.hub.broadcast(
                            &Topic::Session(session_id),
                            ServerMsg::DecisionRevealed { decision, position },
                        );
                    }
                }
                None => {
                    let is_agent = session
                        .patient(slot)
                        .map(|p| p.is_agent)
                        .unwrap_or(false);
                    if is_agent {
                        let brief = round_brief(&session);
                        drop(session);
                        self.spawn_agent_decision(session_id, round_number, slot, brief);
                    } else {
                        let position = order.iter().position(|&s| s == slot).unwrap_or(0);
                        let prior_actions = session.prior_decisions_masked();
                        let conn = session.conn_of_slot(slot);
                        drop(session);
                        if let Some(conn) = conn {
                            self.hub.send_to(
                                conn,
                                ServerMsg::NextPlayerTurn {
                                    position,
                                    prior_actions,
                                },
                            );
                        }
                        // A disconnected human stays silent; the decision
                        // countdown bounds the wait.
                    }
                    return Ok(());
                }
            }
        }

        drop(session);
        self.try_finalize(session_id).await.map(drop)
    }

    fn spawn_agent_decision(
        self: Arc<Self>,
        session_id: Uuid,
        round_number: u32,
        slot: SlotId,
        brief: RoundBrief,
    ) {
        tokio::spawn(async move {
            let outcome = self.agent.decide(session_id, brief).await;
            if let Err(err) = self
                .apply_agent_decision(session_id, round_number, slot, outcome.decision)
                .await
            {
                debug!(
                    session_id = %session_id,
                    round = round_number,
                    error = %err,
                    "agent decision arrived for a session that is gone"
                );
            }
        });
    }

    /// Re-entry point for a completed agent decision.
    ///
    /// Discards the result if the session has moved past the round (or
    /// phase) the call was made for.
    pub async fn apply_agent_decision(
        self: Arc<Self>,
        session_id: Uuid,
        round_number: u32,
        slot: SlotId,
        decision: Decision,
    ) -> Result<(), GameError> {
        let handle = self.registry.get(session_id)?;
        let mut session = handle.lock().await;
        if session.current_round.round_number != round_number
            || !matches!(
                session.status,
                GameStatus::RoundDecision | GameStatus::RoundRevealing
            )
        {
            debug!(
                session_id = %session_id,
                round = round_number,
                current = session.current_round.round_number,
                "stale agent decision discarded"
            );
            return Ok(());
        }
        if session.current_round.decisions[slot].is_some() {
            // The timeout fallback beat the completion call to it.
            return Ok(());
        }
        session.submit_decision(slot, decision)?;
        let mode = session.mode;
        drop(session);

        match mode {
            GameMode::Sequential => self.continue_sequence(session_id).await,
            GameMode::Simultaneous => self.try_finalize(session_id).await.map(drop),
        }
    }

    /// Finalize the round if every slot has decided.
    ///
    /// Returns whether the round completed. On completion the phase
    /// timers are released, results broadcast, and the inter-round
    /// advance scheduled.
    pub(super) async fn try_finalize(self: Arc<Self>, session_id: Uuid) -> Result<bool, GameError> {
        let handle = self.registry.get(session_id)?;
        let mut session = handle.lock().await;
        if !matches!(
            session.status,
            GameStatus::RoundDecision | GameStatus::RoundRevealing
        ) {
            // Another completion path already retired this round.
            return Ok(false);
        }
        if !session.all_decided() {
            return Ok(false);
        }
        let result = session.finalize_round()?;
        session.timers.cancel_all();
        if session.agent_slot().is_some() {
            self.agent
                .inform_outcome(session_id, prompts::outcome_prompt(&result));
        }
        drop(session);

        let round_number = result.round;
        self.hub.broadcast(
            &Topic::Session(session_id),
            ServerMsg::RoundComplete { results: result },
        );

        let delay = self.pacing.inter_round_delay;
        timers::spawn_round_advance(self, session_id, round_number, delay);
        Ok(true)
    }

    /// Advance past a completed round: next round, or game over.
    ///
    /// `after_round` guards against a stale delay task racing a session
    /// that was already moved along by something else.
    pub(super) async fn advance_or_end(
        self: Arc<Self>,
        session_id: Uuid,
        after_round: u32,
    ) -> Result<(), GameError> {
        let handle = self.registry.get(session_id)?;
        let mut session = handle.lock().await;
        if session.status != GameStatus::RoundResults
            || session.current_round.round_number != after_round
        {
            debug!(
                session_id = %session_id,
                after_round,
                status = ?session.status,
                "stale round advance discarded"
            );
            return Ok(());
        }

        if session.advance_round() {
            drop(session);
            self.start_round(session_id).await
        } else {
            drop(session);
            self.end_game(session_id).await
        }
    }

    /// Game over: persist the result document, notify everyone, and
    /// schedule the in-memory purge.
    async fn end_game(self: Arc<Self>, session_id: Uuid) -> Result<(), GameError> {
        let handle = self.registry.get(session_id)?;
        let session = handle.lock().await;
        let has_agent = session.agent_slot().is_some();
        let document = build_result_document(
            &session,
            has_agent.then(|| self.agent.model()),
            if has_agent {
                self.agent.assistant_responses(session_id)
            } else {
                Vec::new()
            },
        );
        drop(session);

        if let Err(err) = self.sink.save(&document).await {
            // Data loss is preferable to a stuck session: keep cleaning up.
            error!(
                session_id = %session_id,
                error = %err,
                "failed to persist game results"
            );
        }

        self.hub.broadcast(
            &Topic::Session(session_id),
            ServerMsg::GameOver {
                final_results: document,
            },
        );
        self.agent.clear(session_id);
        info!(session_id = %session_id, "game over, purge scheduled");

        let delay = self.pacing.purge_delay;
        timers::spawn_purge(self, session_id, delay);
        Ok(())
    }

    /// Evict a session and everything indexed to it. Safe to call
    /// redundantly.
    pub async fn delete_session(&self, session_id: Uuid) {
        if let Ok(handle) = self.registry.get(session_id) {
            handle.lock().await.timers.cancel_all();
        }
        self.registry.remove(session_id);
        self.hub.drop_topic(&Topic::Session(session_id));
        self.agent.clear(session_id);
    }

    /// Decision countdown expiry: assign `KEEP` to every patient still
    /// undecided (the cooperation-favoring fallback) and force the round
    /// to finalize.
    pub async fn handle_decision_timeout(
        self: Arc<Self>,
        session_id: Uuid,
        round_number: u32,
    ) -> Result<(), GameError> {
        let handle = self.registry.get(session_id)?;
        let mut session = handle.lock().await;
        if session.current_round.round_number != round_number
            || !matches!(
                session.status,
                GameStatus::RoundDecision | GameStatus::RoundRevealing
            )
        {
            debug!(
                session_id = %session_id,
                round = round_number,
                "stale decision timeout discarded"
            );
            return Ok(());
        }

        let filled = session.auto_fill_undecided(Decision::Keep);
        warn!(
            session_id = %session_id,
            round = round_number,
            auto_assigned = ?filled,
            "decision phase timed out"
        );
        drop(session);

        self.try_finalize(session_id).await.map(drop)
    }

    /// Chat countdown expiry: close the transcript and open decisions.
    pub async fn handle_chat_timeout(
        self: Arc<Self>,
        session_id: Uuid,
        round_number: u32,
    ) -> Result<(), GameError> {
        let handle = self.registry.get(session_id)?;
        let mut session = handle.lock().await;
        if session.current_round.round_number != round_number
            || session.status != GameStatus::RoundChat
        {
            debug!(
                session_id = %session_id,
                round = round_number,
                "stale chat timeout discarded"
            );
            return Ok(());
        }
        session.timers.cancel(TimerPhase::Chat);
        let total_messages = session.current_round.chat_messages.len();
        drop(session);

        self.hub.broadcast(
            &Topic::Session(session_id),
            ServerMsg::ChatEnding {
                round_number,
                total_messages,
            },
        );
        self.enter_decision_phase(session_id).await
    }
}

fn round_brief(session: &Session) -> RoundBrief {
    RoundBrief {
        round_number: session.current_round.round_number,
        mode: session.mode,
        last_summary: prompts::last_round_summary(&session.round_history),
        prior_actions: match session.mode {
            GameMode::Sequential => session.prior_decisions_masked(),
            GameMode::Simultaneous => Vec::new(),
        },
    }
}
