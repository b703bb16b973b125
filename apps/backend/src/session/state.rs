//! Per-session round state machine.
//!
//! A [`Session`] owns all mutable state of one running game and enforces
//! legal transitions. It never performs I/O; the game-flow service drives
//! it from behind the registry's per-session lock and handles timers,
//! broadcasts, and the decision agent around it.

use std::time::Instant;

use serde::Serialize;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{
    draw_decision_order, is_bank_run, resolve_sequential, resolve_simultaneous, BySlot,
    ChatFrequency, ChatMessage, Decision, GameConfig, GameMode, GameStatus, PlayerProfile,
    RoundResult, SlotId, TimerPhase,
};
use crate::errors::GameError;

/// Agent-initiated chat lines allowed per round.
pub const MAX_AGENT_CHAT_PER_ROUND: u8 = 3;

/// One patient depositor slot.
#[derive(Debug, Clone)]
pub struct PatientSlot {
    pub name: String,
    /// Connection identity currently bound to this slot (None for agent
    /// slots and for disconnected humans).
    pub conn: Option<Uuid>,
    pub connected: bool,
    pub is_agent: bool,
    /// Persona used to condition agent prompts; agent slots only.
    pub profile: Option<PlayerProfile>,
}

impl PatientSlot {
    pub fn human(name: impl Into<String>, conn: Uuid) -> Self {
        Self {
            name: name.into(),
            conn: Some(conn),
            connected: true,
            is_agent: false,
            profile: None,
        }
    }

    pub fn agent(name: impl Into<String>, profile: PlayerProfile) -> Self {
        Self {
            name: name.into(),
            conn: None,
            connected: true,
            is_agent: true,
            profile: Some(profile),
        }
    }

    fn is_complete(&self) -> bool {
        !self.name.trim().is_empty() && (self.is_agent || self.conn.is_some())
    }
}

/// Live state of the round in flight. Reset at round start, retired into
/// history at finalize; never kept across rounds.
#[derive(Debug)]
pub struct CurrentRound {
    /// 1-based, monotonic within the session.
    pub round_number: u32,
    pub decisions: BySlot<Option<Decision>>,
    pub decision_offsets_ms: BySlot<Option<u64>>,
    pub decision_order: [SlotId; 3],
    /// Sequential mode: slots whose decisions have been broadcast.
    pub revealed: Vec<SlotId>,
    started_at: Option<Instant>,
    chat_started_at: Option<Instant>,
    pub chat_messages: Vec<ChatMessage>,
    agent_chat_count: u8,
}

impl CurrentRound {
    fn fresh(round_number: u32, decision_order: [SlotId; 3]) -> Self {
        Self {
            round_number,
            decisions: BySlot::splat(None),
            decision_offsets_ms: BySlot::splat(None),
            decision_order,
            revealed: Vec::new(),
            started_at: None,
            chat_started_at: None,
            chat_messages: Vec::new(),
            agent_chat_count: 0,
        }
    }
}

/// Cancellation handles for the phase countdowns of the current round.
///
/// A session must never carry two live timers for the same phase; `arm`
/// cancels any predecessor before storing the replacement.
#[derive(Debug, Default)]
pub struct PhaseTimers {
    chat: Option<CancellationToken>,
    decision: Option<CancellationToken>,
}

impl PhaseTimers {
    pub fn arm(&mut self, phase: TimerPhase, token: CancellationToken) {
        let slot = match phase {
            TimerPhase::Chat => &mut self.chat,
            TimerPhase::Decision => &mut self.decision,
        };
        if let Some(previous) = slot.replace(token) {
            previous.cancel();
        }
    }

    pub fn cancel(&mut self, phase: TimerPhase) {
        let slot = match phase {
            TimerPhase::Chat => &mut self.chat,
            TimerPhase::Decision => &mut self.decision,
        };
        if let Some(token) = slot.take() {
            token.cancel();
        }
    }

    pub fn cancel_all(&mut self) {
        self.cancel(TimerPhase::Chat);
        self.cancel(TimerPhase::Decision);
    }
}

/// One running game session.
#[derive(Debug)]
pub struct Session {
    pub session_id: Uuid,
    pub room_code: String,
    pub mode: GameMode,
    pub status: GameStatus,
    pub config: GameConfig,
    patient_one: PatientSlot,
    patient_two: PatientSlot,
    pub current_round: CurrentRound,
    pub round_history: Vec<RoundResult>,
    pub created_at: OffsetDateTime,
    pub started_at: Option<OffsetDateTime>,
    pub ended_at: Option<OffsetDateTime>,
    /// Issued at creation; a fresh connection presenting a slot's token
    /// reclaims that slot.
    reconnect_tokens: BySlot<Uuid>,
    pub timers: PhaseTimers,
}

impl Session {
    /// Create a session in `Starting` status.
    ///
    /// Fails if either patient descriptor is incomplete (blank name, or a
    /// human slot without a connection identity).
    pub fn new(
        room_code: impl Into<String>,
        mode: GameMode,
        patient_one: PatientSlot,
        patient_two: PatientSlot,
        config: GameConfig,
    ) -> Result<Self, GameError> {
        if !patient_one.is_complete() || !patient_two.is_complete() {
            return Err(GameError::validation(
                "patient descriptors must carry a name and, for humans, a connection",
            ));
        }

        let session_id = Uuid::new_v4();
        let room_code = room_code.into();
        info!(session_id = %session_id, room_code = %room_code, mode = ?mode, "session created");

        Ok(Self {
            session_id,
            room_code,
            mode,
            status: GameStatus::Starting,
            config,
            patient_one,
            patient_two,
            current_round: CurrentRound::fresh(1, SlotId::ALL),
            round_history: Vec::new(),
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            ended_at: None,
            reconnect_tokens: BySlot::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()),
            timers: PhaseTimers::default(),
        })
    }

    pub fn patient(&self, slot: SlotId) -> Option<&PatientSlot> {
        match slot {
            SlotId::PatientOne => Some(&self.patient_one),
            SlotId::PatientTwo => Some(&self.patient_two),
            SlotId::Automaton => None,
        }
    }

    pub fn patient_mut(&mut self, slot: SlotId) -> Option<&mut PatientSlot> {
        match slot {
            SlotId::PatientOne => Some(&mut self.patient_one),
            SlotId::PatientTwo => Some(&mut self.patient_two),
            SlotId::Automaton => None,
        }
    }

    pub fn reconnect_token(&self, slot: SlotId) -> Uuid {
        self.reconnect_tokens[slot]
    }

    /// The slot owned by a connection identity, if any.
    pub fn slot_of_conn(&self, conn: Uuid) -> Option<SlotId> {
        for slot in SlotId::PATIENTS {
            if self.patient(slot).and_then(|p| p.conn) == Some(conn) {
                return Some(slot);
            }
        }
        None
    }

    pub fn conn_of_slot(&self, slot: SlotId) -> Option<Uuid> {
        self.patient(slot).and_then(|p| p.conn)
    }

    /// The agent-controlled patient slot, if this session has one.
    pub fn agent_slot(&self) -> Option<SlotId> {
        SlotId::PATIENTS
            .into_iter()
            .find(|&slot| self.patient(slot).map(|p| p.is_agent).unwrap_or(false))
    }

    /// Whether this round opens with a chat phase.
    pub fn chat_this_round(&self) -> bool {
        self.config.chat_enabled
            && match self.config.chat_frequency {
                ChatFrequency::EveryRound => true,
                ChatFrequency::Once => self.current_round.round_number == 1,
            }
    }

    /// Reset round state and enter the first phase of the round.
    ///
    /// Draws a fresh decision-order permutation and records the automaton's
    /// unconditional `WITHDRAW` before anything else can touch the round.
    /// Callers must not invoke this twice for the same round.
    pub fn begin_round(&mut self) -> GameStatus {
        let round_number = self.current_round.round_number;
        let order = draw_decision_order();
        self.current_round = CurrentRound::fresh(round_number, order);

        // The automaton never waits: decided at offset zero, every round.
        self.current_round.decisions[SlotId::Automaton] = Some(Decision::Withdraw);
        self.current_round.decision_offsets_ms[SlotId::Automaton] = Some(0);

        if self.started_at.is_none() {
            self.started_at = Some(OffsetDateTime::now_utc());
        }

        if self.chat_this_round() {
            self.status = GameStatus::RoundChat;
            self.current_round.chat_started_at = Some(Instant::now());
        } else {
            self.status = GameStatus::RoundDecision;
            self.current_round.started_at = Some(Instant::now());
        }

        info!(
            session_id = %self.session_id,
            round = round_number,
            order = ?order,
            status = ?self.status,
            "round started"
        );
        self.status
    }

    /// Leave the chat phase and open the decision phase.
    pub fn begin_decision_phase(&mut self) -> Result<(), GameError> {
        if self.status != GameStatus::RoundChat {
            return Err(GameError::invalid_transition(format!(
                "cannot open decision phase from {:?}",
                self.status
            )));
        }
        self.status = GameStatus::RoundDecision;
        self.current_round.started_at = Some(Instant::now());
        Ok(())
    }

    /// Record a patient decision.
    ///
    /// Rejects submissions outside the decision statuses, duplicate
    /// submissions for an already-decided slot, and (sequential mode)
    /// submissions from any slot other than the next undecided one. None
    /// of the rejections mutate state. Returns the ms offset from round
    /// start recorded for analytics.
    pub fn submit_decision(
        &mut self,
        slot: SlotId,
        decision: Decision,
    ) -> Result<u64, GameError> {
        if !matches!(
            self.status,
            GameStatus::RoundDecision | GameStatus::RoundRevealing
        ) {
            return Err(GameError::invalid_transition(format!(
                "cannot submit decision in status {:?}",
                self.status
            )));
        }

        if self.current_round.decisions[slot].is_some() {
            return Err(GameError::invalid_transition(format!(
                "decision already recorded for {slot} in round {}",
                self.current_round.round_number
            )));
        }

        if self.mode == GameMode::Sequential && self.next_undecided_slot() != Some(slot) {
            return Err(GameError::not_your_turn(format!(
                "{slot} is not the next slot in the decision order"
            )));
        }

        let offset_ms = self
            .current_round
            .started_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        self.current_round.decisions[slot] = Some(decision);
        self.current_round.decision_offsets_ms[slot] = Some(offset_ms);

        info!(
            session_id = %self.session_id,
            round = self.current_round.round_number,
            slot = %slot,
            decision = %decision,
            offset_ms,
            "decision recorded"
        );
        Ok(offset_ms)
    }

    pub fn all_decided(&self) -> bool {
        SlotId::ALL
            .iter()
            .all(|&slot| self.current_round.decisions[slot].is_some())
    }

    /// Sequential helper: first slot in the decision order without a
    /// recorded decision.
    pub fn next_undecided_slot(&self) -> Option<SlotId> {
        self.current_round
            .decision_order
            .iter()
            .copied()
            .find(|&slot| self.current_round.decisions[slot].is_none())
    }

    /// Sequential helper: decisions already made this round, in order,
    /// without slot identity. Stops at the first undecided slot so the
    /// automaton's position is never leaked.
    pub fn prior_decisions_masked(&self) -> Vec<Decision> {
        let mut prior = Vec::new();
        for &slot in &self.current_round.decision_order {
            match self.current_round.decisions[slot] {
                Some(decision) => prior.push(decision),
                None => break,
            }
        }
        prior
    }

    /// Mark a slot's decision as revealed (sequential mode) and return its
    /// position in the decision order.
    pub fn mark_revealed(&mut self, slot: SlotId) -> usize {
        if !self.current_round.revealed.contains(&slot) {
            self.current_round.revealed.push(slot);
        }
        self.status = GameStatus::RoundRevealing;
        self.current_round
            .decision_order
            .iter()
            .position(|&s| s == slot)
            .unwrap_or(0)
    }

    /// Resolve payoffs, retire the round into history, enter `RoundResults`.
    ///
    /// Fails unless the round is in a decision status with all three
    /// slots decided, so two racing completion paths cannot finalize the
    /// same round twice.
    pub fn finalize_round(&mut self) -> Result<RoundResult, GameError> {
        if !matches!(
            self.status,
            GameStatus::RoundDecision | GameStatus::RoundRevealing
        ) {
            return Err(GameError::invalid_transition(format!(
                "cannot finalize in status {:?}",
                self.status
            )));
        }
        if !self.all_decided() {
            return Err(GameError::invalid_transition(format!(
                "round {} cannot finalize before all slots decide",
                self.current_round.round_number
            )));
        }

        let round_number = self.current_round.round_number;
        debug_assert_eq!(self.round_history.len() as u32, round_number - 1);

        let decisions = BySlot::new(
            self.current_round.decisions.patient_one.expect("checked"),
            self.current_round.decisions.patient_two.expect("checked"),
            self.current_round.decisions.automaton.expect("checked"),
        );

        let outcome = match self.mode {
            GameMode::Simultaneous => {
                // A fresh shuffle resolves simultaneity; no slot is privileged.
                let priority = draw_decision_order();
                resolve_simultaneous(&decisions, &self.config.payoffs, &priority)
            }
            GameMode::Sequential => resolve_sequential(
                &decisions,
                &self.current_round.decision_order,
                &self.config.payoffs,
            ),
        };

        let result = RoundResult {
            round: round_number,
            decisions,
            payoffs: outcome.payoffs,
            decision_order: self.current_round.decision_order,
            decision_offsets_ms: self.current_round.decision_offsets_ms,
            bank_run: is_bank_run(&decisions),
            paid_when: outcome.paid_when,
            seq_trace: outcome.seq_trace,
            chat_messages: if self.current_round.chat_messages.is_empty() {
                None
            } else {
                Some(self.current_round.chat_messages.clone())
            },
        };

        self.round_history.push(result.clone());
        self.status = GameStatus::RoundResults;

        info!(
            session_id = %self.session_id,
            round = round_number,
            payoffs = ?result.payoffs,
            bank_run = result.bank_run,
            "round finalized"
        );
        debug_assert_eq!(self.round_history.len() as u32, round_number);

        Ok(result)
    }

    /// Advance to the next round, or end the game.
    ///
    /// Returns true when another round should start; otherwise the session
    /// is in `GameOver` with its end time recorded.
    pub fn advance_round(&mut self) -> bool {
        if self.current_round.round_number >= self.config.total_rounds {
            self.status = GameStatus::GameOver;
            self.ended_at = Some(OffsetDateTime::now_utc());
            info!(
                session_id = %self.session_id,
                rounds = self.current_round.round_number,
                "game over"
            );
            return false;
        }
        self.current_round.round_number += 1;
        debug!(
            session_id = %self.session_id,
            round = self.current_round.round_number,
            "advancing to next round"
        );
        true
    }

    /// Timeout fallback: assign `decision` to every patient slot still
    /// undecided, walking the decision order so sequential semantics
    /// hold. No timestamp offset is recorded for auto-assigned
    /// decisions. Returns the slots filled.
    pub fn auto_fill_undecided(&mut self, decision: Decision) -> Vec<SlotId> {
        if !matches!(
            self.status,
            GameStatus::RoundDecision | GameStatus::RoundRevealing
        ) {
            return Vec::new();
        }
        let order = self.current_round.decision_order;
        let mut filled = Vec::new();
        for slot in order {
            if slot.is_patient() && self.current_round.decisions[slot].is_none() {
                self.current_round.decisions[slot] = Some(decision);
                filled.push(slot);
                info!(
                    session_id = %self.session_id,
                    round = self.current_round.round_number,
                    slot = %slot,
                    decision = %decision,
                    "decision auto-assigned on timeout"
                );
            }
        }
        filled
    }

    /// Append a chat line; legal only during the chat phase.
    pub fn push_chat(&mut self, slot: SlotId, text: String) -> Result<ChatMessage, GameError> {
        if self.status != GameStatus::RoundChat {
            return Err(GameError::invalid_transition(format!(
                "chat is closed in status {:?}",
                self.status
            )));
        }
        let offset_ms = self
            .current_round
            .chat_started_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let message = ChatMessage {
            slot,
            text,
            offset_ms,
        };
        self.current_round.chat_messages.push(message.clone());
        Ok(message)
    }

    /// Reserve one agent-initiated chat slot for this round; false once
    /// the per-round cap is reached.
    pub fn take_agent_chat_slot(&mut self) -> bool {
        if self.current_round.agent_chat_count >= MAX_AGENT_CHAT_PER_ROUND {
            return false;
        }
        self.current_round.agent_chat_count += 1;
        true
    }

    /// Rebind a slot to a fresh connection presenting its reconnection
    /// token.
    pub fn reconnect_with_token(&mut self, token: Uuid, conn: Uuid) -> Result<SlotId, GameError> {
        let slot = SlotId::PATIENTS
            .into_iter()
            .find(|&slot| self.reconnect_tokens[slot] == token)
            .ok_or_else(|| GameError::unauthorized("unknown reconnection token"))?;

        let patient = self.patient_mut(slot).expect("patient slot");
        patient.conn = Some(conn);
        patient.connected = true;
        info!(session_id = %self.session_id, slot = %slot, "slot reconnected");
        Ok(slot)
    }

    /// Flag the slot bound to this connection as disconnected.
    pub fn mark_disconnected(&mut self, conn: Uuid) -> Option<SlotId> {
        let slot = self.slot_of_conn(conn)?;
        if let Some(patient) = self.patient_mut(slot) {
            patient.connected = false;
            patient.conn = None;
        }
        Some(slot)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            room_code: self.room_code.clone(),
            mode: self.mode,
            status: self.status,
            config: self.config.clone(),
            round_number: self.current_round.round_number,
            players: PlayersView {
                patient_one: PatientView::from_slot(&self.patient_one),
                patient_two: PatientView::from_slot(&self.patient_two),
                automaton: AutomatonView {
                    always_withdraws: true,
                },
            },
            round_history: self.round_history.clone(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Timer tasks must not outlive the session they target.
        self.timers.cancel_all();
    }
}

/// Client-visible view of a session; excludes connection identities and
/// reconnection tokens.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub room_code: String,
    pub mode: GameMode,
    pub status: GameStatus,
    pub config: GameConfig,
    pub round_number: u32,
    pub players: PlayersView,
    pub round_history: Vec<RoundResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayersView {
    #[serde(rename = "patient-1")]
    pub patient_one: PatientView,
    #[serde(rename = "patient-2")]
    pub patient_two: PatientView,
    pub automaton: AutomatonView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientView {
    pub name: String,
    pub connected: bool,
    pub is_agent: bool,
}

impl PatientView {
    fn from_slot(slot: &PatientSlot) -> Self {
        Self {
            name: slot.name.clone(),
            connected: slot.connected,
            is_agent: slot.is_agent,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomatonView {
    pub always_withdraws: bool,
}
