//! Core vocabulary for the bank-run experiment: slots, decisions, modes,
//! session status, and the payoff/config tables shared by every layer.

use serde::{Deserialize, Serialize};

/// The three participant slots of a session.
///
/// Two patient depositors (human or agent controlled) and the scripted
/// automaton that always withdraws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotId {
    #[serde(rename = "patient-1")]
    PatientOne,
    #[serde(rename = "patient-2")]
    PatientTwo,
    #[serde(rename = "automaton")]
    Automaton,
}

impl SlotId {
    pub const ALL: [SlotId; 3] = [SlotId::PatientOne, SlotId::PatientTwo, SlotId::Automaton];
    pub const PATIENTS: [SlotId; 2] = [SlotId::PatientOne, SlotId::PatientTwo];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotId::PatientOne => "patient-1",
            SlotId::PatientTwo => "patient-2",
            SlotId::Automaton => "automaton",
        }
    }

    pub fn is_patient(&self) -> bool {
        !matches!(self, SlotId::Automaton)
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-slot value container with stable wire names.
///
/// Indexable by [`SlotId`] so callers never match on slots by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BySlot<T> {
    #[serde(rename = "patient-1")]
    pub patient_one: T,
    #[serde(rename = "patient-2")]
    pub patient_two: T,
    pub automaton: T,
}

impl<T> BySlot<T> {
    pub fn new(patient_one: T, patient_two: T, automaton: T) -> Self {
        Self {
            patient_one,
            patient_two,
            automaton,
        }
    }

    pub fn splat(value: T) -> Self
    where
        T: Clone,
    {
        Self {
            patient_one: value.clone(),
            patient_two: value.clone(),
            automaton: value,
        }
    }
}

impl<T> std::ops::Index<SlotId> for BySlot<T> {
    type Output = T;

    fn index(&self, slot: SlotId) -> &T {
        match slot {
            SlotId::PatientOne => &self.patient_one,
            SlotId::PatientTwo => &self.patient_two,
            SlotId::Automaton => &self.automaton,
        }
    }
}

impl<T> std::ops::IndexMut<SlotId> for BySlot<T> {
    fn index_mut(&mut self, slot: SlotId) -> &mut T {
        match slot {
            SlotId::PatientOne => &mut self.patient_one,
            SlotId::PatientTwo => &mut self.patient_two,
            SlotId::Automaton => &mut self.automaton,
        }
    }
}

/// The two per-round actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Keep,
    Withdraw,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Keep => "KEEP",
            Decision::Withdraw => "WITHDRAW",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    Simultaneous,
    Sequential,
}

/// Session progression statuses.
///
/// Monotonic except for the round loop:
/// `RoundChat`/`RoundDecision` -> `RoundResults` -> next round or `GameOver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    Lobby,
    Starting,
    RoundChat,
    RoundDecision,
    /// Sequential-only sub-phase: single decisions are being revealed.
    RoundRevealing,
    RoundResults,
    GameOver,
}

/// When a sequential payoff was assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaidWhen {
    Immediate,
    Deferred,
}

/// Which phase a countdown belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerPhase {
    Chat,
    Decision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChatFrequency {
    /// Chat phase only before round 1.
    Once,
    /// Chat phase before every round.
    EveryRound,
}

/// Per-round payoff parameters in ECUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payoffs {
    /// Paid to each patient when both patients keep.
    pub success: u32,
    /// Paid to each of the first two withdrawers.
    pub withdraw: u32,
    /// Paid to everyone else.
    pub failure: u32,
}

impl Default for Payoffs {
    fn default() -> Self {
        Self {
            success: 70,
            withdraw: 50,
            failure: 20,
        }
    }
}

/// Full per-session configuration, snapshotted at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameConfig {
    pub payoffs: Payoffs,
    pub total_rounds: u32,
    pub decision_timeout_ms: u64,
    pub mode: GameMode,
    pub chat_enabled: bool,
    /// Chat phase length in seconds (0-60).
    pub chat_duration_secs: u64,
    pub chat_frequency: ChatFrequency,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            payoffs: Payoffs::default(),
            total_rounds: 5,
            decision_timeout_ms: 30_000,
            mode: GameMode::Simultaneous,
            chat_enabled: false,
            chat_duration_secs: 30,
            chat_frequency: ChatFrequency::EveryRound,
        }
    }
}

/// Per-session config overrides accepted at game start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOverrides {
    pub total_rounds: Option<u32>,
    pub decision_timeout_ms: Option<u64>,
}

impl ConfigOverrides {
    pub fn apply(&self, base: &GameConfig) -> GameConfig {
        let mut config = base.clone();
        if let Some(total_rounds) = self.total_rounds {
            config.total_rounds = total_rounds;
        }
        if let Some(timeout) = self.decision_timeout_ms {
            config.decision_timeout_ms = timeout;
        }
        config
    }
}

/// Generated persona used to condition agent prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub gender: String,
    pub age_band: String,
    pub education: String,
    pub institutional_trust_0_10: u8,
}

/// One chat line, stamped as ms offset from chat-phase start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub slot: SlotId,
    pub text: String,
    pub offset_ms: u64,
}

/// Immutable snapshot of a completed round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    pub round: u32,
    pub decisions: BySlot<Decision>,
    pub payoffs: BySlot<u32>,
    pub decision_order: [SlotId; 3],
    /// Per-slot ms offsets from round start (None for auto-assigned decisions
    /// that never arrived from a connection).
    pub decision_offsets_ms: BySlot<Option<u64>>,
    /// True iff at least one patient withdrew.
    pub bank_run: bool,
    /// Sequential mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_when: Option<BySlot<PaidWhen>>,
    /// Human-readable trace of the sequential resolution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq_trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_messages: Option<Vec<ChatMessage>>,
}
