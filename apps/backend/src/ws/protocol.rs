//! Realtime wire protocol.
//!
//! Tagged JSON messages both ways. Server events never leak slot identity
//! where the experiment masks it (`decision_revealed` carries decision and
//! position only).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{ChatMessage, ConfigOverrides, Decision, GameMode, RoundResult, SlotId, TimerPhase};
use crate::errors::GameError;
use crate::services::matchmaking::RoomPlayer;
use crate::services::storage::GameResultDocument;
use crate::session::SessionSnapshot;

/// Longest accepted chat line.
pub const MAX_CHAT_LEN: usize = 500;
/// Longest accepted display name.
pub const MAX_NAME_LEN: usize = 50;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    CreateRoom {
        /// Defaults to the configured experiment mode when omitted.
        mode: Option<GameMode>,
    },
    JoinRoom {
        room_code: String,
        player_name: String,
    },
    LeaveRoom {
        room_code: String,
    },
    StartGame {
        room_code: String,
        #[serde(default)]
        config: Option<ConfigOverrides>,
    },
    SubmitDecision {
        session_id: Uuid,
        decision: Decision,
    },
    SendChat {
        session_id: Uuid,
        message: String,
    },
    Reconnect {
        session_id: Uuid,
        token: Uuid,
    },
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    RoomCreated {
        room_code: String,
    },
    RoomJoined {
        room_code: String,
        players: Vec<RoomPlayer>,
    },
    PlayerJoined {
        player: RoomPlayer,
    },
    PlayerLeft {
        slot: SlotId,
    },
    RoomFull {
        room_code: String,
    },

    /// Sent to each human connection at game start; the token reclaims the
    /// slot after a reconnect.
    SessionCredentials {
        session_id: Uuid,
        slot: SlotId,
        reconnect_token: Uuid,
    },
    GameStarting {
        session: SessionSnapshot,
    },
    RoundStarting {
        round_number: u32,
    },
    TimerUpdate {
        phase: TimerPhase,
        duration_ms: u64,
        remaining_ms: u64,
    },
    DecisionReceived {
        slot: SlotId,
    },

    ChatStarting {
        round_number: u32,
        duration_secs: u64,
    },
    ChatMessage {
        message: ChatMessage,
    },
    ChatEnding {
        round_number: u32,
        total_messages: usize,
    },

    /// Sequential mode, delivered to the designated slot only.
    NextPlayerTurn {
        position: usize,
        prior_actions: Vec<Decision>,
    },
    /// Sequential mode, identity-masked.
    DecisionRevealed {
        decision: Decision,
        position: usize,
    },

    RoundComplete {
        results: RoundResult,
    },
    GameOver {
        final_results: GameResultDocument,
    },

    PlayerDisconnected {
        slot: SlotId,
    },
    PlayerReconnected {
        slot: SlotId,
        session: SessionSnapshot,
    },

    Error {
        code: String,
        message: String,
    },
}

impl ServerMsg {
    pub fn error(err: &GameError) -> Self {
        ServerMsg::Error {
            code: err.code().to_string(),
            message: err.detail().to_string(),
        }
    }
}
