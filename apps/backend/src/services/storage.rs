//! Write-only result persistence.
//!
//! At game end the core emits one immutable document describing the whole
//! session. The core never reads the store back; a save failure is logged
//! by the caller and must not prevent in-memory cleanup.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::domain::{BySlot, GameMode, PlayerProfile, RoundResult, SlotId};
use crate::error::AppError;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerKind {
    Human,
    Agent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientProfiles {
    #[serde(rename = "patient-1", skip_serializing_if = "Option::is_none")]
    pub patient_one: Option<PlayerProfile>,
    #[serde(rename = "patient-2", skip_serializing_if = "Option::is_none")]
    pub patient_two: Option<PlayerProfile>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Completion model identifier, present when a patient slot was
    /// agent-controlled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Raw agent turns, in order.
    pub agent_responses: Vec<String>,
    pub player_profiles: PatientProfiles,
}

/// The immutable game-end document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameResultDocument {
    pub game_id: Uuid,
    pub room_code: String,
    pub mode: GameMode,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    pub chat_enabled: bool,
    pub rounds: Vec<RoundResult>,
    pub total_payoffs: BySlot<u32>,
    /// Classification of the two patient slots, in slot order.
    pub player_types: [PlayerKind; 2],
    pub session_metadata: SessionMetadata,
}

/// Build the result document from a finished session.
///
/// `agent_model`/`agent_responses` come from the decision agent when the
/// session had an agent-controlled slot.
pub fn build_result_document(
    session: &Session,
    agent_model: Option<String>,
    agent_responses: Vec<String>,
) -> GameResultDocument {
    let mut total_payoffs = BySlot::splat(0u32);
    for round in &session.round_history {
        for slot in SlotId::ALL {
            total_payoffs[slot] += round.payoffs[slot];
        }
    }

    let kind_of = |slot: SlotId| -> PlayerKind {
        match session.patient(slot).map(|p| p.is_agent) {
            Some(true) => PlayerKind::Agent,
            _ => PlayerKind::Human,
        }
    };

    GameResultDocument {
        game_id: session.session_id,
        room_code: session.room_code.clone(),
        mode: session.mode,
        created_at: session.created_at,
        ended_at: session.ended_at,
        chat_enabled: session.config.chat_enabled,
        rounds: session.round_history.clone(),
        total_payoffs,
        player_types: [kind_of(SlotId::PatientOne), kind_of(SlotId::PatientTwo)],
        session_metadata: SessionMetadata {
            model: agent_model,
            agent_responses,
            player_profiles: PatientProfiles {
                patient_one: session
                    .patient(SlotId::PatientOne)
                    .and_then(|p| p.profile.clone()),
                patient_two: session
                    .patient(SlotId::PatientTwo)
                    .and_then(|p| p.profile.clone()),
            },
        },
    }
}

/// Storage seam: the core only ever writes.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn save(&self, document: &GameResultDocument) -> Result<(), AppError>;
}

/// Writes one pretty-printed JSON file per game under a base directory.
pub struct FileResultSink {
    dir: PathBuf,
}

impl FileResultSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ResultSink for FileResultSink {
    async fn save(&self, document: &GameResultDocument) -> Result<(), AppError> {
        let encoded = serde_json::to_vec_pretty(document)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}.json", document.game_id));
        tokio::fs::write(&path, encoded).await?;
        info!(game_id = %document.game_id, path = %path.display(), "game results saved");
        Ok(())
    }
}

/// Collects documents in memory; test double and no-op stand-in.
#[derive(Default)]
pub struct MemoryResultSink {
    documents: parking_lot::Mutex<Vec<GameResultDocument>>,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> Vec<GameResultDocument> {
        self.documents.lock().clone()
    }
}

#[async_trait]
impl ResultSink for MemoryResultSink {
    async fn save(&self, document: &GameResultDocument) -> Result<(), AppError> {
        self.documents.lock().push(document.clone());
        Ok(())
    }
}
