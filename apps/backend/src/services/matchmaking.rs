//! Waiting-room registry.
//!
//! Rooms are keyed by a short join code and only exist between creation
//! and game start: the flow service takes the room when the game begins
//! and the session owns the code from then on. Idle rooms expire after a
//! fixed timeout.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{GameMode, SlotId};
use crate::errors::GameError;

pub const ROOM_CODE_LEN: usize = 6;
const ROOM_TTL: Duration = Duration::from_secs(30 * 60);
const CROCKFORD: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ"; // no I, L, O, U

/// One seated player waiting for the game to start.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPlayer {
    pub slot: SlotId,
    pub name: String,
    #[serde(skip)]
    pub conn: Uuid,
}

#[derive(Debug)]
pub struct Room {
    pub code: String,
    pub mode: GameMode,
    pub players: Vec<RoomPlayer>,
    expiry: CancellationToken,
}

#[derive(Default)]
pub struct Matchmaker {
    /// Shared with the expiry tasks, which outlive any one borrow of self.
    rooms: Arc<DashMap<String, Room>>,
}

impl Matchmaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a room and schedule its idle expiry.
    pub fn create_room(&self, mode: GameMode) -> String {
        let code = self.generate_code();
        let expiry = CancellationToken::new();

        self.rooms.insert(
            code.clone(),
            Room {
                code: code.clone(),
                mode,
                players: Vec::new(),
                expiry: expiry.clone(),
            },
        );
        info!(room_code = %code, mode = ?mode, "room created");

        let rooms = Arc::clone(&self.rooms);
        let expiry_code = code.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = expiry.cancelled() => {}
                _ = tokio::time::sleep(ROOM_TTL) => {
                    if rooms.remove(&expiry_code).is_some() {
                        warn!(room_code = %expiry_code, "room expired while idle");
                    }
                }
            }
        });

        code
    }

    /// Seat a player; the first joiner is `patient-1`.
    pub fn join_room(
        &self,
        code: &str,
        name: impl Into<String>,
        conn: Uuid,
    ) -> Result<(SlotId, Vec<RoomPlayer>), GameError> {
        let mut room = self
            .rooms
            .get_mut(code)
            .ok_or_else(|| GameError::room_not_found(format!("room {code} does not exist")))?;

        if room.players.len() >= 2 {
            return Err(GameError::RoomFull(format!("room {code} is full")));
        }

        let slot = if room.players.is_empty() {
            SlotId::PatientOne
        } else {
            SlotId::PatientTwo
        };
        let player = RoomPlayer {
            slot,
            name: name.into(),
            conn,
        };
        info!(room_code = %code, slot = %slot, name = %player.name, "player joined room");
        room.players.push(player);

        Ok((slot, room.players.clone()))
    }

    /// Unseat whichever player owns this connection; empty rooms are
    /// deleted. Returns the room code and vacated slot if anything changed.
    pub fn leave_by_conn(&self, conn: Uuid) -> Option<(String, SlotId)> {
        let mut vacated = None;
        for mut entry in self.rooms.iter_mut() {
            if let Some(idx) = entry.players.iter().position(|p| p.conn == conn) {
                let player = entry.players.remove(idx);
                vacated = Some((entry.code.clone(), player.slot));
                break;
            }
        }

        if let Some((code, slot)) = &vacated {
            debug!(room_code = %code, slot = %slot, "player left room");
            let empty = self
                .rooms
                .get(code)
                .map(|room| room.players.is_empty())
                .unwrap_or(false);
            if empty {
                self.delete_room(code);
            }
        }
        vacated
    }

    pub fn players(&self, code: &str) -> Result<Vec<RoomPlayer>, GameError> {
        self.rooms
            .get(code)
            .map(|room| room.players.clone())
            .ok_or_else(|| GameError::room_not_found(format!("room {code} does not exist")))
    }

    /// Remove and return the room at game start; the session takes over
    /// its code from here.
    pub fn take_room(&self, code: &str) -> Result<Room, GameError> {
        let (_, room) = self
            .rooms
            .remove(code)
            .ok_or_else(|| GameError::room_not_found(format!("room {code} does not exist")))?;
        room.expiry.cancel();
        Ok(room)
    }

    pub fn delete_room(&self, code: &str) {
        if let Some((_, room)) = self.rooms.remove(code) {
            room.expiry.cancel();
            info!(room_code = %code, "room deleted");
        }
    }

    fn generate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..ROOM_CODE_LEN)
                .map(|_| CROCKFORD[rng.gen_range(0..CROCKFORD.len())] as char)
                .collect();
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn codes_use_crockford_alphabet() {
        let matchmaker = Arc::new(Matchmaker::new());
        let code = matchmaker.create_room(GameMode::Simultaneous);
        assert_eq!(code.len(), ROOM_CODE_LEN);
        assert!(code.bytes().all(|b| CROCKFORD.contains(&b)));
    }

    #[tokio::test]
    async fn join_assigns_slots_in_order_and_caps_at_two() {
        let matchmaker = Arc::new(Matchmaker::new());
        let code = matchmaker.create_room(GameMode::Simultaneous);

        let (first, _) = matchmaker.join_room(&code, "Ana", Uuid::new_v4()).unwrap();
        let (second, players) = matchmaker.join_room(&code, "Ben", Uuid::new_v4()).unwrap();
        assert_eq!(first, SlotId::PatientOne);
        assert_eq!(second, SlotId::PatientTwo);
        assert_eq!(players.len(), 2);

        let err = matchmaker
            .join_room(&code, "Cara", Uuid::new_v4())
            .unwrap_err();
        assert!(matches!(err, GameError::RoomFull(_)));
    }

    #[tokio::test]
    async fn join_unknown_room_fails() {
        let matchmaker = Arc::new(Matchmaker::new());
        assert!(matches!(
            matchmaker
                .join_room("ZZZZZZ", "Ana", Uuid::new_v4())
                .unwrap_err(),
            GameError::RoomNotFound(_)
        ));
    }

    #[tokio::test]
    async fn last_player_leaving_deletes_room() {
        let matchmaker = Arc::new(Matchmaker::new());
        let code = matchmaker.create_room(GameMode::Sequential);
        let conn = Uuid::new_v4();
        matchmaker.join_room(&code, "Ana", conn).unwrap();

        let (left_code, slot) = matchmaker.leave_by_conn(conn).unwrap();
        assert_eq!(left_code, code);
        assert_eq!(slot, SlotId::PatientOne);
        assert!(matchmaker.players(&code).is_err());
    }

    #[tokio::test]
    async fn take_room_hands_off_and_removes() {
        let matchmaker = Arc::new(Matchmaker::new());
        let code = matchmaker.create_room(GameMode::Simultaneous);
        matchmaker.join_room(&code, "Ana", Uuid::new_v4()).unwrap();

        let room = matchmaker.take_room(&code).unwrap();
        assert_eq!(room.players.len(), 1);
        assert!(matchmaker.take_room(&code).is_err());
    }
}
