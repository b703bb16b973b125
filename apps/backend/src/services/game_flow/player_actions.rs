//! Player-facing entry points: room verbs, decisions, chat, reconnect
//! and disconnect handling.
//!
//! Inputs are validated and the caller's slot resolved from its
//! connection identity before the state machine is touched; rejected
//! calls never mutate session state.

use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info};
use uuid::Uuid;

use super::GameFlowService;
use crate::domain::{ChatMessage, Decision, GameMode, GameStatus, SlotId};
use crate::errors::GameError;
use crate::services::matchmaking::ROOM_CODE_LEN;
use crate::ws::hub::Topic;
use crate::ws::protocol::{ServerMsg, MAX_CHAT_LEN, MAX_NAME_LEN};

/// Chance that the agent answers a human chat line directly.
const AGENT_REPLY_PROBABILITY: f64 = 0.6;

impl GameFlowService {
    /// Open a waiting room and seat nobody; the creator joins explicitly.
    pub fn create_room(&self, conn: Uuid, mode: Option<GameMode>) -> String {
        let mode = mode.unwrap_or(self.defaults.mode);
        let code = self.matchmaker.create_room(mode);
        self.hub.subscribe(Topic::Room(code.clone()), conn);
        self.hub.send_to(
            conn,
            ServerMsg::RoomCreated {
                room_code: code.clone(),
            },
        );
        code
    }

    pub fn join_room(
        &self,
        conn: Uuid,
        room_code: &str,
        player_name: &str,
    ) -> Result<SlotId, GameError> {
        let name = player_name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(GameError::validation(format!(
                "player name must be 1-{MAX_NAME_LEN} characters"
            )));
        }
        if room_code.len() != ROOM_CODE_LEN {
            return Err(GameError::validation(format!(
                "room code must be exactly {ROOM_CODE_LEN} characters"
            )));
        }

        let (slot, players) = self.matchmaker.join_room(room_code, name, conn)?;
        let topic = Topic::Room(room_code.to_string());
        self.hub.subscribe(topic.clone(), conn);

        let joined = players.last().cloned();
        let full = players.len() == 2;
        self.hub.broadcast(
            &topic,
            ServerMsg::RoomJoined {
                room_code: room_code.to_string(),
                players,
            },
        );
        if let Some(player) = joined {
            self.hub
                .broadcast(&topic, ServerMsg::PlayerJoined { player });
        }
        if full {
            self.hub.broadcast(
                &topic,
                ServerMsg::RoomFull {
                    room_code: room_code.to_string(),
                },
            );
        }
        Ok(slot)
    }

    /// Unseat the caller from whatever room it waits in, if any.
    pub fn leave_room(&self, conn: Uuid) {
        if let Some((code, slot)) = self.matchmaker.leave_by_conn(conn) {
            let topic = Topic::Room(code);
            self.hub.unsubscribe(&topic, conn);
            self.hub.broadcast(&topic, ServerMsg::PlayerLeft { slot });
        }
    }

    /// Record a decision on behalf of the connection's slot.
    pub async fn submit_decision(
        self: Arc<Self>,
        conn: Uuid,
        session_id: Uuid,
        decision: Decision,
    ) -> Result<(), GameError> {
        let handle = self.registry.get(session_id)?;
        let mut session = handle.lock().await;
        let slot = session.slot_of_conn(conn).ok_or_else(|| {
            GameError::unauthorized("connection does not own a slot in this session")
        })?;
        session.submit_decision(slot, decision)?;
        let mode = session.mode;
        drop(session);

        self.hub.send_to(conn, ServerMsg::DecisionReceived { slot });

        match mode {
            // The walk reveals the new decision and hands the turn on.
            GameMode::Sequential => self.continue_sequence(session_id).await,
            GameMode::Simultaneous => self.try_finalize(session_id).await.map(drop),
        }
    }

    /// Append a chat line on behalf of the connection's slot.
    pub async fn submit_chat(
        self: Arc<Self>,
        conn: Uuid,
        session_id: Uuid,
        text: &str,
    ) -> Result<(), GameError> {
        let text = text.trim();
        if text.is_empty() || text.chars().count() > MAX_CHAT_LEN {
            return Err(GameError::validation(format!(
                "chat messages must be 1-{MAX_CHAT_LEN} characters"
            )));
        }

        let handle = self.registry.get(session_id)?;
        let mut session = handle.lock().await;
        let slot = session.slot_of_conn(conn).ok_or_else(|| {
            GameError::unauthorized("connection does not own a slot in this session")
        })?;
        let message = session.push_chat(slot, text.to_string())?;
        let round_number = session.current_round.round_number;
        let has_agent = session.agent_slot().is_some();
        drop(session);

        self.hub.broadcast(
            &Topic::Session(session_id),
            ServerMsg::ChatMessage {
                message: message.clone(),
            },
        );
        if has_agent {
            self.spawn_agent_chat(
                session_id,
                round_number,
                Some(message),
                AGENT_REPLY_PROBABILITY,
            );
        }
        Ok(())
    }

    /// Maybe produce an agent chat line, capped per round.
    ///
    /// Chat is cosmetic: the dice roll, the cap, and every failure all
    /// resolve to silence, never to an error.
    pub(super) fn spawn_agent_chat(
        self: Arc<Self>,
        session_id: Uuid,
        round_number: u32,
        incoming: Option<ChatMessage>,
        probability: f64,
    ) {
        if !rand::thread_rng().gen_bool(probability.clamp(0.0, 1.0)) {
            return;
        }

        tokio::spawn(async move {
            let Ok(handle) = self.registry.get(session_id) else {
                return;
            };
            let transcript = {
                let mut session = handle.lock().await;
                if session.status != GameStatus::RoundChat
                    || session.current_round.round_number != round_number
                    || session.agent_slot().is_none()
                {
                    return;
                }
                if !session.take_agent_chat_slot() {
                    debug!(
                        session_id = %session_id,
                        round = round_number,
                        "agent chat cap reached"
                    );
                    return;
                }
                session.current_round.chat_messages.clone()
            };

            let Some(line) = self
                .agent
                .chat_line(session_id, round_number, &transcript, incoming.as_ref())
                .await
            else {
                return;
            };

            // Re-enter under the lock; the chat phase may have closed
            // while the completion call was in flight.
            let Ok(handle) = self.registry.get(session_id) else {
                return;
            };
            let mut session = handle.lock().await;
            if session.status != GameStatus::RoundChat
                || session.current_round.round_number != round_number
            {
                debug!(
                    session_id = %session_id,
                    round = round_number,
                    "stale agent chat line discarded"
                );
                return;
            }
            let Some(slot) = session.agent_slot() else {
                return;
            };
            let Ok(message) = session.push_chat(slot, line) else {
                return;
            };
            drop(session);
            self.hub.broadcast(
                &Topic::Session(session_id),
                ServerMsg::ChatMessage { message },
            );
        });
    }

    /// Rebind a fresh connection to its slot using the join-time token.
    pub async fn reconnect(
        &self,
        conn: Uuid,
        session_id: Uuid,
        token: Uuid,
    ) -> Result<SlotId, GameError> {
        let handle = self.registry.get(session_id)?;
        let mut session = handle.lock().await;
        let slot = session.reconnect_with_token(token, conn)?;
        let snapshot = session.snapshot();
        drop(session);

        self.registry.bind_conn(conn, session_id);
        self.hub.subscribe(Topic::Session(session_id), conn);
        self.hub.broadcast(
            &Topic::Session(session_id),
            ServerMsg::PlayerReconnected {
                slot,
                session: snapshot,
            },
        );
        info!(session_id = %session_id, slot = %slot, "player reconnected");
        Ok(slot)
    }

    /// A connection went away: vacate its waiting-room seat, or flag its
    /// session slot as disconnected.
    ///
    /// The session keeps running; the decision countdown's auto-`KEEP`
    /// bounds the wait on a silent slot, and the token path restores it.
    pub async fn handle_disconnect(&self, conn: Uuid) {
        self.leave_room(conn);

        if let Some((session_id, handle)) = self.registry.find_by_conn(conn) {
            let mut session = handle.lock().await;
            if let Some(slot) = session.mark_disconnected(conn) {
                drop(session);
                self.registry.release_conn(conn);
                self.hub.broadcast(
                    &Topic::Session(session_id),
                    ServerMsg::PlayerDisconnected { slot },
                );
            }
        }
    }
}
