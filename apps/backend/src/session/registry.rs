//! In-memory session registry.
//!
//! Sessions are independently mutable units: the registry hands out
//! `Arc<Mutex<Session>>` handles so unrelated sessions never contend on a
//! shared lock, and every mutation of a given session serializes through
//! its own mutex (single-writer discipline). Connection and room-code
//! indexes resolve inbound traffic to a session without touching the
//! session lock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::errors::GameError;
use crate::session::state::Session;

pub type SessionHandle = Arc<Mutex<Session>>;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionHandle>,
    /// Connection identity -> session id.
    conn_index: DashMap<Uuid, Uuid>,
    /// Room code -> session id.
    room_index: DashMap<String, Uuid>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly created session and index its connections.
    pub fn insert(&self, session: Session) -> SessionHandle {
        let session_id = session.session_id;
        let room_code = session.room_code.clone();
        let conns: Vec<Uuid> = crate::domain::SlotId::PATIENTS
            .iter()
            .filter_map(|&slot| session.conn_of_slot(slot))
            .collect();

        let handle: SessionHandle = Arc::new(Mutex::new(session));
        self.sessions.insert(session_id, handle.clone());
        self.room_index.insert(room_code, session_id);
        for conn in conns {
            self.conn_index.insert(conn, session_id);
        }
        handle
    }

    pub fn get(&self, session_id: Uuid) -> Result<SessionHandle, GameError> {
        self.sessions
            .get(&session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GameError::session_not_found(format!("unknown session {session_id}")))
    }

    pub fn find_by_conn(&self, conn: Uuid) -> Option<(Uuid, SessionHandle)> {
        let session_id = *self.conn_index.get(&conn)?.value();
        let handle = self.sessions.get(&session_id)?.value().clone();
        Some((session_id, handle))
    }

    pub fn find_by_room(&self, room_code: &str) -> Option<(Uuid, SessionHandle)> {
        let session_id = *self.room_index.get(room_code)?.value();
        let handle = self.sessions.get(&session_id)?.value().clone();
        Some((session_id, handle))
    }

    /// Index a (re)bound connection.
    pub fn bind_conn(&self, conn: Uuid, session_id: Uuid) {
        self.conn_index.insert(conn, session_id);
    }

    pub fn release_conn(&self, conn: Uuid) {
        self.conn_index.remove(&conn);
    }

    /// Drop a session and every index entry pointing at it.
    /// Safe to call redundantly.
    pub fn remove(&self, session_id: Uuid) {
        if self.sessions.remove(&session_id).is_some() {
            info!(session_id = %session_id, "session evicted from registry");
        }
        self.room_index
            .retain(|_, indexed| *indexed != session_id);
        self.conn_index
            .retain(|_, indexed| *indexed != session_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GameConfig, GameMode, SlotId};
    use crate::session::state::PatientSlot;

    fn sample_session() -> Session {
        Session::new(
            "ABC123",
            GameMode::Simultaneous,
            PatientSlot::human("Ana", Uuid::new_v4()),
            PatientSlot::human("Ben", Uuid::new_v4()),
            GameConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn insert_indexes_connections_and_room() {
        let registry = SessionRegistry::new();
        let session = sample_session();
        let session_id = session.session_id;
        let conn = session.conn_of_slot(SlotId::PatientOne).unwrap();

        registry.insert(session);

        assert!(registry.get(session_id).is_ok());
        let (found, _) = registry.find_by_conn(conn).unwrap();
        assert_eq!(found, session_id);
        let (by_room, _) = registry.find_by_room("ABC123").unwrap();
        assert_eq!(by_room, session_id);
    }

    #[tokio::test]
    async fn unknown_session_is_session_not_found() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.get(Uuid::new_v4()).unwrap_err(),
            GameError::SessionNotFound(_)
        ));
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_clears_indexes() {
        let registry = SessionRegistry::new();
        let session = sample_session();
        let session_id = session.session_id;
        let conn = session.conn_of_slot(SlotId::PatientTwo).unwrap();
        registry.insert(session);

        registry.remove(session_id);
        registry.remove(session_id);

        assert!(registry.get(session_id).is_err());
        assert!(registry.find_by_conn(conn).is_none());
        assert!(registry.find_by_room("ABC123").is_none());
        assert!(registry.is_empty());
    }
}
