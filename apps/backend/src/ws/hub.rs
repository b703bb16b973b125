//! Connection fan-out hub.
//!
//! Connection actors register a `Recipient` at startup; the flow service
//! addresses them by topic (waiting room or running session) or
//! individually for slot-targeted events. Sends are fire-and-forget; a
//! closed mailbox just drops the event.

use actix::prelude::*;
use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct Outbound(pub ServerMsg);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Room(String),
    Session(Uuid),
}

#[derive(Default)]
pub struct SessionHub {
    conns: DashMap<Uuid, Recipient<Outbound>>,
    topics: DashMap<Topic, DashSet<Uuid>>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, conn_id: Uuid, recipient: Recipient<Outbound>) {
        self.conns.insert(conn_id, recipient);
    }

    /// Drop a connection and every topic membership it held.
    pub fn unregister(&self, conn_id: Uuid) {
        self.conns.remove(&conn_id);
        self.topics.retain(|_, members| {
            members.remove(&conn_id);
            !members.is_empty()
        });
    }

    pub fn subscribe(&self, topic: Topic, conn_id: Uuid) {
        self.topics
            .entry(topic)
            .or_insert_with(DashSet::new)
            .insert(conn_id);
    }

    pub fn unsubscribe(&self, topic: &Topic, conn_id: Uuid) {
        if let Some(members) = self.topics.get(topic) {
            members.remove(&conn_id);
        }
    }

    /// Forget a topic entirely (session purge, room deletion).
    pub fn drop_topic(&self, topic: &Topic) {
        self.topics.remove(topic);
    }

    pub fn broadcast(&self, topic: &Topic, msg: ServerMsg) {
        let Some(members) = self.topics.get(topic) else {
            return;
        };
        for conn_id in members.iter() {
            if let Some(recipient) = self.conns.get(&conn_id) {
                recipient.do_send(Outbound(msg.clone()));
            }
        }
    }

    pub fn send_to(&self, conn_id: Uuid, msg: ServerMsg) {
        if let Some(recipient) = self.conns.get(&conn_id) {
            recipient.do_send(Outbound(msg));
        }
    }
}
