use std::collections::HashMap;

use prattle_core::{MessageKind, PeerId};

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub seq: u64,
    pub direction: Direction,
    pub kind: MessageKind,
    pub payload: String,
    pub peer: PeerId,
}

/// Ordered messages exchanged with one peer.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    messages: Vec<Message>,
}

impl ConversationLog {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Per-peer logs sharing a single sequence counter.
///
/// The counter is never rewound, so a peer that is removed and re-added gets
/// an empty log whose sequence numbers are still above anything issued before.
#[derive(Debug)]
pub struct ConversationStore {
    logs: HashMap<PeerId, ConversationLog>,
    next_seq: u64,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            logs: HashMap::new(),
            next_seq: 1,
        }
    }

    /// Creates an empty log for `peer` unless one exists. Returns whether a
    /// log was created.
    pub fn open_log(&mut self, peer: &str) -> bool {
        if self.logs.contains_key(peer) {
            return false;
        }
        self.logs.insert(peer.to_owned(), ConversationLog::default());
        true
    }

    pub fn drop_log(&mut self, peer: &str) -> Option<ConversationLog> {
        self.logs.remove(peer)
    }

    pub fn append(
        &mut self,
        peer: &str,
        direction: Direction,
        kind: MessageKind,
        payload: String,
    ) -> Result<&Message, ClientError> {
        let log = self
            .logs
            .get_mut(peer)
            .ok_or_else(|| ClientError::PeerNotFound(peer.to_owned()))?;

        let seq = self.next_seq;
        self.next_seq += 1;
        log.messages.push(Message {
            seq,
            direction,
            kind,
            payload,
            peer: peer.to_owned(),
        });
        Ok(&log.messages[log.messages.len() - 1])
    }

    pub fn log(&self, peer: &str) -> Option<&ConversationLog> {
        self.logs.get(peer)
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}
