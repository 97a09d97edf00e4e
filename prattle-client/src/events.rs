use std::sync::mpsc;

use prattle_core::{MessageKind, PeerId, ProfileSet};

use crate::session::SessionState;

/// Notifications delivered to the UI collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    ProfilesChanged(ProfileSet),
    /// Answer to a peer listing request: `(id, display name, unread)`.
    PeerList(Vec<(PeerId, String, bool)>),
    ProfileSubmitted { id: String },
    SessionStatus { generation: u64, state: SessionState },
    SessionReplaced { old: u64, new: u64 },
    SessionEnded { generation: u64, reason: String },
    IdentityAssigned(String),
    PeerAdded { id: PeerId, display_name: String },
    PeerRemoved { id: PeerId, was_focused: bool },
    FocusChanged { previous: Option<PeerId>, current: Option<PeerId> },
    MessageAppended {
        peer: PeerId,
        seq: u64,
        kind: MessageKind,
        payload: String,
        outbound: bool,
    },
    Prompt(String),
    RuntimeError(String),
}

/// Sending half used by every component; a dropped UI never fails the core.
#[derive(Debug, Clone)]
pub struct UiSink {
    tx: Option<mpsc::Sender<UiEvent>>,
}

impl UiSink {
    pub fn new(tx: mpsc::Sender<UiEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    pub fn channel() -> (Self, mpsc::Receiver<UiEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: UiEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
