use prattle_core::{
    Command, CommandPayload, CoreError, FilePayload, Frame, Header, MessageKind, PeerId,
    classify_content, unknown_peer_name,
};
use tracing::{debug, info, warn};

use crate::{
    conversation::{ConversationStore, Direction},
    error::ClientError,
    events::{UiEvent, UiSink},
    registry::{ConversationView, PeerRecord, PeerRegistry},
    session::SessionHandle,
};

/// Result of routing one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Handled,
    Dropped,
    /// A control command addressed to the session rather than a peer.
    Control(Command),
}

/// Dispatches inbound frames to the registry and conversation store, and
/// turns user send actions into outbound frames.
#[derive(Debug)]
pub struct Router {
    registry: PeerRegistry,
    conversations: ConversationStore,
    identity: Option<String>,
    ui: UiSink,
}

impl Router {
    pub fn new(view: Box<dyn ConversationView>, ui: UiSink) -> Self {
        Self {
            registry: PeerRegistry::new(view),
            conversations: ConversationStore::new(),
            identity: None,
            ui,
        }
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn handle_inbound(&mut self, frame: Frame) -> Result<Routed, ClientError> {
        debug!(header = %frame.header, id = %frame.id, "inbound frame");
        match frame.header {
            Header::Command => self.handle_command(&frame),
            Header::IdentityAssigned => {
                let identity = frame.content_str()?.to_owned();
                info!(identity = %identity, "identity assigned");
                self.identity = Some(identity.clone());
                self.ui.emit(UiEvent::IdentityAssigned(identity));
                Ok(Routed::Handled)
            }
            Header::ChatMessage | Header::File | Header::Dir | Header::DirLite => {
                self.handle_incoming_message(&frame)
            }
            Header::SelectedProfile | Header::NewProfileList | Header::ProfileList | Header::Join => {
                warn!(header = %frame.header, "control-channel frame on session channel dropped");
                Ok(Routed::Dropped)
            }
        }
    }

    fn handle_command(&mut self, frame: &Frame) -> Result<Routed, ClientError> {
        match frame.command_payload()? {
            CommandPayload::Control(command) => Ok(Routed::Control(command)),
            CommandPayload::PeerAnnounced { display_name } => {
                let id = peer_id_of(frame)?;
                self.ensure_peer(&id, &display_name);
                Ok(Routed::Handled)
            }
            CommandPayload::PeerLeft => {
                let id = peer_id_of(frame)?;
                let was_focused = self.registry.is_focused(&id);
                if self.registry.remove_peer(&id).is_none() {
                    return Ok(Routed::Dropped);
                }
                self.conversations.drop_log(&id);
                if was_focused {
                    self.ui.emit(UiEvent::FocusChanged {
                        previous: Some(id.clone()),
                        current: None,
                    });
                }
                self.ui.emit(UiEvent::PeerRemoved { id, was_focused });
                Ok(Routed::Handled)
            }
        }
    }

    fn handle_incoming_message(&mut self, frame: &Frame) -> Result<Routed, ClientError> {
        let Some(kind) = MessageKind::from_header(frame.header) else {
            return Ok(Routed::Dropped);
        };
        let id = peer_id_of(frame)?;
        let payload = match kind {
            MessageKind::File => FilePayload::from_value(&frame.content)
                .map(|payload| payload.describe())
                .ok_or_else(|| CoreError::InvalidContent {
                    header: frame.header,
                    reason: "expected a path or file group".to_owned(),
                })?,
            _ => frame.content_str()?.to_owned(),
        };

        // Unsolicited messages get a placeholder peer rather than being lost.
        if !self.registry.contains(&id) {
            self.ensure_peer(&id, &unknown_peer_name(&id));
        }

        let message = self.conversations.append(&id, Direction::In, kind, payload)?;
        let (seq, payload) = (message.seq, message.payload.clone());
        if !self.registry.is_focused(&id) {
            self.registry.mark_unread(&id);
        }
        self.ui.emit(UiEvent::MessageAppended {
            peer: id,
            seq,
            kind,
            payload,
            outbound: false,
        });
        Ok(Routed::Handled)
    }

    fn ensure_peer(&mut self, id: &str, display_name: &str) {
        let (record, inserted) = self.registry.add_peer(id, display_name);
        if inserted {
            let display_name = record.display_name.clone();
            self.conversations.open_log(id);
            self.ui.emit(UiEvent::PeerAdded {
                id: id.to_owned(),
                display_name,
            });
        }
    }

    /// Focuses `id` and asks the core to prioritise that peer.
    pub fn focus(&mut self, session: &SessionHandle, id: &str) -> Result<&PeerRecord, ClientError> {
        if !self.registry.contains(id) {
            return Err(ClientError::PeerNotFound(id.to_owned()));
        }
        session.send(Frame::command(Command::ConnectUser, id))?;

        let previous = self.registry.current_focus().map(str::to_owned);
        let record = self.registry.set_focus(id)?;
        if previous.as_deref() != Some(id) {
            self.ui.emit(UiEvent::FocusChanged {
                previous,
                current: Some(id.to_owned()),
            });
        }
        Ok(record)
    }

    /// Classifies and sends composer input to the focused peer.
    ///
    /// Returns the sequence number of the logged outbound message, or `None`
    /// when the input was empty.
    pub fn send(
        &mut self,
        session: &SessionHandle,
        raw: &str,
        light_mode: bool,
    ) -> Result<Option<u64>, ClientError> {
        let Some(content) = classify_content(raw, light_mode) else {
            return Ok(None);
        };
        let Some(peer) = self.registry.current_focus().map(str::to_owned) else {
            return Err(ClientError::NoPeerSelected);
        };

        session.send(content.to_frame(&peer))?;

        let kind = content.kind();
        let payload = content.payload().to_owned();
        let seq = self
            .conversations
            .append(&peer, Direction::Out, kind, payload.clone())?
            .seq;
        self.ui.emit(UiEvent::MessageAppended {
            peer,
            seq,
            kind,
            payload,
            outbound: true,
        });
        Ok(Some(seq))
    }

    pub fn sync_users(&self, session: &SessionHandle) -> Result<(), ClientError> {
        session.send(Frame::command(Command::SyncUsers, ""))
    }

    pub fn focused_peer(&self) -> Option<PeerId> {
        self.registry.current_focus().map(str::to_owned)
    }

    /// Known peers sorted by id, as `(id, display name, unread)`.
    pub fn peer_summary(&self) -> Vec<(PeerId, String, bool)> {
        let mut peers: Vec<_> = self
            .registry
            .peers()
            .map(|record| (record.id.clone(), record.display_name.clone(), record.has_unread))
            .collect();
        peers.sort();
        peers
    }
}

/// Peer ids are opaque; only a blank id is rejected.
fn peer_id_of(frame: &Frame) -> Result<PeerId, ClientError> {
    if frame.id.trim().is_empty() {
        return Err(CoreError::InvalidContent {
            header: frame.header,
            reason: "missing peer id".to_owned(),
        }
        .into());
    }
    Ok(frame.id.clone())
}
