use std::collections::HashMap;

use prattle_core::PeerId;
use tracing::{debug, info, warn};

use crate::error::ClientError;

/// Opaque reference to the rendering layer's conversation surface for a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewHandle(u64);

impl ViewHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Rendering seam injected into the registry. Routing never reads from it.
pub trait ConversationView: Send {
    fn attach(&mut self, peer: &str, display_name: &str) -> ViewHandle;
    fn show(&mut self, view: ViewHandle);
    fn hide(&mut self, view: ViewHandle);
    /// Replace the surface content with a "peer lost" placeholder.
    fn peer_lost(&mut self, view: ViewHandle);
    fn detach(&mut self, view: ViewHandle);
}

/// A view that only hands out handles; used when nothing renders.
#[derive(Debug, Default)]
pub struct HeadlessView {
    next: u64,
}

impl ConversationView for HeadlessView {
    fn attach(&mut self, _peer: &str, _display_name: &str) -> ViewHandle {
        self.next += 1;
        ViewHandle(self.next)
    }

    fn show(&mut self, _view: ViewHandle) {}

    fn hide(&mut self, _view: ViewHandle) {}

    fn peer_lost(&mut self, _view: ViewHandle) {}

    fn detach(&mut self, _view: ViewHandle) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub id: PeerId,
    pub display_name: String,
    pub has_unread: bool,
    pub view: ViewHandle,
}

pub struct PeerRegistry {
    peers: HashMap<PeerId, PeerRecord>,
    focus: Option<PeerId>,
    view: Box<dyn ConversationView>,
}

impl std::fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("peers", &self.peers)
            .field("focus", &self.focus)
            .finish_non_exhaustive()
    }
}

impl PeerRegistry {
    pub fn new(view: Box<dyn ConversationView>) -> Self {
        Self {
            peers: HashMap::new(),
            focus: None,
            view,
        }
    }

    /// Registers `id`, or returns the existing record untouched. The bool is
    /// true when a record was created.
    pub fn add_peer(&mut self, id: &str, display_name: &str) -> (&PeerRecord, bool) {
        let inserted = !self.peers.contains_key(id);
        if inserted {
            let view = self.view.attach(id, display_name);
            info!(peer = %id, display_name, "peer added");
            self.peers.insert(
                id.to_owned(),
                PeerRecord {
                    id: id.to_owned(),
                    display_name: display_name.to_owned(),
                    has_unread: false,
                    view,
                },
            );
        } else {
            debug!(peer = %id, "duplicate peer announcement ignored");
        }

        (&self.peers[id], inserted)
    }

    /// Drops `id`. A missing peer is logged and ignored.
    pub fn remove_peer(&mut self, id: &str) -> Option<PeerRecord> {
        let Some(record) = self.peers.remove(id) else {
            warn!(peer = %id, "remove for unknown peer ignored");
            return None;
        };

        if self.focus.as_deref() == Some(id) {
            self.focus = None;
            self.view.peer_lost(record.view);
        }
        self.view.detach(record.view);
        info!(peer = %id, "peer removed");
        Some(record)
    }

    /// Focuses `id`, hiding the previously focused surface. Clears unread.
    pub fn set_focus(&mut self, id: &str) -> Result<&PeerRecord, ClientError> {
        if !self.peers.contains_key(id) {
            return Err(ClientError::PeerNotFound(id.to_owned()));
        }

        if self.focus.as_deref() != Some(id) {
            if let Some(previous) = self.focus.take()
                && let Some(record) = self.peers.get(&previous)
            {
                self.view.hide(record.view);
            }
            self.focus = Some(id.to_owned());
        }

        let record = self
            .peers
            .get_mut(id)
            .ok_or_else(|| ClientError::PeerNotFound(id.to_owned()))?;
        record.has_unread = false;
        self.view.show(record.view);
        Ok(record)
    }

    pub fn current_focus(&self) -> Option<&str> {
        self.focus.as_deref()
    }

    pub fn is_focused(&self, id: &str) -> bool {
        self.focus.as_deref() == Some(id)
    }

    pub fn mark_unread(&mut self, id: &str) {
        if let Some(record) = self.peers.get_mut(id) {
            record.has_unread = true;
        }
    }

    pub fn get(&self, id: &str) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }
}
