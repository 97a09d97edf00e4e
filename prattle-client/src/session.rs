use std::{fmt, future::Future};

use prattle_core::{Command, CoreError, Frame, Header, Profile};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    error::ClientError,
    events::{UiEvent, UiSink},
};

pub type FrameSink = mpsc::UnboundedSender<Frame>;
pub type FrameStream = mpsc::UnboundedReceiver<Frame>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Both directions of an established channel.
#[derive(Debug)]
pub struct Channel {
    pub outbound: FrameSink,
    pub inbound: FrameStream,
}

/// Opens channels to an address. The websocket implementation lives in
/// [`crate::transport`].
pub trait Transport {
    fn connect(&self, address: &str)
    -> impl Future<Output = Result<Channel, ClientError>> + Send;
}

/// The single active session channel. Once closed it is never reused.
#[derive(Debug)]
pub struct SessionHandle {
    generation: u64,
    state: SessionState,
    outbound: Option<FrameSink>,
}

impl SessionHandle {
    fn open(generation: u64, outbound: FrameSink) -> Self {
        Self {
            generation,
            state: SessionState::Open,
            outbound: Some(outbound),
        }
    }

    #[cfg(test)]
    pub(crate) fn detached(generation: u64) -> (Self, FrameStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::open(generation, tx), rx)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn send(&self, frame: Frame) -> Result<(), ClientError> {
        if !self.is_open() {
            return Err(ClientError::SessionClosed);
        }
        let outbound = self.outbound.as_ref().ok_or(ClientError::SessionClosed)?;
        outbound
            .send(frame)
            .map_err(|_| ClientError::ChannelFailure("session channel writer is gone".to_owned()))
    }

    /// Last write while `Closing`; skips the open-state check.
    fn send_closing(&self, frame: Frame) -> Result<(), ClientError> {
        let outbound = self.outbound.as_ref().ok_or(ClientError::SessionClosed)?;
        outbound
            .send(frame)
            .map_err(|_| ClientError::ChannelFailure("session channel writer is gone".to_owned()))
    }

    /// Moves the handle to `Closed` and releases the writer. Returns false if
    /// it was already closed.
    pub fn shutdown(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;
        self.outbound = None;
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectorOptions {
    /// Fixed session endpoint; when unset the chosen profile's server is used.
    pub session_address: Option<String>,
    pub send_join: bool,
}

/// Owns the session channel lifecycle: `Idle → Connecting → Open → Closing → Closed`.
#[derive(Debug)]
pub struct SessionConnector<T> {
    transport: T,
    options: ConnectorOptions,
    state: SessionState,
    active: Option<SessionHandle>,
    next_generation: u64,
    ui: UiSink,
}

impl<T: Transport> SessionConnector<T> {
    pub fn new(transport: T, options: ConnectorOptions, ui: UiSink) -> Self {
        Self {
            transport,
            options,
            state: SessionState::Idle,
            active: None,
            next_generation: 1,
            ui,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn active(&self) -> Option<&SessionHandle> {
        self.active.as_ref()
    }

    pub fn open_handle(&self) -> Result<&SessionHandle, ClientError> {
        self.active
            .as_ref()
            .filter(|handle| handle.is_open())
            .ok_or(ClientError::SessionClosed)
    }

    pub fn resolve_address(&self, profile: &Profile) -> String {
        self.options
            .session_address
            .clone()
            .unwrap_or_else(|| profile.server.websocket_url())
    }

    /// Connects a new session channel for `profile` and returns its inbound
    /// frames. On failure the connector is left `Idle`. An open session must
    /// be closed first.
    pub async fn open(&mut self, profile: &Profile) -> Result<FrameStream, ClientError> {
        if let Ok(current) = self.open_handle() {
            warn!(generation = current.generation(), "open refused while a session is open");
            return Err(ClientError::SessionAlreadyOpen);
        }
        self.active = None;

        let generation = self.next_generation;
        self.next_generation += 1;
        let address = self.resolve_address(profile);
        self.set_state(generation, SessionState::Connecting);
        info!(generation, address = %address, profile = %profile.id, "opening session");

        let channel = match self.transport.connect(&address).await {
            Ok(channel) => channel,
            Err(err) => {
                error!(generation, address = %address, "session connect failed: {err}");
                self.set_state(generation, SessionState::Idle);
                return Err(err);
            }
        };

        let handle = SessionHandle::open(generation, channel.outbound);
        if self.options.send_join {
            let sent = serde_json::to_value(profile)
                .map_err(|err| ClientError::from(CoreError::Serialization(err.to_string())))
                .and_then(|content| handle.send(Frame::new(Header::Join, content, "")));
            if let Err(err) = sent {
                error!(generation, "join frame could not be queued: {err}");
                self.set_state(generation, SessionState::Idle);
                return Err(err);
            }
            debug!(generation, "join queued");
        }

        self.active = Some(handle);
        self.set_state(generation, SessionState::Open);
        Ok(channel.inbound)
    }

    /// Sends `end-program` and closes the active handle whether or not the
    /// send succeeds.
    pub fn close(&mut self, reason: &str) -> Result<(), ClientError> {
        let mut handle = match self.active.take() {
            Some(handle) if handle.is_open() => handle,
            other => {
                self.active = other;
                return Err(ClientError::SessionClosed);
            }
        };

        let generation = handle.generation();
        handle.state = SessionState::Closing;
        self.set_state(generation, SessionState::Closing);
        if let Err(err) = handle.send_closing(Frame::command(Command::EndProgram, "")) {
            warn!(generation, "end-program not delivered: {err}");
        }
        handle.shutdown();
        self.active = Some(handle);
        self.set_state(generation, SessionState::Closed);
        info!(generation, reason, "session closed");
        self.ui.emit(UiEvent::SessionEnded {
            generation,
            reason: reason.to_owned(),
        });
        Ok(())
    }

    /// The transport reported the channel of `generation` as gone.
    pub fn channel_closed(&mut self, generation: u64) {
        let current = self
            .active
            .as_ref()
            .filter(|handle| handle.is_open())
            .map(SessionHandle::generation);
        if current != Some(generation) {
            debug!(generation, "close event for inactive channel ignored");
            return;
        }

        warn!(generation, "session channel closed by remote");
        if let Err(err) = self.close("channel-closed") {
            debug!(generation, "channel close raced with teardown: {err}");
        }
    }

    /// Replaces the active handle with a fresh channel announced by a
    /// `reload` command. If the new channel cannot be established the
    /// current session is closed instead.
    ///
    /// Dropping the returned future before it resolves leaves the current
    /// handle untouched.
    pub async fn reload(&mut self, profile: &Profile) -> Result<FrameStream, ClientError> {
        let old_generation = self.open_handle()?.generation();
        let generation = self.next_generation;
        self.next_generation += 1;
        let address = self.resolve_address(profile);
        info!(old_generation, generation, address = %address, "reloading session");

        let attempt = match self.transport.connect(&address).await {
            Ok(channel) => {
                let mut handle = SessionHandle::open(generation, channel.outbound);
                match handle.send(Frame::command(Command::Reload, "")) {
                    Ok(()) => Ok((handle, channel.inbound)),
                    Err(err) => {
                        handle.shutdown();
                        Err(err)
                    }
                }
            }
            Err(err) => Err(err),
        };

        match attempt {
            Ok((handle, inbound)) => {
                if let Some(mut old) = self.active.replace(handle)
                    && old.shutdown()
                {
                    self.notify(old.generation(), SessionState::Closed);
                }
                info!(old_generation, generation, "session reloaded");
                self.ui.emit(UiEvent::SessionReplaced {
                    old: old_generation,
                    new: generation,
                });
                self.set_state(generation, SessionState::Open);
                Ok(inbound)
            }
            Err(err) => {
                warn!(old_generation, "reload failed, closing session: {err}");
                self.close("reload-failed")?;
                Err(err)
            }
        }
    }

    fn set_state(&mut self, generation: u64, state: SessionState) {
        if self.state != state {
            debug!(generation, from = %self.state, to = %state, "session state");
        }
        self.state = state;
        self.notify(generation, state);
    }

    fn notify(&self, generation: u64, state: SessionState) {
        self.ui.emit(UiEvent::SessionStatus { generation, state });
    }
}

#[cfg(test)]
mod tests {
    use prattle_core::ServerEndpoint;

    use super::*;
    use crate::testing::FakeTransport;

    fn profile() -> Profile {
        Profile {
            id: "home".to_owned(),
            display_name: "Home".to_owned(),
            server: ServerEndpoint {
                address: "10.0.0.7".to_owned(),
                port: 45000,
                profile_server_id: None,
            },
        }
    }

    fn connector(
        transport: &FakeTransport,
        send_join: bool,
    ) -> (SessionConnector<FakeTransport>, std::sync::mpsc::Receiver<UiEvent>) {
        let (ui, rx) = UiSink::channel();
        let options = ConnectorOptions {
            session_address: None,
            send_join,
        };
        (SessionConnector::new(transport.clone(), options, ui), rx)
    }

    fn closed_transitions(events: &[UiEvent], generation: u64) -> usize {
        events
            .iter()
            .filter(|event| {
                matches!(event, UiEvent::SessionStatus { generation: g, state: SessionState::Closed } if *g == generation)
            })
            .count()
    }

    #[tokio::test]
    async fn open_sends_join_and_reaches_open() {
        let transport = FakeTransport::default();
        let (mut connector, _ui) = connector(&transport, true);

        let _inbound = connector.open(&profile()).await.unwrap();
        assert_eq!(connector.state(), SessionState::Open);
        assert_eq!(transport.attempts(), vec!["ws://10.0.0.7:45000".to_owned()]);

        let mut remote = transport.take_remote(0);
        let join = remote.from_client.try_recv().unwrap();
        assert_eq!(join.header, Header::Join);
        assert_eq!(join.content["id"], "home");
    }

    #[tokio::test]
    async fn open_without_join_sends_nothing() {
        let transport = FakeTransport::default();
        let (mut connector, _ui) = connector(&transport, false);
        connector.open(&profile()).await.unwrap();
        let mut remote = transport.take_remote(0);
        assert!(remote.from_client.try_recv().is_err());
    }

    #[tokio::test]
    async fn fixed_session_address_wins_over_profile() {
        let transport = FakeTransport::default();
        let (ui, _rx) = UiSink::channel();
        let options = ConnectorOptions {
            session_address: Some("ws://localhost:57976".to_owned()),
            send_join: false,
        };
        let mut connector = SessionConnector::new(transport.clone(), options, ui);
        connector.open(&profile()).await.unwrap();
        assert_eq!(transport.attempts(), vec!["ws://localhost:57976".to_owned()]);
    }

    #[tokio::test]
    async fn failed_open_returns_to_idle() {
        let transport = FakeTransport::default();
        transport.refuse_next();
        let (mut connector, _ui) = connector(&transport, true);

        let err = connector.open(&profile()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(connector.state(), SessionState::Idle);
        assert!(connector.active().is_none());
    }

    #[tokio::test]
    async fn close_sends_end_program_and_is_terminal() {
        let transport = FakeTransport::default();
        let (mut connector, ui) = connector(&transport, false);
        connector.open(&profile()).await.unwrap();

        connector.close("user").unwrap();
        assert_eq!(connector.state(), SessionState::Closed);
        assert_eq!(connector.active().unwrap().state(), SessionState::Closed);

        let mut remote = transport.take_remote(0);
        assert_eq!(
            remote.from_client.try_recv().unwrap(),
            Frame::command(Command::EndProgram, "")
        );

        assert!(matches!(connector.close("again"), Err(ClientError::SessionClosed)));
        let events: Vec<UiEvent> = ui.try_iter().collect();
        assert!(events.contains(&UiEvent::SessionEnded {
            generation: 1,
            reason: "user".to_owned()
        }));
        assert_eq!(closed_transitions(&events, 1), 1);
    }

    #[tokio::test]
    async fn close_completes_even_if_channel_is_dead() {
        let transport = FakeTransport::default();
        let (mut connector, _ui) = connector(&transport, false);
        connector.open(&profile()).await.unwrap();
        drop(transport.take_remote(0));

        connector.close("unload").unwrap();
        assert_eq!(connector.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn reopen_produces_new_handle() {
        let transport = FakeTransport::default();
        let (mut connector, _ui) = connector(&transport, false);
        connector.open(&profile()).await.unwrap();
        connector.close("user").unwrap();

        connector.open(&profile()).await.unwrap();
        let handle = connector.open_handle().unwrap();
        assert_eq!(handle.generation(), 2);
    }

    #[tokio::test]
    async fn open_while_open_is_refused() {
        let transport = FakeTransport::default();
        let (mut connector, ui) = connector(&transport, false);
        connector.open(&profile()).await.unwrap();
        let _: Vec<UiEvent> = ui.try_iter().collect();

        let err = connector.open(&profile()).await.unwrap_err();
        assert!(matches!(err, ClientError::SessionAlreadyOpen));
        assert_eq!(transport.attempts().len(), 1);
        assert_eq!(connector.state(), SessionState::Open);
        assert_eq!(connector.open_handle().unwrap().generation(), 1);
        assert!(ui.try_iter().next().is_none());
    }

    #[tokio::test]
    async fn remote_close_of_active_channel_ends_session() {
        let transport = FakeTransport::default();
        let (mut connector, ui) = connector(&transport, false);
        connector.open(&profile()).await.unwrap();

        connector.channel_closed(7);
        assert_eq!(connector.state(), SessionState::Open);

        connector.channel_closed(1);
        assert_eq!(connector.state(), SessionState::Closed);
        let events: Vec<UiEvent> = ui.try_iter().collect();
        assert!(events.contains(&UiEvent::SessionEnded {
            generation: 1,
            reason: "channel-closed".to_owned()
        }));
    }

    #[tokio::test]
    async fn reload_replaces_handle_and_closes_old_once() {
        let transport = FakeTransport::default();
        let (mut connector, ui) = connector(&transport, false);
        connector.open(&profile()).await.unwrap();

        let _inbound = connector.reload(&profile()).await.unwrap();
        let handle = connector.open_handle().unwrap();
        assert_eq!(handle.generation(), 2);
        assert_eq!(connector.state(), SessionState::Open);

        let mut old_remote = transport.take_remote(0);
        assert!(old_remote.from_client.try_recv().is_err());
        let mut new_remote = transport.take_remote(1);
        assert_eq!(
            new_remote.from_client.try_recv().unwrap(),
            Frame::command(Command::Reload, "")
        );

        let events: Vec<UiEvent> = ui.try_iter().collect();
        assert_eq!(closed_transitions(&events, 1), 1);
        assert!(events.contains(&UiEvent::SessionReplaced { old: 1, new: 2 }));
        assert!(!events.iter().any(|e| matches!(e, UiEvent::SessionEnded { .. })));
    }

    #[tokio::test]
    async fn failed_reload_falls_back_to_close() {
        let transport = FakeTransport::default();
        let (mut connector, ui) = connector(&transport, false);
        connector.open(&profile()).await.unwrap();
        transport.refuse_next();

        let err = connector.reload(&profile()).await.unwrap_err();
        assert!(matches!(err, ClientError::ChannelFailure(_)));
        assert_eq!(connector.state(), SessionState::Closed);

        let mut old_remote = transport.take_remote(0);
        assert_eq!(
            old_remote.from_client.try_recv().unwrap(),
            Frame::command(Command::EndProgram, "")
        );
        let events: Vec<UiEvent> = ui.try_iter().collect();
        assert_eq!(closed_transitions(&events, 1), 1);
        assert!(events.contains(&UiEvent::SessionEnded {
            generation: 1,
            reason: "reload-failed".to_owned()
        }));
    }

    #[tokio::test]
    async fn reload_without_open_session_is_rejected() {
        let transport = FakeTransport::default();
        let (mut connector, _ui) = connector(&transport, false);
        assert!(matches!(
            connector.reload(&profile()).await,
            Err(ClientError::SessionClosed)
        ));
        assert!(transport.attempts().is_empty());
    }
}
