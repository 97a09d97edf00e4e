use std::time::Duration;

use prattle_core::{Command, Frame, Header, PeerId, Profile, classify_content};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    config::ClientConfig,
    error::ClientError,
    events::{UiEvent, UiSink},
    profiles::{ProfileEdit, ProfileStore},
    registry::ConversationView,
    router::{Routed, Router},
    session::{FrameStream, SessionConnector, Transport},
};

/// How long the unload hook waits for the send task to flush `end-program`.
pub const UNLOAD_FLUSH_GRACE: Duration = Duration::from_millis(100);

/// Builds the rendering surface for each new session.
pub type ViewFactory = Box<dyn FnMut() -> Box<dyn ConversationView> + Send>;

/// Actions originated by the UI collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiAction {
    CreateProfile { profile: Profile, overwrite: bool },
    EditProfile { id: String, edit: ProfileEdit },
    DeleteProfile(String),
    SelectProfile(String),
    PublishProfiles,
    ListProfiles,
    ListPeers,
    /// Submit the given (or locally selected) profile and open the session.
    Proceed(Option<String>),
    Focus(PeerId),
    Send { content: String, light_mode: bool },
    SyncUsers,
    Reload,
    Close,
    /// Process is going away.
    Unload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// State that lives exactly as long as one session.
#[derive(Debug)]
pub struct SessionContext {
    pub profile: Profile,
    pub router: Router,
}

/// Serialises control frames, session frames and UI actions onto one task.
pub struct ClientRuntime<T> {
    config: ClientConfig,
    profiles: ProfileStore,
    connector: SessionConnector<T>,
    control_inbound: Option<FrameStream>,
    session: Option<SessionContext>,
    session_inbound: Option<FrameStream>,
    make_view: ViewFactory,
    ui: UiSink,
}

impl<T: Transport> ClientRuntime<T> {
    pub fn new(transport: T, config: ClientConfig, make_view: ViewFactory, ui: UiSink) -> Self {
        let profiles = ProfileStore::new(config.selection_format, ui.clone());
        let connector = SessionConnector::new(transport, config.connector_options(), ui.clone());
        Self {
            config,
            profiles,
            connector,
            control_inbound: None,
            session: None,
            session_inbound: None,
            make_view,
            ui,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn connector(&self) -> &SessionConnector<T> {
        &self.connector
    }

    pub fn session(&self) -> Option<&SessionContext> {
        self.session.as_ref()
    }

    /// Opens the control channel. The profile snapshot arrives on it later.
    pub async fn connect_control(&mut self) -> Result<(), ClientError> {
        let address = self.config.control_address.clone();
        let channel = self.connector.transport().connect(&address).await?;
        info!(address = %address, "control channel connected");
        self.profiles.attach_control(channel.outbound);
        self.control_inbound = Some(channel.inbound);
        Ok(())
    }

    /// Runs until the UI asks to unload or drops its action sender.
    pub async fn run(mut self, mut actions: mpsc::UnboundedReceiver<UiAction>) {
        info!("runtime starting");
        loop {
            let flow = tokio::select! {
                frame = next_frame(&mut self.control_inbound) => {
                    self.on_control(frame);
                    Flow::Continue
                }
                frame = next_frame(&mut self.session_inbound) => {
                    self.on_session(frame);
                    Flow::Continue
                }
                action = actions.recv() => match action {
                    Some(action) => self.handle_action(action).await,
                    None => {
                        info!("action sender dropped");
                        self.handle_action(UiAction::Unload).await
                    }
                },
            };

            if flow == Flow::Exit {
                break;
            }
        }
        info!("runtime stopped");
    }

    fn on_control(&mut self, frame: Option<Frame>) {
        let Some(frame) = frame else {
            warn!("control channel closed");
            self.control_inbound = None;
            self.profiles.detach_control();
            self.ui
                .emit(UiEvent::RuntimeError("control channel closed".to_owned()));
            return;
        };

        match frame.header {
            Header::ProfileList => {
                if let Err(err) = self.profiles.apply_snapshot(&frame) {
                    self.report(err);
                }
            }
            other => warn!(header = %other, "unexpected frame on control channel dropped"),
        }
    }

    fn on_session(&mut self, frame: Option<Frame>) {
        let Some(frame) = frame else {
            if let Some(generation) = self.connector.active().map(|handle| handle.generation()) {
                self.connector.channel_closed(generation);
            }
            self.end_session();
            return;
        };

        let Some(context) = self.session.as_mut() else {
            debug!(header = %frame.header, "frame without session context dropped");
            return;
        };
        match context.router.handle_inbound(frame) {
            Ok(Routed::Control(Command::EndProgram)) => {
                info!("core ended the session");
                if let Err(err) = self.connector.close("remote-end") {
                    debug!("remote end raced with teardown: {err}");
                }
                self.end_session();
            }
            Ok(Routed::Control(command)) => {
                debug!(command = command.as_str(), "control command ignored on client")
            }
            Ok(Routed::Handled | Routed::Dropped) => {}
            Err(err) => self.report(err),
        }
    }

    async fn handle_action(&mut self, action: UiAction) -> Flow {
        debug!(?action, "ui action");
        let result = match action {
            UiAction::CreateProfile { profile, overwrite } => self
                .profiles
                .create_profile(profile, overwrite)
                .map(|_| ()),
            UiAction::EditProfile { id, edit } => self.profiles.edit_profile(&id, edit).map(|_| ()),
            UiAction::DeleteProfile(id) => self.profiles.delete_profile(&id).map(|_| ()),
            UiAction::SelectProfile(id) => self.profiles.select(&id),
            UiAction::PublishProfiles => self.profiles.publish_profile_set(),
            UiAction::ListProfiles => {
                self.profiles.announce();
                Ok(())
            }
            UiAction::ListPeers => {
                let peers = self
                    .session
                    .as_ref()
                    .map(|context| context.router.peer_summary())
                    .unwrap_or_default();
                self.ui.emit(UiEvent::PeerList(peers));
                Ok(())
            }
            UiAction::Proceed(id) => self.proceed(id.as_deref()).await,
            UiAction::Focus(id) => self.focus(&id),
            UiAction::Send {
                content,
                light_mode,
            } => self.send(&content, light_mode),
            UiAction::SyncUsers => self.sync_users(),
            UiAction::Reload => self.reload().await,
            UiAction::Close => {
                let closed = self.connector.close("user");
                self.end_session();
                closed
            }
            UiAction::Unload => {
                self.unload().await;
                return Flow::Exit;
            }
        };

        if let Err(err) = result {
            self.report(err);
        }
        Flow::Continue
    }

    async fn proceed(&mut self, id: Option<&str>) -> Result<(), ClientError> {
        // Refuse before the selection frame goes out on the control channel.
        if self.connector.open_handle().is_ok() {
            return Err(ClientError::SessionAlreadyOpen);
        }
        let profile = self.profiles.submit_selection(id)?;
        let inbound = self.connector.open(&profile).await?;
        let router = Router::new((self.make_view)(), self.ui.clone());
        info!(profile = %profile.id, "session context created");
        self.session = Some(SessionContext { profile, router });
        self.session_inbound = Some(inbound);
        Ok(())
    }

    fn focus(&mut self, id: &str) -> Result<(), ClientError> {
        let handle = self.connector.open_handle()?;
        let context = self.session.as_mut().ok_or(ClientError::SessionClosed)?;
        context.router.focus(handle, id)?;
        Ok(())
    }

    fn send(&mut self, content: &str, light_mode: bool) -> Result<(), ClientError> {
        if classify_content(content, light_mode).is_none() {
            return Ok(());
        }
        let handle = self.connector.open_handle()?;
        let context = self.session.as_mut().ok_or(ClientError::SessionClosed)?;
        context.router.send(handle, content, light_mode)?;
        Ok(())
    }

    fn sync_users(&self) -> Result<(), ClientError> {
        let handle = self.connector.open_handle()?;
        let context = self.session.as_ref().ok_or(ClientError::SessionClosed)?;
        context.router.sync_users(handle)
    }

    async fn reload(&mut self) -> Result<(), ClientError> {
        let profile = self
            .session
            .as_ref()
            .map(|context| context.profile.clone())
            .ok_or(ClientError::SessionClosed)?;

        match self.connector.reload(&profile).await {
            Ok(inbound) => {
                if let Some(previous) = self.session_inbound.replace(inbound) {
                    self.drain_replaced(previous);
                }
                Ok(())
            }
            Err(err) => {
                self.end_session();
                Err(err)
            }
        }
    }

    /// Routes frames that were already queued on the replaced channel.
    fn drain_replaced(&mut self, mut previous: FrameStream) {
        let Some(context) = self.session.as_mut() else {
            return;
        };
        let mut drained = 0usize;
        while let Ok(frame) = previous.try_recv() {
            drained += 1;
            match context.router.handle_inbound(frame) {
                Ok(Routed::Control(command)) => {
                    debug!(command = command.as_str(), "command from replaced channel ignored")
                }
                Ok(Routed::Handled | Routed::Dropped) => {}
                Err(err) => {
                    warn!("frame from replaced channel rejected: {err}");
                }
            }
        }
        if drained > 0 {
            info!(drained, "routed frames left on replaced channel");
        }
    }

    async fn unload(&mut self) {
        if self.connector.open_handle().is_ok() {
            if let Err(err) = self.connector.close("unload") {
                warn!("unload close failed: {err}");
            }
            // The writer task still holds the queued end-program frame.
            tokio::time::sleep(UNLOAD_FLUSH_GRACE).await;
        }
        self.end_session();
        self.profiles.detach_control();
        self.control_inbound = None;
    }

    fn end_session(&mut self) {
        if self.session.take().is_some() {
            info!("session context dropped");
        }
        self.session_inbound = None;
    }

    fn report(&self, err: ClientError) {
        if err.is_user_facing() {
            warn!("user action rejected: {err}");
            self.ui.emit(UiEvent::Prompt(err.to_string()));
        } else if matches!(err, ClientError::Protocol(_)) {
            warn!("inbound frame dropped: {err}");
        } else {
            error!(retryable = err.is_retryable(), "{err}");
            self.ui.emit(UiEvent::RuntimeError(err.to_string()));
        }
    }
}

async fn next_frame(stream: &mut Option<FrameStream>) -> Option<Frame> {
    match stream {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}
