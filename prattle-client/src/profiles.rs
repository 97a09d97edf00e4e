use prattle_core::{
    Frame, Header, LEGACY_PROTOCOL_VERSION, Profile, ProfileId, ProfileSet, ServerEndpoint,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::ClientError,
    events::{UiEvent, UiSink},
    session::FrameSink,
};

/// What a `selected-profile` frame carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionFormat {
    #[default]
    FullProfile,
    /// Legacy cores only read `{address, port}`.
    ServerAddress,
}

/// Field-wise changes applied by [`ProfileStore::edit_profile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileEdit {
    pub display_name: Option<String>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub profile_server_id: Option<Option<String>>,
}

/// Local copy of the profile store, synchronised over the control channel.
///
/// Edits stay local until [`publish_profile_set`](Self::publish_profile_set)
/// or [`submit_selection`](Self::submit_selection).
#[derive(Debug)]
pub struct ProfileStore {
    profiles: ProfileSet,
    selection: Option<ProfileId>,
    control: Option<FrameSink>,
    format: SelectionFormat,
    ui: UiSink,
}

impl ProfileStore {
    pub fn new(format: SelectionFormat, ui: UiSink) -> Self {
        Self {
            profiles: ProfileSet::new(),
            selection: None,
            control: None,
            format,
            ui,
        }
    }

    pub fn attach_control(&mut self, control: FrameSink) {
        self.control = Some(control);
    }

    pub fn detach_control(&mut self) {
        self.control = None;
    }

    pub fn list_profiles(&self) -> &ProfileSet {
        &self.profiles
    }

    pub fn selection(&self) -> Option<&str> {
        self.selection.as_deref()
    }

    /// Replaces the whole set with the content of a `profile-list` frame.
    pub fn apply_snapshot(&mut self, frame: &Frame) -> Result<(), ClientError> {
        let snapshot = ProfileSet::from_snapshot(&frame.content)?;
        info!(profiles = snapshot.len(), "profile snapshot received");
        self.replace_profiles(snapshot);
        Ok(())
    }

    pub fn replace_profiles(&mut self, profiles: ProfileSet) {
        self.profiles = profiles;
        if let Some(selected) = self.selection.as_deref()
            && !self.profiles.contains(selected)
        {
            info!(profile = %selected, "selected profile vanished from snapshot");
            self.selection = None;
        }
        self.announce();
    }

    pub fn create_profile(
        &mut self,
        profile: Profile,
        overwrite: bool,
    ) -> Result<&Profile, ClientError> {
        validate_profile(&profile)?;
        // Ids are matched exactly, so padding would make the profile unselectable.
        if profile.id.trim() != profile.id {
            return Err(ClientError::InvalidProfile(
                "id must not have surrounding whitespace".to_owned(),
            ));
        }
        if self.profiles.contains(&profile.id) && !overwrite {
            return Err(ClientError::DuplicateProfileId(profile.id));
        }

        let id = profile.id.clone();
        if self.profiles.insert(profile).is_some() {
            info!(profile = %id, "profile overwritten");
        } else {
            info!(profile = %id, "profile created");
        }
        self.announce();
        self.profiles
            .get(&id)
            .ok_or(ClientError::ProfileNotFound(id))
    }

    pub fn edit_profile(&mut self, id: &str, edit: ProfileEdit) -> Result<&Profile, ClientError> {
        let current = self
            .profiles
            .get(id)
            .ok_or_else(|| ClientError::ProfileNotFound(id.to_owned()))?;

        let mut updated = current.clone();
        if let Some(display_name) = edit.display_name {
            updated.display_name = display_name;
        }
        if let Some(address) = edit.address {
            updated.server.address = address;
        }
        if let Some(port) = edit.port {
            updated.server.port = port;
        }
        if let Some(profile_server_id) = edit.profile_server_id {
            updated.server.profile_server_id = profile_server_id;
        }
        validate_profile(&updated)?;

        self.profiles.insert(updated);
        info!(profile = %id, "profile edited");
        self.announce();
        self.profiles
            .get(id)
            .ok_or_else(|| ClientError::ProfileNotFound(id.to_owned()))
    }

    pub fn delete_profile(&mut self, id: &str) -> Result<Profile, ClientError> {
        let removed = self
            .profiles
            .remove(id)
            .ok_or_else(|| ClientError::ProfileNotFound(id.to_owned()))?;
        if self.selection.as_deref() == Some(id) {
            self.selection = None;
        }
        info!(profile = %id, "profile deleted");
        self.announce();
        Ok(removed)
    }

    pub fn select(&mut self, id: &str) -> Result<(), ClientError> {
        if !self.profiles.contains(id) {
            return Err(ClientError::ProfileNotFound(id.to_owned()));
        }
        self.selection = Some(id.to_owned());
        Ok(())
    }

    /// Sends the chosen profile on the control channel and returns it so the
    /// session can be opened. Falls back to the local selection when `id` is
    /// `None`.
    pub fn submit_selection(&mut self, id: Option<&str>) -> Result<Profile, ClientError> {
        let id = id
            .or(self.selection.as_deref())
            .filter(|id| !id.trim().is_empty())
            .ok_or(ClientError::NoProfileSelected)?
            .to_owned();
        let profile = self
            .profiles
            .get(&id)
            .cloned()
            .ok_or_else(|| ClientError::ProfileNotFound(id.clone()))?;

        let frame = match self.format {
            SelectionFormat::FullProfile => {
                Frame::new(Header::SelectedProfile, to_value(&profile)?, "")
            }
            SelectionFormat::ServerAddress => {
                let mut frame = Frame::new(
                    Header::SelectedProfile,
                    to_value(&profile.server.address_only())?,
                    "",
                );
                frame.version = LEGACY_PROTOCOL_VERSION;
                frame
            }
        };
        self.send(frame)?;

        info!(profile = %id, "profile selection submitted");
        self.selection = Some(id.clone());
        self.ui.emit(UiEvent::ProfileSubmitted { id });
        Ok(profile)
    }

    /// Pushes the full local set so edits persist in the profile store.
    pub fn publish_profile_set(&self) -> Result<(), ClientError> {
        self.send(Frame::new(
            Header::NewProfileList,
            self.profiles.to_value()?,
            "",
        ))?;
        info!(profiles = self.profiles.len(), "profile set published");
        Ok(())
    }

    pub fn announce(&self) {
        self.ui.emit(UiEvent::ProfilesChanged(self.profiles.clone()));
    }

    fn send(&self, frame: Frame) -> Result<(), ClientError> {
        let control = self.control.as_ref().ok_or_else(|| {
            ClientError::ChannelFailure("control channel is not connected".to_owned())
        })?;
        control.send(frame).map_err(|_| {
            warn!("control channel writer is gone");
            ClientError::ChannelFailure("control channel writer is gone".to_owned())
        })
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, ClientError> {
    serde_json::to_value(value)
        .map_err(|err| prattle_core::CoreError::Serialization(err.to_string()).into())
}

fn validate_profile(profile: &Profile) -> Result<(), ClientError> {
    if profile.id.trim().is_empty() {
        return Err(ClientError::InvalidProfile("id must not be empty".to_owned()));
    }
    validate_endpoint(&profile.server)
}

fn validate_endpoint(server: &ServerEndpoint) -> Result<(), ClientError> {
    if server.address.trim().is_empty() {
        return Err(ClientError::InvalidProfile(
            "server address must not be empty".to_owned(),
        ));
    }
    if server.port == 0 {
        return Err(ClientError::InvalidProfile("server port must not be 0".to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::session::FrameStream;

    fn profile(id: &str, name: &str) -> Profile {
        Profile {
            id: id.to_owned(),
            display_name: name.to_owned(),
            server: ServerEndpoint {
                address: "10.0.0.1".to_owned(),
                port: 45000,
                profile_server_id: Some("srv-1".to_owned()),
            },
        }
    }

    fn store(format: SelectionFormat) -> (ProfileStore, FrameStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut store = ProfileStore::new(format, UiSink::disconnected());
        store.attach_control(tx);
        (store, rx)
    }

    #[test]
    fn create_then_edit_changes_only_named_field() {
        let (mut store, _rx) = store(SelectionFormat::FullProfile);
        store.create_profile(profile("A", "Alpha"), false).unwrap();
        store
            .edit_profile(
                "A",
                ProfileEdit {
                    display_name: Some("B".to_owned()),
                    ..ProfileEdit::default()
                },
            )
            .unwrap();

        let listed = store.list_profiles().get("A").unwrap();
        assert_eq!(listed.display_name, "B");
        assert_eq!(listed.server, profile("A", "Alpha").server);
    }

    #[test]
    fn duplicate_id_requires_explicit_overwrite() {
        let (mut store, _rx) = store(SelectionFormat::FullProfile);
        store.create_profile(profile("A", "Alpha"), false).unwrap();
        let err = store.create_profile(profile("A", "Other"), false).unwrap_err();
        assert!(matches!(err, ClientError::DuplicateProfileId(id) if id == "A"));
        assert_eq!(store.list_profiles().get("A").unwrap().display_name, "Alpha");

        store.create_profile(profile("A", "Other"), true).unwrap();
        assert_eq!(store.list_profiles().get("A").unwrap().display_name, "Other");
    }

    #[test]
    fn padded_id_is_rejected_on_create() {
        let (mut store, _rx) = store(SelectionFormat::FullProfile);
        let err = store.create_profile(profile(" A", "Alpha"), false).unwrap_err();
        assert!(matches!(err, ClientError::InvalidProfile(_)));
        assert!(store.list_profiles().is_empty());
    }

    #[test]
    fn selection_ids_are_not_trimmed() {
        let (mut store, mut rx) = store(SelectionFormat::FullProfile);
        store.create_profile(profile("A", "Alpha"), false).unwrap();

        let err = store.submit_selection(Some(" A")).unwrap_err();
        assert!(matches!(err, ClientError::ProfileNotFound(id) if id == " A"));
        assert!(matches!(
            store.submit_selection(Some("  ")),
            Err(ClientError::NoProfileSelected)
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn edit_and_delete_unknown_profile_fail() {
        let (mut store, _rx) = store(SelectionFormat::FullProfile);
        assert!(matches!(
            store.edit_profile("nope", ProfileEdit::default()),
            Err(ClientError::ProfileNotFound(_))
        ));
        assert!(matches!(
            store.delete_profile("nope"),
            Err(ClientError::ProfileNotFound(_))
        ));
    }

    #[test]
    fn invalid_edit_leaves_profile_untouched() {
        let (mut store, _rx) = store(SelectionFormat::FullProfile);
        store.create_profile(profile("A", "Alpha"), false).unwrap();
        let err = store
            .edit_profile(
                "A",
                ProfileEdit {
                    port: Some(0),
                    ..ProfileEdit::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidProfile(_)));
        assert_eq!(store.list_profiles().get("A").unwrap().server.port, 45000);
    }

    #[test]
    fn deleting_selected_profile_clears_selection() {
        let (mut store, _rx) = store(SelectionFormat::FullProfile);
        store.create_profile(profile("A", "Alpha"), false).unwrap();
        store.select("A").unwrap();
        store.delete_profile("A").unwrap();
        assert_eq!(store.selection(), None);
    }

    #[test]
    fn snapshot_replaces_instead_of_merging() {
        let (mut store, _rx) = store(SelectionFormat::FullProfile);
        store.create_profile(profile("local", "Local"), false).unwrap();
        store.select("local").unwrap();

        let frame = Frame::new(
            Header::ProfileList,
            json!({"remote": {"displayName": "Remote", "server": {"address": "h", "port": 1}}}),
            "",
        );
        store.apply_snapshot(&frame).unwrap();

        let ids: Vec<&str> = store.list_profiles().ids().collect();
        assert_eq!(ids, vec!["remote"]);
        assert_eq!(store.selection(), None);
    }

    #[test]
    fn submit_unknown_or_empty_selection_sends_nothing() {
        let (mut store, mut rx) = store(SelectionFormat::FullProfile);
        store.create_profile(profile("A", "Alpha"), false).unwrap();

        assert!(matches!(
            store.submit_selection(Some("missing")),
            Err(ClientError::ProfileNotFound(_))
        ));
        assert!(matches!(
            store.submit_selection(Some("  ")),
            Err(ClientError::NoProfileSelected)
        ));
        assert!(matches!(
            store.submit_selection(None),
            Err(ClientError::NoProfileSelected)
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn submit_sends_full_profile() {
        let (mut store, mut rx) = store(SelectionFormat::FullProfile);
        store.create_profile(profile("A", "Alpha"), false).unwrap();
        store.select("A").unwrap();

        let chosen = store.submit_selection(None).unwrap();
        assert_eq!(chosen.id, "A");

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.header, Header::SelectedProfile);
        assert_eq!(frame.id, "");
        assert_eq!(frame.content["displayName"], "Alpha");
        assert_eq!(frame.content["server"]["profileServerId"], "srv-1");
    }

    #[test]
    fn legacy_format_sends_server_address_only() {
        let (mut store, mut rx) = store(SelectionFormat::ServerAddress);
        store.create_profile(profile("A", "Alpha"), false).unwrap();
        store.submit_selection(Some("A")).unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.content, json!({"address": "10.0.0.1", "port": 45000}));
        assert_eq!(frame.version, LEGACY_PROTOCOL_VERSION);
    }

    #[test]
    fn submit_without_control_channel_fails() {
        let mut store = ProfileStore::new(SelectionFormat::FullProfile, UiSink::disconnected());
        store.create_profile(profile("A", "Alpha"), false).unwrap();
        assert!(matches!(
            store.submit_selection(Some("A")),
            Err(ClientError::ChannelFailure(_))
        ));
        assert_eq!(store.selection(), None);
    }

    #[test]
    fn publish_sends_entire_set() {
        let (mut store, mut rx) = store(SelectionFormat::FullProfile);
        store.create_profile(profile("A", "Alpha"), false).unwrap();
        store.create_profile(profile("B", "Beta"), false).unwrap();
        store.publish_profile_set().unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.header, Header::NewProfileList);
        let published = ProfileSet::from_snapshot(&frame.content).unwrap();
        assert_eq!(&published, store.list_profiles());
    }
}
