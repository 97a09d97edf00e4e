use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CoreError, Header, ProfileId};

pub const LEGACY_DEFAULT_SERVER_PORT: u16 = 45000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEndpoint {
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_server_id: Option<String>,
}

impl ServerEndpoint {
    pub fn websocket_url(&self) -> String {
        format!("ws://{}:{}", self.address, self.port)
    }

    pub fn address_only(&self) -> ServerAddress {
        ServerAddress {
            address: self.address.clone(),
            port: self.port,
        }
    }
}

/// The server-address subset sent by legacy (v1) profile selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAddress {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub id: ProfileId,
    pub display_name: String,
    pub server: ServerEndpoint,
}

/// All known profiles keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileSet {
    profiles: BTreeMap<ProfileId, Profile>,
}

impl ProfileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.profiles.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Profile> {
        self.profiles.get(id)
    }

    /// Inserts keyed by `profile.id`, returning whatever was there before.
    pub fn insert(&mut self, profile: Profile) -> Option<Profile> {
        self.profiles.insert(profile.id.clone(), profile)
    }

    pub fn remove(&mut self, id: &str) -> Option<Profile> {
        self.profiles.remove(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    pub fn to_value(&self) -> Result<Value, CoreError> {
        serde_json::to_value(self).map_err(|err| CoreError::Serialization(err.to_string()))
    }

    /// Parses the content of a `profile-list` frame.
    ///
    /// Map keys are authoritative for ids. The older
    /// `{name: {CONFIGURATIONS: {server_ip, username, server_port}}}` layout
    /// is accepted as well.
    pub fn from_snapshot(content: &Value) -> Result<ProfileSet, CoreError> {
        if let Ok(profiles) = serde_json::from_value::<BTreeMap<String, Profile>>(content.clone())
        {
            return Ok(profiles
                .into_iter()
                .map(|(id, mut profile)| {
                    profile.id = id;
                    profile
                })
                .collect());
        }

        let legacy = serde_json::from_value::<BTreeMap<String, LegacyEntry>>(content.clone())
            .map_err(|err| CoreError::InvalidContent {
                header: Header::ProfileList,
                reason: err.to_string(),
            })?;
        legacy
            .into_iter()
            .map(|(id, entry)| entry.into_profile(id))
            .collect()
    }
}

impl FromIterator<Profile> for ProfileSet {
    fn from_iter<I: IntoIterator<Item = Profile>>(iter: I) -> Self {
        let mut set = ProfileSet::new();
        for profile in iter {
            set.insert(profile);
        }
        set
    }
}

#[derive(Debug, Deserialize)]
struct LegacyEntry {
    #[serde(rename = "CONFIGURATIONS")]
    configurations: LegacyConfigurations,
}

#[derive(Debug, Deserialize)]
struct LegacyConfigurations {
    server_ip: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    server_port: Option<Value>,
}

impl LegacyEntry {
    fn into_profile(self, id: String) -> Result<Profile, CoreError> {
        let config = self.configurations;
        let port = match config.server_port {
            None | Some(Value::Null) => LEGACY_DEFAULT_SERVER_PORT,
            Some(Value::Number(number)) => number
                .as_u64()
                .and_then(|port| u16::try_from(port).ok())
                .ok_or_else(|| invalid_port(&number.to_string()))?,
            Some(Value::String(text)) => text.trim().parse().map_err(|_| invalid_port(&text))?,
            Some(other) => return Err(invalid_port(&other.to_string())),
        };

        Ok(Profile {
            display_name: config.username.unwrap_or_else(|| id.clone()),
            id,
            server: ServerEndpoint {
                address: config.server_ip,
                port,
                profile_server_id: None,
            },
        })
    }
}

fn invalid_port(raw: &str) -> CoreError {
    CoreError::InvalidContent {
        header: Header::ProfileList,
        reason: format!("invalid server port {raw}"),
    }
}
