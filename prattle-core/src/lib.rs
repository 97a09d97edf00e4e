use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

mod content;
mod profile;

pub use content::{
    DIR_PREFIX, FILE_PREFIX, FilePayload, MessageKind, OutboundContent, classify_content,
    clean_path,
};
pub use profile::{
    LEGACY_DEFAULT_SERVER_PORT, Profile, ProfileSet, ServerAddress, ServerEndpoint,
};

pub const PROTOCOL_VERSION: u8 = 2;
pub const LEGACY_PROTOCOL_VERSION: u8 = 1;
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;
pub const PRESENCE_LEFT: &str = "0";
pub const UNKNOWN_PEER_PREFIX: &str = "Unknown@";
pub const IDENTITY_SEPARATOR: &str = "(^)";

pub type PeerId = String;
pub type ProfileId = String;

/// Canonical frame headers shared by the control and session channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Header {
    SelectedProfile,
    NewProfileList,
    ProfileList,
    Join,
    Command,
    IdentityAssigned,
    ChatMessage,
    File,
    Dir,
    DirLite,
}

impl Header {
    pub const ALL: [Header; 10] = [
        Header::SelectedProfile,
        Header::NewProfileList,
        Header::ProfileList,
        Header::Join,
        Header::Command,
        Header::IdentityAssigned,
        Header::ChatMessage,
        Header::File,
        Header::Dir,
        Header::DirLite,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Header::SelectedProfile => "selected-profile",
            Header::NewProfileList => "new-profile-list",
            Header::ProfileList => "profile-list",
            Header::Join => "join",
            Header::Command => "command",
            Header::IdentityAssigned => "identity-assigned",
            Header::ChatMessage => "chat-message",
            Header::File => "file",
            Header::Dir => "dir",
            Header::DirLite => "dir-lite",
        }
    }

    /// Resolves a header string, accepting the spellings older cores emit
    /// (`"this is a command"`, `"thisisamessage"`, `"selectedprofile"`, ...).
    pub fn parse(raw: &str) -> Option<Header> {
        let token = normalize_token(raw);
        let header = match strip_legacy_prefix(&token) {
            "selectedprofile" => Header::SelectedProfile,
            "newprofilelist" => Header::NewProfileList,
            "profilelist" | "profileslist" => Header::ProfileList,
            "join" | "hanverification" | "verification" => Header::Join,
            "command" | "commandtocore" => Header::Command,
            "identityassigned" | "username" => Header::IdentityAssigned,
            "chatmessage" | "message" => Header::ChatMessage,
            "file" => Header::File,
            "dir" => Header::Dir,
            "dirlite" => Header::DirLite,
            _ => return None,
        };
        Some(header)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Header {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Session control actions carried in `command` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    ConnectUser,
    EndProgram,
    Reload,
    SyncUsers,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::ConnectUser => "connect-user",
            Command::EndProgram => "end-program",
            Command::Reload => "reload",
            Command::SyncUsers => "sync-users",
        }
    }

    pub fn parse(raw: &str) -> Option<Command> {
        let token = normalize_token(raw);
        let command = match strip_legacy_prefix(&token) {
            "connectuser" | "connectpeer" => Command::ConnectUser,
            "endprogram" => Command::EndProgram,
            "reload" | "commandtocorereload" => Command::Reload,
            "syncusers" => Command::SyncUsers,
            _ => return None,
        };
        Some(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an inbound `command` frame means once its content is inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandPayload {
    Control(Command),
    PeerAnnounced { display_name: String },
    PeerLeft,
}

/// One `{header, content, id}` unit exchanged over either channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub header: Header,
    pub content: Value,
    pub id: String,
    #[serde(rename = "v")]
    pub version: u8,
}

impl Frame {
    pub fn new(header: Header, content: Value, id: impl Into<String>) -> Self {
        Self {
            header,
            content,
            id: id.into(),
            version: PROTOCOL_VERSION,
        }
    }

    pub fn text(header: Header, content: &str, id: impl Into<String>) -> Self {
        Self::new(header, Value::String(content.to_owned()), id)
    }

    pub fn command(command: Command, id: impl Into<String>) -> Self {
        Self::text(Header::Command, command.as_str(), id)
    }

    pub fn content_str(&self) -> Result<&str, CoreError> {
        self.content
            .as_str()
            .ok_or_else(|| CoreError::InvalidContent {
                header: self.header,
                reason: "expected a string".to_owned(),
            })
    }

    pub fn command_payload(&self) -> Result<CommandPayload, CoreError> {
        if self.header != Header::Command {
            return Err(CoreError::InvalidContent {
                header: self.header,
                reason: "not a command frame".to_owned(),
            });
        }

        match &self.content {
            // Older cores compare presence loosely, so blank also means gone.
            Value::String(text) if matches!(text.trim(), PRESENCE_LEFT | "") => {
                Ok(CommandPayload::PeerLeft)
            }
            Value::Number(number) if number.as_f64() == Some(0.0) => Ok(CommandPayload::PeerLeft),
            Value::String(text) => match Command::parse(text) {
                Some(command) => Ok(CommandPayload::Control(command)),
                None => Ok(CommandPayload::PeerAnnounced {
                    display_name: text.clone(),
                }),
            },
            Value::Number(number) => Ok(CommandPayload::PeerAnnounced {
                display_name: number.to_string(),
            }),
            _ => Err(CoreError::InvalidContent {
                header: self.header,
                reason: "command content must be a string or presence flag".to_owned(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    header: String,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    id: Value,
    #[serde(default)]
    v: Option<u8>,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("unknown header {0:?}")]
    UnknownHeader(String),
    #[error("invalid content for {header}: {reason}")]
    InvalidContent { header: Header, reason: String },
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub fn encode_frame(frame: &Frame) -> Result<String, CoreError> {
    serde_json::to_string(frame).map_err(|err| CoreError::Serialization(err.to_string()))
}

pub fn decode_frame(text: &str) -> Result<Frame, CoreError> {
    if text.len() > MAX_FRAME_BYTES {
        return Err(CoreError::MalformedFrame(format!(
            "frame of {} bytes exceeds {} bytes",
            text.len(),
            MAX_FRAME_BYTES
        )));
    }

    let raw: RawFrame =
        serde_json::from_str(text).map_err(|err| CoreError::MalformedFrame(err.to_string()))?;
    let header = Header::parse(&raw.header).ok_or(CoreError::UnknownHeader(raw.header))?;

    // Some cores send numeric ids; anything structured is rejected.
    let id = match raw.id {
        Value::Null => String::new(),
        Value::String(id) => id,
        Value::Number(number) => number.to_string(),
        other => {
            return Err(CoreError::MalformedFrame(format!(
                "id must be a string, got {other}"
            )));
        }
    };

    Ok(Frame {
        header,
        content: raw.content,
        id,
        version: raw.v.unwrap_or(LEGACY_PROTOCOL_VERSION),
    })
}

/// Human part of an identity string such as `alice(^)10.0.0.4`.
pub fn identity_display_name(identity: &str) -> &str {
    identity
        .split(IDENTITY_SEPARATOR)
        .next()
        .unwrap_or(identity)
        .trim()
}

pub fn unknown_peer_name(id: &str) -> String {
    format!("{UNKNOWN_PEER_PREFIX}{id}")
}

fn normalize_token(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn strip_legacy_prefix(token: &str) -> &str {
    for prefix in ["thisisa", "thisismy", "thisis"] {
        if let Some(rest) = token.strip_prefix(prefix)
            && !rest.is_empty()
        {
            return rest;
        }
    }
    token
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn canonical_headers_parse_back() {
        for header in Header::ALL {
            assert_eq!(Header::parse(header.as_str()), Some(header));
        }
    }

    #[test]
    fn legacy_header_spellings_are_reconciled() {
        assert_eq!(Header::parse("this is a command"), Some(Header::Command));
        assert_eq!(Header::parse("thisisacommand"), Some(Header::Command));
        assert_eq!(Header::parse(" 'thisiscommandtocore"), Some(Header::Command));
        assert_eq!(Header::parse("this is a message"), Some(Header::ChatMessage));
        assert_eq!(
            Header::parse("this is my username"),
            Some(Header::IdentityAssigned)
        );
        assert_eq!(Header::parse("thisisafile"), Some(Header::File));
        assert_eq!(Header::parse("thisisadirlite"), Some(Header::DirLite));
        assert_eq!(Header::parse("selectedprofile"), Some(Header::SelectedProfile));
        assert_eq!(Header::parse("selected profile"), Some(Header::SelectedProfile));
        assert_eq!(Header::parse("new profile list"), Some(Header::NewProfileList));
        assert_eq!(
            Header::parse("this is a profiles list"),
            Some(Header::ProfileList)
        );
        assert_eq!(Header::parse("han verification"), Some(Header::Join));
        assert_eq!(Header::parse("gossip"), None);
    }

    #[test]
    fn legacy_command_spellings_are_reconciled() {
        assert_eq!(Command::parse("connect user"), Some(Command::ConnectUser));
        assert_eq!(Command::parse("connectuser"), Some(Command::ConnectUser));
        assert_eq!(Command::parse("endprogram"), Some(Command::EndProgram));
        assert_eq!(
            Command::parse("this is command to core_/!_reload"),
            Some(Command::Reload)
        );
        assert_eq!(Command::parse("sync-users"), Some(Command::SyncUsers));
        assert_eq!(Command::parse("alice"), None);
    }

    #[test]
    fn encoded_frame_uses_canonical_envelope() {
        let frame = Frame::command(Command::ConnectUser, "bob@10.0.0.2");
        let encoded = encode_frame(&frame).unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(
            value,
            json!({"header": "command", "content": "connect-user", "id": "bob@10.0.0.2", "v": 2})
        );
    }

    #[test]
    fn decode_accepts_legacy_frame_without_version() {
        let frame =
            decode_frame(r#"{"header":"thisisamessage","content":"hi","id":"p1"}"#).unwrap();
        assert_eq!(frame.header, Header::ChatMessage);
        assert_eq!(frame.content_str().unwrap(), "hi");
        assert_eq!(frame.id, "p1");
        assert_eq!(frame.version, LEGACY_PROTOCOL_VERSION);
    }

    #[test]
    fn decode_rejects_unknown_header_and_garbage() {
        assert!(matches!(
            decode_frame(r#"{"header":"bogus","content":"","id":""}"#),
            Err(CoreError::UnknownHeader(header)) if header == "bogus"
        ));
        assert!(matches!(
            decode_frame("not json"),
            Err(CoreError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode_frame(r#"{"header":"file","content":"x","id":{"a":1}}"#),
            Err(CoreError::MalformedFrame(_))
        ));
    }

    #[test]
    fn decode_tolerates_numeric_id() {
        let frame = decode_frame(r#"{"header":"command","content":"alice","id":7}"#).unwrap();
        assert_eq!(frame.id, "7");
    }

    #[test]
    fn presence_flag_zero_means_peer_left() {
        let as_string = Frame::text(Header::Command, "0", "p1");
        let as_number = Frame::new(Header::Command, json!(0), "p1");
        assert_eq!(as_string.command_payload().unwrap(), CommandPayload::PeerLeft);
        assert_eq!(as_number.command_payload().unwrap(), CommandPayload::PeerLeft);
    }

    #[test]
    fn blank_presence_means_peer_left() {
        for content in ["", "   "] {
            let frame = Frame::text(Header::Command, content, "p1");
            assert_eq!(frame.command_payload().unwrap(), CommandPayload::PeerLeft);
        }
    }

    #[test]
    fn command_payload_distinguishes_controls_from_announcements() {
        let announce = Frame::text(Header::Command, "alice", "alice@10.0.0.4");
        assert_eq!(
            announce.command_payload().unwrap(),
            CommandPayload::PeerAnnounced {
                display_name: "alice".to_owned()
            }
        );

        let reload = Frame::command(Command::Reload, "");
        assert_eq!(
            reload.command_payload().unwrap(),
            CommandPayload::Control(Command::Reload)
        );

        let bad = Frame::new(Header::Command, json!({"x": 1}), "");
        assert!(bad.command_payload().is_err());
    }

    #[test]
    fn identity_display_name_strips_address() {
        assert_eq!(identity_display_name("alice(^)10.0.0.4"), "alice");
        assert_eq!(identity_display_name("bob"), "bob");
    }
}
