use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Frame, Header};

pub const FILE_PREFIX: &str = "file::";
pub const DIR_PREFIX: &str = "dir::";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Text,
    File,
    Dir,
    DirLite,
}

impl MessageKind {
    pub fn header(self) -> Header {
        match self {
            MessageKind::Text => Header::ChatMessage,
            MessageKind::File => Header::File,
            MessageKind::Dir => Header::Dir,
            MessageKind::DirLite => Header::DirLite,
        }
    }

    pub fn from_header(header: Header) -> Option<MessageKind> {
        match header {
            Header::ChatMessage => Some(MessageKind::Text),
            Header::File => Some(MessageKind::File),
            Header::Dir => Some(MessageKind::Dir),
            Header::DirLite => Some(MessageKind::DirLite),
            _ => None,
        }
    }
}

/// A user send action after prefix classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundContent {
    Text(String),
    File(String),
    Dir { path: String, lite: bool },
}

impl OutboundContent {
    pub fn kind(&self) -> MessageKind {
        match self {
            OutboundContent::Text(_) => MessageKind::Text,
            OutboundContent::File(_) => MessageKind::File,
            OutboundContent::Dir { lite: false, .. } => MessageKind::Dir,
            OutboundContent::Dir { lite: true, .. } => MessageKind::DirLite,
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            OutboundContent::Text(text) => text,
            OutboundContent::File(path) => path,
            OutboundContent::Dir { path, .. } => path,
        }
    }

    pub fn to_frame(&self, peer: &str) -> Frame {
        Frame::text(self.kind().header(), self.payload(), peer)
    }
}

/// Classifies raw composer input by its `file::` / `dir::` prefix.
///
/// Returns `None` when there is nothing to send: blank input, or a prefix
/// with an empty path behind it.
pub fn classify_content(raw: &str, light_mode: bool) -> Option<OutboundContent> {
    if raw.trim().is_empty() {
        return None;
    }

    let leading = raw.trim_start();
    if let Some(rest) = leading.strip_prefix(FILE_PREFIX) {
        let path = clean_path(rest);
        return (!path.is_empty()).then(|| OutboundContent::File(path.to_owned()));
    }
    if let Some(rest) = leading.strip_prefix(DIR_PREFIX) {
        let path = clean_path(rest);
        return (!path.is_empty()).then(|| OutboundContent::Dir {
            path: path.to_owned(),
            lite: light_mode,
        });
    }

    Some(OutboundContent::Text(raw.to_owned()))
}

/// Trims whitespace and any surrounding quote characters from a pasted path.
pub fn clean_path(raw: &str) -> &str {
    raw.trim()
        .trim_matches(|c: char| c == '"' || c == '\'')
        .trim()
}

/// Content of a `file` frame: a single path or a grouped selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilePayload {
    Path(String),
    Group {
        files: Vec<String>,
        #[serde(rename = "groupingLevel", default)]
        grouping_level: u32,
    },
}

impl FilePayload {
    pub fn from_value(value: &Value) -> Option<FilePayload> {
        serde_json::from_value(value.clone()).ok()
    }

    pub fn describe(&self) -> String {
        match self {
            FilePayload::Path(path) => path.clone(),
            FilePayload::Group { files, .. } => files.join("\n"),
        }
    }
}
