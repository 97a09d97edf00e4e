use prattle_core::{Profile, ServerEndpoint};
use thiserror::Error;

use crate::{profiles::ProfileEdit, runtime::UiAction};

pub const HELP: &str = "\
/profiles                           list profiles
/new[!] <id> <address> <port> <name> create a profile (! overwrites)
/edit <id> <name|address|port|server> <value>
/delete <id>                        delete a profile
/select <id>                        choose a profile locally
/publish                            push the profile set to the store
/proceed [id]                       submit the selection and connect
/focus <peer>                       chat with a peer
/peers                              list peers
/lite [on|off]                      shallow directory listings
/sync                               ask the core to re-announce peers
/reload                             reopen the session channel
/close                              end the session
/quit                               end the session and exit
//text                              send text starting with '/'";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Action(UiAction),
    /// `None` toggles.
    LightMode(Option<bool>),
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    #[error("unknown command /{0}, try /help")]
    UnknownCommand(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

/// Parses a line typed at the prompt. Anything not starting with `/` is a
/// message for the focused peer.
pub fn parse_line(line: &str, light_mode: bool) -> Result<Option<ConsoleCommand>, ConsoleError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }

    let send = |content: &str| -> Result<Option<ConsoleCommand>, ConsoleError> {
        Ok(Some(ConsoleCommand::Action(UiAction::Send {
            content: content.to_owned(),
            light_mode,
        })))
    };

    let Some(rest) = line.trim_start().strip_prefix('/') else {
        return send(line);
    };
    if rest.starts_with('/') {
        return send(rest);
    }

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };
    let words: Vec<&str> = args.split_whitespace().collect();

    let action = match name {
        "help" | "?" => return Ok(Some(ConsoleCommand::Help)),
        "lite" => {
            let mode = match words.as_slice() {
                [] => None,
                ["on"] => Some(true),
                ["off"] => Some(false),
                _ => return Err(ConsoleError::Usage("/lite [on|off]")),
            };
            return Ok(Some(ConsoleCommand::LightMode(mode)));
        }
        "profiles" => UiAction::ListProfiles,
        "new" | "new!" => parse_new(args, name == "new!")?,
        "edit" => parse_edit(args)?,
        "delete" => UiAction::DeleteProfile(single(&words, "/delete <id>")?),
        "select" => UiAction::SelectProfile(single(&words, "/select <id>")?),
        "publish" => UiAction::PublishProfiles,
        "proceed" => match words.as_slice() {
            [] => UiAction::Proceed(None),
            [id] => UiAction::Proceed(Some((*id).to_owned())),
            _ => return Err(ConsoleError::Usage("/proceed [id]")),
        },
        "focus" => {
            if args.is_empty() {
                return Err(ConsoleError::Usage("/focus <peer>"));
            }
            UiAction::Focus(args.to_owned())
        }
        "peers" => UiAction::ListPeers,
        "sync" => UiAction::SyncUsers,
        "reload" => UiAction::Reload,
        "close" => UiAction::Close,
        "quit" | "exit" => UiAction::Unload,
        other => return Err(ConsoleError::UnknownCommand(other.to_owned())),
    };
    Ok(Some(ConsoleCommand::Action(action)))
}

fn single(words: &[&str], usage: &'static str) -> Result<String, ConsoleError> {
    match words {
        [word] => Ok((*word).to_owned()),
        _ => Err(ConsoleError::Usage(usage)),
    }
}

fn parse_port(raw: &str) -> Result<u16, ConsoleError> {
    raw.parse::<u16>()
        .map_err(|_| ConsoleError::InvalidPort(raw.to_owned()))
}

fn parse_new(args: &str, overwrite: bool) -> Result<UiAction, ConsoleError> {
    const USAGE: &str = "/new[!] <id> <address> <port> <display name>";
    let mut parts = args.splitn(4, char::is_whitespace);
    let (Some(id), Some(address), Some(port), Some(display_name)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ConsoleError::Usage(USAGE));
    };
    let display_name = display_name.trim();
    if display_name.is_empty() {
        return Err(ConsoleError::Usage(USAGE));
    }

    Ok(UiAction::CreateProfile {
        profile: Profile {
            id: id.to_owned(),
            display_name: display_name.to_owned(),
            server: ServerEndpoint {
                address: address.to_owned(),
                port: parse_port(port)?,
                profile_server_id: None,
            },
        },
        overwrite,
    })
}

fn parse_edit(args: &str) -> Result<UiAction, ConsoleError> {
    const USAGE: &str = "/edit <id> <name|address|port|server> <value>";
    let mut parts = args.splitn(3, char::is_whitespace);
    let (Some(id), Some(field)) = (parts.next(), parts.next()) else {
        return Err(ConsoleError::Usage(USAGE));
    };
    let value = parts.next().map(str::trim).unwrap_or_default();

    let mut edit = ProfileEdit::default();
    match field {
        "name" if !value.is_empty() => edit.display_name = Some(value.to_owned()),
        "address" if !value.is_empty() => edit.address = Some(value.to_owned()),
        "port" => edit.port = Some(parse_port(value)?),
        // An empty value clears the server id.
        "server" => {
            edit.profile_server_id = Some((!value.is_empty()).then(|| value.to_owned()));
        }
        _ => return Err(ConsoleError::Usage(USAGE)),
    }

    Ok(UiAction::EditProfile {
        id: id.to_owned(),
        edit,
    })
}
