use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::{self, BufRead, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use clap::Parser;
use prattle_client::{
    ClientRuntime, ConversationView, UiAction, UiEvent, UiSink, ViewHandle, WsTransport,
    config::{ClientConfig, load_config_from_path},
    console::{ConsoleCommand, HELP, parse_line},
    profiles::SelectionFormat,
};
use prattle_core::identity_display_name;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Parser, Debug, Clone)]
#[command(name = "prattle")]
struct ClientArgs {
    /// Websocket address of the profile store.
    #[arg(long)]
    control_address: Option<String>,
    /// Fixed session endpoint; defaults to the selected profile's server.
    #[arg(long)]
    session_address: Option<String>,
    /// JSON config file; command line flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    connect_timeout_ms: Option<u64>,
    /// Do not send the join frame when the session opens.
    #[arg(long, default_value_t = false)]
    no_join: bool,
    /// Send only `{address, port}` when submitting a profile (legacy cores).
    #[arg(long, default_value_t = false)]
    address_only_selection: bool,
    #[arg(long)]
    log_file: Option<PathBuf>,
}

struct FileMakeWriter {
    file: Arc<Mutex<File>>,
}

struct FileWriterGuard {
    file: Arc<Mutex<File>>,
}

impl Write for FileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.flush()
    }
}

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriterGuard {
            file: Arc::clone(&self.file),
        }
    }
}

fn init_logging(log_file: Option<&PathBuf>) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    let Some(log_path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .init();
        return;
    };

    let file = match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("failed to open log file {}: {err}", log_path.display());
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .init();
            return;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(FileMakeWriter {
            file: Arc::new(Mutex::new(file)),
        })
        .init();
}

fn resolve_config(args: &ClientArgs) -> Result<ClientConfig, String> {
    let mut config = match &args.config {
        Some(path) => load_config_from_path(path)
            .map_err(|err| format!("config {}: {err}", path.display()))?,
        None => ClientConfig::default(),
    };

    if let Some(control_address) = &args.control_address {
        config.control_address = control_address.clone();
    }
    if let Some(session_address) = &args.session_address {
        config.session_address = Some(session_address.clone());
    }
    if let Some(connect_timeout_ms) = args.connect_timeout_ms {
        config.connect_timeout_ms = connect_timeout_ms;
    }
    if args.no_join {
        config.send_join = false;
    }
    if args.address_only_selection {
        config.selection_format = SelectionFormat::ServerAddress;
    }

    config.validate().map_err(|err| err.to_string())?;
    Ok(config)
}

/// Prints conversation surface changes; one line per call.
#[derive(Default)]
struct ConsoleView {
    next: u64,
    names: HashMap<ViewHandle, String>,
}

impl ConsoleView {
    fn name(&self, view: ViewHandle) -> &str {
        self.names.get(&view).map(String::as_str).unwrap_or("?")
    }
}

impl ConversationView for ConsoleView {
    fn attach(&mut self, _peer: &str, display_name: &str) -> ViewHandle {
        self.next += 1;
        let view = ViewHandle::new(self.next);
        self.names.insert(view, display_name.to_owned());
        view
    }

    fn show(&mut self, view: ViewHandle) {
        println!("-- now chatting with {}", self.name(view));
    }

    fn hide(&mut self, _view: ViewHandle) {}

    fn peer_lost(&mut self, view: ViewHandle) {
        println!("-- {} is no longer reachable", self.name(view));
    }

    fn detach(&mut self, view: ViewHandle) {
        self.names.remove(&view);
    }
}

fn render_event(event: UiEvent) {
    match event {
        UiEvent::ProfilesChanged(profiles) => {
            if profiles.is_empty() {
                println!("-- no profiles");
            }
            for profile in profiles.iter() {
                println!(
                    "-- profile {}: {} @ {}:{}",
                    profile.id, profile.display_name, profile.server.address, profile.server.port
                );
            }
        }
        UiEvent::PeerList(peers) => {
            if peers.is_empty() {
                println!("-- no peers");
            }
            for (id, display_name, unread) in peers {
                let marker = if unread { " *" } else { "" };
                println!("-- peer {id}: {display_name}{marker}");
            }
        }
        UiEvent::ProfileSubmitted { id } => println!("-- profile {id} submitted"),
        UiEvent::SessionStatus { generation, state } => {
            println!("-- session #{generation} {state}")
        }
        UiEvent::SessionReplaced { old, new } => {
            println!("-- session #{old} replaced by #{new}")
        }
        UiEvent::SessionEnded { generation, reason } => {
            println!("-- session #{generation} ended ({reason}); /proceed to start again")
        }
        UiEvent::IdentityAssigned(identity) => {
            println!("-- you are {}", identity_display_name(&identity))
        }
        UiEvent::PeerAdded { id, display_name } => println!("-- {display_name} joined ({id})"),
        UiEvent::PeerRemoved { id, .. } => println!("-- {id} left"),
        UiEvent::FocusChanged { .. } => {}
        UiEvent::MessageAppended {
            peer,
            kind,
            payload,
            outbound,
            ..
        } => {
            let arrow = if outbound { "->" } else { "<-" };
            println!("{arrow} {peer} [{kind:?}] {payload}");
        }
        UiEvent::Prompt(message) => println!("!! {message}"),
        UiEvent::RuntimeError(message) => println!("!! error: {message}"),
    }
}

/// Reads stdin lines on a blocking thread and turns them into actions.
fn spawn_console_reader(actions: mpsc::UnboundedSender<UiAction>) {
    std::thread::spawn(move || {
        let mut light_mode = false;
        for line in io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!("stdin read failed: {err}");
                    break;
                }
            };

            let action = match parse_line(&line, light_mode) {
                Ok(Some(ConsoleCommand::Action(action))) => action,
                Ok(Some(ConsoleCommand::LightMode(mode))) => {
                    light_mode = mode.unwrap_or(!light_mode);
                    println!("-- lite directory mode {}", if light_mode { "on" } else { "off" });
                    continue;
                }
                Ok(Some(ConsoleCommand::Help)) => {
                    println!("{HELP}");
                    continue;
                }
                Ok(None) => continue,
                Err(err) => {
                    println!("!! {err}");
                    continue;
                }
            };

            let quitting = action == UiAction::Unload;
            if actions.send(action).is_err() || quitting {
                return;
            }
        }
        // EOF behaves like closing the window.
        let _ = actions.send(UiAction::Unload);
    });
}

#[tokio::main]
async fn main() {
    let args = ClientArgs::parse();
    init_logging(args.log_file.as_ref());

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!("invalid configuration: {err}");
            eprintln!("invalid configuration: {err}");
            std::process::exit(2);
        }
    };
    info!(
        control_address = %config.control_address,
        session_address = ?config.session_address,
        "client starting"
    );

    let (ui, ui_rx) = UiSink::channel();
    let printer = std::thread::spawn(move || {
        for event in ui_rx {
            render_event(event);
        }
    });

    let transport = WsTransport::new(config.connect_timeout());
    let mut runtime = ClientRuntime::new(
        transport,
        config,
        Box::new(|| Box::new(ConsoleView::default())),
        ui,
    );
    if let Err(err) = runtime.connect_control().await {
        error!("control channel unavailable: {err}");
        eprintln!("control channel unavailable: {err}");
        std::process::exit(1);
    }

    let (actions_tx, actions_rx) = mpsc::unbounded_channel();
    spawn_console_reader(actions_tx.clone());

    let unload_tx = actions_tx;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            let _ = unload_tx.send(UiAction::Unload);
        }
    });

    println!("type /help for commands");
    runtime.run(actions_rx).await;

    // The runtime owned the last UI sender; the printer drains and exits.
    if printer.join().is_err() {
        warn!("ui printer panicked");
    }
    // The stdin reader may still be blocked on a read.
    std::process::exit(0);
}
