//! Client side of the prattle chat protocol: profile negotiation over the
//! control channel, the session channel lifecycle, and routing of peer
//! traffic into per-peer conversations.

pub mod config;
pub mod console;
pub mod conversation;
pub mod error;
pub mod events;
pub mod profiles;
pub mod registry;
pub mod router;
pub mod runtime;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::ClientConfig;
pub use error::ClientError;
pub use events::{UiEvent, UiSink};
pub use registry::{ConversationView, HeadlessView, ViewHandle};
pub use runtime::{ClientRuntime, UiAction};
pub use session::{SessionState, Transport};
pub use transport::WsTransport;
