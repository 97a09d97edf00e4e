use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::{
    error::ClientError,
    session::{Channel, FrameSink, FrameStream, Transport},
};

/// Far side of a channel opened through [`FakeTransport`].
#[derive(Debug)]
pub(crate) struct RemoteEnd {
    pub(crate) to_client: FrameSink,
    pub(crate) from_client: FrameStream,
}

#[derive(Debug, Default)]
struct FakeState {
    refuse_next: usize,
    attempts: Vec<String>,
    remotes: Vec<Option<RemoteEnd>>,
}

/// In-memory transport; every successful connect yields a [`RemoteEnd`].
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub(crate) fn refuse_next(&self) {
        self.state.lock().unwrap().refuse_next += 1;
    }

    pub(crate) fn attempts(&self) -> Vec<String> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub(crate) fn take_remote(&self, index: usize) -> RemoteEnd {
        self.state.lock().unwrap().remotes[index]
            .take()
            .expect("remote end already taken")
    }
}

impl Transport for FakeTransport {
    async fn connect(&self, address: &str) -> Result<Channel, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.attempts.push(address.to_owned());
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(ClientError::ChannelFailure(format!(
                "connection to {address} refused"
            )));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        state.remotes.push(Some(RemoteEnd {
            to_client,
            from_client,
        }));
        Ok(Channel { outbound, inbound })
    }
}
