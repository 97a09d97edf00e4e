use std::time::Duration;

use futures::{SinkExt, StreamExt};
use prattle_core::{Frame, decode_frame, encode_frame};
use tokio::{net::TcpStream, sync::mpsc, time::timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::{
    error::ClientError,
    session::{Channel, Transport},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = futures::stream::SplitSink<WsStream, Message>;
type WsRead = futures::stream::SplitStream<WsStream>;

/// Websocket transport carrying JSON text frames.
#[derive(Debug, Clone)]
pub struct WsTransport {
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Transport for WsTransport {
    async fn connect(&self, address: &str) -> Result<Channel, ClientError> {
        let (ws_stream, _) = match timeout(self.connect_timeout, connect_async(address)).await {
            Ok(Ok(ok)) => ok,
            Ok(Err(err)) => {
                return Err(ClientError::ChannelFailure(format!(
                    "connect to {address} failed: {err}"
                )));
            }
            Err(_) => {
                return Err(ClientError::ChannelFailure(format!(
                    "connect to {address} timed out after {:?}",
                    self.connect_timeout
                )));
            }
        };
        info!(address, "channel connected");

        let (write_half, read_half) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Frame>();

        tokio::spawn(network_send_task(write_half, outbound_rx, address.to_owned()));
        tokio::spawn(network_receive_task(read_half, inbound_tx, address.to_owned()));

        Ok(Channel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

async fn network_send_task(
    mut ws_write: WsWrite,
    mut outgoing_rx: mpsc::UnboundedReceiver<Frame>,
    address: String,
) {
    while let Some(frame) = outgoing_rx.recv().await {
        match encode_frame(&frame) {
            Ok(text) => {
                if let Err(err) = ws_write.send(Message::Text(text.into())).await {
                    warn!(address = %address, "websocket send failed: {err}");
                    return;
                }
            }
            Err(err) => warn!(address = %address, "failed to encode outgoing frame: {err}"),
        }
    }

    // Writer released by the session: close our side of the socket.
    if let Err(err) = ws_write.close().await {
        debug!(address = %address, "websocket close failed: {err}");
    }
}

async fn network_receive_task(
    mut ws_read: WsRead,
    incoming_tx: mpsc::UnboundedSender<Frame>,
    address: String,
) {
    while let Some(next) = ws_read.next().await {
        let message = match next {
            Ok(message) => message,
            Err(err) => {
                warn!(address = %address, "websocket read failed: {err}");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                let frame = match decode_frame(text.as_str()) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(address = %address, "dropping inbound frame: {err}");
                        continue;
                    }
                };
                if incoming_tx.send(frame).is_err() {
                    debug!(address = %address, "inbound consumer gone");
                    break;
                }
            }
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
    info!(address = %address, "channel reader finished");
}
