use futures_util::{
    SinkExt, StreamExt,
    stream::SplitSink,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use crate::routing::Message;
use crate::shared_types::ConnectionId;

use super::registry::ClientRegistry;

// -----------------------------------------------------------------------------
// ----- ClientEvent -----------------------------------------------------------

/// What a client connection reports to the gateway loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Text {
        connection_id: ConnectionId,
        text: String,
    },
    Disconnected {
        connection_id: ConnectionId,
    },
}

// -----------------------------------------------------------------------------
// ----- ClientConnection ------------------------------------------------------

/// One WebSocket client. Inbound text frames become `ClientEvent::Text`;
/// outbound messages arrive through the queue registered in `ClientRegistry`.
#[derive(Debug)]
pub struct ClientConnection {
    connection_id: ConnectionId,
    peer: String,
    registry: ClientRegistry,
    events: mpsc::UnboundedSender<ClientEvent>,
}

// -----------------------------------------------------------------------------
// ----- ClientConnection: Static ----------------------------------------------

impl ClientConnection {
    pub fn new(
        peer: impl Into<String>,
        registry: ClientRegistry,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        Self {
            connection_id: ConnectionId::random(),
            peer: peer.into(),
            registry,
            events,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ClientConnection: Public ----------------------------------------------

impl ClientConnection {
    /// Run the handshake and then the read loop until the client goes away.
    /// The disconnect event is sent only if the handshake succeeded.
    pub async fn serve<S>(self, stream: S) -> Result<(), tokio_tungstenite::tungstenite::Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ws = accept_async(stream).await?;
        let (sink, mut source) = ws.split();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Message>();
        self.registry
            .register(self.connection_id.clone(), outbound_tx);
        let writer = spawn_writer_task(self.connection_id.clone(), sink, outbound_rx);

        info!(connection_id = %self.connection_id, peer = %self.peer, "client connected");

        let mut result = Ok(());
        while let Some(frame) = source.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            };

            match frame {
                WsMessage::Text(text) => {
                    let event = ClientEvent::Text {
                        connection_id: self.connection_id.clone(),
                        text: text.as_str().to_owned(),
                    };
                    if self.events.send(event).is_err() {
                        break;
                    }
                }
                WsMessage::Binary(bytes) => {
                    debug!(connection_id = %self.connection_id, len = bytes.len(), "ignoring binary frame");
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }

        self.registry.unregister(&self.connection_id);
        writer.abort();

        info!(connection_id = %self.connection_id, peer = %self.peer, "client disconnected");
        let _ = self.events.send(ClientEvent::Disconnected {
            connection_id: self.connection_id.clone(),
        });

        result
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn spawn_writer_task<S>(
    connection_id: ConnectionId,
    mut sink: SplitSink<WebSocketStream<S>, WsMessage>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        'outer: while let Some(message) = rx.recv().await {
            if !feed(&connection_id, &mut sink, &message).await {
                break;
            }

            // coalesce bursts into one flush
            while let Ok(more) = rx.try_recv() {
                if !feed(&connection_id, &mut sink, &more).await {
                    break 'outer;
                }
            }

            if sink.flush().await.is_err() {
                break;
            }
        }

        let _ = sink.close().await;
    })
}

/// Queue one message on the sink. False when the sink is broken.
async fn feed<S>(
    connection_id: &ConnectionId,
    sink: &mut SplitSink<WebSocketStream<S>, WsMessage>,
    message: &Message,
) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let json = match message.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!(%connection_id, "dropping unencodable message: {e}");
            return true;
        }
    };

    debug!(%connection_id, message = %message.to_log_string(), "send to client");
    sink.feed(WsMessage::text(json)).await.is_ok()
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
