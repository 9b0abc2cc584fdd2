//! WebSocket binding using `tokio-tungstenite`, for deployments that
//! bridge browser clients.

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Channel, ChannelId, Listener, Transport, TransportError};

type ServerStream = WebSocketStream<TcpStream>;
type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn ws_io_error(e: tokio_tungstenite::tungstenite::Error) -> std::io::Error {
    std::io::Error::other(e)
}

/// Connects WebSocket channels to remote hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl Transport for WsTransport {
    type Channel = WsChannel<ClientStream>;

    async fn connect(
        &self,
        host: &str,
    ) -> Result<Self::Channel, TransportError> {
        let url = format!("ws://{host}");
        let (ws, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| TransportError::Connect {
                host: host.to_string(),
                source: ws_io_error(e),
            })?;
        let channel = WsChannel::new(ws);
        tracing::debug!(id = %channel.id(), host, "WebSocket channel connected");
        Ok(channel)
    }
}

/// Accepts WebSocket channels from remote clients.
pub struct WsListenerTransport {
    listener: TcpListener,
}

impl WsListenerTransport {
    /// Binds a listener to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket listener bound");
        Ok(Self { listener })
    }
}

impl Listener for WsListenerTransport {
    type Channel = WsChannel<ServerStream>;

    async fn accept(&mut self) -> Result<Self::Channel, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| TransportError::AcceptFailed(ws_io_error(e)))?;
        let channel = WsChannel::new(ws);
        tracing::debug!(id = %channel.id(), %addr, "accepted WebSocket channel");
        Ok(channel)
    }

    fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

/// A single WebSocket channel. Binary and text messages both surface
/// as byte chunks; control frames are skipped.
pub struct WsChannel<S> {
    id: ChannelId,
    ws: Mutex<S>,
}

impl<S> WsChannel<S> {
    fn new(ws: S) -> Self {
        Self {
            id: ChannelId::next(),
            ws: Mutex::new(ws),
        }
    }
}

impl<S> Channel for WsChannel<S>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + futures_util::Stream<
            Item = Result<Message, tokio_tungstenite::tungstenite::Error>,
        > + Unpin
        + Send
        + Sync
        + 'static,
{
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        use futures_util::SinkExt;
        let msg = Message::Binary(data.to_vec().into());
        self.ws
            .lock()
            .await
            .send(msg)
            .await
            .map_err(|e| TransportError::SendFailed(ws_io_error(e)))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        use futures_util::StreamExt;
        loop {
            let msg = self.ws.lock().await.next().await;
            match msg {
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(data.into()));
                }
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        ws_io_error(e),
                    ));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        use futures_util::SinkExt;
        let mut ws = self.ws.lock().await;
        // Closing an already-closed stream is fine.
        let _ = ws.send(Message::Close(None)).await;
        Ok(())
    }

    fn id(&self) -> ChannelId {
        self.id
    }
}
