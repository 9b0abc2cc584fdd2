//! Native TCP binding using tokio sockets.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::{Channel, ChannelId, Listener, Transport, TransportError};

/// Read buffer size per `recv` call.
const READ_CHUNK: usize = 8 * 1024;

/// Connects TCP channels to remote hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    type Channel = TcpChannel;

    async fn connect(
        &self,
        host: &str,
    ) -> Result<Self::Channel, TransportError> {
        let stream = TcpStream::connect(host).await.map_err(|e| {
            TransportError::Connect {
                host: host.to_string(),
                source: e,
            }
        })?;
        let channel = TcpChannel::new(stream);
        tracing::debug!(id = %channel.id(), host, "TCP channel connected");
        Ok(channel)
    }
}

/// Accepts TCP channels from remote clients.
pub struct TcpListenerTransport {
    listener: TcpListener,
}

impl TcpListenerTransport {
    /// Binds a listener to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "TCP listener bound");
        Ok(Self { listener })
    }
}

impl Listener for TcpListenerTransport {
    type Channel = TcpChannel;

    async fn accept(&mut self) -> Result<Self::Channel, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        let channel = TcpChannel::new(stream);
        tracing::debug!(id = %channel.id(), %addr, "accepted TCP channel");
        Ok(channel)
    }

    fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

/// A single TCP channel.
///
/// The stream halves sit behind separate locks so a blocked reader
/// never stalls the writer.
#[derive(Debug)]
pub struct TcpChannel {
    id: ChannelId,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpChannel {
    fn new(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Self {
            id: ChannelId::next(),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }
}

impl Channel for TcpChannel {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(data)
            .await
            .map_err(TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut buf = vec![0u8; READ_CHUNK];
        let mut reader = self.reader.lock().await;
        let n = reader
            .read(&mut buf)
            .await
            .map_err(TransportError::ReceiveFailed)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        // Shutdown errors after a prior close are expected; ignore.
        let _ = writer.shutdown().await;
        Ok(())
    }

    fn id(&self) -> ChannelId {
        self.id
    }
}
