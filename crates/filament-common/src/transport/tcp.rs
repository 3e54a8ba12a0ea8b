use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::protocol::error::{FilamentError, Result};
use crate::protocol::{CallRequest, CallResponse, Disconnect, Heartbeat};
use crate::serializer::Serializer;
use crate::transport::Transporter;
use async_trait::async_trait;

/// Frame kind tags on the wire.
pub const FRAME_REQUEST: u8 = 0;
pub const FRAME_HEARTBEAT: u8 = 1;
pub const FRAME_DISCONNECT: u8 = 2;

/// Default limit on a single frame payload (100 MB), preventing memory
/// exhaustion from a corrupt or hostile length prefix.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 100 * 1024 * 1024;

/// TCP adapter settings. Unknown keys in a descriptor's `settings` map are
/// rejected; missing keys fall back to these defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct TcpSettings {
    /// Dial timeout per connection attempt, in milliseconds
    pub connect_timeout_ms: u64,
    /// Upper bound on a single frame payload, in bytes
    pub max_frame_bytes: usize,
    /// Bootstrap peer to gossip with before any heartbeat arrives
    pub seed: Option<String>,
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            seed: None,
        }
    }
}

/// TCP transport adapter.
///
/// Opens a fresh connection per packet, which keeps concurrent dispatches to
/// the same peer fully independent — no shared connection state, no pooling.
///
/// # Wire Protocol
///
/// Every packet is framed as a 1-byte kind tag, a 4-byte length prefix
/// (big-endian u32) and the payload encoded by the configured serializer:
///
/// ```text
/// [kind] [4-byte length] [payload]
/// ```
///
/// A request frame is answered by a single `[4-byte length] [payload]`
/// response frame on the same connection; heartbeat and disconnect frames are
/// fire-and-forget.
pub struct TcpTransporter {
    serializer: Arc<Serializer>,
    settings: TcpSettings,
}

impl TcpTransporter {
    pub fn new(serializer: Arc<Serializer>, settings: TcpSettings) -> Self {
        Self {
            serializer,
            settings,
        }
    }

    /// Builds the adapter from a `tcp://host:port` URI; the authority becomes
    /// the bootstrap seed peer.
    pub fn from_uri(serializer: Arc<Serializer>, uri: &str) -> Result<Self> {
        let authority = uri
            .strip_prefix("tcp://")
            .ok_or_else(|| FilamentError::ConfigResolution(format!("invalid TCP URI '{uri}'")))?;
        if authority.is_empty() {
            return Err(FilamentError::ConfigResolution(format!(
                "TCP URI '{uri}' is missing a host"
            )));
        }
        let settings = TcpSettings {
            seed: Some(authority.to_string()),
            ..TcpSettings::default()
        };
        Ok(Self::new(serializer, settings))
    }

    /// Connects to a peer, trying each resolved address until one succeeds.
    async fn connect(&self, addr: &str) -> Result<TcpStream> {
        let socket_addrs = addr
            .to_socket_addrs()
            .map_err(|e| FilamentError::Connection(format!("Invalid address '{}': {}", addr, e)))?;

        let connect_timeout = Duration::from_millis(self.settings.connect_timeout_ms);
        let mut last_err = None;
        for socket_addr in socket_addrs {
            match tokio::time::timeout(connect_timeout, TcpStream::connect(&socket_addr)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => last_err = Some(e.to_string()),
                Err(_) => {
                    last_err = Some(format!(
                        "connect timed out after {}ms",
                        self.settings.connect_timeout_ms
                    ))
                }
            }
        }

        Err(FilamentError::Connection(format!(
            "Failed to connect to {}: {}",
            addr,
            last_err.unwrap_or_else(|| "Unknown error".to_string())
        )))
    }

    /// Sends one tagged, length-prefixed frame.
    async fn send_frame(stream: &mut TcpStream, kind: u8, data: &[u8]) -> Result<()> {
        let len = data.len() as u32;

        stream
            .write_all(&[kind])
            .await
            .map_err(|e| map_io_error(e, "writing frame kind"))?;
        stream
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|e| map_io_error(e, "writing length prefix"))?;
        stream
            .write_all(data)
            .await
            .map_err(|e| map_io_error(e, "writing payload"))?;
        stream
            .flush()
            .await
            .map_err(|e| map_io_error(e, "flushing stream"))?;

        Ok(())
    }

    /// Receives one length-prefixed frame payload.
    async fn read_frame(stream: &mut TcpStream, max_frame_bytes: usize) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| map_io_error(e, "reading length prefix"))?;

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > max_frame_bytes {
            return Err(FilamentError::Transport(format!(
                "Frame too large: {} bytes (max {} bytes)",
                len, max_frame_bytes
            )));
        }

        let mut buf = vec![0u8; len];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| map_io_error(e, "reading payload"))?;

        Ok(buf)
    }

    async fn publish(&self, addr: &str, kind: u8, payload: &[u8]) -> Result<()> {
        let mut stream = self.connect(addr).await?;
        Self::send_frame(&mut stream, kind, payload).await
    }
}

#[async_trait]
impl Transporter for TcpTransporter {
    fn name(&self) -> &'static str {
        "TCP"
    }

    async fn request(&self, addr: &str, request: &CallRequest) -> Result<CallResponse> {
        let encoded = self.serializer.encode_request(request)?;

        let mut stream = self.connect(addr).await?;
        Self::send_frame(&mut stream, FRAME_REQUEST, &encoded).await?;

        let response_data = Self::read_frame(&mut stream, self.settings.max_frame_bytes).await?;
        self.serializer.decode_response(&response_data)
    }

    async fn publish_heartbeat(&self, addr: &str, beat: &Heartbeat) -> Result<()> {
        let encoded = self.serializer.encode_heartbeat(beat)?;
        self.publish(addr, FRAME_HEARTBEAT, &encoded).await
    }

    async fn publish_disconnect(&self, addr: &str, packet: &Disconnect) -> Result<()> {
        let encoded = self.serializer.encode_disconnect(packet)?;
        self.publish(addr, FRAME_DISCONNECT, &encoded).await
    }

    fn seed(&self) -> Option<String> {
        self.settings.seed.clone()
    }
}

/// Map IO errors to transport error variants: timeouts become
/// `RequestTimeout`, lost connections become `Connection`, the rest pass
/// through as `Io`.
fn map_io_error(err: std::io::Error, context: &str) -> FilamentError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            FilamentError::Transport(format!("{}: timed out", context))
        }
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::UnexpectedEof => {
            FilamentError::Connection(format!("{}: Connection lost", context))
        }
        _ => FilamentError::Io(err),
    }
}
