//! Filament Transport Adapters
//!
//! The control plane talks to the outside world through the [`Transporter`]
//! seam: one dispatch method for outbound calls and two publish methods for
//! gossip. It never manages transport-internal state.
//!
//! # Built-ins
//!
//! - **[`TcpTransporter`]**: length-prefixed frames over TCP, payloads encoded
//!   by the configured serializer
//! - **[`NullTransporter`]**: no-op adapter for single-node meshes

pub mod null;
pub mod tcp;

pub use null::NullTransporter;
pub use tcp::{TcpSettings, TcpTransporter};

use crate::protocol::error::Result;
use crate::protocol::{CallRequest, CallResponse, Disconnect, Heartbeat};
use async_trait::async_trait;

/// Narrow adapter interface between the control plane and a wire transport.
///
/// `addr` is the peer's dial target as advertised in its heartbeat metadata
/// (`"address"` key). Implementations own connection handling entirely; the
/// caller bounds every dispatch with its own deadline.
#[async_trait]
pub trait Transporter: Send + Sync {
    /// Adapter-type name, as used by the configuration resolver.
    fn name(&self) -> &'static str;

    /// Dispatches one call to a peer and waits for its response.
    async fn request(&self, addr: &str, request: &CallRequest) -> Result<CallResponse>;

    /// Publishes a heartbeat to a peer. Fire-and-forget.
    async fn publish_heartbeat(&self, addr: &str, beat: &Heartbeat) -> Result<()>;

    /// Publishes a disconnect notice to a peer. Fire-and-forget.
    async fn publish_disconnect(&self, addr: &str, packet: &Disconnect) -> Result<()>;

    /// Optional bootstrap peer derived from the adapter's configuration
    /// (e.g. the authority of a `tcp://host:port` URI). Heartbeats are sent
    /// here even before the peer shows up in the registry.
    fn seed(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests;
