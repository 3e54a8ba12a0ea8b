use crate::protocol::error::{FilamentError, Result};
use crate::protocol::{CallRequest, CallResponse, Disconnect, Heartbeat};
use crate::transport::Transporter;
use async_trait::async_trait;

/// No-op transport for single-node meshes.
///
/// Publishes succeed silently (there is nobody to gossip with); dispatching a
/// remote call is always an error, because a mesh without a transport cannot
/// have remote nodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransporter;

#[async_trait]
impl Transporter for NullTransporter {
    fn name(&self) -> &'static str {
        "Null"
    }

    async fn request(&self, addr: &str, _request: &CallRequest) -> Result<CallResponse> {
        Err(FilamentError::NodeUnavailable {
            node: addr.to_string(),
            detail: "null transport cannot reach remote nodes".to_string(),
        })
    }

    async fn publish_heartbeat(&self, _addr: &str, _beat: &Heartbeat) -> Result<()> {
        Ok(())
    }

    async fn publish_disconnect(&self, _addr: &str, _packet: &Disconnect) -> Result<()> {
        Ok(())
    }
}
