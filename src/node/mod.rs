//! Node side of the retrieval protocol
//!
//! [`NodeService`] is what a node implements to answer the seven RPC
//! commands. [`crate::transport::NodeServer`] exposes a service over TCP and
//! [`LocalNode`] calls one in-process. [`MemoryNode`] is a complete reference
//! node backed by in-memory packet logs.

mod local;
mod memory;

pub use local::LocalNode;
pub use memory::MemoryNode;

use std::time::Duration;

use crate::client::PacketRequest;
use crate::types::{Channel, DevicePacketSet, LeaseId, Port};
use crate::{RemoteError, Result};

/// Server half of the node RPC commands.
///
/// Failures are [`RemoteError`]s; the transport carries them to the client
/// unchanged.
#[async_trait::async_trait]
pub trait NodeService: Send + Sync + 'static {
    async fn get_device_packets(
        &self,
        request: PacketRequest,
    ) -> Result<DevicePacketSet, RemoteError>;

    async fn establish_lease(
        &self,
        duration: Duration,
        client_note: String,
        channel: Channel,
    ) -> Result<LeaseId, RemoteError>;

    async fn renew_lease(
        &self,
        id: LeaseId,
        duration: Duration,
        channel: Channel,
    ) -> Result<(), RemoteError>;

    async fn terminate_lease(&self, id: LeaseId, channel: Channel) -> Result<(), RemoteError>;

    async fn get_ports(&self) -> Result<Vec<Port>, RemoteError>;

    async fn get_name(&self) -> Result<String, RemoteError>;

    async fn get_id(&self) -> Result<i64, RemoteError>;
}
