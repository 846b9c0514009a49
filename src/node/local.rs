//! In-process client for a node service

use std::sync::Arc;
use std::time::Duration;

use super::NodeService;
use crate::client::{NodeClient, PacketRequest};
use crate::transport::wire;
use crate::types::{Channel, DevicePacketSet, LeaseId, Port};
use crate::{MooringError, Result};

/// [`NodeClient`] that calls a [`NodeService`] directly, without a socket.
pub struct LocalNode<N> {
    service: Arc<N>,
}

impl<N: NodeService> LocalNode<N> {
    pub fn new(service: Arc<N>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<N> {
        &self.service
    }
}

impl<N> Clone for LocalNode<N> {
    fn clone(&self) -> Self {
        Self { service: self.service.clone() }
    }
}

#[async_trait::async_trait]
impl<N: NodeService> NodeClient for LocalNode<N> {
    async fn get_device_packets(&mut self, request: &PacketRequest) -> Result<DevicePacketSet> {
        self.service
            .get_device_packets(*request)
            .await
            .map_err(|e| MooringError::remote(wire::GET_DEVICE_PACKETS, e))
    }

    async fn establish_lease(
        &mut self,
        duration: Duration,
        client_note: &str,
        channel: Channel,
    ) -> Result<LeaseId> {
        self.service
            .establish_lease(duration, client_note.to_string(), channel)
            .await
            .map_err(|e| MooringError::remote(wire::ESTABLISH_LEASE, e))
    }

    async fn renew_lease(
        &mut self,
        id: LeaseId,
        duration: Duration,
        channel: Channel,
    ) -> Result<()> {
        self.service
            .renew_lease(id, duration, channel)
            .await
            .map_err(|e| MooringError::remote(wire::RENEW_LEASE, e))
    }

    async fn terminate_lease(&mut self, id: LeaseId, channel: Channel) -> Result<()> {
        self.service
            .terminate_lease(id, channel)
            .await
            .map_err(|e| MooringError::remote(wire::TERMINATE_LEASE, e))
    }

    async fn get_ports(&mut self) -> Result<Vec<Port>> {
        self.service.get_ports().await.map_err(|e| MooringError::remote(wire::GET_PORTS, e))
    }

    async fn get_name(&mut self) -> Result<String> {
        self.service.get_name().await.map_err(|e| MooringError::remote(wire::GET_NAME, e))
    }

    async fn get_id(&mut self) -> Result<i64> {
        self.service.get_id().await.map_err(|e| MooringError::remote(wire::GET_ID, e))
    }
}
