//! Minimal request/response transport to a node
//!
//! A [`Transport`] owns one persistent TCP connection. Every call writes a
//! command frame and waits for exactly one response frame, bounded by the
//! transport timeout. There is no pipelining and no automatic reconnect: a
//! timeout, a torn socket or a malformed frame drops the connection and every
//! later call fails with [`MooringError::Disconnected`] until the caller runs
//! [`Transport::reconnect`].
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use mooring::client::{NodeClient, PacketRequest};
//! use mooring::transport::Transport;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> mooring::Result<()> {
//! let mut node = Transport::connect("buoy-7.local:7100", Duration::from_secs(120)).await?;
//! let name = node.get_name().await?;
//! let batch = node.get_device_packets(&PacketRequest::new(1553, 0, 2000)).await?;
//! println!("{name}: {} packets", batch.len());
//! # Ok(())
//! # }
//! ```

pub mod server;
pub mod wire;

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, trace, warn};

use crate::client::{NodeClient, PacketRequest};
use crate::types::{Channel, DevicePacketSet, LeaseId, Port};
use crate::{MooringError, Result};
use wire::Value;

pub use server::NodeServer;

/// Default per-call timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Client end of the node RPC protocol.
#[derive(Debug)]
pub struct Transport {
    addr: String,
    timeout: Duration,
    framed: Option<Framed<TcpStream, LengthDelimitedCodec>>,
}

impl Transport {
    /// Open a connection to `addr`, bounded by `timeout`.
    pub async fn connect(addr: impl Into<String>, timeout: Duration) -> Result<Self> {
        let addr = addr.into();
        let framed = Self::open(&addr, timeout).await?;
        info!("Connected to node at {}", addr);
        Ok(Self { addr, timeout, framed: Some(framed) })
    }

    async fn open(
        addr: &str,
        timeout: Duration,
    ) -> Result<Framed<TcpStream, LengthDelimitedCodec>> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(MooringError::connection_failed_with_source(
                    format!("cannot reach {}", addr),
                    Box::new(e),
                ));
            }
            Err(_) => {
                return Err(MooringError::connection_failed(format!(
                    "connecting to {} timed out after {:?}",
                    addr, timeout
                )));
            }
        };
        stream.set_nodelay(true).map_err(|e| {
            MooringError::connection_failed_with_source("cannot configure socket", Box::new(e))
        })?;
        Ok(Framed::new(stream, LengthDelimitedCodec::new()))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    /// Drop the connection; later calls fail until [`Transport::reconnect`].
    pub fn disconnect(&mut self) {
        if self.framed.take().is_some() {
            debug!("Disconnected from {}", self.addr);
        }
    }

    /// Replace the connection with a fresh one.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.framed = None;
        let framed = Self::open(&self.addr, self.timeout).await?;
        info!("Reconnected to node at {}", self.addr);
        self.framed = Some(framed);
        Ok(())
    }

    /// Send `command` with `args` and wait for the node's answer.
    pub async fn invoke(&mut self, command: &str, args: Vec<Value>) -> Result<Value> {
        let framed = self
            .framed
            .as_mut()
            .ok_or_else(|| MooringError::Disconnected { command: command.to_string() })?;
        let frame = wire::encode_request(command, &args)?.freeze();
        trace!("-> {} ({} args, {} bytes)", command, args.len(), frame.len());

        let exchange = async {
            if let Err(e) = framed.send(frame).await {
                return Err(e);
            }
            framed.next().await.transpose()
        };

        let reply = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(Some(reply))) => reply,
            Ok(Ok(None)) => {
                self.framed = None;
                warn!("Node closed the connection during '{}'", command);
                return Err(MooringError::connection_failed(format!(
                    "node closed the connection during '{}'",
                    command
                )));
            }
            Ok(Err(e)) => {
                self.framed = None;
                warn!("Transport failure during '{}': {}", command, e);
                return Err(MooringError::connection_failed_with_source(
                    format!("transport failure during '{}'", command),
                    Box::new(e),
                ));
            }
            Err(_) => {
                self.framed = None;
                warn!("'{}' timed out after {:?}; connection dropped", command, self.timeout);
                return Err(MooringError::Timeout {
                    command: command.to_string(),
                    duration: self.timeout,
                });
            }
        };

        trace!("<- {} ({} bytes)", command, reply.len());
        match wire::decode_response(reply.freeze()) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(remote)) => Err(MooringError::remote(command, remote)),
            Err(e) => {
                // The stream position can no longer be trusted.
                self.framed = None;
                Err(e)
            }
        }
    }
}

#[async_trait::async_trait]
impl NodeClient for Transport {
    async fn get_device_packets(&mut self, request: &PacketRequest) -> Result<DevicePacketSet> {
        let args = vec![
            Value::Long(request.source_id),
            Value::Long(request.start),
            Value::Long(request.end),
            Value::Int(request.max_bytes),
            Value::Int(request.type_mask.bits()),
            Value::Int(request.timeout_millis),
            Value::Bool(request.exclude_stale),
        ];
        self.invoke(wire::GET_DEVICE_PACKETS, args)
            .await?
            .into_packet_set(wire::GET_DEVICE_PACKETS)
    }

    async fn establish_lease(
        &mut self,
        duration: Duration,
        client_note: &str,
        channel: Channel,
    ) -> Result<LeaseId> {
        let args = vec![
            Value::Long(duration_millis(duration)),
            Value::Bytes(client_note.as_bytes().to_vec()),
            Value::Bool(channel.is_primary()),
        ];
        let id = self.invoke(wire::ESTABLISH_LEASE, args).await?.into_int(wire::ESTABLISH_LEASE)?;
        Ok(LeaseId(id))
    }

    async fn renew_lease(
        &mut self,
        id: LeaseId,
        duration: Duration,
        channel: Channel,
    ) -> Result<()> {
        let args = vec![
            Value::Int(id.0),
            Value::Long(duration_millis(duration)),
            Value::Bool(channel.is_primary()),
        ];
        self.invoke(wire::RENEW_LEASE, args).await?.into_unit(wire::RENEW_LEASE)
    }

    async fn terminate_lease(&mut self, id: LeaseId, channel: Channel) -> Result<()> {
        let args = vec![Value::Int(id.0), Value::Bool(channel.is_primary())];
        self.invoke(wire::TERMINATE_LEASE, args).await?.into_unit(wire::TERMINATE_LEASE)
    }

    async fn get_ports(&mut self) -> Result<Vec<Port>> {
        self.invoke(wire::GET_PORTS, Vec::new()).await?.into_ports(wire::GET_PORTS)
    }

    async fn get_name(&mut self) -> Result<String> {
        let raw = self.invoke(wire::GET_NAME, Vec::new()).await?.into_bytes(wire::GET_NAME)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    async fn get_id(&mut self) -> Result<i64> {
        self.invoke(wire::GET_ID, Vec::new()).await?.into_long(wire::GET_ID)
    }

    async fn reconnect(&mut self) -> Result<()> {
        Transport::reconnect(self).await
    }

    fn disconnect(&mut self) {
        Transport::disconnect(self)
    }
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
