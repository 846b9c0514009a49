//! Lease-arbitrated telemetry retrieval for intermittently connected sensor nodes.
//!
//! Mooring talks to remote sensor nodes (moorings, buoys, observatories) over a
//! request/response RPC link that may only be up for short windows.
//!
//! # Features
//!
//! - **Bounded retrieval**: paginated `getDevicePackets` round trips that resume
//!   without gaps or duplicates after a failure
//! - **Leases**: reserve, renew and release a node's communications medium
//! - **Sticky publishing**: forward each packet to downstream consumers once,
//!   with a durable per-device checkpoint
//! - **Local logs**: append-only packet files with torn-tail repair
//!
//! ## Example
//!
//! ```rust,no_run
//! use mooring::{Mooring, MooringConfig};
//! use mooring::client::PacketRequest;
//! use mooring::retrieval::RetrievalCursor;
//! use mooring::types::Packet;
//!
//! #[tokio::main]
//! async fn main() -> mooring::Result<()> {
//!     let config = MooringConfig::load(None)?;
//!     let mut node = Mooring::connect("buoy-7.local:7100", &config).await?;
//!
//!     let request = PacketRequest::new(1553, 0, mooring::time::now_millis());
//!     let mut packets: Vec<Packet> = Vec::new();
//!     RetrievalCursor::new(request).run(&mut node, &mut packets).await?;
//!     println!("{} packets", packets.len());
//!     Ok(())
//! }
//! ```

mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Wire and storage formats
pub mod codec;
pub mod store;

// Node protocol
pub mod client;
pub mod node;
pub mod transport;

// Tool workflows
pub mod checkpoint;
pub mod filter;
pub mod forwarder;
pub mod lease;
pub mod parser;
pub mod retrieval;
pub mod sampler;

// Ambient
pub mod config;
pub mod logging;
pub mod time;

pub use config::MooringConfig;
pub use error::*;

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::node::NodeService;
use crate::transport::{NodeServer, Transport};

/// Entry point for both sides of the node link.
///
/// ```rust,no_run
/// use mooring::{Mooring, MooringConfig};
/// use mooring::node::MemoryNode;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> mooring::Result<()> {
/// let server = Mooring::serve("127.0.0.1:7100", Arc::new(MemoryNode::new("buoy-7", 42))).await?;
/// let addr = server.local_addr().to_string();
/// let mut client = Mooring::connect(&addr, &MooringConfig::default()).await?;
/// # Ok(())
/// # }
/// ```
pub struct Mooring;

impl Mooring {
    /// Connect to a node, using the configured RPC timeout.
    pub async fn connect(addr: &str, config: &MooringConfig) -> Result<Transport> {
        Transport::connect(addr, config.transport.timeout()).await
    }

    /// Bind `addr` and serve `service` until the returned server is shut down
    /// or dropped.
    pub async fn serve<N: NodeService>(addr: &str, service: Arc<N>) -> Result<NodeServer> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| {
                MooringError::connection_failed_with_source(
                    format!("cannot bind {}", addr),
                    Box::new(e),
                )
            })?;
        NodeServer::spawn(listener, service)
    }
}
