//! Client trait for node access

use std::time::Duration;

use crate::Result;
use crate::types::{Channel, DevicePacketSet, LeaseId, Port, TypeMask};

/// Default byte budget per `getDevicePackets` round trip
pub const DEFAULT_MAX_BYTES: i32 = 1024;

/// Default node-side timeout for collecting a batch, in milliseconds
pub const DEFAULT_TIMEOUT_MILLIS: i32 = 20_000;

/// Arguments of one `getDevicePackets` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketRequest {
    pub source_id: i64,
    /// Inclusive window start, milliseconds since the epoch
    pub start: i64,
    /// Inclusive window end, milliseconds since the epoch
    pub end: i64,
    pub max_bytes: i32,
    /// Wanted kinds; [`TypeMask::EMPTY`] asks for the device's default filters
    pub type_mask: TypeMask,
    pub timeout_millis: i32,
    pub exclude_stale: bool,
}

impl PacketRequest {
    pub fn new(source_id: i64, start: i64, end: i64) -> Self {
        Self {
            source_id,
            start,
            end,
            max_bytes: DEFAULT_MAX_BYTES,
            type_mask: TypeMask::ALL,
            timeout_millis: DEFAULT_TIMEOUT_MILLIS,
            exclude_stale: true,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: i32) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_types(mut self, type_mask: TypeMask) -> Self {
        self.type_mask = type_mask;
        self
    }

    pub fn with_timeout_millis(mut self, timeout_millis: i32) -> Self {
        self.timeout_millis = timeout_millis;
        self
    }

    pub fn with_stale(mut self, include_stale: bool) -> Self {
        self.exclude_stale = !include_stale;
        self
    }

    /// Same request with the window start moved to `start`.
    pub fn starting_at(&self, start: i64) -> Self {
        Self { start, ..*self }
    }

    /// Same request with the window end moved to `end`.
    pub fn ending_at(&self, end: i64) -> Self {
        Self { end, ..*self }
    }
}

/// Shore-side view of a node's remote operations
///
/// Implementations own one logical connection and serve one request at a
/// time; `&mut self` makes concurrent callers serialize access. Remote
/// application errors surface as [`crate::MooringError::Remote`] so callers
/// can match on [`crate::RemoteError`].
#[async_trait::async_trait]
pub trait NodeClient: Send + 'static {
    /// Fetch one bounded batch of packets.
    ///
    /// Returns:
    /// - `Ok(set)` with `set.complete == true` when nothing passes beyond this
    ///   batch in the requested window
    /// - `Err(Remote { NoData })` when the window holds no matching packet
    /// - `Err(Remote { DeviceNotFound })` for an unknown source
    async fn get_device_packets(&mut self, request: &PacketRequest) -> Result<DevicePacketSet>;

    async fn establish_lease(
        &mut self,
        duration: Duration,
        client_note: &str,
        channel: Channel,
    ) -> Result<LeaseId>;

    async fn renew_lease(&mut self, id: LeaseId, duration: Duration, channel: Channel)
    -> Result<()>;

    async fn terminate_lease(&mut self, id: LeaseId, channel: Channel) -> Result<()>;

    async fn get_ports(&mut self) -> Result<Vec<Port>>;

    async fn get_name(&mut self) -> Result<String>;

    async fn get_id(&mut self) -> Result<i64>;

    /// Re-open a torn connection. Never called implicitly.
    async fn reconnect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Drop the connection after abandoning a call whose reply is unread.
    fn disconnect(&mut self) {}
}
