//! Bounded packet batches

use super::Packet;
use crate::codec;

/// One batch returned by a `getDevicePackets` round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DevicePacketSet {
    /// Packets in node order
    pub packets: Vec<Packet>,

    /// No further packets exist in the requested window.
    ///
    /// `false` only means the byte budget was exhausted; the caller must
    /// issue another round-trip with an advanced start time.
    pub complete: bool,
}

impl DevicePacketSet {
    pub fn new(packets: Vec<Packet>, complete: bool) -> Self {
        Self { packets, complete }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Total exported size of the batch in bytes.
    pub fn encoded_len(&self) -> usize {
        self.packets.iter().map(codec::encoded_len).sum()
    }

    /// Latest capture time in the batch.
    pub fn max_system_time(&self) -> Option<i64> {
        self.packets.iter().map(|p| p.system_time).max()
    }
}
