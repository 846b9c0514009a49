//! Append-only packet logs
//!
//! Retrieved packets are saved locally, one log per source, independently of
//! downstream forwarding. The node keeps the same kind of log for its own
//! instruments. Two implementations share the [`PacketLog`] trait:
//!
//! - [`MemoryLog`] keeps packets in a `Vec`; used by the reference node and tests
//! - [`FileLog`] appends length-prefixed interchange records to
//!   `<dir>/<sourceID>.pkt`
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use mooring::store::{FileLog, PacketLog};
//! use mooring::types::Packet;
//!
//! # fn main() -> mooring::Result<()> {
//! let mut log = FileLog::open("/var/lib/mooring", 1553)?;
//! log.append(&Packet::sensor_data(1553, 1000, 100, b"12.1".to_vec()))?;
//! let resume_from = log.max_timestamp().map_or(0, |t| t + 1);
//! # Ok(())
//! # }
//! ```

mod file;
mod memory;

pub use file::FileLog;
pub use memory::MemoryLog;

use crate::Result;
use crate::types::Packet;

/// Outcome of [`PacketLog::check_and_repair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepairReport {
    /// Records that decode cleanly
    pub records: usize,
    /// Complete records that failed to decode; kept in place but skipped on read
    pub undecodable: usize,
    /// Bytes of torn tail removed
    pub truncated_bytes: u64,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.undecodable == 0 && self.truncated_bytes == 0
    }
}

/// Append-only per-source packet store.
pub trait PacketLog: Send {
    fn append(&mut self, packet: &Packet) -> Result<()>;

    /// Packets with `start <= system_time <= end`, in append order.
    fn packets_between(&self, start: i64, end: i64) -> Result<Vec<Packet>>;

    /// Packets with `system_time >= start`, in append order.
    fn packets_from(&self, start: i64) -> Result<Vec<Packet>> {
        self.packets_between(start, i64::MAX)
    }

    /// Latest capture time in the log.
    fn max_timestamp(&self) -> Option<i64>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Verify the log and drop any torn trailing record.
    fn check_and_repair(&mut self) -> Result<RepairReport>;
}
