//! In-memory packet log

use super::{PacketLog, RepairReport};
use crate::Result;
use crate::types::Packet;

#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    packets: Vec<Packet>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    /// Borrowing variant of [`PacketLog::packets_between`].
    pub fn iter_between(&self, start: i64, end: i64) -> impl Iterator<Item = &Packet> {
        self.packets.iter().filter(move |p| p.system_time >= start && p.system_time <= end)
    }
}

impl From<Vec<Packet>> for MemoryLog {
    fn from(packets: Vec<Packet>) -> Self {
        Self { packets }
    }
}

impl PacketLog for MemoryLog {
    fn append(&mut self, packet: &Packet) -> Result<()> {
        self.packets.push(packet.clone());
        Ok(())
    }

    fn packets_between(&self, start: i64, end: i64) -> Result<Vec<Packet>> {
        Ok(self.iter_between(start, end).cloned().collect())
    }

    fn max_timestamp(&self) -> Option<i64> {
        self.packets.iter().map(|p| p.system_time).max()
    }

    fn len(&self) -> usize {
        self.packets.len()
    }

    fn check_and_repair(&mut self) -> Result<RepairReport> {
        Ok(RepairReport { records: self.packets.len(), ..RepairReport::default() })
    }
}
