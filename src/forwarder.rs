//! Checkpointed downstream forwarding
//!
//! A [`Forwarder`] exports packets of one source to a [`Publisher`].
//!
//! - **Sticky**: loads the source's checkpoint at start-up, forwards only
//!   packets with a sequence number above it, tracks a high-water mark and
//!   persists it in [`Forwarder::finish`]. A crash before `finish` re-forwards
//!   the run on the next start (at-least-once).
//! - **Non-sticky**: forwards everything it is given.
//! - **Dry run**: encodes and counts, publishes nothing, never writes the
//!   checkpoint.
//!
//! A packet that fails to encode or publish is logged and skipped; the run
//! continues with the next packet.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use mooring::checkpoint::CheckpointStore;
//! use mooring::forwarder::{Forwarder, WriterPublisher};
//! use mooring::store::FileLog;
//!
//! # #[tokio::main]
//! # async fn main() -> mooring::Result<()> {
//! let log = FileLog::open("/var/lib/mooring", 1553)?;
//! let publisher = WriterPublisher::new(tokio::io::stdout());
//! let store = CheckpointStore::new("/var/lib/mooring", "logPostpublish");
//! let mut forwarder = Forwarder::sticky(1553, publisher, store);
//! forwarder.forward_log(&log, 0, i64::MAX).await?;
//! let stats = forwarder.finish().await?;
//! eprintln!("forwarded {}", stats.forwarded);
//! # Ok(())
//! # }
//! ```

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

use crate::checkpoint::CheckpointStore;
use crate::codec;
use crate::retrieval::BatchSink;
use crate::store::PacketLog;
use crate::types::Packet;
use crate::{MooringError, Result};

/// Downstream consumer of exported packet records.
#[async_trait::async_trait]
pub trait Publisher: Send {
    /// Deliver one exported record.
    async fn publish(&mut self, packet: &Packet, record: &[u8]) -> Result<()>;

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Publisher writing `u32 big-endian length + record` frames to a byte sink.
pub struct WriterPublisher<W> {
    writer: W,
    published: u64,
}

impl<W> WriterPublisher<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self { writer, published: 0 }
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait::async_trait]
impl<W> Publisher for WriterPublisher<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn publish(&mut self, _packet: &Packet, record: &[u8]) -> Result<()> {
        let len = u32::try_from(record.len())
            .map_err(|_| MooringError::codec("publisher", "record exceeds u32 length"))?;
        self.writer.write_all(&len.to_be_bytes()).await?;
        self.writer.write_all(record).await?;
        self.published += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// Publisher collecting records in memory.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    pub records: Vec<(i64, Vec<u8>)>,
}

#[async_trait::async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&mut self, packet: &Packet, record: &[u8]) -> Result<()> {
        self.records.push((packet.sequence_no, record.to_vec()));
        Ok(())
    }
}

/// What happened to one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Forwarded,
    /// Encoded in a dry run
    Tested,
    /// At or below the checkpoint
    AlreadySeen,
    /// Belongs to another source
    ForeignSource,
    Failed,
}

/// Counters for one forwarding run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForwardStats {
    pub forwarded: u64,
    pub tested: u64,
    pub already_seen: u64,
    pub foreign: u64,
    pub failed: u64,
    /// Checkpoint persisted by [`Forwarder::finish`]
    pub checkpoint: Option<i64>,
}

impl ForwardStats {
    fn record(&mut self, outcome: ForwardOutcome) {
        match outcome {
            ForwardOutcome::Forwarded => self.forwarded += 1,
            ForwardOutcome::Tested => self.tested += 1,
            ForwardOutcome::AlreadySeen => self.already_seen += 1,
            ForwardOutcome::ForeignSource => self.foreign += 1,
            ForwardOutcome::Failed => self.failed += 1,
        }
    }
}

pub struct Forwarder<P> {
    source_id: i64,
    publisher: P,
    checkpoint: Option<CheckpointStore>,
    /// Checkpoint value read at start-up
    resume_after: Option<i64>,
    high_water: Option<i64>,
    dry_run: bool,
    stats: ForwardStats,
}

impl<P: Publisher> Forwarder<P> {
    /// Forward every packet unconditionally.
    pub fn non_sticky(source_id: i64, publisher: P) -> Self {
        Self {
            source_id,
            publisher,
            checkpoint: None,
            resume_after: None,
            high_water: None,
            dry_run: false,
            stats: ForwardStats::default(),
        }
    }

    /// Forward only packets past the stored checkpoint for `source_id`.
    pub fn sticky(source_id: i64, publisher: P, store: CheckpointStore) -> Self {
        let resume_after = store.load(source_id);
        match resume_after {
            Some(seq) => info!("Device {}: resuming after sequence {}", source_id, seq),
            None => info!("Device {}: no checkpoint, forwarding everything", source_id),
        }
        Self {
            resume_after,
            checkpoint: Some(store),
            ..Self::non_sticky(source_id, publisher)
        }
    }

    /// Encode and count without publishing.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn source_id(&self) -> i64 {
        self.source_id
    }

    pub fn is_sticky(&self) -> bool {
        self.checkpoint.is_some()
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn resume_after(&self) -> Option<i64> {
        self.resume_after
    }

    pub fn high_water(&self) -> Option<i64> {
        self.high_water
    }

    pub fn stats(&self) -> ForwardStats {
        self.stats
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Highest sequence number that must not be forwarded again.
    fn floor(&self) -> Option<i64> {
        if !self.is_sticky() {
            return None;
        }
        match (self.resume_after, self.high_water) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    pub async fn forward(&mut self, packet: &Packet) -> ForwardOutcome {
        let outcome = self.forward_one(packet).await;
        self.stats.record(outcome);
        outcome
    }

    async fn forward_one(&mut self, packet: &Packet) -> ForwardOutcome {
        if packet.source_id != self.source_id {
            warn!(
                "Skipping packet {} from device {} (forwarding device {})",
                packet.sequence_no, packet.source_id, self.source_id
            );
            return ForwardOutcome::ForeignSource;
        }
        if self.floor().is_some_and(|floor| packet.sequence_no <= floor) {
            trace!("Packet {} already forwarded", packet.sequence_no);
            return ForwardOutcome::AlreadySeen;
        }

        let record = match codec::to_bytes(packet) {
            Ok(record) => record,
            Err(e) => {
                warn!("Cannot export packet {}: {}", packet.sequence_no, e);
                return ForwardOutcome::Failed;
            }
        };
        if self.dry_run {
            trace!("Encoded packet {} ({} bytes)", packet.sequence_no, record.len());
            return ForwardOutcome::Tested;
        }

        match self.publisher.publish(packet, &record).await {
            Ok(()) => {
                self.high_water = Some(
                    self.high_water.map_or(packet.sequence_no, |h| h.max(packet.sequence_no)),
                );
                ForwardOutcome::Forwarded
            }
            Err(e) => {
                warn!("Failed to publish packet {}: {}", packet.sequence_no, e);
                ForwardOutcome::Failed
            }
        }
    }

    pub async fn forward_all(&mut self, packets: &[Packet]) {
        for packet in packets {
            self.forward(packet).await;
        }
    }

    /// Forward the packets of a local log captured in `[start, end]`.
    pub async fn forward_log<L>(&mut self, log: &L, start: i64, end: i64) -> Result<ForwardStats>
    where
        L: PacketLog + ?Sized,
    {
        let packets = log.packets_between(start, end)?;
        debug!("Forwarding {} logged packets between {} and {}", packets.len(), start, end);
        self.forward_all(&packets).await;
        Ok(self.stats)
    }

    /// Flush the publisher and persist the high-water mark.
    ///
    /// A checkpoint write failure is logged, not returned: the next run
    /// re-forwards instead.
    pub async fn finish(mut self) -> Result<ForwardStats> {
        self.publisher.flush().await?;

        if let (Some(store), Some(high_water), false) =
            (&self.checkpoint, self.high_water, self.dry_run)
        {
            if self.resume_after.is_none_or(|previous| high_water > previous) {
                match store.store(self.source_id, high_water) {
                    Ok(()) => self.stats.checkpoint = Some(high_water),
                    Err(e) => warn!("Checkpoint not saved: {}", e),
                }
            }
        }

        info!(
            "Device {}: forwarded {}, tested {}, already seen {}, failed {}",
            self.source_id,
            self.stats.forwarded,
            self.stats.tested,
            self.stats.already_seen,
            self.stats.failed
        );
        Ok(self.stats)
    }
}

#[async_trait::async_trait]
impl<P: Publisher> BatchSink for Forwarder<P> {
    async fn persist(&mut self, batch: &[Packet]) -> Result<()> {
        self.forward_all(batch).await;
        Ok(())
    }
}
