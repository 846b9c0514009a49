//! Bounded, resumable retrieval of a node's packet stream
//!
//! A [`RetrievalCursor`] walks the window `[cursor, end]` one
//! `getDevicePackets` round trip at a time:
//!
//! 1. Ask for the packets from the cursor to the window end, within the byte
//!    budget.
//! 2. Hand the batch to a [`BatchSink`]; nothing else happens until the sink
//!    has persisted it.
//! 3. Move the cursor strictly past every capture time in the batch.
//! 4. Repeat until the node marks a batch complete.
//!
//! `NoData` from the node ends the window cleanly. Any other failure aborts
//! the run; batches already persisted stay persisted and the cursor still
//! points just past them, so the next run resumes without gaps.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use mooring::client::PacketRequest;
//! use mooring::retrieval::RetrievalCursor;
//! use mooring::transport::Transport;
//! use mooring::types::{Packet, TypeMask};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> mooring::Result<()> {
//! let mut node = Transport::connect("buoy-7.local:7100", Duration::from_secs(120)).await?;
//! let request = PacketRequest::new(1553, 0, 2000).with_types(TypeMask::SENSOR_DATA);
//! let mut packets: Vec<Packet> = Vec::new();
//! let summary = RetrievalCursor::new(request).run(&mut node, &mut packets).await?;
//! println!("{} packets in {} round trips", summary.packets, summary.rounds);
//! # Ok(())
//! # }
//! ```

use tracing::{debug, error, info, warn};

use crate::client::{NodeClient, PacketRequest};
use crate::filter::TypeSelection;
use crate::store::PacketLog;
use crate::types::Packet;
use crate::{MooringError, RemoteError, Result};

/// Destination for retrieved batches.
#[async_trait::async_trait]
pub trait BatchSink: Send {
    /// Persist one batch. Returning an error aborts the retrieval run.
    async fn persist(&mut self, batch: &[Packet]) -> Result<()>;
}

#[async_trait::async_trait]
impl BatchSink for Vec<Packet> {
    async fn persist(&mut self, batch: &[Packet]) -> Result<()> {
        self.extend_from_slice(batch);
        Ok(())
    }
}

#[async_trait::async_trait]
impl<S: BatchSink + ?Sized> BatchSink for &mut S {
    async fn persist(&mut self, batch: &[Packet]) -> Result<()> {
        (**self).persist(batch).await
    }
}

/// `None` discards batches.
#[async_trait::async_trait]
impl<S: BatchSink> BatchSink for Option<S> {
    async fn persist(&mut self, batch: &[Packet]) -> Result<()> {
        match self {
            Some(sink) => sink.persist(batch).await,
            None => Ok(()),
        }
    }
}

/// Both sinks, first then second.
#[async_trait::async_trait]
impl<A: BatchSink, B: BatchSink> BatchSink for (A, B) {
    async fn persist(&mut self, batch: &[Packet]) -> Result<()> {
        self.0.persist(batch).await?;
        self.1.persist(batch).await
    }
}

/// Appends every batch to a local packet log.
pub struct LogSink<L> {
    log: L,
}

impl<L: PacketLog> LogSink<L> {
    pub fn new(log: L) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn into_inner(self) -> L {
        self.log
    }
}

#[async_trait::async_trait]
impl<L: PacketLog> BatchSink for LogSink<L> {
    async fn persist(&mut self, batch: &[Packet]) -> Result<()> {
        for packet in batch {
            self.log.append(packet)?;
        }
        Ok(())
    }
}

/// Thins batches through a [`TypeSelection`] before passing them on.
///
/// The cursor still sees every packet; only what reaches the inner sink is
/// decimated.
pub struct SelectingSink<S> {
    selection: TypeSelection,
    inner: S,
}

impl<S: BatchSink> SelectingSink<S> {
    pub fn new(selection: TypeSelection, inner: S) -> Self {
        Self { selection, inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait::async_trait]
impl<S: BatchSink> BatchSink for SelectingSink<S> {
    async fn persist(&mut self, batch: &[Packet]) -> Result<()> {
        let kept = self.selection.apply(batch.iter().cloned());
        if kept.len() < batch.len() {
            debug!("Selection kept {} of {} packets", kept.len(), batch.len());
        }
        self.inner.persist(&kept).await
    }
}

/// Totals of one [`RetrievalCursor::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetrievalSummary {
    /// Round trips that returned a batch
    pub rounds: u32,
    pub packets: u64,
    /// Cursor position after the run
    pub cursor: i64,
    /// The node reported no matching packets for the remaining window
    pub ended_empty: bool,
}

/// Paginated retrieval over one source's time window.
#[derive(Debug, Clone)]
pub struct RetrievalCursor {
    request: PacketRequest,
    cursor: i64,
}

impl RetrievalCursor {
    pub fn new(request: PacketRequest) -> Self {
        Self { cursor: request.start, request }
    }

    /// Next window start.
    pub fn position(&self) -> i64 {
        self.cursor
    }

    pub fn request(&self) -> &PacketRequest {
        &self.request
    }

    /// Move the window end, keeping the cursor; used by periodic sampling.
    pub fn extend_to(&mut self, end: i64) {
        self.request.end = end;
    }

    /// Move the cursor strictly past every capture time in `batch`.
    ///
    /// Each packet bumps the cursor to one past its own time when that is
    /// ahead, so runs of equal timestamps cannot stall the cursor and the
    /// next round trip starts at the first time not yet received.
    pub fn advance(&mut self, batch: &[Packet]) {
        for packet in batch {
            let next = packet.system_time.saturating_add(1);
            if next > self.cursor {
                self.cursor = next;
            }
        }
    }

    /// Drive round trips until the window is exhausted.
    pub async fn run<C, S>(&mut self, client: &mut C, sink: &mut S) -> Result<RetrievalSummary>
    where
        C: NodeClient + ?Sized,
        S: BatchSink + ?Sized,
    {
        let mut summary = RetrievalSummary { cursor: self.cursor, ..Default::default() };
        let source_id = self.request.source_id;

        while self.cursor <= self.request.end {
            let request = self.request.starting_at(self.cursor);
            let set = match client.get_device_packets(&request).await {
                Ok(set) => set,
                Err(MooringError::Remote { error: RemoteError::NoData { reason }, .. }) => {
                    debug!("Device {}: no data from {}: {}", source_id, self.cursor, reason);
                    summary.ended_empty = true;
                    break;
                }
                Err(e) => {
                    error!(
                        "Device {}: retrieval aborted at {} after {} round trips: {}",
                        source_id, self.cursor, summary.rounds, e
                    );
                    return Err(e);
                }
            };

            summary.rounds += 1;
            debug!(
                "Device {}: round trip {} from {} returned {} packets ({} bytes), complete={}",
                source_id,
                summary.rounds,
                self.cursor,
                set.len(),
                set.encoded_len(),
                set.complete
            );

            sink.persist(&set.packets).await?;
            self.advance(&set.packets);
            summary.packets += set.len() as u64;
            summary.cursor = self.cursor;

            if set.complete {
                break;
            }
            if set.is_empty() {
                warn!("Device {}: empty incomplete batch at {}; stopping", source_id, self.cursor);
                break;
            }
        }

        summary.cursor = self.cursor;
        info!(
            "Device {}: retrieved {} packets in {} round trips; next start {}",
            source_id, summary.packets, summary.rounds, self.cursor
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::node::{LocalNode, MemoryNode};
    use crate::types::{DevicePacketSet, Port, TypeMask};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn node_with(times: &[i64]) -> LocalNode<MemoryNode> {
        let node = MemoryNode::new("buoy-7", 42);
        node.add_port(Port::new("ctd", 1553, "SeaBird"));
        for (i, t) in times.iter().enumerate() {
            node.append(Packet::sensor_data(1553, *t, 100 + i as i64, vec![7; 16])).unwrap();
        }
        LocalNode::new(Arc::new(node))
    }

    /// Client that fails after a number of successful round trips.
    struct FailingAfter {
        inner: LocalNode<MemoryNode>,
        remaining: u32,
    }

    #[async_trait::async_trait]
    impl NodeClient for FailingAfter {
        async fn get_device_packets(&mut self, request: &PacketRequest) -> Result<DevicePacketSet> {
            if self.remaining == 0 {
                return Err(MooringError::connection_failed("link dropped"));
            }
            self.remaining -= 1;
            self.inner.get_device_packets(request).await
        }
        async fn establish_lease(
            &mut self,
            duration: std::time::Duration,
            note: &str,
            channel: crate::types::Channel,
        ) -> Result<crate::types::LeaseId> {
            self.inner.establish_lease(duration, note, channel).await
        }
        async fn renew_lease(
            &mut self,
            id: crate::types::LeaseId,
            duration: std::time::Duration,
            channel: crate::types::Channel,
        ) -> Result<()> {
            self.inner.renew_lease(id, duration, channel).await
        }
        async fn terminate_lease(
            &mut self,
            id: crate::types::LeaseId,
            channel: crate::types::Channel,
        ) -> Result<()> {
            self.inner.terminate_lease(id, channel).await
        }
        async fn get_ports(&mut self) -> Result<Vec<Port>> {
            self.inner.get_ports().await
        }
        async fn get_name(&mut self) -> Result<String> {
            self.inner.get_name().await
        }
        async fn get_id(&mut self) -> Result<i64> {
            self.inner.get_id().await
        }
    }

    fn packet_len() -> i32 {
        codec::encoded_len(&Packet::sensor_data(1553, 0, 0, vec![7; 16])) as i32
    }

    proptest! {
        #[test]
        fn chunked_retrieval_reconstructs_the_stream(
            gaps in prop::collection::vec(1i64..100, 1..60),
            budget_packets in 1i32..12,
        ) {
            let times: Vec<i64> = gaps.iter().scan(0i64, |t, g| { *t += g; Some(*t) }).collect();
            let runtime =
                tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let retrieved = runtime.block_on(async {
                let mut client = node_with(&times);
                let request = PacketRequest::new(1553, 0, i64::MAX - 1)
                    .with_max_bytes(budget_packets * packet_len());
                let mut packets: Vec<Packet> = Vec::new();
                RetrievalCursor::new(request).run(&mut client, &mut packets).await.unwrap();
                packets
            });
            let got: Vec<i64> = retrieved.iter().map(|p| p.system_time).collect();
            prop_assert_eq!(got, times);
        }
    }

    #[tokio::test]
    async fn cursor_follows_the_advance_rule() {
        let mut cursor = RetrievalCursor::new(PacketRequest::new(1, 0, 10_000));
        let batch = vec![
            Packet::sensor_data(1, 1000, 1, vec![]),
            Packet::sensor_data(1, 1000, 2, vec![]),
            Packet::sensor_data(1, 1050, 3, vec![]),
        ];
        cursor.advance(&batch);
        assert_eq!(cursor.position(), 1051);
        cursor.advance(&[]);
        assert_eq!(cursor.position(), 1051);
    }

    #[tokio::test]
    async fn duplicate_timestamps_are_neither_repeated_nor_skipped() {
        let mut client = node_with(&[1000, 1000, 1000, 1001, 1002, 1002, 1003]);
        let request = PacketRequest::new(1553, 0, 5000).with_max_bytes(1);
        let mut packets: Vec<Packet> = Vec::new();
        let summary = RetrievalCursor::new(request).run(&mut client, &mut packets).await.unwrap();
        let seqs: Vec<i64> = packets.iter().map(|p| p.sequence_no).collect();
        assert_eq!(seqs, (100..107).collect::<Vec<_>>());
        assert_eq!(summary.rounds, 4);
        assert_eq!(summary.cursor, 1004);
    }

    #[tokio::test]
    async fn empty_window_is_not_an_error() {
        let mut client = node_with(&[1000]);
        let mut packets: Vec<Packet> = Vec::new();
        let summary = RetrievalCursor::new(PacketRequest::new(1553, 2000, 3000))
            .run(&mut client, &mut packets)
            .await
            .unwrap();
        assert!(summary.ended_empty);
        assert_eq!(summary.rounds, 0);
        assert!(packets.is_empty());
    }

    #[tokio::test]
    async fn failure_keeps_persisted_batches_and_cursor() {
        let times: Vec<i64> = (0..20).map(|i| 1000 + i * 50).collect();
        let mut client = FailingAfter { inner: node_with(&times), remaining: 1 };
        let request = PacketRequest::new(1553, 0, 2000).with_max_bytes(10 * packet_len());
        let mut cursor = RetrievalCursor::new(request);
        let mut packets: Vec<Packet> = Vec::new();

        let err = cursor.run(&mut client, &mut packets).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(packets.len(), 10);
        assert_eq!(cursor.position(), 1451);

        // Resume from where the failed run stopped.
        client.remaining = u32::MAX;
        let summary = cursor.run(&mut client, &mut packets).await.unwrap();
        assert_eq!(summary.packets, 10);
        assert_eq!(packets.len(), 20);
    }

    #[tokio::test]
    async fn selecting_sink_decimates_only_what_is_saved() {
        let times: Vec<i64> = (0..9).map(|i| 1000 + i).collect();
        let mut client = node_with(&times);
        let selection = TypeSelection::new(TypeMask::SENSOR_DATA, 3).unwrap();
        let mut sink = SelectingSink::new(selection, Vec::new());
        let mut cursor = RetrievalCursor::new(PacketRequest::new(1553, 0, 5000).with_max_bytes(1));

        let summary = cursor.run(&mut client, &mut sink).await.unwrap();
        assert_eq!(summary.packets, 9);
        let kept: Vec<i64> = sink.into_inner().iter().map(|p| p.sequence_no).collect();
        assert_eq!(kept, vec![100, 103, 106]);
    }
}
