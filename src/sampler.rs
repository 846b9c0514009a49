//! Background periodic retrieval
//!
//! [`PeriodicSampler::spawn`] starts a task that owns a client and a sink and,
//! on every tick, retrieves everything from the last cursor position up to
//! "now". Progress is published through a `watch` channel; the caller keeps
//! its own task free for interactive use.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::client::{NodeClient, PacketRequest};
use crate::retrieval::{BatchSink, RetrievalCursor};
use crate::time::now_millis;

/// Outcome of one sampling tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleReport {
    /// Successful ticks so far, starting at 1
    pub tick: u64,
    pub rounds: u32,
    /// Packets retrieved in this tick
    pub packets: u64,
    /// Packets retrieved since the sampler started
    pub total_packets: u64,
    /// Next window start
    pub cursor: i64,
}

/// Handle to a running sampler. Dropping it stops the sampler.
pub struct SamplerHandle {
    /// Latest report; `None` until the first tick completes and again after
    /// the sampler gives up
    pub reports: watch::Receiver<Option<Arc<SampleReport>>>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
}

impl SamplerHandle {
    /// Stream of reports, starting with the latest one if any.
    ///
    /// The stream ends when the sampler stops.
    pub fn report_stream(&self) -> impl Stream<Item = Arc<SampleReport>> + Send + 'static {
        WatchStream::new(self.reports.clone()).filter_map(|report| async move { report })
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct PeriodicSampler;

impl PeriodicSampler {
    /// Spawn the sampling task.
    ///
    /// `request.start` is the first window start; the window end is moved to
    /// the current time on every tick.
    pub fn spawn<C, S>(
        client: C,
        sink: S,
        request: PacketRequest,
        interval: Duration,
    ) -> SamplerHandle
    where
        C: NodeClient,
        S: BatchSink + 'static,
    {
        let (report_tx, report_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let cancel_task = cancel.clone();

        tokio::spawn(async move {
            Self::sample_task(client, sink, request, interval, report_tx, cancel_task).await;
        });

        SamplerHandle { reports: report_rx, cancel }
    }

    async fn sample_task<C, S>(
        mut client: C,
        mut sink: S,
        request: PacketRequest,
        interval: Duration,
        report_tx: watch::Sender<Option<Arc<SampleReport>>>,
        cancel: CancellationToken,
    ) where
        C: NodeClient,
        S: BatchSink,
    {
        info!("Sampler for device {} started ({:?} interval)", request.source_id, interval);
        let mut cursor = RetrievalCursor::new(request);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick = 0u64;
        let mut total_packets = 0u64;
        let mut error_count = 0u32;
        const MAX_ERRORS: u32 = 10;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Sampler cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            cursor.extend_to(now_millis());
            trace!("Sampling from {} to {}", cursor.position(), cursor.request().end);

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Sampler cancelled during retrieval");
                    break;
                }
                result = cursor.run(&mut client, &mut sink) => result,
            };

            match result {
                Ok(summary) => {
                    tick += 1;
                    error_count = 0;
                    total_packets += summary.packets;
                    let report = SampleReport {
                        tick,
                        rounds: summary.rounds,
                        packets: summary.packets,
                        total_packets,
                        cursor: summary.cursor,
                    };
                    if report_tx.send(Some(Arc::new(report))).is_err() {
                        debug!("Report receiver dropped, shutting down");
                        break;
                    }
                }
                Err(e) => {
                    error_count += 1;
                    error!("Sampling error ({}/{}): {}", error_count, MAX_ERRORS, e);

                    if error_count >= MAX_ERRORS {
                        error!("Too many sampling errors, shutting down");
                        let _ = report_tx.send(None);
                        break;
                    }

                    // Exponential backoff: 50ms, 100ms, 200ms, ...
                    let backoff = Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    if let Err(e) = client.reconnect().await {
                        debug!("Reconnect failed: {}", e);
                    }
                }
            }
        }

        info!("Sampler ended after {} ticks ({} packets)", tick, total_packets);
    }
}
