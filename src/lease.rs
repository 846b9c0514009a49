//! Client-side lease state machine
//!
//! ```text
//! UNLEASED -> ESTABLISHED -> (RENEWED)* -> TERMINATED
//!                  \              \
//!                   +--------------+--> EXPIRED (no renewal in time)
//! ```
//!
//! [`LeaseManager`] tracks every lease this client holds, keyed by channel
//! and ID, so one process can hold independent leases on the primary and
//! auxiliary links. The channel is an argument of every call. The manager
//! never retries on its own except through
//! [`LeaseManager::execute_with_retry`], where the caller picks the cadence
//! and the cancellation token.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::NodeClient;
use crate::types::{Channel, Lease, LeaseId, LeaseState};
use crate::{MooringError, Result};

/// One lease operation, as issued by the lease utility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseRequest {
    Establish { duration: Duration, client_note: String },
    Renew { id: LeaseId, duration: Duration },
    Terminate { id: LeaseId },
}

/// Result of a successful [`LeaseRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    Granted(Lease),
    Renewed(Lease),
    Terminated(LeaseId),
}

#[derive(Debug, Clone)]
struct Tracked {
    lease: Lease,
    state: LeaseState,
}

/// Leases held by this client.
#[derive(Debug, Default)]
pub struct LeaseManager {
    leases: HashMap<(Channel, LeaseId), Tracked>,
}

/// Client note in the form the node's operators expect.
pub fn client_note(user: &str, host: &str) -> String {
    format!("user {}@{}", user, host)
}

impl LeaseManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the node for a lease. A refusal is returned as-is, never retried.
    pub async fn establish<C>(
        &mut self,
        client: &mut C,
        duration: Duration,
        client_note: &str,
        channel: Channel,
    ) -> Result<Lease>
    where
        C: NodeClient + ?Sized,
    {
        let id = client.establish_lease(duration, client_note, channel).await?;
        let lease = Lease {
            id,
            duration,
            channel,
            client_note: client_note.to_string(),
            granted_at: Instant::now(),
        };
        info!("Established {} lease {} for {:?}", channel, id, duration);
        let tracked = Tracked { lease: lease.clone(), state: LeaseState::Established };
        self.leases.insert((channel, id), tracked);
        Ok(lease)
    }

    /// Extend a lease from now by `duration`.
    ///
    /// When the node refuses (the lease is unknown or already expired) the
    /// tracked lease moves to [`LeaseState::Expired`] and the refusal is
    /// returned.
    pub async fn renew<C>(
        &mut self,
        client: &mut C,
        id: LeaseId,
        duration: Duration,
        channel: Channel,
    ) -> Result<Lease>
    where
        C: NodeClient + ?Sized,
    {
        match client.renew_lease(id, duration, channel).await {
            Ok(()) => {
                let now = Instant::now();
                let tracked = self.leases.entry((channel, id)).or_insert_with(|| Tracked {
                    lease: Lease {
                        id,
                        duration,
                        channel,
                        client_note: String::new(),
                        granted_at: now,
                    },
                    state: LeaseState::Established,
                });
                tracked.lease.duration = duration;
                tracked.lease.granted_at = now;
                tracked.state = LeaseState::Renewed;
                debug!("Renewed {} lease {} for {:?}", channel, id, duration);
                Ok(tracked.lease.clone())
            }
            Err(e) => {
                if e.is_lease_refused() {
                    warn!("{} lease {} could not be renewed: {}", channel, id, e);
                    if let Some(tracked) = self.leases.get_mut(&(channel, id)) {
                        tracked.state = LeaseState::Expired;
                    }
                }
                Err(e)
            }
        }
    }

    /// Release a lease.
    ///
    /// Terminating a lease the node no longer knows (already terminated or
    /// expired) is logged and treated as done.
    pub async fn terminate<C>(
        &mut self,
        client: &mut C,
        id: LeaseId,
        channel: Channel,
    ) -> Result<()>
    where
        C: NodeClient + ?Sized,
    {
        match client.terminate_lease(id, channel).await {
            Ok(()) => info!("Terminated {} lease {}", channel, id),
            Err(e) if e.is_lease_refused() => {
                warn!("{} lease {} was already gone: {}", channel, id, e);
            }
            Err(e) => return Err(e),
        }
        if let Some(tracked) = self.leases.get_mut(&(channel, id)) {
            tracked.state = LeaseState::Terminated;
        }
        Ok(())
    }

    /// Run one request against the node.
    pub async fn execute<C>(
        &mut self,
        client: &mut C,
        request: &LeaseRequest,
        channel: Channel,
    ) -> Result<LeaseOutcome>
    where
        C: NodeClient + ?Sized,
    {
        match request {
            LeaseRequest::Establish { duration, client_note } => self
                .establish(client, *duration, client_note, channel)
                .await
                .map(LeaseOutcome::Granted),
            LeaseRequest::Renew { id, duration } => {
                self.renew(client, *id, *duration, channel).await.map(LeaseOutcome::Renewed)
            }
            LeaseRequest::Terminate { id } => {
                self.terminate(client, *id, channel).await.map(|()| LeaseOutcome::Terminated(*id))
            }
        }
    }

    /// Run `request` until it succeeds, is refused, or `cancel` fires.
    ///
    /// Retryable failures (connection loss, timeouts) wait `retry_interval`,
    /// reconnect the client and try again. A lease refusal or any other
    /// non-retryable error ends the attempt immediately. Cancellation yields
    /// [`MooringError::Cancelled`]; cancelling a call in flight also drops the
    /// client's connection, and the node may still have acted on it.
    pub async fn execute_with_retry<C>(
        &mut self,
        client: &mut C,
        request: &LeaseRequest,
        channel: Channel,
        retry_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<LeaseOutcome>
    where
        C: NodeClient + ?Sized,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(MooringError::Cancelled);
            }
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.execute(client, request, channel) => Some(result),
            };
            let Some(result) = result else {
                // The abandoned call's reply would be read by the next one.
                warn!("Lease attempt {} on {} channel cancelled in flight", attempt, channel);
                client.disconnect();
                return Err(MooringError::Cancelled);
            };

            let error = match result {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_lease_refused() || !e.is_retryable() => return Err(e),
                Err(e) => e,
            };
            warn!(
                "Lease attempt {} on {} channel failed: {}; retrying in {:?}",
                attempt, channel, error, retry_interval
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MooringError::Cancelled),
                _ = tokio::time::sleep(retry_interval) => {}
            }

            if let Err(e) = client.reconnect().await {
                debug!("Reconnect before attempt {} failed: {}", attempt + 1, e);
            }
        }
    }

    /// Current state of a lease, accounting for local expiry.
    pub fn state(&self, id: LeaseId, channel: Channel) -> LeaseState {
        match self.leases.get(&(channel, id)) {
            None => LeaseState::Unleased,
            Some(tracked)
                if tracked.state.is_live() && tracked.lease.is_expired_at(Instant::now()) =>
            {
                LeaseState::Expired
            }
            Some(tracked) => tracked.state,
        }
    }

    pub fn lease(&self, id: LeaseId, channel: Channel) -> Option<&Lease> {
        self.leases.get(&(channel, id)).map(|t| &t.lease)
    }

    /// Leases this client still believes are live.
    pub fn live_leases(&self) -> impl Iterator<Item = &Lease> {
        let now = Instant::now();
        self.leases
            .values()
            .filter(move |t| t.state.is_live() && !t.lease.is_expired_at(now))
            .map(|t| &t.lease)
    }
}
