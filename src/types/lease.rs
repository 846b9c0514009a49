//! Communications lease types

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Lease identifier assigned by the node, always >= 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseId(pub i32);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical link to the node; each is leased independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Primary,
    Auxiliary,
}

impl Channel {
    pub fn is_primary(self) -> bool {
        matches!(self, Channel::Primary)
    }

    pub fn from_primary_flag(primary: bool) -> Self {
        if primary { Channel::Primary } else { Channel::Auxiliary }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Primary => f.write_str("primary"),
            Channel::Auxiliary => f.write_str("auxiliary"),
        }
    }
}

/// Client-side view of a granted lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub id: LeaseId,
    pub duration: Duration,
    pub channel: Channel,
    pub client_note: String,
    /// Time of the latest grant or renewal
    pub granted_at: Instant,
}

impl Lease {
    /// `None` when the duration reaches past the clock's range: the lease
    /// never expires.
    pub fn expires_at(&self) -> Option<Instant> {
        self.granted_at.checked_add(self.duration)
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at().is_some_and(|expiry| now >= expiry)
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at().map_or(Duration::MAX, |expiry| expiry.saturating_duration_since(now))
    }
}

/// Lifecycle of a lease as tracked by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Unleased,
    Established,
    Renewed,
    Terminated,
    Expired,
}

impl LeaseState {
    pub fn is_live(self) -> bool {
        matches!(self, LeaseState::Established | LeaseState::Renewed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(duration: Duration) -> Lease {
        Lease {
            id: LeaseId(1),
            duration,
            channel: Channel::Primary,
            client_note: "user ops@shore".into(),
            granted_at: Instant::now(),
        }
    }

    #[test]
    fn expiry_follows_the_duration() {
        let lease = lease(Duration::from_secs(10));
        let later = lease.granted_at + Duration::from_secs(10);
        assert!(!lease.is_expired_at(lease.granted_at));
        assert!(lease.is_expired_at(later));
        let early = lease.granted_at + Duration::from_secs(4);
        assert_eq!(lease.remaining(early), Duration::from_secs(6));
        assert_eq!(lease.remaining(later + Duration::from_secs(1)), Duration::ZERO);
    }

    #[test]
    fn unrepresentable_expiry_never_expires() {
        let lease = lease(Duration::from_secs(u64::MAX));
        assert_eq!(lease.expires_at(), None);
        assert!(!lease.is_expired_at(Instant::now()));
        assert_eq!(lease.remaining(Instant::now()), Duration::MAX);
    }
}
