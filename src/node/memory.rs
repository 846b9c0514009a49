//! Reference node backed by in-memory packet logs

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::NodeService;
use crate::client::PacketRequest;
use crate::codec;
use crate::filter::TypeSelection;
use crate::store::{MemoryLog, PacketLog};
use crate::types::{Channel, DevicePacketSet, LeaseId, Packet, Port, TypeMask};
use crate::{MooringError, RemoteError, Result};

/// A node with instrument ports, packet logs and per-channel lease tables.
///
/// All methods take `&self` so one `Arc<MemoryNode>` can be served over TCP
/// while a test keeps appending packets.
///
/// ```rust
/// use mooring::node::MemoryNode;
/// use mooring::types::{Packet, Port};
///
/// let node = MemoryNode::new("buoy-7", 42);
/// node.add_port(Port::new("ctd", 1553, "SeaBird"));
/// node.append(Packet::sensor_data(1553, 1000, 100, b"12.1".to_vec())).unwrap();
/// ```
pub struct MemoryNode {
    name: String,
    id: i64,
    state: Mutex<NodeState>,
}

#[derive(Default)]
struct NodeState {
    sources: BTreeMap<i64, Source>,
    leases: HashMap<Channel, LeaseTable>,
}

struct Source {
    port: Port,
    log: MemoryLog,
    /// Selection applied when a request carries an empty type mask
    default_types: TypeMask,
    shelf_life: Option<Duration>,
}

struct LeaseTable {
    next_id: i32,
    capacity: Option<usize>,
    leases: BTreeMap<LeaseId, NodeLease>,
}

struct NodeLease {
    /// `None` for durations past the clock's range
    expires_at: Option<Instant>,
    client_note: String,
}

impl Default for LeaseTable {
    fn default() -> Self {
        Self { next_id: 1, capacity: None, leases: BTreeMap::new() }
    }
}

impl LeaseTable {
    fn purge_expired(&mut self, channel: Channel, now: Instant) {
        self.leases.retain(|id, lease| {
            let live = lease.expires_at.is_none_or(|expiry| expiry > now);
            if !live {
                info!("{} lease {} ({}) expired", channel, id, lease.client_note);
            }
            live
        });
    }

    /// Next free ID, wrapping back to 1 after `i32::MAX`.
    fn allocate_id(&mut self) -> LeaseId {
        loop {
            let id = LeaseId(self.next_id);
            self.next_id = if self.next_id == i32::MAX { 1 } else { self.next_id + 1 };
            if !self.leases.contains_key(&id) {
                return id;
            }
        }
    }
}

fn not_found(id: LeaseId) -> RemoteError {
    RemoteError::lease_refused(format!("Lease ID {} not found", id))
}

impl MemoryNode {
    pub fn new(name: impl Into<String>, id: i64) -> Self {
        Self { name: name.into(), id, state: Mutex::new(NodeState::default()) }
    }

    fn state(&self) -> MutexGuard<'_, NodeState> {
        // State stays consistent across a panicking holder; keep serving.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an instrument port and an empty log for its source.
    pub fn add_port(&self, port: Port) {
        let mut state = self.state();
        debug!("Registered port {} for device {}", port.name, port.source_id);
        state.sources.insert(
            port.source_id,
            Source { port, log: MemoryLog::new(), default_types: TypeMask::ALL, shelf_life: None },
        );
    }

    pub fn append(&self, packet: Packet) -> Result<()> {
        let mut state = self.state();
        let source = state.sources.get_mut(&packet.source_id).ok_or_else(|| {
            MooringError::invalid_argument(format!("no port for device {}", packet.source_id))
        })?;
        source.log.append(&packet)
    }

    pub fn extend(&self, packets: impl IntoIterator<Item = Packet>) -> Result<()> {
        packets.into_iter().try_for_each(|p| self.append(p))
    }

    /// Kinds returned when a request asks for the device defaults.
    pub fn set_default_types(&self, source_id: i64, types: TypeMask) -> Result<()> {
        self.with_source(source_id, |source| source.default_types = types)
    }

    /// Packets older than `shelf_life` are withheld from requests that
    /// exclude stale data.
    pub fn set_shelf_life(&self, source_id: i64, shelf_life: Duration) -> Result<()> {
        self.with_source(source_id, |source| source.shelf_life = Some(shelf_life))
    }

    /// Limit concurrent leases on `channel`; `None` removes the limit.
    pub fn set_lease_capacity(&self, channel: Channel, capacity: Option<usize>) {
        self.state().leases.entry(channel).or_default().capacity = capacity;
    }

    /// Number of unexpired leases on `channel`.
    pub fn live_leases(&self, channel: Channel) -> usize {
        let mut state = self.state();
        let table = state.leases.entry(channel).or_default();
        table.purge_expired(channel, Instant::now());
        table.leases.len()
    }

    fn with_source(&self, source_id: i64, f: impl FnOnce(&mut Source)) -> Result<()> {
        let mut state = self.state();
        let source = state.sources.get_mut(&source_id).ok_or_else(|| {
            MooringError::invalid_argument(format!("no port for device {}", source_id))
        })?;
        f(source);
        Ok(())
    }
}

#[async_trait::async_trait]
impl NodeService for MemoryNode {
    async fn get_device_packets(
        &self,
        request: PacketRequest,
    ) -> Result<DevicePacketSet, RemoteError> {
        let state = self.state();
        let source = state
            .sources
            .get(&request.source_id)
            .ok_or(RemoteError::DeviceNotFound { source_id: request.source_id })?;

        let types =
            if request.type_mask.is_empty() { source.default_types } else { request.type_mask };
        let mut selection = TypeSelection::only(types);
        let stale_before = match (request.exclude_stale, source.shelf_life) {
            (true, Some(shelf_life)) => {
                let shelf_millis = i64::try_from(shelf_life.as_millis()).unwrap_or(i64::MAX);
                Some(chrono::Utc::now().timestamp_millis().saturating_sub(shelf_millis))
            }
            _ => None,
        };

        let candidates: Vec<&Packet> = source
            .log
            .iter_between(request.start, request.end)
            .filter(|p| selection.retains(p))
            .filter(|p| stale_before.is_none_or(|cutoff| p.system_time >= cutoff))
            .collect();

        if candidates.is_empty() {
            return Err(RemoteError::no_data(format!(
                "no {} packets for device {} between {} and {}",
                types, request.source_id, request.start, request.end
            )));
        }

        // Fill the byte budget, but never split a run of equal timestamps:
        // the client resumes strictly after the last time it received.
        let budget = usize::try_from(request.max_bytes).unwrap_or(0);
        let mut batch = Vec::new();
        let mut bytes = 0usize;
        for packet in &candidates {
            if let Some(last) = batch.last().map(|p: &Packet| p.system_time) {
                if bytes >= budget && packet.system_time != last {
                    break;
                }
            }
            bytes += codec::encoded_len(packet);
            batch.push((*packet).clone());
        }

        let complete = batch.len() == candidates.len();
        trace!(
            "Device {}: {} of {} packets ({} bytes, budget {}), complete={}",
            request.source_id,
            batch.len(),
            candidates.len(),
            bytes,
            request.max_bytes,
            complete
        );
        Ok(DevicePacketSet::new(batch, complete))
    }

    async fn establish_lease(
        &self,
        duration: Duration,
        client_note: String,
        channel: Channel,
    ) -> Result<LeaseId, RemoteError> {
        let now = Instant::now();
        let mut state = self.state();
        let table = state.leases.entry(channel).or_default();
        table.purge_expired(channel, now);

        if let Some(capacity) = table.capacity {
            if table.leases.len() >= capacity {
                return Err(RemoteError::lease_refused(format!(
                    "{} channel fully leased ({} of {})",
                    channel,
                    table.leases.len(),
                    capacity
                )));
            }
        }

        let id = table.allocate_id();
        info!("Granted {} lease {} for {:?} to {}", channel, id, duration, client_note);
        table.leases.insert(id, NodeLease { expires_at: now.checked_add(duration), client_note });
        Ok(id)
    }

    async fn renew_lease(
        &self,
        id: LeaseId,
        duration: Duration,
        channel: Channel,
    ) -> Result<(), RemoteError> {
        let now = Instant::now();
        let mut state = self.state();
        let table = state.leases.entry(channel).or_default();
        table.purge_expired(channel, now);

        let lease = table.leases.get_mut(&id).ok_or_else(|| not_found(id))?;
        lease.expires_at = now.checked_add(duration);
        debug!("Renewed {} lease {} for {:?}", channel, id, duration);
        Ok(())
    }

    async fn terminate_lease(&self, id: LeaseId, channel: Channel) -> Result<(), RemoteError> {
        let now = Instant::now();
        let mut state = self.state();
        let table = state.leases.entry(channel).or_default();
        table.purge_expired(channel, now);

        let lease = table.leases.remove(&id).ok_or_else(|| not_found(id))?;
        info!("Terminated {} lease {} ({})", channel, id, lease.client_note);
        Ok(())
    }

    async fn get_ports(&self) -> Result<Vec<Port>, RemoteError> {
        Ok(self.state().sources.values().map(|s| s.port.clone()).collect())
    }

    async fn get_name(&self) -> Result<String, RemoteError> {
        Ok(self.name.clone())
    }

    async fn get_id(&self) -> Result<i64, RemoteError> {
        Ok(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PacketKind;

    fn node_with(packets: Vec<Packet>) -> MemoryNode {
        let node = MemoryNode::new("buoy-7", 42);
        node.add_port(Port::new("ctd", 1553, "SeaBird"));
        node.extend(packets).unwrap();
        node
    }

    fn series(count: i64) -> Vec<Packet> {
        (0..count).map(|i| Packet::sensor_data(1553, 1000 + i * 50, 100 + i, vec![0; 8])).collect()
    }

    #[tokio::test]
    async fn batches_fill_the_byte_budget() {
        let packets = series(20);
        let per_packet = codec::encoded_len(&packets[0]) as i32;
        let node = node_with(packets);

        let request = PacketRequest::new(1553, 0, 2000).with_max_bytes(per_packet * 10);
        let first = node.get_device_packets(request).await.unwrap();
        assert_eq!(first.len(), 10);
        assert!(!first.complete);

        let second = node.get_device_packets(request.starting_at(1451)).await.unwrap();
        assert_eq!(second.len(), 10);
        assert!(second.complete);
        assert_eq!(second.packets[0].sequence_no, 110);
    }

    #[tokio::test]
    async fn equal_timestamps_stay_in_one_batch() {
        let mut packets = series(2);
        packets.push(Packet::sensor_data(1553, 1050, 102, vec![0; 8]));
        packets.push(Packet::sensor_data(1553, 1050, 103, vec![0; 8]));
        packets.push(Packet::sensor_data(1553, 1100, 104, vec![0; 8]));
        let node = node_with(packets);

        let request = PacketRequest::new(1553, 0, 2000).with_max_bytes(1);
        let first = node.get_device_packets(request).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = node.get_device_packets(request.starting_at(1001)).await.unwrap();
        let seqs: Vec<i64> = second.packets.iter().map(|p| p.sequence_no).collect();
        assert_eq!(seqs, vec![101, 102, 103]);
        assert!(!second.complete);
    }

    #[tokio::test]
    async fn type_mask_and_defaults_select_kinds() {
        let node = node_with(vec![
            Packet::metadata(1553, 1000, 100, b"boot".to_vec(), vec![]),
            Packet::sensor_data(1553, 1050, 101, vec![1]),
            Packet::device_message(1553, 1100, 102, b"low battery".to_vec()),
        ]);

        let data_only = PacketRequest::new(1553, 0, 2000).with_types(TypeMask::SENSOR_DATA);
        let set = node.get_device_packets(data_only).await.unwrap();
        assert!(set.packets.iter().all(|p| p.kind() == PacketKind::SensorData));
        assert!(set.complete);

        node.set_default_types(1553, TypeMask::DEVICE_MESSAGE).unwrap();
        let defaults = PacketRequest::new(1553, 0, 2000).with_types(TypeMask::EMPTY);
        let set = node.get_device_packets(defaults).await.unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.packets[0].kind(), PacketKind::DeviceMessage);
    }

    #[tokio::test]
    async fn empty_window_and_unknown_device() {
        let node = node_with(series(3));
        let empty = node.get_device_packets(PacketRequest::new(1553, 5000, 6000)).await;
        assert!(matches!(empty, Err(RemoteError::NoData { .. })));

        let missing = node.get_device_packets(PacketRequest::new(9, 0, 10)).await;
        assert_eq!(missing, Err(RemoteError::DeviceNotFound { source_id: 9 }));
    }

    #[tokio::test]
    async fn stale_packets_are_withheld_on_request() {
        let node = node_with(series(3));
        node.set_shelf_life(1553, Duration::from_secs(60)).unwrap();

        let fresh_only = PacketRequest::new(1553, 0, 2000);
        assert!(matches!(
            node.get_device_packets(fresh_only).await,
            Err(RemoteError::NoData { .. })
        ));

        let with_stale = fresh_only.with_stale(true);
        assert_eq!(node.get_device_packets(with_stale).await.unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn leases_expire_without_renewal() {
        let node = MemoryNode::new("buoy-7", 42);
        let id = node
            .establish_lease(Duration::from_secs(10), "user ops@shore".into(), Channel::Primary)
            .await
            .unwrap();
        assert_eq!(id, LeaseId(1));

        tokio::time::advance(Duration::from_secs(8)).await;
        node.renew_lease(id, Duration::from_secs(10), Channel::Primary).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(node.live_leases(Channel::Primary), 1);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(node.live_leases(Channel::Primary), 0);
        assert_eq!(
            node.renew_lease(id, Duration::from_secs(10), Channel::Primary).await,
            Err(RemoteError::lease_refused("Lease ID 1 not found"))
        );
    }

    #[tokio::test]
    async fn capacity_refuses_and_channels_are_independent() {
        let node = MemoryNode::new("buoy-7", 42);
        node.set_lease_capacity(Channel::Primary, Some(1));
        let minute = Duration::from_secs(60);

        let first = node.establish_lease(minute, "a".into(), Channel::Primary).await.unwrap();
        let refused = node.establish_lease(minute, "b".into(), Channel::Primary).await;
        assert!(matches!(refused, Err(RemoteError::LeaseRefused { .. })));

        let aux = node.establish_lease(minute, "b".into(), Channel::Auxiliary).await.unwrap();
        assert_eq!(aux, LeaseId(1));

        node.terminate_lease(first, Channel::Primary).await.unwrap();
        assert!(node.terminate_lease(first, Channel::Primary).await.is_err());
        let again = node.establish_lease(minute, "b".into(), Channel::Primary).await.unwrap();
        assert_eq!(again, LeaseId(2));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_durations_never_expire() {
        let node = MemoryNode::new("buoy-7", 42);
        let forever = Duration::from_secs(u64::MAX);
        let id = node.establish_lease(forever, "ops".into(), Channel::Primary).await.unwrap();
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert_eq!(node.live_leases(Channel::Primary), 1);
        node.renew_lease(id, forever, Channel::Primary).await.unwrap();
        assert_eq!(node.live_leases(Channel::Primary), 1);
    }

    #[test]
    fn lease_ids_wrap_to_one() {
        let mut table = LeaseTable { next_id: i32::MAX, ..LeaseTable::default() };
        assert_eq!(table.allocate_id(), LeaseId(i32::MAX));
        assert_eq!(table.allocate_id(), LeaseId(1));
    }
}
