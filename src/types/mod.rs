//! Core types for sensor-node telemetry.
//!
//! This module provides the data model shared by the codec, the transport and
//! the retrieval pipeline:
//! - [`Packet`] is one record from a node's packet stream: a common header plus
//!   a closed set of [`PacketBody`] variants
//! - [`PacketKind`] and [`TypeMask`] classify packets for filtering
//! - [`DevicePacketSet`] is one bounded batch returned by a retrieval round-trip
//! - [`LeaseId`], [`Channel`] and [`Lease`] describe reservations of a node's
//!   communications medium
//! - [`Port`] describes an instrument port exposed by a node
//!
//! ## Usage Example
//!
//! ```rust
//! use mooring::types::{Packet, PacketKind, TypeMask};
//!
//! let packet = Packet::sensor_data(1553, 1_000, 100, b"12.5,33.1".to_vec());
//! assert_eq!(packet.kind(), PacketKind::SensorData);
//!
//! let wanted = TypeMask::SENSOR_DATA | TypeMask::METADATA;
//! assert!(wanted.contains(packet.kind()));
//! assert!(!wanted.complement().contains(packet.kind()));
//! ```

mod kind;
mod lease;
mod packet;
mod packet_set;
mod port;

pub use kind::{PacketKind, TypeMask};
pub use lease::{Channel, Lease, LeaseId, LeaseState};
pub use packet::{Packet, PacketBody};
pub use packet_set::DevicePacketSet;
pub use port::Port;
