//! Binary interchange format for packets
//!
//! The same big-endian layout is used for node-to-shore transfer and for the
//! local packet log, so it must stay byte-for-byte compatible with existing
//! logs and peer implementations.
//!
//! ## Record Layout
//!
//! ```text
//! u16 baseTag     (DEVICE_PACKET)
//! u64 versionTag
//! i64 sourceID
//! i64 systemTime
//! i64 sequenceNo
//! i64 metadataRef
//! i64 parentID
//! i64 recordType
//! u16 variantTag  (SENSOR_DATA | METADATA | DEVICE_MESSAGE)
//! u64 versionTag
//! ... i32-length-prefixed byte buffers ...
//! ```
//!
//! SensorData carries one buffer, Metadata two (cause, payload), DeviceMessage
//! one. Summary packets are exported under the SensorData tag and therefore
//! import as sensor data.
//!
//! ## Usage Example
//!
//! ```rust
//! use mooring::codec;
//! use mooring::types::Packet;
//!
//! let packet = Packet::device_message(1553, 1_700_000_000_000, 12, b"reset".to_vec());
//! let bytes = codec::to_bytes(&packet).unwrap();
//! assert_eq!(bytes.len(), codec::encoded_len(&packet));
//! assert_eq!(codec::from_bytes(&bytes).unwrap(), packet);
//! ```

pub mod format;
mod packet;

pub use format::{DEVICE_MESSAGE, DEVICE_PACKET, METADATA, SENSOR_DATA};
pub use packet::{decode, encode, encoded_len, from_bytes, to_bytes};
