//! Packet records

use super::PacketKind;

/// One record from a node's packet stream.
///
/// Within one `source_id`, `sequence_no` is strictly increasing and
/// `system_time` is non-decreasing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Originating device
    pub source_id: i64,

    /// Capture timestamp in milliseconds since the epoch
    ///
    /// For device messages this is also the message's own timestamp.
    pub system_time: i64,

    /// Sequence number assigned by the node
    pub sequence_no: i64,

    /// Sequence number of the latest metadata packet describing this one
    pub metadata_ref: i64,

    pub parent_id: i64,

    /// Device-specific record classification, carried verbatim
    pub record_type: i64,

    pub body: PacketBody,
}

/// Variant-specific payload of a [`Packet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketBody {
    /// Raw instrument sample bytes
    SensorData { data: Vec<u8> },

    /// Metadata with the cause that triggered it
    Metadata { cause: Vec<u8>, payload: Vec<u8> },

    /// Free-text device log message
    DeviceMessage { message: Vec<u8> },

    /// Aggregated or statistical payload
    Summary { data: Vec<u8> },
}

impl Packet {
    fn with_body(source_id: i64, system_time: i64, sequence_no: i64, body: PacketBody) -> Self {
        Self {
            source_id,
            system_time,
            sequence_no,
            metadata_ref: 0,
            parent_id: 0,
            record_type: 0,
            body,
        }
    }

    pub fn sensor_data(source_id: i64, system_time: i64, sequence_no: i64, data: Vec<u8>) -> Self {
        Self::with_body(source_id, system_time, sequence_no, PacketBody::SensorData { data })
    }

    pub fn metadata(
        source_id: i64,
        system_time: i64,
        sequence_no: i64,
        cause: Vec<u8>,
        payload: Vec<u8>,
    ) -> Self {
        Self::with_body(
            source_id,
            system_time,
            sequence_no,
            PacketBody::Metadata { cause, payload },
        )
    }

    pub fn device_message(
        source_id: i64,
        system_time: i64,
        sequence_no: i64,
        message: Vec<u8>,
    ) -> Self {
        Self::with_body(source_id, system_time, sequence_no, PacketBody::DeviceMessage { message })
    }

    pub fn summary(source_id: i64, system_time: i64, sequence_no: i64, data: Vec<u8>) -> Self {
        Self::with_body(source_id, system_time, sequence_no, PacketBody::Summary { data })
    }

    pub fn with_metadata_ref(mut self, metadata_ref: i64) -> Self {
        self.metadata_ref = metadata_ref;
        self
    }

    pub fn with_parent_id(mut self, parent_id: i64) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_record_type(mut self, record_type: i64) -> Self {
        self.record_type = record_type;
        self
    }

    pub fn kind(&self) -> PacketKind {
        match self.body {
            PacketBody::SensorData { .. } => PacketKind::SensorData,
            PacketBody::Metadata { .. } => PacketKind::Metadata,
            PacketBody::DeviceMessage { .. } => PacketKind::DeviceMessage,
            PacketBody::Summary { .. } => PacketKind::Summary,
        }
    }

    /// Primary payload bytes (the metadata payload for metadata packets).
    pub fn payload(&self) -> &[u8] {
        match &self.body {
            PacketBody::SensorData { data } | PacketBody::Summary { data } => data,
            PacketBody::Metadata { payload, .. } => payload,
            PacketBody::DeviceMessage { message } => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_set_header_fields() {
        let packet = Packet::metadata(7, 10, 3, b"boot".to_vec(), b"cfg".to_vec())
            .with_metadata_ref(2)
            .with_parent_id(99)
            .with_record_type(5);
        assert_eq!(packet.kind(), PacketKind::Metadata);
        assert_eq!((packet.metadata_ref, packet.parent_id, packet.record_type), (2, 99, 5));
        assert_eq!(packet.payload(), b"cfg");
    }
}
