//! Packet export and import

use super::format::{
    BASE_HEADER_LEN, BUFFER_PREFIX_LEN, DEVICE_MESSAGE, DEVICE_PACKET, METADATA, SENSOR_DATA,
    VARIANT_HEADER_LEN, VERSION_TAG, read_buffer, read_i64_be, read_u16_be, read_u64_be,
    write_buffer,
};
use crate::types::{Packet, PacketBody};
use crate::{MooringError, Result};
use std::io::{Cursor, Read, Write};
use tracing::trace;

/// Export a packet.
pub fn encode<W: Write>(packet: &Packet, out: &mut W) -> Result<()> {
    out.write_all(&DEVICE_PACKET.to_be_bytes())?;
    out.write_all(&VERSION_TAG.to_be_bytes())?;
    for field in [
        packet.source_id,
        packet.system_time,
        packet.sequence_no,
        packet.metadata_ref,
        packet.parent_id,
        packet.record_type,
    ] {
        out.write_all(&field.to_be_bytes())?;
    }

    match &packet.body {
        PacketBody::SensorData { data } | PacketBody::Summary { data } => {
            out.write_all(&SENSOR_DATA.to_be_bytes())?;
            out.write_all(&VERSION_TAG.to_be_bytes())?;
            write_buffer(out, data, "sensor data")?;
        }
        PacketBody::Metadata { cause, payload } => {
            out.write_all(&METADATA.to_be_bytes())?;
            out.write_all(&VERSION_TAG.to_be_bytes())?;
            write_buffer(out, cause, "metadata cause")?;
            write_buffer(out, payload, "metadata payload")?;
        }
        PacketBody::DeviceMessage { message } => {
            out.write_all(&DEVICE_MESSAGE.to_be_bytes())?;
            out.write_all(&VERSION_TAG.to_be_bytes())?;
            write_buffer(out, message, "device message")?;
        }
    }
    Ok(())
}

/// Import one packet.
pub fn decode<R: Read>(input: &mut R) -> Result<Packet> {
    let tag = read_u16_be(input, "packet header")?;
    if tag != DEVICE_PACKET {
        return Err(MooringError::UnsupportedPacketType { tag });
    }
    let _version = read_u64_be(input, "packet header")?;
    let source_id = read_i64_be(input, "packet header")?;
    let system_time = read_i64_be(input, "packet header")?;
    let sequence_no = read_i64_be(input, "packet header")?;
    let metadata_ref = read_i64_be(input, "packet header")?;
    let parent_id = read_i64_be(input, "packet header")?;
    let record_type = read_i64_be(input, "packet header")?;

    let variant = read_u16_be(input, "variant header")?;
    let body = match variant {
        SENSOR_DATA => {
            let _version = read_u64_be(input, "variant header")?;
            PacketBody::SensorData { data: read_buffer(input, "sensor data")? }
        }
        METADATA => {
            let _version = read_u64_be(input, "variant header")?;
            let cause = read_buffer(input, "metadata cause")?;
            let payload = read_buffer(input, "metadata payload")?;
            PacketBody::Metadata { cause, payload }
        }
        DEVICE_MESSAGE => {
            // The message timestamp is the exported systemTime; the model
            // holds both in one field.
            let _version = read_u64_be(input, "variant header")?;
            PacketBody::DeviceMessage { message: read_buffer(input, "device message")? }
        }
        other => return Err(MooringError::UnsupportedPacketType { tag: other }),
    };

    trace!(source_id, sequence_no, variant, "decoded packet");

    Ok(Packet { source_id, system_time, sequence_no, metadata_ref, parent_id, record_type, body })
}

/// Exported size of a packet in bytes.
pub fn encoded_len(packet: &Packet) -> usize {
    let buffers = match &packet.body {
        PacketBody::SensorData { data } | PacketBody::Summary { data } => {
            BUFFER_PREFIX_LEN + data.len()
        }
        PacketBody::Metadata { cause, payload } => {
            2 * BUFFER_PREFIX_LEN + cause.len() + payload.len()
        }
        PacketBody::DeviceMessage { message } => BUFFER_PREFIX_LEN + message.len(),
    };
    BASE_HEADER_LEN + VARIANT_HEADER_LEN + buffers
}

pub fn to_bytes(packet: &Packet) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded_len(packet));
    encode(packet, &mut out)?;
    Ok(out)
}

/// Import a packet that must occupy the whole slice.
pub fn from_bytes(bytes: &[u8]) -> Result<Packet> {
    let mut cursor = Cursor::new(bytes);
    let packet = decode(&mut cursor)?;
    let consumed = cursor.position() as usize;
    if consumed != bytes.len() {
        return Err(MooringError::codec(
            "packet record",
            format!("{} trailing bytes after packet", bytes.len() - consumed),
        ));
    }
    Ok(packet)
}
