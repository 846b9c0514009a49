//! Request and response encoding for the node RPC protocol
//!
//! Each message travels in one length-delimited frame. Inside the frame:
//!
//! ```text
//! request:  u16 len + command, u16 argc, argc x value
//! response: u8 0, value
//!         | u8 1, u8 kind, u32 len + message [, i64 source id]
//! value:    u8 tag + body
//! ```
//!
//! A packet set carries each packet as `u8 summary flag, u32 len + exported
//! record`. The export format writes summaries under the sensor-data tag, so
//! the flag restores their kind on the client.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::codec;
use crate::types::{DevicePacketSet, PacketBody, PacketKind, Port};
use crate::{MooringError, RemoteError, Result};

pub const GET_DEVICE_PACKETS: &str = "getDevicePackets";
pub const ESTABLISH_LEASE: &str = "establishLease";
pub const RENEW_LEASE: &str = "renewLease";
pub const TERMINATE_LEASE: &str = "terminateLease";
pub const GET_PORTS: &str = "getPorts";
pub const GET_NAME: &str = "getName";
pub const GET_ID: &str = "getId";

const STATUS_OK: u8 = 0;
const STATUS_REMOTE_ERROR: u8 = 1;

const TAG_UNIT: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_LONG: u8 = 3;
const TAG_BYTES: u8 = 4;
const TAG_PACKET_SET: u8 = 5;
const TAG_PORTS: u8 = 6;

/// One argument or result on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i32),
    Long(i64),
    Bytes(Vec<u8>),
    PacketSet(DevicePacketSet),
    Ports(Vec<Port>),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Bytes(_) => "bytes",
            Value::PacketSet(_) => "packet set",
            Value::Ports(_) => "ports",
        }
    }

    fn unexpected(self, command: &str, expected: &'static str) -> MooringError {
        MooringError::UnexpectedResult {
            command: command.to_string(),
            expected,
            found: self.kind_name().to_string(),
        }
    }

    pub fn into_unit(self, command: &str) -> Result<()> {
        match self {
            Value::Unit => Ok(()),
            other => Err(other.unexpected(command, "unit")),
        }
    }

    pub fn into_bool(self, command: &str) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(v),
            other => Err(other.unexpected(command, "bool")),
        }
    }

    pub fn into_int(self, command: &str) -> Result<i32> {
        match self {
            Value::Int(v) => Ok(v),
            other => Err(other.unexpected(command, "int")),
        }
    }

    pub fn into_long(self, command: &str) -> Result<i64> {
        match self {
            Value::Long(v) => Ok(v),
            other => Err(other.unexpected(command, "long")),
        }
    }

    pub fn into_bytes(self, command: &str) -> Result<Vec<u8>> {
        match self {
            Value::Bytes(v) => Ok(v),
            other => Err(other.unexpected(command, "bytes")),
        }
    }

    pub fn into_packet_set(self, command: &str) -> Result<DevicePacketSet> {
        match self {
            Value::PacketSet(v) => Ok(v),
            other => Err(other.unexpected(command, "packet set")),
        }
    }

    pub fn into_ports(self, command: &str) -> Result<Vec<Port>> {
        match self {
            Value::Ports(v) => Ok(v),
            other => Err(other.unexpected(command, "ports")),
        }
    }
}

/// A decoded request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: String,
    pub args: Vec<Value>,
}

fn need(buf: &Bytes, n: usize, context: &str) -> Result<()> {
    if buf.remaining() < n {
        Err(MooringError::protocol(
            context,
            format!("frame truncated: need {} bytes, have {}", n, buf.remaining()),
        ))
    } else {
        Ok(())
    }
}

fn put_len(out: &mut BytesMut, len: usize, context: &str) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| MooringError::protocol(context, format!("length {} exceeds u32", len)))?;
    out.put_u32(len);
    Ok(())
}

fn put_blob(out: &mut BytesMut, data: &[u8], context: &str) -> Result<()> {
    put_len(out, data.len(), context)?;
    out.put_slice(data);
    Ok(())
}

fn get_blob(buf: &mut Bytes, context: &str) -> Result<Bytes> {
    need(buf, 4, context)?;
    let len = buf.get_u32() as usize;
    need(buf, len, context)?;
    Ok(buf.split_to(len))
}

fn get_string(buf: &mut Bytes, context: &str) -> Result<String> {
    let raw = get_blob(buf, context)?;
    String::from_utf8(raw.to_vec())
        .map_err(|e| MooringError::protocol(context, format!("invalid UTF-8: {}", e)))
}

pub fn put_value(out: &mut BytesMut, value: &Value) -> Result<()> {
    match value {
        Value::Unit => out.put_u8(TAG_UNIT),
        Value::Bool(v) => {
            out.put_u8(TAG_BOOL);
            out.put_u8(u8::from(*v));
        }
        Value::Int(v) => {
            out.put_u8(TAG_INT);
            out.put_i32(*v);
        }
        Value::Long(v) => {
            out.put_u8(TAG_LONG);
            out.put_i64(*v);
        }
        Value::Bytes(v) => {
            out.put_u8(TAG_BYTES);
            put_blob(out, v, "bytes value")?;
        }
        Value::PacketSet(set) => {
            out.put_u8(TAG_PACKET_SET);
            out.put_u8(u8::from(set.complete));
            put_len(out, set.packets.len(), "packet set")?;
            for packet in &set.packets {
                let record = codec::to_bytes(packet)?;
                out.put_u8(u8::from(packet.kind() == PacketKind::Summary));
                put_blob(out, &record, "packet set")?;
            }
        }
        Value::Ports(ports) => {
            out.put_u8(TAG_PORTS);
            put_len(out, ports.len(), "ports")?;
            for port in ports {
                put_blob(out, port.name.as_bytes(), "port name")?;
                out.put_i64(port.source_id);
                put_blob(out, port.service_name.as_bytes(), "port service")?;
            }
        }
    }
    Ok(())
}

pub fn get_value(buf: &mut Bytes) -> Result<Value> {
    need(buf, 1, "value tag")?;
    let value = match buf.get_u8() {
        TAG_UNIT => Value::Unit,
        TAG_BOOL => {
            need(buf, 1, "bool value")?;
            Value::Bool(buf.get_u8() != 0)
        }
        TAG_INT => {
            need(buf, 4, "int value")?;
            Value::Int(buf.get_i32())
        }
        TAG_LONG => {
            need(buf, 8, "long value")?;
            Value::Long(buf.get_i64())
        }
        TAG_BYTES => Value::Bytes(get_blob(buf, "bytes value")?.to_vec()),
        TAG_PACKET_SET => {
            need(buf, 5, "packet set")?;
            let complete = buf.get_u8() != 0;
            let count = buf.get_u32() as usize;
            // Each record costs at least its flag and 4-byte prefix.
            need(buf, count.saturating_mul(5), "packet set")?;
            let mut packets = Vec::with_capacity(count);
            for index in 0..count {
                need(buf, 1, "packet set")?;
                let summary = buf.get_u8() != 0;
                let record = get_blob(buf, "packet set")?;
                let mut packet = match codec::from_bytes(&record) {
                    Ok(packet) => packet,
                    Err(e) if e.is_codec_error() => {
                        warn!("Skipping packet {} of {}: {}", index + 1, count, e);
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if summary {
                    if let PacketBody::SensorData { data } = packet.body {
                        packet.body = PacketBody::Summary { data };
                    }
                }
                packets.push(packet);
            }
            Value::PacketSet(DevicePacketSet::new(packets, complete))
        }
        TAG_PORTS => {
            need(buf, 4, "ports")?;
            let count = buf.get_u32() as usize;
            need(buf, count.saturating_mul(16), "ports")?;
            let mut ports = Vec::with_capacity(count);
            for _ in 0..count {
                let name = get_string(buf, "port name")?;
                need(buf, 8, "port source id")?;
                let source_id = buf.get_i64();
                let service_name = get_string(buf, "port service")?;
                ports.push(Port::new(name, source_id, service_name));
            }
            Value::Ports(ports)
        }
        other => {
            return Err(MooringError::protocol("value tag", format!("unknown tag {}", other)));
        }
    };
    Ok(value)
}

pub fn encode_request(command: &str, args: &[Value]) -> Result<BytesMut> {
    let mut out = BytesMut::new();
    let name = command.as_bytes();
    let name_len = u16::try_from(name.len())
        .map_err(|_| MooringError::protocol("request", "command name too long"))?;
    out.put_u16(name_len);
    out.put_slice(name);
    let argc = u16::try_from(args.len())
        .map_err(|_| MooringError::protocol("request", "too many arguments"))?;
    out.put_u16(argc);
    for arg in args {
        put_value(&mut out, arg)?;
    }
    Ok(out)
}

pub fn decode_request(mut buf: Bytes) -> Result<Request> {
    need(&buf, 2, "request")?;
    let name_len = buf.get_u16() as usize;
    need(&buf, name_len, "request")?;
    let command = String::from_utf8(buf.split_to(name_len).to_vec())
        .map_err(|e| MooringError::protocol("request", format!("invalid command name: {}", e)))?;
    need(&buf, 2, "request")?;
    let argc = buf.get_u16() as usize;
    let mut args = Vec::with_capacity(argc.min(16));
    for _ in 0..argc {
        args.push(get_value(&mut buf)?);
    }
    if buf.has_remaining() {
        return Err(MooringError::protocol(
            "request",
            format!("{} trailing bytes", buf.remaining()),
        ));
    }
    Ok(Request { command, args })
}

pub fn encode_response(response: &std::result::Result<Value, RemoteError>) -> Result<BytesMut> {
    let mut out = BytesMut::new();
    match response {
        Ok(value) => {
            out.put_u8(STATUS_OK);
            put_value(&mut out, value)?;
        }
        Err(error) => {
            out.put_u8(STATUS_REMOTE_ERROR);
            out.put_u8(error.kind_code());
            let message = match error {
                RemoteError::DeviceNotFound { .. } => "",
                RemoteError::PortNotFound { reason }
                | RemoteError::NoData { reason }
                | RemoteError::LeaseRefused { reason } => reason.as_str(),
                RemoteError::Failure { message } => message.as_str(),
            };
            put_blob(&mut out, message.as_bytes(), "remote error")?;
            if let RemoteError::DeviceNotFound { source_id } = error {
                out.put_i64(*source_id);
            }
        }
    }
    Ok(out)
}

/// Decode a response frame. The outer `Result` is a local protocol failure;
/// the inner one is the node's answer.
pub fn decode_response(mut buf: Bytes) -> Result<std::result::Result<Value, RemoteError>> {
    need(&buf, 1, "response")?;
    let response = match buf.get_u8() {
        STATUS_OK => Ok(get_value(&mut buf)?),
        STATUS_REMOTE_ERROR => {
            need(&buf, 1, "remote error")?;
            let kind = buf.get_u8();
            let message = get_string(&mut buf, "remote error")?;
            let error = match kind {
                0 => {
                    need(&buf, 8, "remote error")?;
                    RemoteError::DeviceNotFound { source_id: buf.get_i64() }
                }
                1 => RemoteError::PortNotFound { reason: message },
                2 => RemoteError::NoData { reason: message },
                3 => RemoteError::LeaseRefused { reason: message },
                4 => RemoteError::Failure { message },
                other => {
                    return Err(MooringError::protocol(
                        "remote error",
                        format!("unknown error kind {}", other),
                    ));
                }
            };
            Err(error)
        }
        other => {
            return Err(MooringError::protocol("response", format!("unknown status {}", other)));
        }
    };
    if buf.has_remaining() {
        return Err(MooringError::protocol(
            "response",
            format!("{} trailing bytes", buf.remaining()),
        ));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Packet;

    #[test]
    fn request_frames_carry_command_and_arguments() {
        let args = vec![
            Value::Long(1553),
            Value::Long(0),
            Value::Long(2000),
            Value::Int(1024),
            Value::Int(1),
            Value::Int(20_000),
            Value::Bool(true),
        ];
        let frame = encode_request(GET_DEVICE_PACKETS, &args).unwrap().freeze();
        let request = decode_request(frame).unwrap();
        assert_eq!(request.command, GET_DEVICE_PACKETS);
        assert_eq!(request.args, args);
    }

    #[test]
    fn packet_sets_and_ports_survive_the_wire() {
        let set = DevicePacketSet::new(
            vec![
                Packet::sensor_data(1553, 1000, 100, b"t=12.1".to_vec()),
                Packet::metadata(1553, 1050, 101, b"boot".to_vec(), Vec::new()),
                Packet::summary(1553, 1100, 102, b"mean=12.3".to_vec()),
            ],
            true,
        );
        let ports = vec![Port::new("ctd", 1553, "SeaBird")];
        for value in [Value::PacketSet(set), Value::Ports(ports), Value::Unit] {
            let frame = encode_response(&Ok(value.clone())).unwrap().freeze();
            assert_eq!(decode_response(frame).unwrap(), Ok(value));
        }
    }

    #[test]
    fn remote_errors_keep_their_kind() {
        let errors = [
            RemoteError::DeviceNotFound { source_id: 77 },
            RemoteError::PortNotFound { reason: "no port".into() },
            RemoteError::no_data("window empty"),
            RemoteError::lease_refused("Lease ID 4 not found"),
            RemoteError::failure("unknown command"),
        ];
        for error in errors {
            let frame = encode_response(&Err(error.clone())).unwrap().freeze();
            assert_eq!(decode_response(frame).unwrap(), Err(error));
        }
    }

    #[test]
    fn truncated_frames_are_protocol_errors() {
        let frame = encode_request(ESTABLISH_LEASE, &[Value::Long(900_000)]).unwrap();
        let short = Bytes::copy_from_slice(&frame[..frame.len() - 3]);
        assert!(matches!(decode_request(short), Err(MooringError::Protocol { .. })));

        let huge_count =
            Bytes::from_static(&[STATUS_OK, TAG_PACKET_SET, 1, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(decode_response(huge_count), Err(MooringError::Protocol { .. })));
    }

    fn packet_set_frame(records: &[Vec<u8>], count: u32) -> Bytes {
        let mut frame = BytesMut::new();
        frame.put_u8(STATUS_OK);
        frame.put_u8(TAG_PACKET_SET);
        frame.put_u8(1);
        frame.put_u32(count);
        for record in records {
            frame.put_u8(0);
            frame.put_u32(record.len() as u32);
            frame.put_slice(record);
        }
        frame.freeze()
    }

    #[test]
    fn undecodable_record_is_skipped_not_fatal() {
        let first = Packet::sensor_data(1553, 1000, 100, b"t=12.1".to_vec());
        let last = Packet::sensor_data(1553, 1100, 102, b"t=12.3".to_vec());
        let mut bad = codec::to_bytes(&Packet::sensor_data(1553, 1050, 101, vec![1])).unwrap();
        let variant = codec::format::BASE_HEADER_LEN;
        bad[variant..variant + 2].copy_from_slice(&0x0009u16.to_be_bytes());

        let records =
            vec![codec::to_bytes(&first).unwrap(), bad, codec::to_bytes(&last).unwrap()];
        let value = decode_response(packet_set_frame(&records, 3)).unwrap().unwrap();
        assert_eq!(value, Value::PacketSet(DevicePacketSet::new(vec![first, last], true)));
    }

    #[test]
    fn short_packet_set_is_a_protocol_error() {
        let record = codec::to_bytes(&Packet::sensor_data(1553, 1000, 100, vec![0; 16])).unwrap();
        let frame = packet_set_frame(&[record], 2);
        assert!(matches!(decode_response(frame), Err(MooringError::Protocol { .. })));
    }

    #[test]
    fn kind_mismatch_is_unexpected_result() {
        let err = Value::Bytes(b"node".to_vec()).into_int(ESTABLISH_LEASE).unwrap_err();
        match err {
            MooringError::UnexpectedResult { command, expected, found } => {
                assert_eq!(command, ESTABLISH_LEASE);
                assert_eq!(expected, "int");
                assert_eq!(found, "bytes");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
