//! Tags, sizes and big-endian primitives for the interchange format

use crate::{MooringError, Result};
use std::io::{Read, Write};

/// Base tag of every exported packet
pub const DEVICE_PACKET: u16 = 0x0001;
/// Variant tag for sensor data (and summary) packets
pub const SENSOR_DATA: u16 = 0x0002;
/// Variant tag for metadata packets
pub const METADATA: u16 = 0x0003;
/// Variant tag for device message packets
pub const DEVICE_MESSAGE: u16 = 0x0004;

/// Version tag written by this exporter; ignored on import.
pub const VERSION_TAG: u64 = 0;

/// Base tag, version tag and six i64 header fields
pub const BASE_HEADER_LEN: usize = 2 + 8 + 6 * 8;
/// Variant tag and version tag
pub const VARIANT_HEADER_LEN: usize = 2 + 8;
/// Length prefix of each byte buffer
pub const BUFFER_PREFIX_LEN: usize = 4;

fn truncated(context: &str, err: std::io::Error) -> MooringError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        MooringError::codec(context, "record truncated")
    } else {
        MooringError::codec(context, err.to_string())
    }
}

pub fn read_u16_be<R: Read>(reader: &mut R, context: &str) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf).map_err(|e| truncated(context, e))?;
    Ok(u16::from_be_bytes(buf))
}

pub fn read_u64_be<R: Read>(reader: &mut R, context: &str) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).map_err(|e| truncated(context, e))?;
    Ok(u64::from_be_bytes(buf))
}

pub fn read_i64_be<R: Read>(reader: &mut R, context: &str) -> Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).map_err(|e| truncated(context, e))?;
    Ok(i64::from_be_bytes(buf))
}

/// Read an i32-length-prefixed buffer.
///
/// Allocation is bounded by the bytes actually present, so a corrupt length
/// cannot trigger a huge allocation.
pub fn read_buffer<R: Read>(reader: &mut R, context: &str) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).map_err(|e| truncated(context, e))?;
    let len = i32::from_be_bytes(len_buf);
    if len < 0 {
        return Err(MooringError::codec(context, format!("negative buffer length {}", len)));
    }

    let mut data = Vec::new();
    reader
        .take(len as u64)
        .read_to_end(&mut data)
        .map_err(|e| truncated(context, e))?;
    if data.len() != len as usize {
        return Err(MooringError::codec(
            context,
            format!("record truncated: buffer needs {} bytes, found {}", len, data.len()),
        ));
    }
    Ok(data)
}

pub fn write_buffer<W: Write>(writer: &mut W, data: &[u8], context: &str) -> Result<()> {
    let len = i32::try_from(data.len()).map_err(|_| {
        MooringError::codec(context, format!("buffer of {} bytes exceeds i32 length", data.len()))
    })?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_buffer_rejects_negative_length() {
        let mut cursor = Cursor::new((-1i32).to_be_bytes().to_vec());
        let err = read_buffer(&mut cursor, "test").unwrap_err();
        assert!(matches!(err, MooringError::Codec { .. }));
    }

    #[test]
    fn read_buffer_detects_short_payload() {
        let mut bytes = 10i32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"abc");
        let err = read_buffer(&mut Cursor::new(bytes), "test").unwrap_err();
        assert!(err.to_string().contains("test"));
    }

    #[test]
    fn zero_length_buffer_round_trips() {
        let mut out = Vec::new();
        write_buffer(&mut out, &[], "test").unwrap();
        assert_eq!(out, vec![0, 0, 0, 0]);
        assert!(read_buffer(&mut Cursor::new(out), "test").unwrap().is_empty());
    }
}
