//! Generic record parsing for display
//!
//! Instrument payloads are opaque to the protocol. For display, a
//! [`RecordParser`] turns a sensor-data payload into a [`Record`] of named
//! fields. Parsers are looked up by source type in a [`ParserRegistry`] that
//! the tool builds once at start-up, usually from [`ParserConfig`] entries,
//! and passes around by reference.
//!
//! The helpers here are presentation only. [`split_header`] separates a
//! textual header from the body by scanning for a sentinel, and [`describe`]
//! renders a packet with the cause of the metadata it refers to. Neither is
//! part of the binary interchange format.
//!
//! ```rust
//! use mooring::parser::{DelimitedParser, ParserRegistry};
//! use mooring::types::Packet;
//! use std::sync::Arc;
//!
//! let mut registry = ParserRegistry::new();
//! registry.register("ctd", Arc::new(DelimitedParser::new(["temp", "cond"], ',')));
//!
//! let packet = Packet::sensor_data(1553, 1000, 100, b"12.5,33.1".to_vec());
//! let record = registry.parse("ctd", &packet).unwrap();
//! assert_eq!(record.get("cond"), Some("33.1"));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::config::ParserConfig;
use crate::types::{Packet, PacketBody};
use crate::{MooringError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
}

/// Fields parsed from one packet, in payload order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub source_id: i64,
    pub sequence_no: i64,
    pub system_time: i64,
    pub fields: Vec<Field>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.value.as_str())
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.sequence_no)?;
        for field in &self.fields {
            write!(f, " {}={}", field.name, field.value)?;
        }
        Ok(())
    }
}

/// Converts an instrument payload into a [`Record`].
pub trait RecordParser: Send + Sync {
    fn parse(&self, packet: &Packet) -> Result<Record>;
}

/// Parser for delimiter-separated text samples.
///
/// Values beyond the configured names are kept as `field<N>` (1-based).
#[derive(Debug, Clone)]
pub struct DelimitedParser {
    names: Vec<String>,
    delimiter: char,
    header_sentinel: Option<Vec<u8>>,
}

impl DelimitedParser {
    pub fn new<I, S>(names: I, delimiter: char) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            delimiter,
            header_sentinel: None,
        }
    }

    /// Drop everything up to and including `sentinel` before splitting.
    pub fn with_header_sentinel(mut self, sentinel: impl Into<Vec<u8>>) -> Self {
        self.header_sentinel = Some(sentinel.into());
        self
    }
}

impl From<&ParserConfig> for DelimitedParser {
    fn from(config: &ParserConfig) -> Self {
        let parser = DelimitedParser::new(config.fields.iter().cloned(), config.delimiter);
        match &config.header_sentinel {
            Some(sentinel) => parser.with_header_sentinel(sentinel.as_bytes()),
            None => parser,
        }
    }
}

impl RecordParser for DelimitedParser {
    fn parse(&self, packet: &Packet) -> Result<Record> {
        let data = match &packet.body {
            PacketBody::SensorData { data } | PacketBody::Summary { data } => data,
            _ => {
                return Err(MooringError::invalid_argument(format!(
                    "packet {} is {}, not sensor data",
                    packet.sequence_no,
                    packet.kind()
                )));
            }
        };
        let data = match &self.header_sentinel {
            Some(sentinel) => split_header(data, sentinel).1,
            None => data.as_slice(),
        };
        let text = String::from_utf8_lossy(data);
        let fields = text
            .trim_end_matches(['\r', '\n'])
            .split(self.delimiter)
            .enumerate()
            .map(|(i, value)| Field {
                name: self.names.get(i).cloned().unwrap_or_else(|| format!("field{}", i + 1)),
                value: value.trim().to_string(),
            })
            .collect();
        Ok(Record {
            source_id: packet.source_id,
            sequence_no: packet.sequence_no,
            system_time: packet.system_time,
            fields,
        })
    }
}

/// Source-type to parser mapping.
#[derive(Default, Clone)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn RecordParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`DelimitedParser`] per configured source type.
    pub fn from_config(parsers: &[ParserConfig]) -> Self {
        let mut registry = Self::new();
        for config in parsers {
            registry.register(config.source_type.clone(), Arc::new(DelimitedParser::from(config)));
        }
        registry
    }

    pub fn register(&mut self, source_type: impl Into<String>, parser: Arc<dyn RecordParser>) {
        self.parsers.insert(source_type.into(), parser);
    }

    pub fn get(&self, source_type: &str) -> Option<&Arc<dyn RecordParser>> {
        self.parsers.get(source_type)
    }

    pub fn parse(&self, source_type: &str, packet: &Packet) -> Result<Record> {
        let parser = self.get(source_type).ok_or_else(|| {
            MooringError::invalid_argument(format!("no parser for source type '{}'", source_type))
        })?;
        parser.parse(packet)
    }

    /// [`describe`] plus the parsed fields of sample packets.
    pub fn describe(
        &self,
        source_type: Option<&str>,
        packet: &Packet,
        metadata: &MetadataIndex,
    ) -> String {
        let mut line = describe(packet, metadata);
        if !matches!(packet.body, PacketBody::SensorData { .. } | PacketBody::Summary { .. }) {
            return line;
        }
        let Some(source_type) = source_type.filter(|t| self.parsers.contains_key(*t)) else {
            return line;
        };
        match self.parse(source_type, packet) {
            Ok(record) => {
                line.push_str(" |");
                for field in &record.fields {
                    line.push_str(&format!(" {}={}", field.name, field.value));
                }
            }
            Err(e) => trace!("Packet {} not parsed: {}", packet.sequence_no, e),
        }
        line
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

impl fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&String> = self.parsers.keys().collect();
        types.sort();
        f.debug_struct("ParserRegistry").field("source_types", &types).finish()
    }
}

/// Split `payload` at the first `sentinel`: `(header, body)`, sentinel
/// excluded. Without a sentinel the whole payload is body.
pub fn split_header<'a>(payload: &'a [u8], sentinel: &[u8]) -> (&'a [u8], &'a [u8]) {
    if sentinel.is_empty() || sentinel.len() > payload.len() {
        return (&payload[..0], payload);
    }
    match payload.windows(sentinel.len()).position(|w| w == sentinel) {
        Some(at) => (&payload[..at], &payload[at + sentinel.len()..]),
        None => (&payload[..0], payload),
    }
}

/// Causes of the metadata packets seen so far, by sequence number.
#[derive(Debug, Clone, Default)]
pub struct MetadataIndex {
    causes: BTreeMap<i64, String>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, packet: &Packet) {
        if let PacketBody::Metadata { cause, .. } = &packet.body {
            self.causes.insert(packet.sequence_no, String::from_utf8_lossy(cause).into_owned());
        }
    }

    /// Cause of the metadata packet `packet` refers to.
    pub fn cause_for(&self, packet: &Packet) -> Option<&str> {
        self.causes.get(&packet.metadata_ref).map(String::as_str)
    }
}

/// One-line human-readable rendering of a packet.
pub fn describe(packet: &Packet, metadata: &MetadataIndex) -> String {
    let time = chrono::DateTime::from_timestamp_millis(packet.system_time)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| packet.system_time.to_string());
    let mut line = format!(
        "{} #{} device {} {} {} bytes",
        time,
        packet.sequence_no,
        packet.source_id,
        packet.kind(),
        packet.payload().len()
    );
    match &packet.body {
        PacketBody::Metadata { cause, .. } => {
            line.push_str(&format!(" cause \"{}\"", String::from_utf8_lossy(cause)));
        }
        PacketBody::DeviceMessage { message } => {
            line.push_str(&format!(" \"{}\"", String::from_utf8_lossy(message).trim_end()));
        }
        _ => {
            if let Some(cause) = metadata.cause_for(packet) {
                line.push_str(&format!(" (metadata #{}: {})", packet.metadata_ref, cause));
            }
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimited_parser_names_fields() {
        let parser = DelimitedParser::new(["temp", "cond"], ',');
        let packet = Packet::sensor_data(1553, 0, 5, b"12.5, 33.1,7\r\n".to_vec());
        let record = parser.parse(&packet).unwrap();
        assert_eq!(record.get("temp"), Some("12.5"));
        assert_eq!(record.get("cond"), Some("33.1"));
        assert_eq!(record.get("field3"), Some("7"));
        assert_eq!(record.to_string(), "#5 temp=12.5 cond=33.1 field3=7");
    }

    #[test]
    fn parser_rejects_non_sample_packets() {
        let parser = DelimitedParser::new(["a"], ',');
        let packet = Packet::device_message(1, 0, 1, b"hi".to_vec());
        assert!(parser.parse(&packet).is_err());
    }

    #[test]
    fn registry_is_explicit() {
        let mut registry = ParserRegistry::new();
        assert!(registry.parse("ctd", &Packet::sensor_data(1, 0, 1, vec![])).is_err());
        registry.register("ctd", Arc::new(DelimitedParser::new(["t"], ' ')));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("ctd").is_some());
    }

    #[test]
    fn configured_parsers_render_sample_fields() {
        let registry = ParserRegistry::from_config(&[ParserConfig {
            source_type: "ctd".into(),
            fields: vec!["temp".into(), "cond".into()],
            delimiter: ',',
            header_sentinel: Some("*END*".into()),
        }]);
        let index = MetadataIndex::new();

        let sample = Packet::sensor_data(1553, 1050, 101, b"SBE37*END*12.5,33.1".to_vec());
        let record = registry.parse("ctd", &sample).unwrap();
        assert_eq!(record.get("temp"), Some("12.5"));

        let line = registry.describe(Some("ctd"), &sample, &index);
        assert!(line.ends_with("| temp=12.5 cond=33.1"), "{line}");
        assert_eq!(registry.describe(None, &sample, &index), describe(&sample, &index));
        assert_eq!(registry.describe(Some("adcp"), &sample, &index), describe(&sample, &index));

        let message = Packet::device_message(1553, 1100, 102, b"low battery".to_vec());
        assert_eq!(registry.describe(Some("ctd"), &message, &index), describe(&message, &index));
    }

    #[test]
    fn split_header_finds_sentinel() {
        let (header, body) = split_header(b"SBE37 v2*END*12.5,33.1", b"*END*");
        assert_eq!(header, b"SBE37 v2");
        assert_eq!(body, b"12.5,33.1");

        let (header, body) = split_header(b"12.5", b"*END*");
        assert!(header.is_empty());
        assert_eq!(body, b"12.5");
    }

    #[test]
    fn describe_includes_metadata_cause() {
        let mut index = MetadataIndex::new();
        let metadata = Packet::metadata(1553, 1000, 100, b"power on".to_vec(), b"cfg".to_vec());
        index.observe(&metadata);
        let sample = Packet::sensor_data(1553, 1050, 101, b"12.5".to_vec()).with_metadata_ref(100);

        let line = describe(&sample, &index);
        assert!(line.contains("#101"));
        assert!(line.contains("metadata #100: power on"), "{line}");
        assert!(describe(&metadata, &index).contains("cause \"power on\""));
    }
}
