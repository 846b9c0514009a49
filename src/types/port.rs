//! Instrument ports exposed by a node

/// One instrument port on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    /// Port name, e.g. a serial device path
    pub name: String,
    /// Device ID of the service on this port
    pub source_id: i64,
    pub service_name: String,
}

impl Port {
    pub fn new(name: impl Into<String>, source_id: i64, service_name: impl Into<String>) -> Self {
        Self { name: name.into(), source_id, service_name: service_name.into() }
    }
}
