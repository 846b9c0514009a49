//! Packet kinds and type masks

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use crate::{MooringError, Result};

/// Closed set of packet variants, as seen by filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    SensorData,
    Metadata,
    DeviceMessage,
    Summary,
}

impl PacketKind {
    pub const ALL: [PacketKind; 4] = [
        PacketKind::SensorData,
        PacketKind::Metadata,
        PacketKind::DeviceMessage,
        PacketKind::Summary,
    ];

    /// Bit flag for this kind within a [`TypeMask`].
    pub fn flag(self) -> i32 {
        match self {
            PacketKind::SensorData => 0x1,
            PacketKind::Metadata => 0x2,
            PacketKind::DeviceMessage => 0x4,
            PacketKind::Summary => 0x8,
        }
    }

    /// Name used on command lines.
    pub fn name(self) -> &'static str {
        match self {
            PacketKind::SensorData => "data",
            PacketKind::Metadata => "metadata",
            PacketKind::DeviceMessage => "message",
            PacketKind::Summary => "summary",
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PacketKind {
    type Err = MooringError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "data" => Ok(PacketKind::SensorData),
            "metadata" => Ok(PacketKind::Metadata),
            "message" => Ok(PacketKind::DeviceMessage),
            "summary" => Ok(PacketKind::Summary),
            other => Err(MooringError::invalid_argument(format!(
                "unknown packet type '{}'; expected data, metadata, message, summary or all",
                other
            ))),
        }
    }
}

/// Set of packet kinds, encoded as the node's integer type mask.
///
/// On the wire a mask of zero asks the node to apply the device's own default
/// filters instead of an explicit selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeMask(pub i32);

impl TypeMask {
    pub const EMPTY: TypeMask = TypeMask(0);
    pub const SENSOR_DATA: TypeMask = TypeMask(0x1);
    pub const METADATA: TypeMask = TypeMask(0x2);
    pub const DEVICE_MESSAGE: TypeMask = TypeMask(0x4);
    pub const SUMMARY: TypeMask = TypeMask(0x8);
    pub const ALL: TypeMask = TypeMask(0xFFFF);

    pub fn of(kind: PacketKind) -> Self {
        TypeMask(kind.flag())
    }

    pub fn contains(self, kind: PacketKind) -> bool {
        self.0 & kind.flag() != 0
    }

    /// Every kind not in this mask, restricted to [`TypeMask::ALL`].
    pub fn complement(self) -> Self {
        TypeMask(!self.0 & Self::ALL.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 & Self::ALL.0 == 0
    }

    pub fn bits(self) -> i32 {
        self.0
    }

    /// Parse a comma- or whitespace-separated list such as `data,metadata`.
    ///
    /// `all` selects every kind; an empty list yields [`TypeMask::ALL`].
    pub fn parse_list(list: &str) -> Result<Self> {
        let mut mask = TypeMask::EMPTY;
        for token in list.split(|c: char| c == ',' || c.is_whitespace()).filter(|t| !t.is_empty()) {
            if token == "all" {
                mask = TypeMask::ALL;
            } else {
                mask |= TypeMask::of(token.parse()?);
            }
        }
        Ok(if mask.is_empty() { TypeMask::ALL } else { mask })
    }
}

impl BitOr for TypeMask {
    type Output = TypeMask;

    fn bitor(self, rhs: TypeMask) -> TypeMask {
        TypeMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for TypeMask {
    fn bitor_assign(&mut self, rhs: TypeMask) {
        self.0 |= rhs.0;
    }
}

impl From<PacketKind> for TypeMask {
    fn from(kind: PacketKind) -> Self {
        TypeMask::of(kind)
    }
}

impl fmt::Display for TypeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == TypeMask::ALL {
            return f.write_str("all");
        }
        let names: Vec<&str> =
            PacketKind::ALL.iter().filter(|k| self.contains(**k)).map(|k| k.name()).collect();
        if names.is_empty() { write!(f, "{:#x}", self.0) } else { f.write_str(&names.join(",")) }
    }
}
