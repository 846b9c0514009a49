//! Packet type selection and decimation
//!
//! Two predicates cover every selection the retrieval tools need. Each one acts
//! only on packets whose kind is in its own mask and passes everything else:
//!
//! - [`PacketFilter::IncludeTypesDecimated`] thins out its kinds by a skip
//!   interval (`0` keeps all, `-1` rejects all, `n` keeps every n-th)
//! - [`PacketFilter::ExcludeTypesComplement`] rejects every kind outside the
//!   wanted mask
//!
//! [`TypeSelection`] chains the two so that a packet is retained iff its kind
//! is wanted and it survives decimation. The same selection is used when the
//! node scans its log and when a shore client thins a retrieved stream.

use crate::types::{Packet, PacketKind, TypeMask};
use crate::{MooringError, Result};

/// Skip interval that rejects every packet a filter applies to.
pub const SKIP_ALL: i32 = -1;

/// Stateful packet predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketFilter {
    /// Keeps packets of `types` whose ordinal among those packets is a
    /// multiple of `skip`; packets of other kinds pass.
    IncludeTypesDecimated { types: TypeMask, skip: i32, seen: u64 },

    /// Rejects every packet whose kind is not in `types`.
    ExcludeTypesComplement { types: TypeMask },
}

impl PacketFilter {
    pub fn include_types_decimated(types: TypeMask, skip: i32) -> Result<Self> {
        if skip < SKIP_ALL {
            return Err(MooringError::invalid_argument(format!(
                "skip interval must be -1, 0 or positive, got {}",
                skip
            )));
        }
        Ok(PacketFilter::IncludeTypesDecimated { types, skip, seen: 0 })
    }

    pub fn exclude_types_complement(types: TypeMask) -> Self {
        PacketFilter::ExcludeTypesComplement { types }
    }

    /// Whether this filter acts on packets of `kind`.
    pub fn applies_to(&self, kind: PacketKind) -> bool {
        match self {
            PacketFilter::IncludeTypesDecimated { types, .. } => types.contains(kind),
            PacketFilter::ExcludeTypesComplement { types } => types.complement().contains(kind),
        }
    }

    pub fn pass(&mut self, packet: &Packet) -> bool {
        let kind = packet.kind();
        if !self.applies_to(kind) {
            return true;
        }
        match self {
            PacketFilter::ExcludeTypesComplement { .. } => false,
            PacketFilter::IncludeTypesDecimated { skip, seen, .. } => match *skip {
                0 => true,
                SKIP_ALL => false,
                n => {
                    let keep = *seen % n as u64 == 0;
                    *seen += 1;
                    keep
                }
            },
        }
    }
}

/// Outcome of running a packet through a [`TypeSelection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retained,
    /// Wanted kind, dropped by the skip interval
    Decimated,
    /// Unwanted kind
    Excluded,
}

/// Wanted kinds plus a decimation interval, applied as one predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSelection {
    exclude: PacketFilter,
    include: PacketFilter,
}

impl TypeSelection {
    pub fn new(types: TypeMask, skip: i32) -> Result<Self> {
        Ok(Self {
            exclude: PacketFilter::exclude_types_complement(types),
            include: PacketFilter::include_types_decimated(types, skip)?,
        })
    }

    /// Every kind, no decimation.
    pub fn all() -> Self {
        Self {
            exclude: PacketFilter::exclude_types_complement(TypeMask::ALL),
            include: PacketFilter::IncludeTypesDecimated { types: TypeMask::ALL, skip: 0, seen: 0 },
        }
    }

    /// Wanted kinds, no decimation.
    pub fn only(types: TypeMask) -> Self {
        Self {
            exclude: PacketFilter::exclude_types_complement(types),
            include: PacketFilter::IncludeTypesDecimated { types, skip: 0, seen: 0 },
        }
    }

    pub fn types(&self) -> TypeMask {
        match self.exclude {
            PacketFilter::ExcludeTypesComplement { types } => types,
            PacketFilter::IncludeTypesDecimated { types, .. } => types,
        }
    }

    pub fn classify(&mut self, packet: &Packet) -> Disposition {
        if !self.exclude.pass(packet) {
            Disposition::Excluded
        } else if !self.include.pass(packet) {
            Disposition::Decimated
        } else {
            Disposition::Retained
        }
    }

    pub fn retains(&mut self, packet: &Packet) -> bool {
        self.classify(packet) == Disposition::Retained
    }

    /// Keep the retained packets of a batch, preserving order.
    pub fn apply(&mut self, packets: impl IntoIterator<Item = Packet>) -> Vec<Packet> {
        packets.into_iter().filter(|p| self.retains(p)).collect()
    }
}
