//! Instrument category flags
//!
//! Tracks carry a fixed set of named booleans, one per recognized
//! instrument category. Upstream clients identify categories by numeric
//! index (guitar=1, drum=2, bass=3, piano=4).

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Recognized instrument categories with their external numeric indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentKind {
    Guitar,
    Drum,
    Bass,
    Piano,
}

impl InstrumentKind {
    /// All categories in index order.
    pub const ALL: [InstrumentKind; 4] = [
        InstrumentKind::Guitar,
        InstrumentKind::Drum,
        InstrumentKind::Bass,
        InstrumentKind::Piano,
    ];

    /// External numeric index for this category.
    pub fn index(&self) -> u8 {
        match self {
            InstrumentKind::Guitar => 1,
            InstrumentKind::Drum => 2,
            InstrumentKind::Bass => 3,
            InstrumentKind::Piano => 4,
        }
    }

    /// Resolve a category from its external index.
    pub fn from_index(index: u8) -> Result<Self> {
        match index {
            1 => Ok(InstrumentKind::Guitar),
            2 => Ok(InstrumentKind::Drum),
            3 => Ok(InstrumentKind::Bass),
            4 => Ok(InstrumentKind::Piano),
            other => Err(Error::InvalidInput(format!(
                "unknown instrument type index: {other}"
            ))),
        }
    }

    /// Store column name for this category's flag.
    pub fn column(&self) -> &'static str {
        match self {
            InstrumentKind::Guitar => "guitar",
            InstrumentKind::Drum => "drum",
            InstrumentKind::Bass => "bass",
            InstrumentKind::Piano => "piano",
        }
    }
}

/// Fixed set of per-category booleans, default all false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentFlags {
    pub guitar: bool,
    pub drum: bool,
    pub bass: bool,
    pub piano: bool,
}

impl InstrumentFlags {
    /// Build flags from a list of external category indices.
    /// Unknown indices are rejected rather than ignored.
    pub fn from_indices(indices: &[u8]) -> Result<Self> {
        let mut flags = InstrumentFlags::default();
        for &index in indices {
            flags.set(InstrumentKind::from_index(index)?);
        }
        Ok(flags)
    }

    /// Set one category flag.
    pub fn set(&mut self, kind: InstrumentKind) {
        match kind {
            InstrumentKind::Guitar => self.guitar = true,
            InstrumentKind::Drum => self.drum = true,
            InstrumentKind::Bass => self.bass = true,
            InstrumentKind::Piano => self.piano = true,
        }
    }

    /// Whether the flag for the given category is set.
    pub fn contains(&self, kind: InstrumentKind) -> bool {
        match kind {
            InstrumentKind::Guitar => self.guitar,
            InstrumentKind::Drum => self.drum,
            InstrumentKind::Bass => self.bass,
            InstrumentKind::Piano => self.piano,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flags_all_false() {
        let flags = InstrumentFlags::default();
        for kind in InstrumentKind::ALL {
            assert!(!flags.contains(kind));
        }
    }

    #[test]
    fn from_indices_sets_named_flags() {
        let flags = InstrumentFlags::from_indices(&[1, 4]).unwrap();
        assert!(flags.guitar);
        assert!(flags.piano);
        assert!(!flags.drum);
        assert!(!flags.bass);
    }

    #[test]
    fn duplicate_indices_are_idempotent() {
        let flags = InstrumentFlags::from_indices(&[2, 2, 2]).unwrap();
        assert!(flags.drum);
        assert!(!flags.guitar);
    }

    #[test]
    fn unknown_index_is_rejected() {
        assert!(InstrumentFlags::from_indices(&[0]).is_err());
        assert!(InstrumentFlags::from_indices(&[5]).is_err());
    }

    #[test]
    fn index_round_trip() {
        for kind in InstrumentKind::ALL {
            assert_eq!(InstrumentKind::from_index(kind.index()).unwrap(), kind);
        }
    }
}
