//! Delta overlay: `.d01`, `.d02`, … segments recording chunk overrides made
//! after the base image was finalized (§4.8).
//!
//! Each delta segment is itself a tiny EWF-grammar file (its own `header`,
//! `volume`, a `table` covering only the overridden chunk indices, and a
//! `done`). Later delta segments in the chain win over earlier ones for any
//! chunk index they both touch — "last wins", mirroring how a sequence of
//! incremental snapshots is replayed.

use std::collections::HashMap;

use crate::table::ChunkTableEntry;

/// Maps overridden chunk indices to the delta segment that holds the
/// current value for them. Built by folding each delta segment's table, in
/// chain order, into this map — a later segment's entry for the same index
/// simply replaces the earlier one.
#[derive(Debug, Clone, Default)]
pub struct DeltaOverlay {
    overrides: HashMap<usize, ChunkTableEntry>,
}

impl DeltaOverlay {
    pub fn new() -> Self {
        DeltaOverlay::default()
    }

    /// Applies one delta segment's chunk entries on top of whatever is
    /// already recorded; a repeated chunk index here always replaces the
    /// existing entry, so segments must be applied in chain order.
    pub fn apply_segment(&mut self, entries: impl IntoIterator<Item = (usize, ChunkTableEntry)>) {
        for (chunk_index, entry) in entries {
            self.overrides.insert(chunk_index, entry);
        }
    }

    pub fn lookup(&self, chunk_index: usize) -> Option<&ChunkTableEntry> {
        self.overrides.get(&chunk_index)
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(segment_id: u16) -> ChunkTableEntry {
        ChunkTableEntry {
            segment_id,
            file_offset: 0,
            stored_size: 100,
            compressed: false,
        }
    }

    #[test]
    fn later_segment_wins_on_overlap() {
        let mut overlay = DeltaOverlay::new();
        overlay.apply_segment([(3, entry(1)), (5, entry(1))]);
        overlay.apply_segment([(3, entry(2))]);

        assert_eq!(overlay.lookup(3).unwrap().segment_id, 2);
        assert_eq!(overlay.lookup(5).unwrap().segment_id, 1);
        assert!(overlay.lookup(9).is_none());
        assert_eq!(overlay.len(), 2);
    }
}
