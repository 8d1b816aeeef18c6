use crate::core::frame::Frame;
use std::collections::HashMap;

/// Latest known state for one identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedEntry {
    /// Most recently observed frame
    pub last_frame: Frame,
    /// Number of frames observed for this identifier, including the first
    pub occurrence_count: u64,
    /// Table row assigned when the identifier was first seen
    pub row_index: usize,
}

/// Identifier -> latest frame table
///
/// Rows are handed out in first-seen order and never reassigned, so a
/// presentation can keep a fixed row per identifier for the whole session.
#[derive(Debug, Default)]
pub struct FrameStore {
    entries: HashMap<u32, TrackedEntry>,
    /// Identifiers in row order
    rows: Vec<u32>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, id: u32) -> Option<&TrackedEntry> {
        self.entries.get(&id)
    }

    /// Record `frame` as the latest for its identifier
    ///
    /// Returns the entry as it was before this call (`None` for a first
    /// sighting) and the new occurrence count.
    pub fn upsert(&mut self, frame: Frame) -> (Option<TrackedEntry>, u64) {
        let id = frame.id();

        if let Some(entry) = self.entries.get_mut(&id) {
            let previous = entry.clone();
            entry.last_frame = frame;
            entry.occurrence_count += 1;
            return (Some(previous), entry.occurrence_count);
        }

        let row_index = self.rows.len();
        self.rows.push(id);
        self.entries.insert(
            id,
            TrackedEntry {
                last_frame: frame,
                occurrence_count: 1,
                row_index,
            },
        );
        (None, 1)
    }

    pub fn row_order_index(&self, id: u32) -> Option<usize> {
        self.entries.get(&id).map(|entry| entry.row_index)
    }

    /// Entries in row order
    pub fn iter_rows(&self) -> impl Iterator<Item = &TrackedEntry> + '_ {
        self.rows.iter().filter_map(|id| self.entries.get(id))
    }

    /// Number of distinct identifiers seen
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
