use crate::core::diff::{compare, FrameDiff};
use crate::core::frame::{Frame, MAX_DLC};
use crate::core::store::{FrameStore, TrackedEntry};
use tracing::trace;

/// What a single ingest changed, for the presentation to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeRecord {
    pub id: u32,
    /// Fixed table row of this identifier
    pub row_index: usize,
    pub is_new_identifier: bool,
    pub length_changed: bool,
    /// Only meaningful for slots below the new DLC
    pub byte_changed: [bool; MAX_DLC],
    /// Occurrence count after this ingest
    pub occurrence_count: u64,
}

impl ChangeRecord {
    fn new(id: u32, row_index: usize, diff: FrameDiff, occurrence_count: u64) -> Self {
        Self {
            id,
            row_index,
            is_new_identifier: diff.is_new_identifier,
            length_changed: diff.length_changed,
            byte_changed: diff.byte_changed,
            occurrence_count,
        }
    }

    /// Slots whose value changed
    pub fn changed_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.byte_changed
            .iter()
            .enumerate()
            .filter(|(_, changed)| **changed)
            .map(|(slot, _)| slot)
    }

    pub fn has_changes(&self) -> bool {
        self.length_changed || self.byte_changed.iter().any(|&changed| changed)
    }
}

/// Latest-state table for a live frame stream
///
/// `ingest` is the only mutator. Callers feeding it from several tasks must
/// serialise calls (one producer, in bus-arrival order).
#[derive(Debug, Default)]
pub struct FrameTracker {
    store: FrameStore,
    frames_ingested: u64,
}

impl FrameTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `frame` against the previous frame for its identifier, then record it
    pub fn ingest(&mut self, frame: Frame) -> ChangeRecord {
        let (previous, occurrence_count) = self.store.upsert(frame);
        let diff = compare(previous.as_ref(), &frame);
        self.frames_ingested += 1;

        // upsert always leaves an entry behind
        let row_index = self.store.row_order_index(frame.id()).unwrap_or_default();

        trace!(
            "Ingested 0x{:X} row={} count={} new={}",
            frame.id(),
            row_index,
            occurrence_count,
            diff.is_new_identifier
        );

        ChangeRecord::new(frame.id(), row_index, diff, occurrence_count)
    }

    pub fn lookup(&self, id: u32) -> Option<&TrackedEntry> {
        self.store.lookup(id)
    }

    pub fn row_order_index(&self, id: u32) -> Option<usize> {
        self.store.row_order_index(id)
    }

    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    /// Number of distinct identifiers
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Total frames ingested this session
    pub fn frames_ingested(&self) -> u64 {
        self.frames_ingested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: u32, data: &[u8]) -> Frame {
        Frame::from_data(id, data).unwrap()
    }

    #[test]
    fn test_each_identifier_new_exactly_once() {
        let mut tracker = FrameTracker::new();
        let ids = [0x100, 0x200, 0x100, 0x300, 0x200, 0x100];
        let mut new_count = std::collections::HashMap::new();

        for id in ids {
            let record = tracker.ingest(frame(id, &[0]));
            if record.is_new_identifier {
                *new_count.entry(id).or_insert(0) += 1;
            }
        }

        assert_eq!(new_count.len(), 3);
        assert!(new_count.values().all(|&n| n == 1));
    }

    #[test]
    fn test_occurrence_count_equals_ingests() {
        let mut tracker = FrameTracker::new();
        let mut last = None;
        for _ in 0..25 {
            last = Some(tracker.ingest(frame(0x123, &[1, 2, 3])));
        }

        assert_eq!(last.unwrap().occurrence_count, 25);
        assert_eq!(tracker.lookup(0x123).unwrap().occurrence_count, 25);
        assert_eq!(tracker.frames_ingested(), 25);
    }

    #[test]
    fn test_repeated_frame_reports_no_changes() {
        let mut tracker = FrameTracker::new();
        let f = frame(0x100, &[1, 2, 3, 4]);
        tracker.ingest(f);
        let record = tracker.ingest(f);

        assert!(!record.is_new_identifier);
        assert!(!record.length_changed);
        assert_eq!(record.byte_changed, [false; MAX_DLC]);
        assert_eq!(record.changed_slots().count(), 0);
    }

    #[test]
    fn test_length_shrink() {
        let mut tracker = FrameTracker::new();
        tracker.ingest(frame(0x100, &[1, 2, 3, 4, 5, 6, 7, 8]));
        let record = tracker.ingest(frame(0x100, &[9, 10]));

        assert!(record.length_changed);
        assert_eq!(record.changed_slots().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(tracker.lookup(0x100).unwrap().last_frame.data(), &[9, 10]);
    }

    #[test]
    fn test_byte_diff() {
        let mut tracker = FrameTracker::new();
        tracker.ingest(frame(0x200, &[0, 0, 0, 0]));
        let record = tracker.ingest(frame(0x200, &[0, 1, 0, 2]));

        assert!(!record.length_changed);
        assert_eq!(record.changed_slots().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_interleaved_identifiers_diff_against_own_history() {
        let mut tracker = FrameTracker::new();
        tracker.ingest(frame(0xA, &[1, 1, 1]));
        tracker.ingest(frame(0xB, &[9, 9, 9]));
        let record = tracker.ingest(frame(0xA, &[1, 1, 2]));

        assert_eq!(record.id, 0xA);
        assert_eq!(record.changed_slots().collect::<Vec<_>>(), vec![2]);
        assert_eq!(record.occurrence_count, 2);
    }

    #[test]
    fn test_row_index_stable_under_reobservation() {
        let mut tracker = FrameTracker::new();
        let x = tracker.ingest(frame(0x500, &[0])).row_index;
        let y = tracker.ingest(frame(0x050, &[0])).row_index;
        assert!(x < y);

        for i in 0..50u8 {
            let id = if i % 3 == 0 { 0x050 } else { 0x500 };
            let record = tracker.ingest(frame(id, &[i]));
            let expected = if id == 0x500 { x } else { y };
            assert_eq!(record.row_index, expected);
        }

        assert_eq!(tracker.row_order_index(0x500), Some(x));
        assert_eq!(tracker.row_order_index(0x050), Some(y));
    }

    #[test]
    fn test_diff_uses_entry_before_update() {
        let mut tracker = FrameTracker::new();
        tracker.ingest(frame(0x300, &[1, 2, 3, 4]));
        tracker.ingest(frame(0x300, &[1, 2, 3, 5]));
        let record = tracker.ingest(frame(0x300, &[1, 2, 3, 5]));

        // Compared with the second frame, not with itself or the first
        assert!(!record.has_changes());
        assert_eq!(record.occurrence_count, 3);

        let record = tracker.ingest(frame(0x300, &[0, 2, 3, 5]));
        assert_eq!(record.changed_slots().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_new_identifier_record() {
        let mut tracker = FrameTracker::new();
        tracker.ingest(frame(0x1, &[]));
        let record = tracker.ingest(frame(0x18FF0001, &[1, 2]));

        assert!(record.is_new_identifier);
        assert_eq!(record.row_index, 1);
        assert_eq!(record.occurrence_count, 1);
        assert!(!record.has_changes());
    }
}
