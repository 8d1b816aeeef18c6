//! Byte-level comparison of a frame against the previous one for its identifier

use crate::core::frame::{Frame, MAX_DLC};
use crate::core::store::TrackedEntry;

/// Result of comparing an incoming frame with the stored one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameDiff {
    /// No previous frame existed for this identifier
    pub is_new_identifier: bool,
    /// DLC differs from the previous frame
    pub length_changed: bool,
    /// Per-slot change flags, only set for slots below the incoming DLC
    pub byte_changed: [bool; MAX_DLC],
}

impl FrameDiff {
    /// True if anything visible in an existing row differs
    pub fn has_changes(&self) -> bool {
        self.length_changed || self.byte_changed.iter().any(|&changed| changed)
    }
}

/// Compare `incoming` against the previous state of its identifier.
///
/// A new identifier reports no byte changes; its row is filled in wholesale.
/// For a known identifier, slot `i` below the incoming DLC is flagged when it
/// did not exist before or holds a different value. Slots at or above the
/// incoming DLC are never flagged: when `length_changed` is set the consumer
/// blanks the whole row first, so a shrink leaves no stale bytes behind and a
/// grow does not re-flag unchanged low bytes.
pub fn compare(previous: Option<&TrackedEntry>, incoming: &Frame) -> FrameDiff {
    let Some(previous) = previous else {
        return FrameDiff {
            is_new_identifier: true,
            ..FrameDiff::default()
        };
    };

    let old = &previous.last_frame;
    let mut byte_changed = [false; MAX_DLC];
    for (slot, &value) in incoming.data().iter().enumerate() {
        byte_changed[slot] = old.byte(slot) != Some(value);
    }

    FrameDiff {
        is_new_identifier: false,
        length_changed: old.len() != incoming.len(),
        byte_changed,
    }
}
