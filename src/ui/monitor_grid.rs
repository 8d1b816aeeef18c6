use colored::Colorize;
use crate::core::{ChangeRecord, FrameTracker, TrackedEntry, MAX_DLC};
use std::fmt::Write;

/// Highlight state of one data cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellMark {
    #[default]
    None,
    /// Changed since marks were last cleared
    Changed,
    /// Changed while "mark new changes" was on, and not marked before
    NewChange,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cell {
    /// Displayed text; `None` is a blank cell
    pub text: Option<String>,
    pub mark: CellMark,
}

/// One table row per identifier
#[derive(Debug, Clone, PartialEq)]
pub struct GridRow {
    pub id_text: String,
    pub dlc: usize,
    pub cells: [Cell; MAX_DLC],
    pub repeat: u64,
}

impl GridRow {
    fn from_entry(entry: &TrackedEntry) -> Self {
        let mut row = Self {
            id_text: entry.last_frame.id_text(),
            dlc: entry.last_frame.len(),
            cells: Default::default(),
            repeat: entry.occurrence_count,
        };
        row.fill_from(entry);
        row
    }

    /// Rewrite all texts from the stored frame, keeping marks
    fn fill_from(&mut self, entry: &TrackedEntry) {
        self.dlc = entry.last_frame.len();
        self.repeat = entry.occurrence_count;
        for (slot, cell) in self.cells.iter_mut().enumerate() {
            cell.text = entry.last_frame.byte(slot).map(|b| format!("{:02X}", b));
        }
    }
}

/// Text-table view of the tracker
///
/// The grid never reads values back from its own cells: texts come from the
/// tracker, and the only state it owns is the per-cell highlight.
#[derive(Debug, Default)]
pub struct MonitorGrid {
    rows: Vec<GridRow>,
    mark_new_changes: bool,
}

impl MonitorGrid {
    pub fn new(mark_new_changes: bool) -> Self {
        Self {
            rows: Vec::new(),
            mark_new_changes,
        }
    }

    pub fn mark_new_changes(&self) -> bool {
        self.mark_new_changes
    }

    pub fn set_mark_new_changes(&mut self, enabled: bool) {
        self.mark_new_changes = enabled;
    }

    pub fn rows(&self) -> &[GridRow] {
        &self.rows
    }

    /// Apply one change-record; `tracker` supplies the current values
    pub fn apply(&mut self, record: &ChangeRecord, tracker: &FrameTracker) {
        let Some(entry) = tracker.lookup(record.id) else {
            return;
        };

        // Rows missed while updates were coalesced are filled in by resync
        if record.row_index > self.rows.len() {
            self.resync(tracker);
            return;
        }

        if record.row_index == self.rows.len() {
            self.rows.push(GridRow::from_entry(entry));
            return;
        }

        let frame = &entry.last_frame;
        let mark_new = self.mark_new_changes;
        let row = &mut self.rows[record.row_index];

        if record.length_changed {
            row.dlc = frame.len();
            // Clear old data so shorter frames leave nothing stale behind
            for cell in row.cells.iter_mut() {
                cell.text = None;
            }
        }

        for slot in 0..frame.len() {
            let cell = &mut row.cells[slot];
            if record.byte_changed[slot] {
                cell.text = frame.byte(slot).map(|b| format!("{:02X}", b));
                if cell.mark != CellMark::Changed {
                    cell.mark = if mark_new { CellMark::NewChange } else { CellMark::Changed };
                }
            } else if cell.text.is_none() {
                // Unchanged byte blanked by a length change
                cell.text = frame.byte(slot).map(|b| format!("{:02X}", b));
            }
        }

        row.repeat = record.occurrence_count;
    }

    /// Reset every highlight; values stay as they are
    pub fn clear_marks(&mut self) {
        for row in &mut self.rows {
            for cell in row.cells.iter_mut() {
                cell.mark = CellMark::None;
            }
        }
    }

    /// Redraw every row from the tracker
    pub fn resync(&mut self, tracker: &FrameTracker) {
        for (index, entry) in tracker.store().iter_rows().enumerate() {
            match self.rows.get_mut(index) {
                Some(row) => row.fill_from(entry),
                None => self.rows.push(GridRow::from_entry(entry)),
            }
        }
    }

    /// Render the table, optionally with ANSI colours
    pub fn render(&self, color: bool) -> String {
        let mut out = String::new();
        let _ = write!(out, "{:<8} {:>3} ", "CAN-ID", "DLC");
        for slot in 0..MAX_DLC {
            let _ = write!(out, " D{}", slot);
        }
        let _ = writeln!(out, "  {:>8}", "Repeat");

        for row in &self.rows {
            let _ = write!(out, "{:<8} {:>3} ", row.id_text, row.dlc);
            for cell in &row.cells {
                let text = cell.text.as_deref().unwrap_or("  ");
                let shown = match (color, cell.mark) {
                    (true, CellMark::Changed) => text.red().to_string(),
                    (true, CellMark::NewChange) => text.green().to_string(),
                    _ => text.to_string(),
                };
                let _ = write!(out, " {}", shown);
            }
            let _ = writeln!(out, "  {:>8}", row.repeat);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Frame;

    fn feed(grid: &mut MonitorGrid, tracker: &mut FrameTracker, id: u32, data: &[u8]) -> ChangeRecord {
        let record = tracker.ingest(Frame::from_data(id, data).unwrap());
        grid.apply(&record, tracker);
        record
    }

    fn texts(row: &GridRow) -> Vec<Option<&str>> {
        row.cells.iter().map(|c| c.text.as_deref()).collect()
    }

    #[test]
    fn test_new_row_populated_without_marks() {
        let mut grid = MonitorGrid::new(false);
        let mut tracker = FrameTracker::new();
        feed(&mut grid, &mut tracker, 0x123, &[0xAB, 0x01]);

        let row = &grid.rows()[0];
        assert_eq!(row.id_text, "123");
        assert_eq!(row.dlc, 2);
        assert_eq!(row.repeat, 1);
        assert_eq!(&texts(row)[..3], &[Some("AB"), Some("01"), None]);
        assert!(row.cells.iter().all(|c| c.mark == CellMark::None));
    }

    #[test]
    fn test_changed_bytes_marked() {
        let mut grid = MonitorGrid::new(false);
        let mut tracker = FrameTracker::new();
        feed(&mut grid, &mut tracker, 0x200, &[0, 0, 0, 0]);
        feed(&mut grid, &mut tracker, 0x200, &[0, 1, 0, 2]);

        let row = &grid.rows()[0];
        let marks: Vec<CellMark> = row.cells[..4].iter().map(|c| c.mark).collect();
        assert_eq!(
            marks,
            vec![CellMark::None, CellMark::Changed, CellMark::None, CellMark::Changed]
        );
        assert_eq!(texts(row)[3], Some("02"));
        assert_eq!(row.repeat, 2);
    }

    #[test]
    fn test_length_shrink_blanks_stale_bytes() {
        let mut grid = MonitorGrid::new(false);
        let mut tracker = FrameTracker::new();
        feed(&mut grid, &mut tracker, 0x100, &[1, 2, 3, 4, 5, 6, 7, 8]);
        feed(&mut grid, &mut tracker, 0x100, &[9, 10]);

        let row = &grid.rows()[0];
        assert_eq!(row.dlc, 2);
        assert_eq!(texts(row)[..2], [Some("09"), Some("0A")]);
        assert!(texts(row)[2..].iter().all(|t| t.is_none()));
    }

    #[test]
    fn test_length_grow_keeps_unchanged_bytes_unmarked() {
        let mut grid = MonitorGrid::new(false);
        let mut tracker = FrameTracker::new();
        feed(&mut grid, &mut tracker, 0x100, &[1, 2]);
        feed(&mut grid, &mut tracker, 0x100, &[1, 2, 3]);

        let row = &grid.rows()[0];
        assert_eq!(texts(row)[..3], [Some("01"), Some("02"), Some("03")]);
        assert_eq!(row.cells[0].mark, CellMark::None);
        assert_eq!(row.cells[2].mark, CellMark::Changed);
    }

    #[test]
    fn test_mark_new_changes_mode() {
        let mut grid = MonitorGrid::new(false);
        let mut tracker = FrameTracker::new();
        feed(&mut grid, &mut tracker, 0x100, &[0, 0]);
        feed(&mut grid, &mut tracker, 0x100, &[1, 0]);

        grid.set_mark_new_changes(true);
        feed(&mut grid, &mut tracker, 0x100, &[2, 1]);

        let row = &grid.rows()[0];
        // Already marked cells keep their first mark
        assert_eq!(row.cells[0].mark, CellMark::Changed);
        assert_eq!(row.cells[1].mark, CellMark::NewChange);

        grid.set_mark_new_changes(false);
        feed(&mut grid, &mut tracker, 0x100, &[2, 2]);
        assert_eq!(grid.rows()[0].cells[1].mark, CellMark::Changed);
    }

    #[test]
    fn test_clear_marks_leaves_values() {
        let mut grid = MonitorGrid::new(false);
        let mut tracker = FrameTracker::new();
        feed(&mut grid, &mut tracker, 0x100, &[0]);
        feed(&mut grid, &mut tracker, 0x100, &[5]);

        grid.clear_marks();

        let row = &grid.rows()[0];
        assert_eq!(row.cells[0].mark, CellMark::None);
        assert_eq!(row.cells[0].text.as_deref(), Some("05"));
        assert_eq!(tracker.lookup(0x100).unwrap().occurrence_count, 2);
    }

    #[test]
    fn test_resync_after_missed_updates() {
        let mut grid = MonitorGrid::new(false);
        let mut tracker = FrameTracker::new();
        feed(&mut grid, &mut tracker, 0x100, &[0]);

        // These never reach the grid
        tracker.ingest(Frame::from_data(0x100, &[7]).unwrap());
        tracker.ingest(Frame::from_data(0x200, &[1, 2]).unwrap());

        let record = tracker.ingest(Frame::from_data(0x300, &[3]).unwrap());
        grid.apply(&record, &tracker);

        assert_eq!(grid.rows().len(), 3);
        assert_eq!(grid.rows()[0].cells[0].text.as_deref(), Some("07"));
        assert_eq!(grid.rows()[0].repeat, 2);
        assert_eq!(grid.rows()[1].id_text, "200");
        assert_eq!(grid.rows()[2].id_text, "300");
    }

    #[test]
    fn test_render_plain() {
        let mut grid = MonitorGrid::new(false);
        let mut tracker = FrameTracker::new();
        feed(&mut grid, &mut tracker, 0x7E8, &[0x10, 0x20]);
        feed(&mut grid, &mut tracker, 0x7E8, &[0x10, 0x21]);

        let table = grid.render(false);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("CAN-ID"));
        assert!(lines[0].contains("D7"));
        assert!(lines[1].starts_with("7E8"));
        assert!(lines[1].contains(" 10 21 "));
        assert!(lines[1].trim_end().ends_with('2'));
    }
}
