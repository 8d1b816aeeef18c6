pub mod monitor_grid;

pub use monitor_grid::{Cell, CellMark, GridRow, MonitorGrid};
