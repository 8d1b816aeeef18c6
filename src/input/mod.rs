//! Recorded traffic that can be fed through the tracker instead of a live bus

pub mod csv;

pub use self::csv::{load_csv, read_csv};
