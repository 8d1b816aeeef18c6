//! Live CAN bus monitor
//!
//! Frames from an adapter are fed to a [`FrameTracker`](crate::core::FrameTracker), which keeps the
//! latest frame per identifier and reports which bytes changed. The
//! [`ui::MonitorGrid`] turns those reports into a highlighted table.

pub mod core;
pub mod hardware;
pub mod input;
pub mod settings;
pub mod ui;

pub use crate::core::{ChangeRecord, Frame, FrameError, FrameTracker};
pub use settings::AppSettings;
