pub mod frame;
pub mod store;
pub mod diff;
pub mod tracker;

pub use frame::{Frame, FrameError, MAX_DLC};
pub use store::{FrameStore, TrackedEntry};
pub use diff::{compare, FrameDiff};
pub use tracker::{ChangeRecord, FrameTracker};
