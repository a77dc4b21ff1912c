pub mod math;
pub mod session_range;

pub use session_range::{RangeLevels, SessionRange};
