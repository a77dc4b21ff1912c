pub mod bracket;
pub mod sizing;

pub use bracket::{exit_trigger, Bracket};
pub use sizing::PositionSizer;
