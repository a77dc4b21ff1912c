pub mod intraday_breakout;

pub use intraday_breakout::{IntradayBreakoutConfig, IntradayBreakoutStrategy};
