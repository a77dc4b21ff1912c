pub mod backtest;
pub mod error;
pub mod live;
pub mod metrics;
pub mod report;
pub mod state;

pub use backtest::{load_bars, run_backtest, BacktestReport};
pub use error::EngineError;
pub use live::{paper_broker, LiveEngine, LiveSettings};
pub use metrics::{compute_metrics, PerformanceSummary};
pub use report::write_backtest_report;
pub use state::{EngineState, PositionRecord};
