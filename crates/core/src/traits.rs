use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Strategy Trait
// ---------------------------------------------------------------------------

/// A trading strategy that processes market data and produces signals.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Unique identifier for this strategy.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Called on every new bar.
    async fn on_bar(&mut self, bar: &Bar) -> Vec<Signal>;

    /// Reset internal state (for backtesting multiple runs).
    fn reset(&mut self);
}

// ---------------------------------------------------------------------------
// Broker Trait
// ---------------------------------------------------------------------------

/// Errors that can occur during broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Order rejected: {0}")]
    OrderRejected(String),
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),
    #[error("No open position for {0}")]
    NoPosition(String),
    #[error("Broker error: {0}")]
    Other(String),
}

/// A broker adapter that executes orders and reports account state.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Connect to the broker.
    async fn connect(&mut self) -> Result<(), BrokerError>;

    /// Disconnect from the broker.
    async fn disconnect(&mut self) -> Result<(), BrokerError>;

    /// Check if connected.
    fn is_connected(&self) -> bool;

    /// Submit a market order. Returns the order with fill details.
    async fn submit_order(&mut self, order: Order) -> Result<Order, BrokerError>;

    /// Get the current account state.
    async fn account_state(&mut self) -> Result<AccountState, BrokerError>;

    /// Get all open positions.
    async fn positions(&mut self) -> Result<Vec<Position>, BrokerError>;
}

// ---------------------------------------------------------------------------
// Market Feed Trait
// ---------------------------------------------------------------------------

/// A source of recent bars for paper and live trading.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    async fn connect(&mut self) -> Result<(), DataError>;

    async fn disconnect(&mut self) -> Result<(), DataError>;

    fn is_connected(&self) -> bool;

    /// Bars with timestamps in `[start, end]`, oldest first.
    async fn recent_bars(
        &mut self,
        instrument: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, DataError>;
}

// ---------------------------------------------------------------------------
// Data Provider Trait
// ---------------------------------------------------------------------------

/// Errors that can occur during data operations.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Data not found: {0}")]
    NotFound(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Feed error: {0}")]
    FeedError(String),
}

/// Provides historical market data for backtesting.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Load all historical bars for an instrument, oldest first.
    async fn load_bars(&self, instrument: &str) -> Result<Vec<Bar>, DataError>;

    /// List available instruments.
    async fn available_instruments(&self) -> Result<Vec<String>, DataError>;
}
