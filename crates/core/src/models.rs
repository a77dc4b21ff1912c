use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Market Data
// ---------------------------------------------------------------------------

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Bar timeframe, written the way MetaTrader names them (`M1` .. `D1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    Minute(u32),
    Hour(u32),
    Daily,
}

impl Timeframe {
    pub const SUPPORTED: [&'static str; 7] = ["M1", "M5", "M15", "M30", "H1", "H4", "D1"];
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeframe::Minute(n) => write!(f, "M{}", n),
            Timeframe::Hour(n) => write!(f, "H{}", n),
            Timeframe::Daily => write!(f, "D1"),
        }
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "M1" => Ok(Timeframe::Minute(1)),
            "M5" => Ok(Timeframe::Minute(5)),
            "M15" => Ok(Timeframe::Minute(15)),
            "M30" => Ok(Timeframe::Minute(30)),
            "H1" => Ok(Timeframe::Hour(1)),
            "H4" => Ok(Timeframe::Hour(4)),
            "D1" => Ok(Timeframe::Daily),
            other => Err(format!(
                "unsupported timeframe '{}' (expected one of {})",
                other,
                Self::SUPPORTED.join(", ")
            )),
        }
    }
}

impl TryFrom<String> for Timeframe {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Order side. For positions, `Buy` is long and `Sell` is short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Position direction label used in reports and logs.
    pub fn direction(&self) -> &'static str {
        match self {
            Side::Buy => "long",
            Side::Sell => "short",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.direction())
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "sl")]
    StopLoss,
    #[serde(rename = "tp")]
    TakeProfit,
    #[serde(rename = "end_of_data")]
    EndOfData,
    #[serde(rename = "manual")]
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "sl",
            ExitReason::TakeProfit => "tp",
            ExitReason::EndOfData => "end_of_data",
            ExitReason::Manual => "manual",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The lifecycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Filled,
    Rejected,
}

/// A market order submitted to a broker.
///
/// Entries carry the protective stop-loss / take-profit levels; exits carry
/// the reason they were triggered. `reference_price` is the price the order
/// is expected to trade at before spread and slippage; simulated brokers fill
/// against it, real brokers ignore it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub instrument: String,
    pub side: Side,
    pub quantity: Decimal,
    pub reference_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    pub status: OrderStatus,
    pub fill_price: Option<Decimal>,
    pub commission: Decimal,
    pub created_at: DateTime<Utc>,
    /// Broker-assigned ID after submission.
    pub broker_order_id: Option<String>,
}

impl Order {
    /// Create an order opening a position, with its bracket attached.
    pub fn entry(
        instrument: &str,
        side: Side,
        quantity: Decimal,
        reference_price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instrument: instrument.to_string(),
            side,
            quantity,
            reference_price,
            stop_loss: Some(stop_loss),
            take_profit: Some(take_profit),
            exit_reason: None,
            status: OrderStatus::Pending,
            fill_price: None,
            commission: Decimal::ZERO,
            created_at: at,
            broker_order_id: None,
        }
    }

    /// Create an order closing `position` at `reference_price`.
    pub fn exit(
        position: &Position,
        reference_price: Decimal,
        reason: ExitReason,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instrument: position.instrument.clone(),
            side: position.side.opposite(),
            quantity: position.quantity,
            reference_price,
            stop_loss: None,
            take_profit: None,
            exit_reason: Some(reason),
            status: OrderStatus::Pending,
            fill_price: None,
            commission: Decimal::ZERO,
            created_at: at,
            broker_order_id: None,
        }
    }

    pub fn is_exit(&self) -> bool {
        self.exit_reason.is_some()
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// Represents a currently open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Gross P&L of closing the whole position at `exit_price`.
    pub fn pnl_at(&self, exit_price: Decimal) -> Decimal {
        let price_diff = match self.side {
            Side::Buy => exit_price - self.entry_price,
            Side::Sell => self.entry_price - exit_price,
        };
        price_diff * self.quantity
    }
}

// ---------------------------------------------------------------------------
// Trade (closed position)
// ---------------------------------------------------------------------------

/// A completed (closed) trade with realized PnL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub instrument: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub pnl: Decimal,
    pub fees: Decimal,
    pub reason: ExitReason,
}

impl Trade {
    pub fn net_pnl(&self) -> Decimal {
        self.pnl - self.fees
    }

    /// Entry notional (price times volume).
    pub fn notional(&self) -> Decimal {
        self.entry_price * self.quantity
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// Snapshot of the account state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: Decimal,
    pub equity: Decimal,
    pub open_positions: usize,
    pub timestamp: DateTime<Utc>,
}

impl AccountState {
    pub fn new(starting_balance: Decimal) -> Self {
        Self {
            balance: starting_balance,
            equity: starting_balance,
            open_positions: 0,
            timestamp: Utc::now(),
        }
    }
}

/// Account equity at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// A trading signal emitted by a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub instrument: String,
    pub action: SignalAction,
    pub strategy_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    BuyEntry,
    SellEntry,
}

impl SignalAction {
    pub fn side(&self) -> Side {
        match self {
            SignalAction::BuyEntry => Side::Buy,
            SignalAction::SellEntry => Side::Sell,
        }
    }
}
