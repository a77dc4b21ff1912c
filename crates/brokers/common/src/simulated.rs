use crate::CostModel;
use async_trait::async_trait;
use fxbot_core::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info};

/// A simulated broker for backtesting and paper trading.
///
/// Fills market orders immediately at their reference price adjusted by the
/// cost model. Holds at most one position per instrument.
pub struct SimulatedBroker {
    initial_balance: Decimal,
    costs: CostModel,
    account: AccountState,
    positions: HashMap<String, Position>,
    trades: Vec<Trade>,
    connected: bool,
    next_ticket: u64,
}

impl SimulatedBroker {
    pub fn new(initial_balance: Decimal, costs: CostModel) -> Self {
        Self {
            initial_balance,
            costs,
            account: AccountState::new(initial_balance),
            positions: HashMap::new(),
            trades: Vec::new(),
            connected: false,
            next_ticket: 1,
        }
    }

    /// Get the trade log.
    pub fn trade_log(&self) -> &[Trade] {
        &self.trades
    }

    /// Get the current account state (non-async).
    pub fn account(&self) -> &AccountState {
        &self.account
    }

    pub fn position(&self, instrument: &str) -> Option<&Position> {
        self.positions.get(instrument)
    }

    /// Re-open a position carried over from a previous session.
    pub fn restore_position(&mut self, position: Position) {
        debug!(instrument = %position.instrument, side = %position.side, "Restoring position");
        self.positions.insert(position.instrument.clone(), position);
        self.account.open_positions = self.positions.len();
    }

    /// Reset broker state (for re-running backtests).
    pub fn reset(&mut self) {
        self.account = AccountState::new(self.initial_balance);
        self.positions.clear();
        self.trades.clear();
        self.next_ticket = 1;
    }

    fn open_position(&mut self, order: &mut Order) -> Result<(), BrokerError> {
        if self.positions.contains_key(&order.instrument) {
            return Err(BrokerError::OrderRejected(format!(
                "{} already has an open position",
                order.instrument
            )));
        }
        let (Some(stop_loss), Some(take_profit)) = (order.stop_loss, order.take_profit) else {
            return Err(BrokerError::OrderRejected(format!(
                "entry for {} is missing stop-loss or take-profit",
                order.instrument
            )));
        };

        let fill_price = self.costs.entry_price(order.side, order.reference_price);
        self.positions.insert(
            order.instrument.clone(),
            Position {
                instrument: order.instrument.clone(),
                side: order.side,
                quantity: order.quantity,
                entry_price: fill_price,
                stop_loss,
                take_profit,
                opened_at: order.created_at,
            },
        );
        order.fill_price = Some(fill_price);
        Ok(())
    }

    fn close_position(&mut self, order: &mut Order) -> Result<(), BrokerError> {
        let position = self
            .positions
            .remove(&order.instrument)
            .ok_or_else(|| BrokerError::NoPosition(order.instrument.clone()))?;

        let fill_price = self.costs.exit_price(position.side, order.reference_price);
        let pnl = position.pnl_at(fill_price);
        let fees = self.costs.commission(position.quantity);
        let reason = order.exit_reason.unwrap_or(ExitReason::Manual);

        self.account.balance += pnl - fees;
        info!(
            instrument = %position.instrument,
            side = %position.side,
            entry = %position.entry_price,
            exit = %fill_price,
            %pnl,
            %fees,
            %reason,
            "Position closed"
        );
        self.trades.push(Trade {
            instrument: position.instrument,
            side: position.side,
            quantity: position.quantity,
            entry_price: position.entry_price,
            exit_price: fill_price,
            entry_time: position.opened_at,
            exit_time: order.created_at,
            pnl,
            fees,
            reason,
        });

        order.fill_price = Some(fill_price);
        order.commission = fees;
        Ok(())
    }

    fn update_account(&mut self, at: chrono::DateTime<chrono::Utc>) {
        self.account.equity = self.account.balance;
        self.account.open_positions = self.positions.len();
        self.account.timestamp = at;
    }
}

#[async_trait]
impl Broker for SimulatedBroker {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn submit_order(&mut self, mut order: Order) -> Result<Order, BrokerError> {
        order.status = OrderStatus::Submitted;

        let result = if order.is_exit() {
            self.close_position(&mut order)
        } else {
            self.open_position(&mut order)
        };
        if let Err(e) = result {
            debug!(order_id = %order.id, error = %e, "Simulated order rejected");
            return Err(e);
        }

        order.status = OrderStatus::Filled;
        order.broker_order_id = Some(format!("SIM-{}", self.next_ticket));
        self.next_ticket += 1;
        self.update_account(order.created_at);
        Ok(order)
    }

    async fn account_state(&mut self) -> Result<AccountState, BrokerError> {
        Ok(self.account.clone())
    }

    async fn positions(&mut self) -> Result<Vec<Position>, BrokerError> {
        let mut positions: Vec<Position> = self.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        Ok(positions)
    }
}
