use async_trait::async_trait;
use fxbot_core::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::client::BridgeClient;
use crate::protocol::*;

/// MetaTrader 5 broker adapter.
///
/// Orders go to the bridge EA as market orders with SL/TP attached; the EA
/// answers each one with an `order_update`. Volumes cross the wire in lots.
pub struct MetaTraderBroker {
    client: BridgeClient,
    lot_size: Decimal,
    connected: bool,
    account: AccountState,
    positions: HashMap<String, Position>,
}

impl MetaTraderBroker {
    pub fn new(config: Mt5Config, lot_size: Decimal) -> Self {
        Self {
            client: BridgeClient::new(config),
            lot_size,
            connected: false,
            account: AccountState::new(Decimal::ZERO),
            positions: HashMap::new(),
        }
    }

    fn to_lots(&self, units: Decimal) -> Decimal {
        (units / self.lot_size).round_dp(2)
    }

    /// Process an inbound message, updating internal state.
    fn process_message(&mut self, msg: &InboundMessage) {
        match msg {
            InboundMessage::AccountUpdate { balance, equity } => {
                self.account.balance = *balance;
                self.account.equity = *equity;
                self.account.timestamp = chrono::Utc::now();
            }
            InboundMessage::PositionUpdate { positions } => {
                self.positions = positions
                    .iter()
                    .filter_map(|p| self.position_from_info(p))
                    .map(|p| (p.instrument.clone(), p))
                    .collect();
                self.account.open_positions = self.positions.len();
            }
            InboundMessage::OrderUpdate { client_order_id, status, .. } => {
                debug!(%client_order_id, %status, "Unmatched order update");
            }
            other => debug!(?other, "Ignoring bridge message"),
        }
    }

    fn position_from_info(&self, info: &PositionInfo) -> Option<Position> {
        let side = match info.side.as_str() {
            "buy" | "long" => Side::Buy,
            "sell" | "short" => Side::Sell,
            unknown => {
                warn!(instrument = %info.instrument, side = %unknown, "Unknown position side");
                return None;
            }
        };
        Some(Position {
            instrument: info.instrument.clone(),
            side,
            quantity: info.lots * self.lot_size,
            entry_price: info.entry_price,
            stop_loss: info.stop_loss,
            take_profit: info.take_profit,
            opened_at: info.opened_at,
        })
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        if self.connected && self.client.is_open() {
            Ok(())
        } else {
            Err(BrokerError::ConnectionFailed("Not connected".to_string()))
        }
    }
}

#[async_trait]
impl Broker for MetaTraderBroker {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        self.connected = false;
        self.client
            .open()
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;
        self.client
            .heartbeat()
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        self.client.close().await;
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected && self.client.is_open()
    }

    async fn submit_order(&mut self, mut order: Order) -> Result<Order, BrokerError> {
        self.ensure_connected()?;
        let client_id = order.id.to_string();
        let msg = OutboundMessage::OrderSubmit {
            id: client_id.clone(),
            instrument: order.instrument.clone(),
            side: match order.side {
                Side::Buy => "buy".to_string(),
                Side::Sell => "sell".to_string(),
            },
            lots: self.to_lots(order.quantity),
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            close: order.is_exit(),
            comment: match order.exit_reason {
                Some(reason) => format!("fxbot exit {}", reason),
                None => "fxbot entry".to_string(),
            },
        };

        let mut unsolicited = Vec::new();
        let update = self
            .client
            .request(
                &msg,
                |reply| match reply {
                    InboundMessage::OrderUpdate { client_order_id, .. }
                        if *client_order_id == client_id =>
                    {
                        Some(reply.clone())
                    }
                    _ => None,
                },
                |other| unsolicited.push(other),
            )
            .await
            .map_err(|e| match e {
                crate::client::BridgeError::Remote(message) => BrokerError::OrderRejected(message),
                other => other.into(),
            })?;
        for msg in &unsolicited {
            self.process_message(msg);
        }

        let InboundMessage::OrderUpdate {
            broker_order_id,
            status,
            fill_price,
            message,
            ..
        } = update
        else {
            return Err(BrokerError::Other("order reply of wrong type".to_string()));
        };

        order.broker_order_id = Some(broker_order_id.clone());
        match status.as_str() {
            "filled" => {
                order.status = OrderStatus::Filled;
                order.fill_price = fill_price;
            }
            "rejected" => {
                order.status = OrderStatus::Rejected;
                return Err(BrokerError::OrderRejected(
                    message.unwrap_or_else(|| format!("{} rejected by terminal", order.instrument)),
                ));
            }
            other => {
                warn!(order_id = %order.id, status = %other, "Unexpected order status");
                order.status = OrderStatus::Submitted;
            }
        }

        if order.is_exit() {
            self.positions.remove(&order.instrument);
        } else if let (Some(stop_loss), Some(take_profit)) = (order.stop_loss, order.take_profit) {
            self.positions.insert(
                order.instrument.clone(),
                Position {
                    instrument: order.instrument.clone(),
                    side: order.side,
                    quantity: order.quantity,
                    entry_price: order.fill_price.unwrap_or(order.reference_price),
                    stop_loss,
                    take_profit,
                    opened_at: order.created_at,
                },
            );
        }
        self.account.open_positions = self.positions.len();

        info!(
            order_id = %order.id,
            %broker_order_id,
            instrument = %order.instrument,
            side = %order.side,
            quantity = %order.quantity,
            fill_price = ?order.fill_price,
            "MetaTrader order filled"
        );
        Ok(order)
    }

    async fn account_state(&mut self) -> Result<AccountState, BrokerError> {
        self.ensure_connected()?;
        let mut unsolicited = Vec::new();
        let update = self
            .client
            .request(
                &OutboundMessage::AccountRequest,
                |reply| matches!(reply, InboundMessage::AccountUpdate { .. }).then(|| reply.clone()),
                |other| unsolicited.push(other),
            )
            .await?;
        unsolicited.push(update);
        for msg in &unsolicited {
            self.process_message(msg);
        }
        Ok(self.account.clone())
    }

    async fn positions(&mut self) -> Result<Vec<Position>, BrokerError> {
        self.ensure_connected()?;
        let mut unsolicited = Vec::new();
        let update = self
            .client
            .request(
                &OutboundMessage::PositionsRequest,
                |reply| matches!(reply, InboundMessage::PositionUpdate { .. }).then(|| reply.clone()),
                |other| unsolicited.push(other),
            )
            .await?;
        unsolicited.push(update);
        for msg in &unsolicited {
            self.process_message(msg);
        }

        let mut positions: Vec<Position> = self.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        Ok(positions)
    }
}
