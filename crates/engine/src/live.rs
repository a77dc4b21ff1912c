use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use fxbot_brokers_common::{CostModel, SimulatedBroker};
use fxbot_core::*;
use fxbot_risk::{exit_trigger, Bracket, PositionSizer};
use fxbot_strategies::{IntradayBreakoutConfig, IntradayBreakoutStrategy};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::state::EngineState;
use crate::EngineError;

/// Settings for paper and live sessions, derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    pub session: SessionWindow,
    pub timezone: Tz,
    pub sl_pct: Decimal,
    pub tp_pct: Decimal,
    pub equity_pct_per_trade: Decimal,
    pub costs: CostModel,
    pub poll_interval: Duration,
    /// How far back each poll asks the feed for bars.
    pub lookback: chrono::Duration,
    pub state_file: PathBuf,
}

impl LiveSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            symbols: config.symbols.clone(),
            timeframe: config.timeframe,
            session: config.session,
            timezone: config.data.timezone,
            sl_pct: config.sl_pct,
            tp_pct: config.tp_pct,
            equity_pct_per_trade: config.equity_pct_per_trade,
            costs: CostModel::from(&config.costs),
            poll_interval: Duration::from_secs(config.live.poll_interval_secs),
            lookback: chrono::Duration::hours(i64::from(config.live.lookback_hours)),
            state_file: config.output.state_file.clone(),
        }
    }
}

/// Simulated execution for paper trading, holding the positions left open
/// by a previous session.
pub fn paper_broker(config: &AppConfig, state: &EngineState) -> SimulatedBroker {
    let mut broker = SimulatedBroker::new(config.initial_equity, CostModel::from(&config.costs));
    for position in state.open_positions() {
        broker.restore_position(position);
    }
    broker
}

/// Polls a market feed and trades the intraday breakout through a broker.
///
/// Each poll handles the bars per symbol that completed since the previous
/// one; the newest bar returned is still forming and only its open is used,
/// as the entry reference. State is persisted after every change.
pub struct LiveEngine<F, B> {
    feed: F,
    broker: B,
    settings: LiveSettings,
    state: EngineState,
    strategies: HashMap<String, IntradayBreakoutStrategy>,
    /// Newest bar handled per symbol during this process, whether it was
    /// folded into the levels or skipped while a position was open.
    last_evaluated: HashMap<String, DateTime<Utc>>,
    sizer: PositionSizer,
}

impl<F: MarketFeed, B: Broker> LiveEngine<F, B> {
    pub fn new(feed: F, broker: B, settings: LiveSettings, mut state: EngineState) -> Self {
        state.track(&settings.symbols);
        let strategies = settings
            .symbols
            .iter()
            .map(|symbol| {
                let config = IntradayBreakoutConfig {
                    instrument: symbol.clone(),
                    session: settings.session,
                    timezone: settings.timezone,
                };
                (symbol.clone(), IntradayBreakoutStrategy::new(config))
            })
            .collect();
        Self {
            feed,
            broker,
            sizer: PositionSizer::new(settings.equity_pct_per_trade),
            settings,
            state,
            strategies,
            last_evaluated: HashMap::new(),
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn persist(&self) -> Result<(), EngineError> {
        self.state.save(&self.settings.state_file)
    }

    /// Connect, then poll every interval until `shutdown` resolves.
    pub async fn run<S>(&mut self, shutdown: S) -> Result<(), EngineError>
    where
        S: Future<Output = ()>,
    {
        info!(symbols = ?self.settings.symbols, "Starting trading engine");
        if let Err(e) = self.feed.connect().await {
            error!(error = %e, "Failed to connect market feed");
            return Err(e.into());
        }
        if let Err(e) = self.broker.connect().await {
            error!(error = %e, "Failed to connect broker");
            if let Err(e) = self.feed.disconnect().await {
                warn!(error = %e, "Feed disconnect failed");
            }
            return Err(e.into());
        }

        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    match self.poll_once(Utc::now()).await {
                        Ok(orders) if orders > 0 => info!(orders, "Poll complete"),
                        Ok(_) => debug!("Poll complete, no orders"),
                        Err(e) => error!(error = %e, "Poll failed"),
                    }
                }
            }
        }

        if let Err(e) = self.broker.disconnect().await {
            warn!(error = %e, "Broker disconnect failed");
        }
        if let Err(e) = self.feed.disconnect().await {
            warn!(error = %e, "Feed disconnect failed");
        }
        self.persist()?;
        info!("Trading engine stopped");
        Ok(())
    }

    /// Run one polling pass over all symbols. Returns the number of orders
    /// filled.
    pub async fn poll_once(&mut self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        self.ensure_connected().await?;
        self.reconcile().await?;

        let mut orders = 0;
        let symbols = self.settings.symbols.clone();
        for symbol in &symbols {
            match self.process_symbol(symbol, now).await {
                Ok(n) => orders += n,
                Err(e) => warn!(%symbol, error = %e, "Symbol skipped this poll"),
            }
        }
        Ok(orders)
    }

    /// Reopen the feed or broker session if it dropped since the last poll.
    async fn ensure_connected(&mut self) -> Result<(), EngineError> {
        if !self.feed.is_connected() {
            warn!("Market feed not connected, reconnecting");
            self.feed.connect().await?;
        }
        if !self.broker.is_connected() {
            warn!("Broker not connected, reconnecting");
            self.broker.connect().await?;
        }
        Ok(())
    }

    /// Align persisted positions with what the broker actually holds.
    /// Positions closed broker-side (e.g. by a server-side stop) are dropped;
    /// unknown broker positions are adopted.
    pub async fn reconcile(&mut self) -> Result<(), EngineError> {
        let held = self.broker.positions().await?;
        let mut changed = false;
        for symbol in &self.settings.symbols {
            let remote = held.iter().find(|p| &p.instrument == symbol);
            match (self.state.position(symbol), remote) {
                (Some(_), None) => {
                    info!(%symbol, "Position no longer held by broker, clearing");
                    self.state.set_position(symbol, None);
                    changed = true;
                }
                (None, Some(position)) => {
                    warn!(%symbol, side = %position.side, "Adopting position opened outside this session");
                    self.state.set_position(symbol, Some(position));
                    changed = true;
                }
                _ => {}
            }
        }
        if changed {
            self.persist()?;
        }
        Ok(())
    }

    /// Handle every bar of `symbol` that completed since the last poll,
    /// oldest first. Only the newest completed bar can open a position,
    /// at the open of the bar now forming.
    async fn process_symbol(&mut self, symbol: &str, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let bars = match self
            .feed
            .recent_bars(symbol, self.settings.timeframe, now - self.settings.lookback, now)
            .await
        {
            Ok(bars) => bars,
            Err(DataError::NotFound(msg)) => {
                debug!(%symbol, %msg, "No recent bars");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };
        let Some((forming, completed)) = bars.split_last().filter(|(_, c)| !c.is_empty()) else {
            debug!(%symbol, bars = bars.len(), "Waiting for a completed bar");
            return Ok(0);
        };

        let last = self.state.last_bar_time(symbol);
        let split = match last {
            Some(last) => completed.partition_point(|b| b.timestamp <= last),
            None => completed.len() - 1,
        };
        let (history, pending) = completed.split_at(split);
        if pending.is_empty() {
            debug!(%symbol, bar = ?last, "Bar already processed");
            return Ok(0);
        }
        self.warm_up(symbol, history);
        if pending.len() > 1 {
            info!(%symbol, bars = pending.len(), "Catching up on bars completed since the last poll");
        }

        let mut orders = 0;
        for (i, bar) in pending.iter().enumerate() {
            let next_open = (i + 1 == pending.len()).then_some(forming);
            orders += self.step(symbol, bar, next_open).await?;
            self.last_evaluated.insert(symbol.to_string(), bar.timestamp);
            self.state.last_bar_times.insert(symbol.to_string(), bar.timestamp);
        }
        self.persist()?;
        Ok(orders)
    }

    /// Fold bars processed before this process started into the strategy's
    /// intraday levels, without trading on them.
    fn warm_up(&mut self, symbol: &str, history: &[Bar]) {
        let Some(strategy) = self.strategies.get_mut(symbol) else {
            return;
        };
        let seen = self.last_evaluated.get(symbol).copied();
        let mut warmed = 0;
        for bar in history.iter().filter(|b| seen.map_or(true, |s| b.timestamp > s)) {
            strategy.evaluate(bar);
            self.last_evaluated.insert(symbol.to_string(), bar.timestamp);
            warmed += 1;
        }
        if warmed > 0 {
            debug!(%symbol, bars = warmed, levels = ?strategy.levels(), "Warmed up intraday levels");
        }
    }

    /// One completed bar: exit check while a position is open, otherwise
    /// strategy evaluation. Levels do not move while a position is held.
    /// `forming` is set only for the newest completed bar.
    async fn step(&mut self, symbol: &str, bar: &Bar, forming: Option<&Bar>) -> Result<usize, EngineError> {
        let mut orders = 0;
        if let Some(position) = self.state.position(symbol) {
            let Some((reason, level)) = exit_trigger(&position, bar) else {
                return Ok(0);
            };
            info!(
                %symbol,
                side = %position.side,
                price = %level,
                %reason,
                bar = %bar.timestamp,
                "Closing position"
            );
            let order = Order::exit(&position, level, reason, bar.timestamp);
            match self.broker.submit_order(order).await {
                Ok(_) => orders += 1,
                Err(BrokerError::NoPosition(_)) => {
                    warn!(%symbol, "Broker had no position to close");
                }
                Err(e) => return Err(e.into()),
            }
            self.state.set_position(symbol, None);
            self.persist()?;
        }

        let Some(strategy) = self.strategies.get_mut(symbol) else {
            return Ok(orders);
        };
        let signal = strategy.evaluate(bar);

        match (signal, forming) {
            (Some(side), Some(forming)) => {
                if self.enter(symbol, side, forming).await? {
                    orders += 1;
                }
            }
            (Some(side), None) => {
                debug!(%symbol, %side, bar = %bar.timestamp, "Signal on a caught-up bar, entry missed");
            }
            (None, _) => {}
        }
        Ok(orders)
    }

    async fn enter(&mut self, symbol: &str, side: Side, forming: &Bar) -> Result<bool, EngineError> {
        let equity = self.broker.account_state().await?.equity;
        let volume = self.sizer.volume(equity, forming.open);
        if volume.is_zero() {
            warn!(%symbol, %equity, "Zero volume, entry skipped");
            return Ok(false);
        }

        let expected_entry = self.settings.costs.entry_price(side, forming.open);
        let bracket = Bracket::for_entry(side, expected_entry, self.settings.sl_pct, self.settings.tp_pct);
        info!(
            %symbol,
            %side,
            %volume,
            entry = %expected_entry,
            sl = %bracket.stop_loss,
            tp = %bracket.take_profit,
            "Placing entry order"
        );

        let order = Order::entry(
            symbol,
            side,
            volume,
            forming.open,
            bracket.stop_loss,
            bracket.take_profit,
            forming.timestamp,
        );
        let filled = match self.broker.submit_order(order).await {
            Ok(filled) => filled,
            Err(e) => {
                error!(%symbol, error = %e, "Entry order failed");
                return Ok(false);
            }
        };

        let position = Position {
            instrument: symbol.to_string(),
            side,
            quantity: volume,
            entry_price: filled.fill_price.unwrap_or(expected_entry),
            stop_loss: bracket.stop_loss,
            take_profit: bracket.take_profit,
            opened_at: forming.timestamp,
        };
        self.state.set_position(symbol, Some(&position));
        self.persist()?;
        Ok(true)
    }
}
