use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fxbot_core::*;
use tracing::debug;
use uuid::Uuid;

use crate::client::BridgeClient;
use crate::protocol::{InboundMessage, OutboundMessage};

/// Recent bars pulled from the MT5 terminal through the bridge EA.
pub struct MetaTraderFeed {
    client: BridgeClient,
}

impl MetaTraderFeed {
    pub fn new(config: Mt5Config) -> Self {
        Self {
            client: BridgeClient::new(config),
        }
    }
}

#[async_trait]
impl MarketFeed for MetaTraderFeed {
    async fn connect(&mut self) -> Result<(), DataError> {
        self.client.open().await?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DataError> {
        self.client.close().await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_open()
    }

    async fn recent_bars(
        &mut self,
        instrument: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, DataError> {
        let request_id = Uuid::new_v4().to_string();
        let msg = OutboundMessage::RatesRequest {
            request_id: request_id.clone(),
            instrument: instrument.to_string(),
            timeframe: timeframe.to_string(),
            start,
            end,
        };

        let rates = self
            .client
            .request(
                &msg,
                |reply| match reply {
                    InboundMessage::Rates {
                        request_id: id,
                        bars,
                        ..
                    } if *id == request_id => Some(bars.clone()),
                    _ => None,
                },
                |other| debug!(?other, "Skipping unrelated bridge message"),
            )
            .await
            .map_err(|e| DataError::FeedError(format!("rates for {}: {}", instrument, e)))?;

        if rates.is_empty() {
            return Err(DataError::NotFound(format!(
                "no {} bars for {} between {} and {}",
                timeframe, instrument, start, end
            )));
        }

        let mut bars: Vec<Bar> = rates
            .into_iter()
            .filter(|r| r.time >= start && r.time <= end)
            .map(|r| Bar {
                instrument: instrument.to_string(),
                timestamp: r.time,
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
                volume: r.tick_volume,
            })
            .collect();
        bars.sort_by_key(|b| b.timestamp);
        debug!(%instrument, bars = bars.len(), "Fetched bars from MetaTrader");
        Ok(bars)
    }
}
