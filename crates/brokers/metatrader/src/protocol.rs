use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this are treated as a corrupt stream.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Messages sent from the Rust client TO the MetaTrader bridge EA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// Log the terminal into a trading account.
    #[serde(rename = "login")]
    Login {
        login: u64,
        password: String,
        server: String,
    },
    /// Request bars with open times in `[start, end]`.
    #[serde(rename = "rates_request")]
    RatesRequest {
        request_id: String,
        instrument: String,
        timeframe: String,
        #[serde(with = "chrono::serde::ts_seconds")]
        start: DateTime<Utc>,
        #[serde(with = "chrono::serde::ts_seconds")]
        end: DateTime<Utc>,
    },
    /// Submit a market order. Entries carry their protective levels;
    /// `close` marks an order that flattens the instrument's position.
    #[serde(rename = "order_submit")]
    OrderSubmit {
        id: String,
        instrument: String,
        side: String,
        lots: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        close: bool,
        comment: String,
    },
    /// Request current account state.
    #[serde(rename = "account_request")]
    AccountRequest,
    /// Request current positions.
    #[serde(rename = "positions_request")]
    PositionsRequest,
    /// Heartbeat.
    #[serde(rename = "heartbeat")]
    Heartbeat {
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
}

/// One bar as reported by the terminal. Times are bar open times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateBar {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub tick_volume: Decimal,
}

/// An open position as reported by the terminal. Volume is in lots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub instrument: String,
    pub side: String,
    pub lots: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub opened_at: DateTime<Utc>,
}

/// Messages received FROM the MetaTrader bridge EA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    /// Login accepted.
    #[serde(rename = "connected")]
    Connected { version: String },
    /// Reply to a rates request.
    #[serde(rename = "rates")]
    Rates {
        request_id: String,
        instrument: String,
        bars: Vec<RateBar>,
    },
    /// Order update (fill or reject).
    #[serde(rename = "order_update")]
    OrderUpdate {
        client_order_id: String,
        broker_order_id: String,
        status: String,
        fill_price: Option<Decimal>,
        message: Option<String>,
    },
    /// Account state update.
    #[serde(rename = "account_update")]
    AccountUpdate { balance: Decimal, equity: Decimal },
    /// Full snapshot of open positions.
    #[serde(rename = "position_update")]
    PositionUpdate { positions: Vec<PositionInfo> },
    /// Heartbeat acknowledgement.
    #[serde(rename = "heartbeat_ack")]
    HeartbeatAck {
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
    /// Error message.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Frame a message with a 4-byte length prefix (big-endian).
pub fn frame_message(msg: &[u8]) -> Vec<u8> {
    let len = msg.len() as u32;
    let mut framed = Vec::with_capacity(4 + msg.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(msg);
    framed
}

/// Read one length-prefixed frame.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// Write one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> std::io::Result<()> {
    writer.write_all(&frame_message(body)).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_frame_prefix_is_big_endian_length() {
        let framed = frame_message(b"{}");
        assert_eq!(framed, vec![0, 0, 0, 2, b'{', b'}']);
    }

    #[test]
    fn test_outbound_tagging() {
        let msg = OutboundMessage::RatesRequest {
            request_id: "r1".to_string(),
            instrument: "EURUSD".to_string(),
            timeframe: "H1".to_string(),
            start: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap(),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "rates_request");
        assert_eq!(json["start"], 1704153600);
        assert_eq!(
            serde_json::to_value(OutboundMessage::AccountRequest).unwrap()["type"],
            "account_request"
        );
    }

    #[test]
    fn test_inbound_rates_parse() {
        let raw = r#"{"type":"rates","request_id":"r1","instrument":"EURUSD","bars":[
            {"time":1704186000,"open":"1.1","high":"1.2","low":"1.0","close":"1.15"}]}"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        match msg {
            InboundMessage::Rates { bars, .. } => {
                assert_eq!(bars.len(), 1);
                assert_eq!(bars[0].time, Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap());
                assert_eq!(bars[0].close, dec!(1.15));
                assert_eq!(bars[0].tick_volume, Decimal::ZERO);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_frame_read_write() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, b"hello").await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
