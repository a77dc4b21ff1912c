//! MetaTrader 5 adapter.
//!
//! Talks to an MQL5 bridge EA running inside the terminal over TCP using
//! length-prefixed JSON messages. The feed and the broker each hold their
//! own connection.

pub mod broker;
pub mod client;
pub mod feed;
pub mod protocol;

pub use broker::MetaTraderBroker;
pub use client::{BridgeClient, BridgeError};
pub use feed::MetaTraderFeed;
