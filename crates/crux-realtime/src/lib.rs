//! Realtime plumbing for the club client: one multiplexed websocket carrying
//! change-feed subscriptions and cross-client relay broadcasts.
//!
//! Components:
//! - [`socket`] — connection lifecycle: heartbeat, reconnect with backoff,
//!   observable [`ConnectionState`], subscription replay after reconnect
//! - [`channels`] — the [`ChannelRegistry`]: idempotent (topic, filter)
//!   subscriptions fanned out to any number of local consumers
//! - [`relay`] — fire-and-forget broadcasts between client instances

pub mod channels;
pub mod relay;
pub mod socket;

pub use channels::{ChannelRegistry, SubscriptionHandle};
pub use relay::RelayHub;
pub use socket::{ConnectionState, RealtimeClient, RealtimeConfig};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no access token for realtime identify")]
    NoToken,

    #[error("realtime connection closed")]
    Closed,
}
