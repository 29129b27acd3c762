//! WebSocket gateway bridging the bot's internal event/command model to
//! external consumers, in both listening (forward) and dialing (reverse)
//! roles.
//!
//! Events flow bot → [`broadcast`] → registered connections → consumer.
//! Commands flow consumer → reader loop → [`api`] dispatcher → bot → same
//! socket.

use std::sync::Arc;

use botgate_protocol::BotEvent;

pub mod api;
pub mod auth;
pub mod broadcast;
pub mod client;
pub mod connection;
pub mod debug;
pub mod error;
pub mod filter;
pub mod server;

pub use error::{Error, Result};

/// Hook the bot pushes its events into. The forward server and reverse
/// client each subscribe their own receiver.
pub type EventBus = tokio::sync::broadcast::Sender<Arc<BotEvent>>;

/// Capacity of the bot event channel before slow consumers lag.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Create the bot-side event channel.
pub fn event_bus() -> EventBus {
    tokio::sync::broadcast::channel(EVENT_BUS_CAPACITY).0
}
