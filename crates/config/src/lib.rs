//! Typed gateway configuration.
//!
//! Configuration is plain structs resolved from the environment (or built in
//! code by an embedding application); there is no config-file parser here.

pub mod schema;

pub use schema::{
    DebugServerConfig, GatewayConfig, RateLimitConfig, WsReverseConfig, WsServerConfig,
};
