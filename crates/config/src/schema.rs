use serde::{Deserialize, Serialize};

/// Root gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub ws_server: WsServerConfig,
    pub ws_reverse: WsReverseConfig,
    pub debug: DebugServerConfig,
}

/// Forward (listening) WebSocket transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WsServerConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Access token consumers must present. Empty means open access.
    pub access_token: String,
    /// Name of a registered event filter. Empty means unfiltered.
    pub filter: String,
    pub rate_limit: RateLimitConfig,
}

impl Default for WsServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".into(),
            port: 6700,
            access_token: String::new(),
            filter: String::new(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Reverse (dialing) WebSocket transport.
///
/// A non-empty `universal_url` supersedes `api_url` and `event_url`
/// entirely: only the Universal role is dialed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WsReverseConfig {
    pub enabled: bool,
    pub universal_url: String,
    pub api_url: String,
    pub event_url: String,
    pub access_token: String,
    pub filter: String,
    /// Delay between reconnection attempts. Zero disables reconnection:
    /// a failed role is abandoned permanently.
    pub reconnect_interval_ms: u64,
    pub rate_limit: RateLimitConfig,
}

impl Default for WsReverseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            universal_url: String::new(),
            api_url: String::new(),
            event_url: String::new(),
            access_token: String::new(),
            filter: String::new(),
            reconnect_interval_ms: 3000,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Command rate limiting, applied as a dispatch interceptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Tokens refilled per second.
    pub frequency: f64,
    /// Burst capacity.
    pub bucket: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: 1.0,
            bucket: 1,
        }
    }
}

/// Unauthenticated diagnostics listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugServerConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for DebugServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".into(),
            port: 7700,
        }
    }
}

impl GatewayConfig {
    /// Resolve configuration from `BOTGATE_*` environment variables.
    ///
    /// Unset variables keep their defaults; a set variable that fails to
    /// parse also keeps the default (the gateway should come up with a
    /// usable config rather than die on a typo'd integer).
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let server = &mut config.ws_server;
        server.enabled = env_bool("BOTGATE_WS_ENABLED").unwrap_or(server.enabled);
        if let Ok(host) = std::env::var("BOTGATE_WS_HOST") {
            server.host = host;
        }
        server.port = env_parse("BOTGATE_WS_PORT").unwrap_or(server.port);
        if let Ok(token) = std::env::var("BOTGATE_TOKEN") {
            server.access_token = token.clone();
            config.ws_reverse.access_token = token;
        }
        if let Ok(filter) = std::env::var("BOTGATE_FILTER") {
            server.filter = filter.clone();
            config.ws_reverse.filter = filter;
        }
        server.rate_limit = rate_limit_from_env();

        let reverse = &mut config.ws_reverse;
        if let Ok(url) = std::env::var("BOTGATE_WS_REVERSE_UNIVERSAL") {
            reverse.enabled = true;
            reverse.universal_url = url;
        }
        if let Ok(url) = std::env::var("BOTGATE_WS_REVERSE_API") {
            reverse.enabled = true;
            reverse.api_url = url;
        }
        if let Ok(url) = std::env::var("BOTGATE_WS_REVERSE_EVENT") {
            reverse.enabled = true;
            reverse.event_url = url;
        }
        reverse.enabled = env_bool("BOTGATE_WS_REVERSE_ENABLED").unwrap_or(reverse.enabled);
        reverse.reconnect_interval_ms =
            env_parse("BOTGATE_WS_RECONNECT_INTERVAL_MS").unwrap_or(reverse.reconnect_interval_ms);
        reverse.rate_limit = config.ws_server.rate_limit.clone();

        let debug = &mut config.debug;
        debug.enabled = env_bool("BOTGATE_DEBUG_ENABLED").unwrap_or(debug.enabled);
        if let Ok(host) = std::env::var("BOTGATE_DEBUG_HOST") {
            debug.host = host;
        }
        debug.port = env_parse("BOTGATE_DEBUG_PORT").unwrap_or(debug.port);

        config
    }
}

fn rate_limit_from_env() -> RateLimitConfig {
    let defaults = RateLimitConfig::default();
    RateLimitConfig {
        enabled: env_bool("BOTGATE_RATE_LIMIT_ENABLED").unwrap_or(defaults.enabled),
        frequency: env_parse("BOTGATE_RATE_LIMIT_FREQUENCY").unwrap_or(defaults.frequency),
        bucket: env_parse("BOTGATE_RATE_LIMIT_BUCKET").unwrap_or(defaults.bucket),
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}
