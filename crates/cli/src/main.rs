//! botgate entrypoint: resolve configuration, wire the gateway transports
//! to a bot implementation, and run until interrupted.

use std::sync::Arc;

use {
    clap::Parser,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    botgate_config::GatewayConfig,
    botgate_gateway::{client::WsClient, debug::DebugServer, filter::FilterRegistry, server::WsServer},
};

mod stub_bot;

use stub_bot::StubBot;

#[derive(Parser)]
#[command(name = "botgate", version, about = "WebSocket gateway for instant-messaging bots")]
struct Cli {
    /// Log filter, e.g. "info" or "botgate_gateway=debug".
    #[arg(long, env = "BOTGATE_LOG", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,

    /// Numeric identity the gateway reports for the bot account.
    #[arg(long, env = "BOTGATE_SELF_ID", default_value_t = 10001)]
    self_id: i64,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "botgate starting");

    let config = GatewayConfig::from_env();
    let bot = Arc::new(StubBot::new(cli.self_id));
    let events = botgate_gateway::event_bus();
    let filters = FilterRegistry::new();

    let mut ws_server = None;
    if config.ws_server.enabled {
        let server = WsServer::new(bot.clone(), config.ws_server.clone(), &filters);
        server.attach_events(events.subscribe());
        tokio::spawn(Arc::clone(&server).run());
        ws_server = Some(server);
    }

    if config.ws_reverse.enabled {
        let client = WsClient::new(bot.clone(), config.ws_reverse.clone(), &filters);
        client.start(&events);
    }

    if config.debug.enabled {
        let debug = DebugServer::new(config.debug.clone(), ws_server.clone());
        tokio::spawn(debug.run());
    }

    if !config.ws_server.enabled && !config.ws_reverse.enabled {
        warn!("no transport enabled; set BOTGATE_WS_ENABLED or a BOTGATE_WS_REVERSE_* url");
    }

    tokio::signal::ctrl_c().await?;
    info!("botgate shutting down");
    Ok(())
}
