use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{Json, Router, extract::State, response::IntoResponse, routing::get},
    tokio::{net::TcpListener, time::Instant},
    tracing::{error, info, warn},
};

use botgate_config::DebugServerConfig;

use crate::server::WsServer;

const BIND_FAILURE_GRACE: Duration = Duration::from_secs(5);

/// Unauthenticated diagnostics listener, run as its own task beside the
/// gateway transports.
pub struct DebugServer {
    config: DebugServerConfig,
    started_at: Instant,
    ws_server: Option<Arc<WsServer>>,
}

#[derive(Clone)]
struct DebugState {
    server: Arc<DebugServer>,
}

impl DebugServer {
    pub fn new(config: DebugServerConfig, ws_server: Option<Arc<WsServer>>) -> Arc<Self> {
        Arc::new(Self {
            config,
            started_at: Instant::now(),
            ws_server,
        })
    }

    pub fn router(self: &Arc<Self>) -> Router {
        let state = DebugState {
            server: Arc::clone(self),
        };
        Router::new()
            .route("/debug/health", get(health))
            .route("/debug/stats", get(stats))
            .with_state(state)
    }

    /// Bind and serve. Like the gateway listener, a bind failure is fatal
    /// after a short grace period.
    pub async fn run(self: Arc<Self>) {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(%addr, error = %e, "debug server: failed to bind, is the port in use?");
                warn!("exiting in {} seconds", BIND_FAILURE_GRACE.as_secs());
                tokio::time::sleep(BIND_FAILURE_GRACE).await;
                std::process::exit(1);
            }
        };
        info!(%addr, "debug server listening at /debug");
        warn!("the debug server has no authentication, do not expose it publicly");

        let app = self.router();
        if let Err(e) = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        {
            error!(error = %e, "debug server terminated");
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn stats(State(state): State<DebugState>) -> impl IntoResponse {
    let server = &state.server;
    let subscribers = match &server.ws_server {
        Some(ws) => Some(ws.subscriber_count().await),
        None => None,
    };
    Json(serde_json::json!({
        "uptime_secs": server.started_at.elapsed().as_secs(),
        "event_subscribers": subscribers,
    }))
}
