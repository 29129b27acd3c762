use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        Router,
        extract::{
            ConnectInfo, Query, State, WebSocketUpgrade,
            ws::{Message, WebSocket},
        },
        http::HeaderMap,
        response::{IntoResponse, Response},
        routing::get,
    },
    futures::stream::{SplitStream, StreamExt},
    serde::Deserialize,
    tokio::net::TcpListener,
    tracing::{debug, error, info, warn},
};

use {
    botgate_config::WsServerConfig,
    botgate_protocol::{BotEvent, LifecycleEvent, unix_now},
};

use crate::{
    api::{ApiDispatcher, BotApi, RateLimitInterceptor},
    auth,
    broadcast::{EventBroadcaster, SubscriberSet},
    connection::WsConn,
    filter::FilterRegistry,
};

/// How long a fatal bind failure lingers in the logs before the process
/// exits.
const BIND_FAILURE_GRACE: Duration = Duration::from_secs(5);

/// Forward WebSocket gateway: accepts consumer connections on three
/// endpoints and bridges them to the bot.
///
/// - `GET /event` — subscribe only: handshake frame, then events.
/// - `GET /api`   — commands only: no handshake, bidirectional dispatch.
/// - `GET /`      — combined: handshake, events, and dispatch.
pub struct WsServer {
    bot: Arc<dyn BotApi>,
    config: WsServerConfig,
    subscribers: Arc<SubscriberSet>,
    broadcaster: EventBroadcaster,
    /// Accepted-side lifecycle frame, built once at startup.
    handshake: String,
}

#[derive(Clone)]
struct AppState {
    server: Arc<WsServer>,
}

#[derive(Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

impl WsServer {
    pub fn new(
        bot: Arc<dyn BotApi>,
        config: WsServerConfig,
        filters: &FilterRegistry,
    ) -> Arc<Self> {
        let subscribers = Arc::new(SubscriberSet::new());
        let filter = filters.resolve(&config.filter);
        let handshake = LifecycleEvent::accepted(bot.self_id(), unix_now());
        Arc::new(Self {
            bot,
            broadcaster: EventBroadcaster::new(Arc::clone(&subscribers), filter),
            subscribers,
            handshake: serde_json::to_string(&handshake).unwrap_or_default(),
            config,
        })
    }

    /// Number of currently registered event subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.len().await
    }

    /// The three upgrade endpoints as an axum router. Exposed so tests can
    /// serve it on an ephemeral listener.
    pub fn router(self: &Arc<Self>) -> Router {
        let state = AppState {
            server: Arc::clone(self),
        };
        Router::new()
            .route("/event", get(event_endpoint))
            .route("/api", get(api_endpoint))
            .route("/", get(any_endpoint))
            .with_state(state)
    }

    /// Publish one bot event to every registered subscriber.
    pub async fn publish(&self, event: &BotEvent) {
        self.broadcaster.publish(event).await;
    }

    /// Subscribe this server to the bot's event stream.
    pub fn attach_events(
        self: &Arc<Self>,
        mut events: tokio::sync::broadcast::Receiver<Arc<BotEvent>>,
    ) {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => server.publish(&event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "ws server: event stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Bind and serve. A bind failure is fatal to the process after a short
    /// grace period; everything after the bind only ever fails one
    /// connection at a time.
    pub async fn run(self: Arc<Self>) {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(%addr, error = %e, "ws server: failed to bind, is the port in use?");
                warn!("exiting in {} seconds", BIND_FAILURE_GRACE.as_secs());
                tokio::time::sleep(BIND_FAILURE_GRACE).await;
                std::process::exit(1);
            }
        };
        info!(%addr, "ws server listening");

        let app = self.router();
        if let Err(e) = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        {
            error!(error = %e, "ws server terminated");
        }
    }

    fn authorize(
        &self,
        endpoint: &'static str,
        peer: SocketAddr,
        headers: &HeaderMap,
        query: &TokenQuery,
    ) -> Result<(), Response> {
        match auth::check_token(
            &self.config.access_token,
            headers,
            query.access_token.as_deref(),
        ) {
            Ok(()) => Ok(()),
            Err(status) => {
                warn!(endpoint, peer = %peer, code = %status, "ws server: rejected upgrade, bad token");
                Err(status.into_response())
            }
        }
    }

    /// Dispatcher for connections that accept commands, with the configured
    /// rate limit applied per connection.
    fn command_dispatcher(&self) -> ApiDispatcher {
        let mut dispatcher = ApiDispatcher::new(Arc::clone(&self.bot));
        let limit = &self.config.rate_limit;
        if limit.enabled {
            dispatcher = dispatcher.with(Arc::new(RateLimitInterceptor::new(
                limit.frequency,
                limit.bucket,
            )));
        }
        dispatcher
    }

    /// Send the lifecycle handshake; a failed write closes the socket
    /// before the connection is registered anywhere.
    async fn open_with_handshake(
        &self,
        conn: &Arc<WsConn>,
        endpoint: &'static str,
        peer: SocketAddr,
    ) -> bool {
        if let Err(e) = conn.write_text(&self.handshake).await {
            warn!(endpoint, peer = %peer, error = %e, "ws server: handshake write failed");
            let _ = conn.close().await;
            return false;
        }
        true
    }

    async fn handle_event(self: Arc<Self>, socket: WebSocket, peer: SocketAddr) {
        let (sink, stream) = socket.split();
        let conn = WsConn::new(sink, ApiDispatcher::new(Arc::clone(&self.bot)));
        if !self.open_with_handshake(&conn, "/event", peer).await {
            return;
        }
        info!(peer = %peer, endpoint = "/event", "ws server: connection accepted");
        self.subscribers.register(Arc::clone(&conn)).await;
        drain_until_closed(stream, conn, "/event").await;
    }

    async fn handle_api(self: Arc<Self>, socket: WebSocket, peer: SocketAddr) {
        let (sink, stream) = socket.split();
        let conn = WsConn::new(sink, self.command_dispatcher());
        info!(peer = %peer, endpoint = "/api", "ws server: connection accepted");
        read_commands(stream, conn, "/api").await;
    }

    async fn handle_any(self: Arc<Self>, socket: WebSocket, peer: SocketAddr) {
        let (sink, stream) = socket.split();
        let conn = WsConn::new(sink, self.command_dispatcher());
        if !self.open_with_handshake(&conn, "/", peer).await {
            return;
        }
        info!(peer = %peer, endpoint = "/", "ws server: connection accepted");
        self.subscribers.register(Arc::clone(&conn)).await;
        read_commands(stream, conn, "/").await;
    }
}

// ── Endpoint handlers ────────────────────────────────────────────────────────

async fn event_endpoint(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let server = state.server;
    if let Err(rejection) = server.authorize("/event", peer, &headers, &query) {
        return rejection;
    }
    ws.on_upgrade(move |socket| server.handle_event(socket, peer))
}

async fn api_endpoint(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let server = state.server;
    if let Err(rejection) = server.authorize("/api", peer, &headers, &query) {
        return rejection;
    }
    ws.on_upgrade(move |socket| server.handle_api(socket, peer))
}

async fn any_endpoint(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let server = state.server;
    if let Err(rejection) = server.authorize("/", peer, &headers, &query) {
        return rejection;
    }
    ws.on_upgrade(move |socket| server.handle_any(socket, peer))
}

// ── Reader loops ─────────────────────────────────────────────────────────────

/// Reader for command-capable connections: one command per text frame, each
/// dispatched on its own task so a slow handler never blocks the reader.
/// Responses carry their own echo for correlation; no inter-response
/// ordering is promised.
async fn read_commands(
    mut stream: SplitStream<WebSocket>,
    conn: Arc<WsConn>,
    endpoint: &'static str,
) {
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(endpoint, error = %e, "ws server: read error");
                break;
            }
        };
        let conn = Arc::clone(&conn);
        tokio::spawn(async move {
            if let Err(e) = conn.dispatcher().handle_frame(&conn, &text).await {
                warn!(endpoint, error = %e, "ws server: closing connection after dispatch fault");
                let _ = conn.close().await;
            }
        });
    }
    debug!(endpoint, "ws server: connection closed");
    let _ = conn.close().await;
}

/// Reader for event-only connections: inbound frames are discarded; the
/// loop exists to notice the peer going away. The subscriber set compacts
/// the closed connection out on the next publish.
async fn drain_until_closed(
    mut stream: SplitStream<WebSocket>,
    conn: Arc<WsConn>,
    endpoint: &'static str,
) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(endpoint, error = %e, "ws server: read error");
                break;
            }
        }
    }
    debug!(endpoint, "ws server: connection closed");
    let _ = conn.close().await;
}
