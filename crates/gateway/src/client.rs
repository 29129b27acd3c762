use std::{sync::Arc, time::Duration};

use {
    futures::stream::{SplitStream, StreamExt},
    tokio::{net::TcpStream, sync::Mutex},
    tracing::{debug, info, warn},
};

use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{HeaderValue, header},
        protocol::Message,
    },
};

use {
    botgate_config::WsReverseConfig,
    botgate_protocol::{
        BotEvent, LifecycleEvent, ROLE_HEADER, Role, SELF_ID_HEADER, USER_AGENT, unix_now,
    },
};

use crate::{
    api::{ApiDispatcher, BotApi, Interceptor, RateLimitInterceptor},
    connection::WsConn,
    filter::{self, EventFilter, FilterRegistry},
};

type DialedStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// A role's current connection. Swapped wholesale, only under this lock, so
/// an event push can never race a reconnection that replaces the socket
/// mid-write.
#[derive(Default)]
struct RoleSlot {
    conn: Mutex<Option<Arc<WsConn>>>,
}

/// Reverse WebSocket client: dials out to consumer-side servers and keeps
/// the links alive.
///
/// Roles: Universal multiplexes events and commands on one link; Event is
/// push-only; API is command-only. Configuring Universal supersedes the
/// other two entirely.
pub struct WsClient {
    bot: Arc<dyn BotApi>,
    config: WsReverseConfig,
    filter: Option<Arc<dyn EventFilter>>,
    /// One limiter shared by every connection this client dials.
    limiter: Option<Arc<RateLimitInterceptor>>,
    universal: RoleSlot,
    event: RoleSlot,
}

impl WsClient {
    pub fn new(
        bot: Arc<dyn BotApi>,
        config: WsReverseConfig,
        filters: &FilterRegistry,
    ) -> Arc<Self> {
        let filter = filters.resolve(&config.filter);
        let limiter = config.rate_limit.enabled.then(|| {
            Arc::new(RateLimitInterceptor::new(
                config.rate_limit.frequency,
                config.rate_limit.bucket,
            ))
        });
        Arc::new(Self {
            bot,
            config,
            filter,
            limiter,
            universal: RoleSlot::default(),
            event: RoleSlot::default(),
        })
    }

    /// Dial the configured roles and subscribe to the bot's event stream.
    pub fn start(self: &Arc<Self>, events: &crate::EventBus) {
        if !self.config.universal_url.is_empty() {
            self.spawn_dial(Role::Universal);
            self.spawn_event_pump(Role::Universal, events.subscribe());
            // Universal supersedes the other roles entirely.
            return;
        }
        if !self.config.api_url.is_empty() {
            self.spawn_dial(Role::Api);
        }
        if !self.config.event_url.is_empty() {
            self.spawn_dial(Role::Event);
            self.spawn_event_pump(Role::Event, events.subscribe());
        }
    }

    /// Push one bot event to the given role's connection. On write failure
    /// the connection is closed and, with reconnection enabled, the role is
    /// redialed after the configured delay.
    pub async fn push_event(self: &Arc<Self>, role: Role, event: &BotEvent) {
        if !filter::passes(&self.filter, event.value()) {
            debug!(role = %role, "event filtered before push");
            return;
        }
        let Some(slot) = self.slot(role) else {
            return;
        };
        let mut guard = slot.conn.lock().await;
        let Some(conn) = guard.as_ref().map(Arc::clone) else {
            debug!(role = %role, "event dropped, role not connected");
            return;
        };
        debug!(role = %role, "pushing event");
        if let Err(e) = conn.write_text(event.json()).await {
            warn!(role = %role, error = %e, "ws client: event push failed");
            let _ = conn.close().await;
            *guard = None;
            self.spawn_reconnect(role);
        }
    }

    fn slot(&self, role: Role) -> Option<&RoleSlot> {
        match role {
            Role::Universal => Some(&self.universal),
            Role::Event => Some(&self.event),
            // The API role receives no pushes, so no slot is kept for it.
            Role::Api => None,
        }
    }

    fn url_for(&self, role: Role) -> &str {
        match role {
            Role::Universal => &self.config.universal_url,
            Role::Event => &self.config.event_url,
            Role::Api => &self.config.api_url,
        }
    }

    fn reconnect_delay(&self) -> Option<Duration> {
        (self.config.reconnect_interval_ms > 0)
            .then(|| Duration::from_millis(self.config.reconnect_interval_ms))
    }

    fn dispatcher(&self) -> ApiDispatcher {
        let mut dispatcher = ApiDispatcher::new(Arc::clone(&self.bot));
        if let Some(limiter) = &self.limiter {
            let limiter: Arc<dyn Interceptor> = limiter.clone();
            dispatcher = dispatcher.with(limiter);
        }
        dispatcher
    }

    fn spawn_dial(self: &Arc<Self>, role: Role) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            client.dial_until_connected(role).await;
        });
    }

    fn spawn_reconnect(self: &Arc<Self>, role: Role) {
        let Some(delay) = self.reconnect_delay() else {
            warn!(role = %role, "ws client: reconnection disabled, abandoning role");
            return;
        };
        let client = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            client.dial_until_connected(role).await;
        });
    }

    /// Explicit dial loop: retry with the configured delay until the dial
    /// succeeds, or abandon the role when reconnection is disabled.
    async fn dial_until_connected(self: Arc<Self>, role: Role) {
        loop {
            match self.dial(role).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(role = %role, url = self.url_for(role), error = %e, "ws client: dial failed");
                    let Some(delay) = self.reconnect_delay() else {
                        warn!(role = %role, "ws client: reconnection disabled, abandoning role");
                        return;
                    };
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One dial attempt: connect, handshake (event-capable roles), bind the
    /// role slot, and start the reader (command-capable roles).
    async fn dial(self: &Arc<Self>, role: Role) -> crate::error::Result<()> {
        let url = self.url_for(role);
        info!(role = %role, url, "ws client: dialing");

        let mut request = url.into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(ROLE_HEADER, HeaderValue::from_static(role.as_str()));
        headers.insert(
            SELF_ID_HEADER,
            HeaderValue::from_str(&self.bot.self_id().to_string())?,
        );
        headers.insert(header::USER_AGENT, HeaderValue::from_str(USER_AGENT)?);
        if !self.config.access_token.is_empty() {
            headers.insert(
                header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Token {}", self.config.access_token))?,
            );
        }

        let (stream, _response) = connect_async(request).await?;
        let (sink, reader) = stream.split();
        let conn = WsConn::new(sink, self.dispatcher());

        if role.event_capable() {
            let handshake = LifecycleEvent::dialed(self.bot.self_id(), unix_now());
            if let Err(e) = conn.write_text(&serde_json::to_string(&handshake)?).await {
                warn!(role = %role, error = %e, "ws client: handshake write failed");
            }
        }

        info!(role = %role, url, "ws client: connected");

        if let Some(slot) = self.slot(role) {
            *slot.conn.lock().await = Some(Arc::clone(&conn));
        }

        if role.command_capable() {
            self.spawn_reader(role, conn, reader);
        }
        // The Event role has nothing to read; its faults surface on push.
        Ok(())
    }

    /// Spawn the reader loop for a dialed command-capable connection. Kept
    /// out of `dial` itself so the spawned future's `Send` obligation is
    /// checked here rather than inside `dial`'s own opaque-type scope, which
    /// the recursive redial path (`listen_commands` → `dial_until_connected`
    /// → `dial`) otherwise makes unresolvable.
    fn spawn_reader(self: &Arc<Self>, role: Role, conn: Arc<WsConn>, reader: DialedStream) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            client.listen_commands(role, conn, reader).await;
        });
    }

    /// Reader loop for a dialed command-capable connection: one command per
    /// text frame, each dispatched on its own task.
    async fn listen_commands(self: Arc<Self>, role: Role, conn: Arc<WsConn>, mut reader: DialedStream) {
        while let Some(message) = reader.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text.to_string(),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!(role = %role, error = %e, "ws client: read error");
                    break;
                }
            };
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                if let Err(e) = conn.dispatcher().handle_frame(&conn, &text).await {
                    warn!(role = %role, error = %e, "ws client: closing connection after dispatch fault");
                    let _ = conn.close().await;
                }
            });
        }
        info!(role = %role, "ws client: connection closed");
        let _ = conn.close().await;

        // Only the API role redials from its reader. Universal reconnection
        // is owned by the push-failure path; a second attempt from here
        // would race it and double-connect.
        if role == Role::Api {
            if let Some(delay) = self.reconnect_delay() {
                tokio::time::sleep(delay).await;
                self.dial_until_connected(role).await;
            } else {
                warn!(role = %role, "ws client: reconnection disabled, abandoning role");
            }
        }
    }

    fn spawn_event_pump(
        self: &Arc<Self>,
        role: Role,
        mut events: tokio::sync::broadcast::Receiver<Arc<BotEvent>>,
    ) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => client.push_event(role, &event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(role = %role, skipped, "ws client: event stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

