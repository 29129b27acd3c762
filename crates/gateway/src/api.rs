use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    tokio::{sync::Mutex, time::Instant},
    tracing::debug,
};

use botgate_protocol::{ApiResponse, CommandFrame, strip_async_suffix};

use crate::connection::WsConn;

// ── Bot capability surface ───────────────────────────────────────────────────

/// The bot capability surface commands dispatch into.
///
/// Expected failures (unknown action, bad params) are encoded in the
/// returned [`ApiResponse`] as `status: "failed"` plus a retcode. `Err` is
/// reserved for unrecoverable faults and tears down the connection that
/// carried the command, never the process.
#[async_trait]
pub trait BotApi: Send + Sync {
    /// Numeric identity of the logged-in bot account.
    fn self_id(&self) -> i64;

    /// Execute one action.
    async fn call(&self, action: &str, params: serde_json::Value) -> anyhow::Result<ApiResponse>;
}

// ── Interceptors ─────────────────────────────────────────────────────────────

/// What an interceptor decided about one command.
pub enum Intercept {
    /// Hand the command to the next interceptor (after any internal delay).
    Continue,
    /// Short-circuit with this response; the bot is never invoked.
    Reject(ApiResponse),
}

/// Middleware run in configuration order ahead of every bot call. An
/// interceptor may suspend its task (delaying the command) or short-circuit
/// it entirely.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, action: &str, params: &serde_json::Value) -> Intercept;
}

/// Token-bucket rate limiter configured as `{frequency, bucket}`.
///
/// Over-budget commands are delayed until their token accrues, in arrival
/// order on the bucket lock: a delayed command is never dispatched ahead of
/// an earlier one and never dropped.
pub struct RateLimitInterceptor {
    bucket: Mutex<TokenBucket>,
}

impl RateLimitInterceptor {
    pub fn new(frequency: f64, bucket: usize) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(frequency, bucket)),
        }
    }
}

#[async_trait]
impl Interceptor for RateLimitInterceptor {
    async fn intercept(&self, action: &str, _params: &serde_json::Value) -> Intercept {
        let wait = self.bucket.lock().await.reserve(Instant::now());
        if !wait.is_zero() {
            debug!(
                action,
                wait_ms = wait.as_millis() as u64,
                "rate limit: delaying command"
            );
            tokio::time::sleep(wait).await;
        }
        Intercept::Continue
    }
}

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    updated_at: Instant,
}

impl TokenBucket {
    fn new(frequency: f64, bucket: usize) -> Self {
        let capacity = (bucket.max(1)) as f64;
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec: frequency.max(f64::MIN_POSITIVE),
            updated_at: Instant::now(),
        }
    }

    /// Take one token, returning how long the caller must wait for it.
    /// Tokens may go negative: each further reservation queues behind the
    /// previous one, which is what keeps delayed commands in order.
    fn reserve(&mut self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.updated_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.updated_at = now;
        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.refill_per_sec)
        }
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────────────

/// Per-connection command dispatcher: parses an inbound frame, routes it
/// through the interceptor chain into the bot, and writes the correlated
/// response back on the same connection.
#[derive(Clone)]
pub struct ApiDispatcher {
    bot: Arc<dyn BotApi>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl ApiDispatcher {
    pub fn new(bot: Arc<dyn BotApi>) -> Self {
        Self {
            bot,
            interceptors: Vec::new(),
        }
    }

    /// Append an interceptor. Interceptors run in the order they were added.
    #[must_use]
    pub fn with(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn bot(&self) -> &Arc<dyn BotApi> {
        &self.bot
    }

    /// Handle one raw inbound frame end to end. `Err` is the unrecoverable
    /// case: the caller logs it and closes this connection only.
    pub async fn handle_frame(&self, conn: &WsConn, raw: &str) -> anyhow::Result<()> {
        let frame = CommandFrame::parse(raw);
        let action = strip_async_suffix(&frame.action).to_owned();
        debug!(action = %action, "ws: api call");

        let mut response = self.dispatch(&action, frame.params).await?;
        if frame.echo.is_some() {
            response.echo = frame.echo;
        }
        conn.write_text(&serde_json::to_string(&response)?).await
    }

    async fn dispatch(
        &self,
        action: &str,
        params: serde_json::Value,
    ) -> anyhow::Result<ApiResponse> {
        for interceptor in &self.interceptors {
            if let Intercept::Reject(response) = interceptor.intercept(action, &params).await {
                debug!(action, "ws: command intercepted");
                return Ok(response);
            }
        }
        self.bot.call(action, params).await
    }
}


#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::{sync::Arc, time::Duration};

    use tokio::time::Instant;

    use super::{ApiDispatcher, RateLimitInterceptor, TokenBucket, testing::static_bot};
    use crate::connection::{WsConn, testing::RecordingSink};

    fn command_conn(sink: RecordingSink) -> (Arc<WsConn>, Arc<super::testing::StaticBot>) {
        let bot = static_bot();
        let dispatcher = ApiDispatcher::new(bot.clone());
        (WsConn::new(sink, dispatcher), bot)
    }

    #[tokio::test]
    async fn async_suffix_is_stripped_before_dispatch() {
        let sink = RecordingSink::new();
        let (conn, bot) = command_conn(sink.clone());

        conn.dispatcher()
            .handle_frame(&conn, r#"{"action":"get_status_async","echo":"x1"}"#)
            .await
            .unwrap();

        assert_eq!(bot.calls()[0].0, "get_status");
        let response: serde_json::Value = serde_json::from_str(&sink.frames()[0]).unwrap();
        assert_eq!(response["echo"], "x1");
        assert_eq!(response["status"], "ok");
    }

    #[tokio::test]
    async fn echo_copied_verbatim_for_any_json_value() {
        let sink = RecordingSink::new();
        let (conn, _bot) = command_conn(sink.clone());

        for echo in [
            serde_json::json!("x1"),
            serde_json::json!(42),
            serde_json::json!({"nested": ["a", 1]}),
        ] {
            let frame = serde_json::json!({"action": "get_status", "echo": echo});
            conn.dispatcher()
                .handle_frame(&conn, &frame.to_string())
                .await
                .unwrap();
            let response: serde_json::Value =
                serde_json::from_str(sink.frames().last().unwrap()).unwrap();
            assert_eq!(response["echo"], echo);
        }
    }

    #[tokio::test]
    async fn missing_echo_stays_missing() {
        let sink = RecordingSink::new();
        let (conn, _bot) = command_conn(sink.clone());

        conn.dispatcher()
            .handle_frame(&conn, r#"{"action":"get_status"}"#)
            .await
            .unwrap();

        let response: serde_json::Value = serde_json::from_str(&sink.frames()[0]).unwrap();
        assert!(response.get("echo").is_none());
    }

    #[tokio::test]
    async fn unknown_action_yields_error_shaped_response() {
        let sink = RecordingSink::new();
        let (conn, _bot) = command_conn(sink.clone());

        conn.dispatcher()
            .handle_frame(&conn, r#"{"action":"no_such_action","echo":7}"#)
            .await
            .unwrap();

        let response: serde_json::Value = serde_json::from_str(&sink.frames()[0]).unwrap();
        assert_eq!(response["status"], "failed");
        assert_eq!(response["retcode"], 1404);
        assert_eq!(response["echo"], 7);
    }

    #[tokio::test]
    async fn unrecoverable_fault_surfaces_as_error() {
        let sink = RecordingSink::new();
        let (conn, _bot) = command_conn(sink.clone());

        let result = conn
            .dispatcher()
            .handle_frame(&conn, r#"{"action":"explode"}"#)
            .await;
        assert!(result.is_err());
        assert!(sink.frames().is_empty());
    }

    struct RefuseSendMsg;

    #[async_trait::async_trait]
    impl super::Interceptor for RefuseSendMsg {
        async fn intercept(
            &self,
            action: &str,
            _params: &serde_json::Value,
        ) -> super::Intercept {
            if action == "send_msg" {
                super::Intercept::Reject(botgate_protocol::ApiResponse::failed(
                    botgate_protocol::retcodes::INTERCEPTED,
                    "refused",
                ))
            } else {
                super::Intercept::Continue
            }
        }
    }

    #[tokio::test]
    async fn rejecting_interceptor_short_circuits_the_bot() {
        let sink = RecordingSink::new();
        let bot = static_bot();
        let dispatcher = ApiDispatcher::new(bot.clone()).with(Arc::new(RefuseSendMsg));
        let conn = WsConn::new(sink.clone(), dispatcher);

        conn.dispatcher()
            .handle_frame(&conn, r#"{"action":"send_msg","echo":"r1"}"#)
            .await
            .unwrap();

        // The bot never saw the command, but the response still correlates.
        assert!(bot.calls().is_empty());
        let response: serde_json::Value = serde_json::from_str(&sink.frames()[0]).unwrap();
        assert_eq!(response["retcode"], 1429);
        assert_eq!(response["echo"], "r1");
    }

    #[test]
    fn token_bucket_delays_after_burst() {
        let mut bucket = TokenBucket::new(1.0, 1);
        let now = Instant::now();

        assert_eq!(bucket.reserve(now), Duration::ZERO);
        let wait = bucket.reserve(now);
        assert!(wait > Duration::from_millis(900) && wait <= Duration::from_secs(1));

        // A third caller queues behind the second.
        let wait2 = bucket.reserve(now);
        assert!(wait2 > wait);
    }

    #[test]
    fn token_bucket_refills_with_time() {
        let mut bucket = TokenBucket::new(2.0, 2);
        let now = Instant::now();

        assert_eq!(bucket.reserve(now), Duration::ZERO);
        assert_eq!(bucket.reserve(now), Duration::ZERO);
        assert!(bucket.reserve(now) > Duration::ZERO);

        // After a second at 2 tokens/sec the bucket has recovered.
        let later = now + Duration::from_secs(2);
        assert_eq!(bucket.reserve(later), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_commands_keep_arrival_order() {
        let sink = RecordingSink::new();
        let bot = static_bot();
        let dispatcher = ApiDispatcher::new(bot.clone())
            .with(Arc::new(RateLimitInterceptor::new(1.0, 1)));
        let conn = WsConn::new(sink.clone(), dispatcher);

        let first = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                conn.dispatcher()
                    .handle_frame(&conn, r#"{"action":"get_status","echo":1}"#)
                    .await
            })
        };
        tokio::task::yield_now().await;
        let second = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                conn.dispatcher()
                    .handle_frame(&conn, r#"{"action":"get_status","echo":2}"#)
                    .await
            })
        };

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let echoes: Vec<i64> = sink
            .frames()
            .iter()
            .map(|f| serde_json::from_str::<serde_json::Value>(f).unwrap()["echo"]
                .as_i64()
                .unwrap())
            .collect();
        assert_eq!(echoes, vec![1, 2]);
    }
}
