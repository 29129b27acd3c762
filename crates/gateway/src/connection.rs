use std::sync::Arc;

use {
    async_trait::async_trait,
    futures::{SinkExt, stream::SplitSink},
    tokio::sync::Mutex,
};

use crate::api::ApiDispatcher;

/// Write half of a WebSocket, reduced to the two operations the gateway
/// needs. Implemented for both the accepted (axum) and dialed
/// (tokio-tungstenite) socket types so [`WsConn`] can wrap either side.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> anyhow::Result<()>;
    async fn close(&mut self) -> anyhow::Result<()>;
}

#[async_trait]
impl FrameSink for SplitSink<axum::extract::ws::WebSocket, axum::extract::ws::Message> {
    async fn send_text(&mut self, text: String) -> anyhow::Result<()> {
        self.send(axum::extract::ws::Message::Text(text.into()))
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        SinkExt::close(self).await?;
        Ok(())
    }
}

/// Sink type produced by splitting a dialed tokio-tungstenite stream.
pub type DialedSink = SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    tokio_tungstenite::tungstenite::Message,
>;

#[async_trait]
impl FrameSink for DialedSink {
    async fn send_text(&mut self, text: String) -> anyhow::Result<()> {
        self.send(tokio_tungstenite::tungstenite::Message::Text(text.into()))
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        SinkExt::close(self).await?;
        Ok(())
    }
}

/// One live socket. All writes go through an exclusive lock, so concurrent
/// writers serialize and frames never interleave on the wire. A connection
/// is created on accept/dial success and never reused after close.
pub struct WsConn {
    writer: Mutex<Box<dyn FrameSink>>,
    dispatcher: ApiDispatcher,
}

impl WsConn {
    pub fn new(sink: impl FrameSink + 'static, dispatcher: ApiDispatcher) -> Arc<Self> {
        Arc::new(Self {
            writer: Mutex::new(Box::new(sink)),
            dispatcher,
        })
    }

    pub fn dispatcher(&self) -> &ApiDispatcher {
        &self.dispatcher
    }

    /// Exclusive-locked text-frame write. Callers queue on the lock; a
    /// write is either delivered whole or fails, never silently dropped.
    pub async fn write_text(&self, text: &str) -> anyhow::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.send_text(text.to_owned()).await
    }

    /// Close the socket. Safe to call repeatedly, including after a failed
    /// write.
    pub async fn close(&self) -> anyhow::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.close().await
    }
}


#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;

    use super::testing::RecordingSink;
    use crate::api::{ApiDispatcher, testing::StaticBot};

    fn conn_over(sink: RecordingSink) -> Arc<super::WsConn> {
        super::WsConn::new(sink, ApiDispatcher::new(Arc::new(StaticBot::default())))
    }

    #[tokio::test]
    async fn concurrent_writers_never_interleave_frames() {
        let sink = RecordingSink::new();
        let conn = conn_over(sink.clone());

        let payload_a = format!("{{\"side\":\"a\",\"fill\":\"{}\"}}", "a".repeat(4096));
        let payload_b = format!("{{\"side\":\"b\",\"fill\":\"{}\"}}", "b".repeat(4096));

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let conn_a = Arc::clone(&conn);
            let text = payload_a.clone();
            tasks.push(tokio::spawn(
                async move { conn_a.write_text(&text).await },
            ));
            let conn_b = Arc::clone(&conn);
            let text = payload_b.clone();
            tasks.push(tokio::spawn(
                async move { conn_b.write_text(&text).await },
            ));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let frames = sink.frames();
        assert_eq!(frames.len(), 100);
        for frame in frames {
            assert!(frame == payload_a || frame == payload_b, "spliced frame: {frame}");
        }
    }

    #[tokio::test]
    async fn close_is_repeatable_after_write_failure() {
        let sink = RecordingSink::new();
        let conn = conn_over(sink.clone());

        sink.set_failing(true);
        assert!(conn.write_text("{}").await.is_err());
        assert!(conn.close().await.is_ok());
        assert!(conn.close().await.is_ok());
        assert!(sink.is_closed());
    }
}
