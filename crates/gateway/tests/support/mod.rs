//! Shared fixtures for the gateway integration tests.
#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use {
    async_trait::async_trait,
    futures::{Stream, StreamExt},
    tokio::net::TcpListener,
};

use {
    botgate_gateway::{api::BotApi, server::WsServer},
    botgate_protocol::{ApiResponse, retcodes},
};

/// Bot stub recording every dispatched action.
#[derive(Default)]
pub struct TestBot {
    pub calls: Mutex<Vec<String>>,
}

impl TestBot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BotApi for TestBot {
    fn self_id(&self) -> i64 {
        10001
    }

    async fn call(&self, action: &str, _params: serde_json::Value) -> anyhow::Result<ApiResponse> {
        self.calls.lock().unwrap().push(action.to_owned());
        match action {
            "get_status" => Ok(ApiResponse::ok(serde_json::json!({"online": true}))),
            _ => Ok(ApiResponse::failed(
                retcodes::UNSUPPORTED_ACTION,
                "unsupported action",
            )),
        }
    }
}

/// Serve a forward gateway on an ephemeral port, returning the bound
/// address.
pub async fn serve(server: &Arc<WsServer>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server.router();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

/// Read the next text frame from a tungstenite client stream.
pub async fn next_text<S>(ws: &mut S) -> serde_json::Value
where
    S: Stream<
            Item = Result<
                tokio_tungstenite::tungstenite::Message,
                tokio_tungstenite::tungstenite::Error,
            >,
        > + Unpin,
{
    loop {
        let message = tokio::time::timeout(std::time::Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("read failed");
        if let tokio_tungstenite::tungstenite::Message::Text(text) = message {
            return serde_json::from_str(&text).expect("non-JSON frame");
        }
    }
}
