//! Stand-in bot capability surface for running the gateway without a real
//! protocol client attached.

use async_trait::async_trait;

use {
    botgate_gateway::api::BotApi,
    botgate_protocol::{ApiResponse, retcodes},
};

/// Answers the introspection actions a consumer needs to probe the link;
/// everything else fails with the unsupported-action retcode.
pub struct StubBot {
    self_id: i64,
}

impl StubBot {
    pub fn new(self_id: i64) -> Self {
        Self { self_id }
    }
}

#[async_trait]
impl BotApi for StubBot {
    fn self_id(&self) -> i64 {
        self.self_id
    }

    async fn call(&self, action: &str, _params: serde_json::Value) -> anyhow::Result<ApiResponse> {
        match action {
            "get_status" => Ok(ApiResponse::ok(serde_json::json!({
                "online": true,
                "good": true,
            }))),
            "get_login_info" => Ok(ApiResponse::ok(serde_json::json!({
                "user_id": self.self_id,
                "nickname": "botgate",
            }))),
            "get_version_info" => Ok(ApiResponse::ok(serde_json::json!({
                "app_name": "botgate",
                "app_version": env!("CARGO_PKG_VERSION"),
            }))),
            _ => Ok(ApiResponse::failed(
                retcodes::UNSUPPORTED_ACTION,
                format!("unsupported action: {action}"),
            )),
        }
    }
}
