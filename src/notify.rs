//! Operator notifications
//!
//! Best-effort, fire-and-forget. A failed send is logged and dropped; the
//! trading path never waits on or retries a notification.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::warn;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

pub type SharedNotifier = std::sync::Arc<dyn Notifier>;

/// Telegram bot channel
pub struct TelegramNotifier {
    client: Client,
    token: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            token: token.into(),
            chat_id: chat_id.into(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let body = SendMessageBody {
            chat_id: &self.chat_id,
            text: message,
        };
        match self.client.post(&url).json(&body).send().await {
            Ok(reply) if !reply.status().is_success() => {
                warn!(status = %reply.status(), "telegram rejected notification");
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "telegram notification failed"),
        }
    }
}

/// Discards everything; simulation default
#[derive(Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_body_shape() {
        let body = SendMessageBody {
            chat_id: "-100123",
            text: "opened XAUUSD long 0.5 @ 2000.0",
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["chat_id"], "-100123");
        assert!(value["text"].as_str().unwrap().contains("XAUUSD"));
    }
}
