//! HTTP client for the chat backend (http://localhost:5000/api by default).
//!
//! Endpoints: `GET /messages`, `POST /message`, `DELETE /messages`. Every inbound message is
//! passed through [`normalize`] before it leaves this module.

use crate::message::{normalize, Message, MessageKind, RawMessage};
use crate::reconcile::Exchange;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

const SEND_FAILED: &str = "Failed to send message";
const UNKNOWN_ERROR: &str = "Unknown error";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("api request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Non-2xx on a fetch or delete; `body` is the raw response text (may be empty).
    #[error("{action} failed: {status} {body}")]
    Status {
        action: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },
    /// Non-2xx on send; carries the server's `error` field or a generic message.
    #[error("{0}")]
    Rejected(String),
}

/// The chat backend as seen by [`crate::session::ChatSession`].
#[async_trait]
pub trait MessageBackend: Send + Sync {
    /// Full message log, normalized, in server order.
    async fn fetch_messages(&self) -> Result<Vec<Message>, ApiError>;

    /// Send one user message and get back the confirmed user message and the AI reply.
    async fn post_message(&self, text: &str, kind: MessageKind) -> Result<Exchange, ApiError>;

    /// Delete the whole conversation on the server.
    async fn delete_messages(&self) -> Result<(), ApiError>;
}

/// reqwest-based [`MessageBackend`].
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    message: &'a str,
    #[serde(rename = "type")]
    kind: MessageKind,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostMessageResponse {
    #[serde(default)]
    user_message: Option<RawMessage>,
    #[serde(default)]
    ai_message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Client for the configured base URL (`MINDORA_API_BASE` wins over the file).
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(Some(crate::config::resolve_api_base(config)))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

async fn status_error(action: &'static str, res: reqwest::Response) -> ApiError {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    log::warn!("{} failed with {}: {}", action, status, body);
    ApiError::Status {
        action,
        status,
        body,
    }
}

/// Text shown for a rejected send: the `error` field of a JSON body, a generic send failure
/// when the JSON has none, "Unknown error" when the body is not JSON at all.
fn rejection_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(b) => b
            .error
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| SEND_FAILED.to_string()),
        Err(_) => UNKNOWN_ERROR.to_string(),
    }
}

#[async_trait]
impl MessageBackend for ApiClient {
    /// GET /messages
    async fn fetch_messages(&self) -> Result<Vec<Message>, ApiError> {
        let url = format!("{}/messages", self.base_url);
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            return Err(status_error("fetch messages", res).await);
        }
        let data: Vec<RawMessage> = res.json().await?;
        log::debug!("fetched {} messages from {}", data.len(), url);
        Ok(data.into_iter().map(normalize).collect())
    }

    /// POST /message
    async fn post_message(&self, text: &str, kind: MessageKind) -> Result<Exchange, ApiError> {
        let url = format!("{}/message", self.base_url);
        let body = PostMessageRequest {
            message: text,
            kind,
        };
        let res = self.client.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let message = rejection_message(&res.text().await.unwrap_or_default());
            log::warn!("send rejected with {}: {}", status, message);
            return Err(ApiError::Rejected(message));
        }
        let data: PostMessageResponse = res.json().await?;
        Ok(Exchange {
            user_message: data.user_message.map(normalize),
            ai_message: data.ai_message.map(normalize),
        })
    }

    /// DELETE /messages
    async fn delete_messages(&self) -> Result<(), ApiError> {
        let url = format!("{}/messages", self.base_url);
        let res = self.client.delete(&url).send().await?;
        if !res.status().is_success() {
            return Err(status_error("delete messages", res).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_defaults_and_trims() {
        assert_eq!(ApiClient::new(None).base_url(), DEFAULT_BASE_URL);
        assert_eq!(ApiClient::new(Some("  ".into())).base_url(), DEFAULT_BASE_URL);
        assert_eq!(
            ApiClient::new(Some("http://example.com/api/".into())).base_url(),
            "http://example.com/api"
        );
    }

    #[test]
    fn post_body_shape() {
        let body = PostMessageRequest {
            message: "draw a cat",
            kind: MessageKind::Image,
        };
        assert_eq!(
            serde_json::to_value(&body).expect("serialize"),
            serde_json::json!({ "message": "draw a cat", "type": "image" })
        );
    }

    #[test]
    fn null_sides_of_response_are_absent() {
        let data: PostMessageResponse =
            serde_json::from_str(r#"{"userMessage":{"role":"user","text":"hi"},"aiMessage":null}"#)
                .expect("parse");
        assert!(data.user_message.is_some());
        assert!(data.ai_message.is_none());
    }

    #[test]
    fn rejection_text_depends_on_body_shape() {
        assert_eq!(rejection_message(r#"{"error":" model offline "}"#), "model offline");
        assert_eq!(rejection_message(r#"{"error":""}"#), SEND_FAILED);
        assert_eq!(rejection_message("{}"), SEND_FAILED);
        assert_eq!(rejection_message("<html>Bad Gateway</html>"), UNKNOWN_ERROR);
        assert_eq!(rejection_message(""), UNKNOWN_ERROR);
    }
}
