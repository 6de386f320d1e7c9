//! Mobile push.
//!
//! The Expo push API accepts up to 100 messages per request and answers with
//! one ticket per message, in order. A rejected ticket fails only its own
//! message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::DeliveryError;

/// Messages per Expo request.
pub const EXPO_CHUNK_SIZE: usize = 100;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PushMessage {
    pub to: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

/// `send` returns one outcome per input message, in input order.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, messages: &[PushMessage]) -> Vec<Result<(), DeliveryError>>;
}

/// Used when push is disabled: every message is a successful no-op.
#[derive(Clone, Debug, Default)]
pub struct NoopPushGateway;

#[async_trait]
impl PushGateway for NoopPushGateway {
    async fn send(&self, messages: &[PushMessage]) -> Vec<Result<(), DeliveryError>> {
        messages.iter().map(|_| Ok(())).collect()
    }
}

pub use atl_schemas::is_expo_push_token;

/// Expo push API client.
///
/// The access token is resolved by the caller; never log it.
#[derive(Clone)]
pub struct ExpoPushGateway {
    http: reqwest::Client,
    url: String,
    access_token: Option<String>,
}

impl ExpoPushGateway {
    pub fn new(url: String, access_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            access_token,
        }
    }

    async fn send_chunk(&self, chunk: &[&PushMessage]) -> Vec<Result<(), DeliveryError>> {
        let body: Vec<ExpoMessage<'_>> = chunk.iter().map(|m| ExpoMessage::from(*m)).collect();

        let mut req = self.http.post(&self.url).json(&body);
        if let Some(token) = &self.access_token {
            req = req.bearer_auth(token);
        }

        let all_failed = |status: Option<u16>, message: String| {
            chunk
                .iter()
                .map(|_| {
                    Err(DeliveryError::PushTransport {
                        status,
                        message: message.clone(),
                    })
                })
                .collect::<Vec<_>>()
        };

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => return all_failed(None, e.to_string()),
        };
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return all_failed(Some(status.as_u16()), text);
        }
        let parsed: ExpoResponse = match resp.json().await {
            Ok(p) => p,
            Err(e) => return all_failed(Some(status.as_u16()), format!("bad response: {e}")),
        };

        chunk
            .iter()
            .enumerate()
            .map(|(i, _)| match parsed.data.get(i) {
                Some(t) if t.status == "ok" => Ok(()),
                Some(t) => Err(DeliveryError::PushRejected {
                    message: t
                        .message
                        .clone()
                        .unwrap_or_else(|| "error ticket without message".to_string()),
                }),
                None => Err(DeliveryError::PushRejected {
                    message: "missing ticket".to_string(),
                }),
            })
            .collect()
    }
}

#[async_trait]
impl PushGateway for ExpoPushGateway {
    async fn send(&self, messages: &[PushMessage]) -> Vec<Result<(), DeliveryError>> {
        let mut out: Vec<Result<(), DeliveryError>> = messages.iter().map(|_| Ok(())).collect();

        // Invalid tokens are a no-op, not a failure.
        let valid: Vec<(usize, &PushMessage)> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| is_expo_push_token(&m.to))
            .collect();

        for chunk in valid.chunks(EXPO_CHUNK_SIZE) {
            let msgs: Vec<&PushMessage> = chunk.iter().map(|(_, m)| *m).collect();
            let results = self.send_chunk(&msgs).await;
            for ((idx, _), res) in chunk.iter().zip(results) {
                if let Err(e) = &res {
                    warn!(error = %e, "expo push failed");
                }
                out[*idx] = res;
            }
        }
        out
    }
}

#[derive(Serialize)]
struct ExpoMessage<'a> {
    to: &'a str,
    sound: &'static str,
    title: &'a str,
    body: &'a str,
    data: &'a serde_json::Value,
}

impl<'a> From<&'a PushMessage> for ExpoMessage<'a> {
    fn from(m: &'a PushMessage) -> Self {
        Self {
            to: &m.to,
            sound: "default",
            title: &m.title,
            body: &m.body,
            data: &m.data,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExpoResponse {
    #[serde(default)]
    data: Vec<ExpoTicket>,
}

#[derive(Debug, Deserialize)]
struct ExpoTicket {
    status: String,
    #[serde(default)]
    message: Option<String>,
}
