//! Minimal Telegram Bot API client.
//!
//! Only the three methods the bot needs are wrapped: `getUpdates` (long
//! polling for commands), `sendMessage` (command replies) and `sendPhoto`
//! (annotated frame delivery).
//!
//! The request URL embeds the bot token, so transport errors are stripped of
//! their URL before they reach the logs.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{ChatId, DeliveryChannel};

const PHOTO_FILE_NAME: &str = "detection.jpg";

/// Envelope returned by every Bot API method.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn into_result(self, method: &str) -> Result<T> {
        if !self.ok {
            return Err(anyhow!(
                "telegram {} rejected: {}",
                method,
                self.description.as_deref().unwrap_or("no description")
            ));
        }
        self.result
            .ok_or_else(|| anyhow!("telegram {} returned no result", method))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Serialize)]
struct GetUpdatesRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

pub struct TelegramClient {
    http: reqwest::Client,
    endpoint: String,
    poll_timeout: Duration,
}

impl TelegramClient {
    /// Build a client for `api_base` (e.g. `https://api.telegram.org`).
    pub fn new(api_base: &str, token: &str, poll_timeout: Duration) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(anyhow!("telegram bot token is empty"));
        }
        // Requests must outlive the server-side long-poll window.
        let http = reqwest::Client::builder()
            .timeout(poll_timeout + Duration::from_secs(15))
            .build()
            .context("build telegram http client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/bot{}", api_base.trim_end_matches('/'), token.trim()),
            poll_timeout,
        })
    }

    /// Long-poll for new updates starting at `offset`.
    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>> {
        let body = GetUpdatesRequest {
            offset,
            timeout: self.poll_timeout.as_secs(),
            allowed_updates: &["message"],
        };
        let response = self
            .http
            .post(self.method_url("getUpdates"))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("getUpdates", e))?;
        decode(response, "getUpdates").await
    }

    pub async fn send_message(&self, chat: ChatId, text: &str) -> Result<()> {
        let body = SendMessageRequest {
            chat_id: chat.0,
            text,
        };
        let response = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("sendMessage", e))?;
        decode::<Message>(response, "sendMessage").await?;
        Ok(())
    }

    pub async fn send_photo(&self, chat: ChatId, jpeg: Vec<u8>) -> Result<()> {
        let photo = Part::bytes(jpeg)
            .file_name(PHOTO_FILE_NAME)
            .mime_str("image/jpeg")
            .map_err(|e| transport_error("sendPhoto", e))?;
        let form = Form::new()
            .text("chat_id", chat.0.to_string())
            .part("photo", photo);
        let response = self
            .http
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error("sendPhoto", e))?;
        decode::<Message>(response, "sendPhoto").await?;
        Ok(())
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.endpoint, method)
    }
}

#[async_trait]
impl DeliveryChannel for TelegramClient {
    async fn send_photo(&self, destination: ChatId, jpeg: Vec<u8>) -> Result<()> {
        TelegramClient::send_photo(self, destination, jpeg).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response, method: &str) -> Result<T> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| transport_error(method, e))?;
    let parsed: ApiResponse<T> = serde_json::from_slice(&body)
        .map_err(|e| anyhow!("telegram {} returned {} with unparsable body: {}", method, status, e))?;
    parsed.into_result(method)
}

fn transport_error(method: &str, err: reqwest::Error) -> anyhow::Error {
    anyhow!("telegram {} request failed: {}", method, err.without_url())
}
