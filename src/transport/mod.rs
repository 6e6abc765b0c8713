//! Outbound delivery of annotated frames.
//!
//! The dispatcher only knows the `DeliveryChannel` trait. The Telegram Bot API
//! client implements it and also serves the command front end (`crate::bot`).

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod telegram;

pub use telegram::{Chat, Message, TelegramClient, Update};

/// Identifier of the chat that receives annotated frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Asynchronous image delivery to a destination.
///
/// Implementations may fail transiently; callers treat any error as a failed
/// hand-off and carry on.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send_photo(&self, destination: ChatId, jpeg: Vec<u8>) -> Result<()>;
}
