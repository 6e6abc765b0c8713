//! Telegram long-poll front end.
//!
//! Pulls updates, turns message text into `Command`s, and replies with the
//! handler's text. Polling errors are logged and retried after a fixed delay;
//! the loop only ends when its future is dropped.

use std::time::Duration;

use crate::commands::{Command, CommandHandler};
use crate::transport::{ChatId, TelegramClient, Update};

const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Extract commands from a batch of updates.
///
/// Returns the offset to acknowledge the batch with (highest `update_id` + 1)
/// and the commands in arrival order. Non-command messages are skipped but
/// still acknowledged.
pub fn extract_commands(updates: &[Update]) -> (Option<i64>, Vec<(ChatId, Command)>) {
    let next_offset = updates.iter().map(|update| update.update_id + 1).max();
    let commands = updates
        .iter()
        .filter_map(|update| {
            let message = update.message.as_ref()?;
            let command = Command::parse(message.text.as_deref()?)?;
            Some((ChatId(message.chat.id), command))
        })
        .collect();
    (next_offset, commands)
}

/// Serve commands until the returned future is dropped.
pub async fn run(client: &TelegramClient, handler: &CommandHandler) {
    let mut offset: Option<i64> = None;
    log::info!("telegram command loop started");
    loop {
        let updates = match client.get_updates(offset).await {
            Ok(updates) => updates,
            Err(err) => {
                log::warn!("{:#}; retrying in {:?}", err, POLL_RETRY_DELAY);
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            }
        };

        let (next_offset, commands) = extract_commands(&updates);
        if next_offset.is_some() {
            offset = next_offset;
        }
        for (chat, command) in commands {
            log::info!("chat {} issued {:?}", chat, command);
            let reply = handler.handle(chat, command).await;
            if let Err(err) = client.send_message(chat, &reply).await {
                log::warn!("failed to reply to chat {}: {:#}", chat, err);
            }
        }
    }
}
