//! Outbound Telegram dispatch for formatted notification text.

use std::error::Error;
use std::fmt;

use reqwest::Client;
use serde::Serialize;
use tracing::{error, info};

use crate::config::AppConfig;

const API_BASE: &str = "https://api.telegram.org";

/// `sendMessage` request body.
#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

/// Errors surfaced while dispatching a notification.
///
/// By the time dispatch runs the history is already committed, so these are
/// logged and dropped: a missed notification is acceptable, a duplicate is
/// not. The error carries only chat ids — never the request URL, which
/// embeds the bot token.
#[derive(Debug)]
pub enum DispatchError {
    /// The Bot API rejected the message for one or more chats.
    Rejected {
        /// Chats that did not accept the message.
        failed_chats: Vec<String>,
    },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { failed_chats } => {
                write!(f, "telegram rejected message for chats: {}", failed_chats.join(", "))
            }
        }
    }
}

impl Error for DispatchError {}

/// Sends `text` to every configured chat as MarkdownV2.
///
/// Per-chat failures are logged and collected; the remaining chats are still
/// attempted so one bad chat id cannot silence the rest.
pub async fn send_message(
    client: &Client,
    config: &AppConfig,
    text: &str,
) -> Result<(), DispatchError> {
    let url = format!("{API_BASE}/bot{}/sendMessage", config.bot_token);
    let mut failed_chats = Vec::new();

    for chat_id in &config.chat_ids {
        let body = SendMessage {
            chat_id,
            text,
            parse_mode: "MarkdownV2",
            disable_web_page_preview: true,
        };
        match client.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                info!(chat = %chat_id, "notification delivered");
            }
            Ok(response) => {
                error!(chat = %chat_id, status = %response.status(), "telegram rejected message");
                failed_chats.push(chat_id.clone());
            }
            Err(err) => {
                // reqwest errors render the request URL, which embeds the token.
                let detail = redact_token(&err.to_string(), &config.bot_token);
                error!(chat = %chat_id, error = %detail, "telegram request failed");
                failed_chats.push(chat_id.clone());
            }
        }
    }

    if failed_chats.is_empty() {
        Ok(())
    } else {
        Err(DispatchError::Rejected { failed_chats })
    }
}

/// Replaces any occurrence of the bot token in `text` with a placeholder.
fn redact_token(text: &str, token: &str) -> String {
    if token.is_empty() {
        return text.to_string();
    }
    text.replace(token, "<token>")
}
