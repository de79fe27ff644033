//! ============================================================================
//! Telegram Client - Bot API transport
//! ============================================================================
//! Thin reqwest wrapper around the Bot API methods JoinGate needs:
//! - getChatMember (membership oracle)
//! - sendMessage / editMessageText with inline keyboards
//! - answerCallbackQuery
//! - getUpdates long polling
//! ============================================================================

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::access::{ChatMemberStatus, MembershipOracle, OracleError};
use crate::types::{GroupHandle, UserId};

/// Bot API base URL
const TELEGRAM_API: &str = "https://api.telegram.org";

/// Timeout for ordinary (non-polling) requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors from the Bot API transport
#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("Request to Telegram failed: {0}")]
    Transport(String),

    #[error("Telegram API error {code}: {description}")]
    Api { code: u16, description: String },

    #[error("Failed to parse Telegram response: {0}")]
    Decode(String),
}

impl TelegramError {
    /// Editing a message to identical text and markup is rejected with 400
    pub fn is_not_modified(&self) -> bool {
        matches!(
            self,
            TelegramError::Api { code: 400, description } if description.contains("message is not modified")
        )
    }
}

impl From<TelegramError> for OracleError {
    fn from(e: TelegramError) -> Self {
        match e {
            TelegramError::Api { code: 429, description } => OracleError::Unavailable(description),
            // Bad or malformed bot token: our misconfiguration, not the user's membership
            TelegramError::Api { code: code @ (401 | 404), description } => {
                OracleError::Unavailable(format!("{}: {} (check TELEGRAM_BOT_TOKEN)", code, description))
            }
            TelegramError::Api { code, description } if (400..500).contains(&code) => {
                OracleError::BadRequest(description)
            }
            TelegramError::Api { code, description } => {
                OracleError::Unavailable(format!("{}: {}", code, description))
            }
            TelegramError::Transport(msg) => OracleError::Unavailable(msg),
            TelegramError::Decode(msg) => OracleError::InvalidResponse(msg),
        }
    }
}

/// Client for the Telegram Bot API
pub struct TelegramClient {
    client: reqwest::Client,
    bot_token: String,
    base_url: String,
}

impl TelegramClient {
    pub fn new(bot_token: String) -> Self {
        Self::with_base_url(bot_token, TELEGRAM_API)
    }

    /// Point the client at a different Bot API server (self-hosted or test)
    pub fn with_base_url(bot_token: String, base_url: &str) -> Self {
        Self::with_http_client(reqwest::Client::new(), bot_token, base_url)
    }

    /// Use a preconfigured HTTP client (proxy, TLS, or connection settings)
    pub fn with_http_client(client: reqwest::Client, bot_token: String, base_url: &str) -> Self {
        Self {
            client,
            bot_token,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn call<P, T>(&self, method: &str, params: &P, timeout: Duration) -> Result<T, TelegramError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/bot{}/{}", self.base_url, self.bot_token, method);

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(params)
            .send()
            .await
            // without_url keeps the bot token out of error messages
            .map_err(|e| TelegramError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TelegramError::Transport(e.without_url().to_string()))?;

        parse_envelope(status.as_u16(), &body)
    }

    /// Identify the bot; fails fast on a bad token
    pub async fn get_me(&self) -> Result<User, TelegramError> {
        self.call("getMe", &serde_json::json!({}), REQUEST_TIMEOUT).await
    }

    pub async fn get_chat_member(
        &self,
        chat: &GroupHandle,
        user_id: UserId,
    ) -> Result<ChatMember, TelegramError> {
        debug!("getChatMember {} user {}", chat, user_id);
        let params = serde_json::json!({ "chat_id": chat.chat_id(), "user_id": user_id });
        self.call("getChatMember", &params, REQUEST_TIMEOUT).await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, TelegramError> {
        let params = SendMessage {
            chat_id,
            text,
            reply_markup,
        };
        self.call("sendMessage", &params, REQUEST_TIMEOUT).await
    }

    /// Edit a previously sent message. Passing the old markup keeps its buttons.
    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        reply_markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TelegramError> {
        let params = EditMessageText {
            chat_id,
            message_id,
            text,
            reply_markup,
        };
        // Returns the edited Message (or `true` for inline messages); not needed
        let _: serde_json::Value = self.call("editMessageText", &params, REQUEST_TIMEOUT).await?;
        Ok(())
    }

    pub async fn answer_callback_query(&self, callback_query_id: &str) -> Result<(), TelegramError> {
        let params = serde_json::json!({ "callback_query_id": callback_query_id });
        let _: bool = self.call("answerCallbackQuery", &params, REQUEST_TIMEOUT).await?;
        Ok(())
    }

    /// Long-poll for updates newer than `offset`
    pub async fn get_updates(&self, offset: i64, poll_timeout: Duration) -> Result<Vec<Update>, TelegramError> {
        let params = serde_json::json!({
            "offset": offset,
            "timeout": poll_timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        self.call("getUpdates", &params, poll_timeout + REQUEST_TIMEOUT).await
    }
}

#[async_trait]
impl MembershipOracle for TelegramClient {
    async fn member_status(
        &self,
        chat: &GroupHandle,
        user_id: UserId,
    ) -> Result<ChatMemberStatus, OracleError> {
        Ok(self.get_chat_member(chat, user_id).await?.status)
    }
}

/// Unwrap the `{ ok, result, error_code, description }` envelope
fn parse_envelope<T: DeserializeOwned>(http_status: u16, body: &str) -> Result<T, TelegramError> {
    let envelope: ApiResponse<T> = serde_json::from_str(body).map_err(|e| {
        if http_status >= 400 {
            TelegramError::Api {
                code: http_status,
                description: body.chars().take(200).collect(),
            }
        } else {
            TelegramError::Decode(e.to_string())
        }
    })?;

    match (envelope.ok, envelope.result) {
        (true, Some(result)) => Ok(result),
        (true, None) => Err(TelegramError::Decode("ok response without result".into())),
        (false, _) => Err(TelegramError::Api {
            code: envelope.error_code.unwrap_or(http_status),
            description: envelope.description.unwrap_or_default(),
        }),
    }
}

// ============================================================================
// Telegram API Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<u16>,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
struct EditMessageText<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMember {
    pub status: ChatMemberStatus,
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
}

impl InlineKeyboardButton {
    pub fn url(text: &str, url: &str) -> Self {
        Self {
            text: text.to_string(),
            url: Some(url.to_string()),
            callback_data: None,
        }
    }

    pub fn callback(text: &str, data: &str) -> Self {
        Self {
            text: text.to_string(),
            url: None,
            callback_data: Some(data.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Chat {
    pub fn is_private(&self) -> bool {
        self.kind == "private"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}
