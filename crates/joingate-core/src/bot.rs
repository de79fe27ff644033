//! ============================================================================
//! Gate Bot - Telegram front end for the verification engine
//! ============================================================================
//! Long-polls the Bot API, turns `/start` and the "I have joined" button into
//! engine calls, and renders the results. Holds no verification state.
//! ============================================================================

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::access::VerificationEngine;
use crate::telegram::{
    CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, Message, TelegramClient, Update,
};
use crate::types::{
    CheckResult, InitiateOutcome, MessageRef, PromptDescriptor, RequiredGroup, RequiredGroups,
    UserId, RECHECK_CALLBACK_DATA,
};

/// Pause before polling again after a transport failure
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

const PRIVATE_ONLY_TEXT: &str = "Please message me privately to verify.";
const ALREADY_VERIFIED_TEXT: &str = "✅ You are already verified! All bot features are available.";
const GATE_TEXT: &str = "🔒 You need to verify first. Send /start to begin.";
const HELP_TEXT: &str = "Available commands:\n/start - Check your verification status\n/help - Show this message";

pub struct GateBot {
    client: Arc<TelegramClient>,
    engine: Arc<VerificationEngine>,
    poll_timeout: Duration,
}

impl GateBot {
    pub fn new(client: Arc<TelegramClient>, engine: Arc<VerificationEngine>, poll_timeout: Duration) -> Self {
        Self {
            client,
            engine,
            poll_timeout,
        }
    }

    /// Poll forever; each update is handled on its own task
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!(
            "Gate bot polling (channel {}, group {})",
            self.engine.groups().channel,
            self.engine.groups().group
        );

        let mut offset = 0;
        loop {
            let updates = match self.client.get_updates(offset, self.poll_timeout).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!("getUpdates failed: {} - retrying in {:?}", e, POLL_RETRY_DELAY);
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let bot = Arc::clone(&self);
                tokio::spawn(async move {
                    let update_id = update.update_id;
                    if let Err(e) = bot.handle_update(update).await {
                        warn!("Failed to handle update {}: {}", update_id, e);
                    }
                });
            }
        }
    }

    pub async fn handle_update(&self, update: Update) -> Result<()> {
        if let Some(query) = update.callback_query {
            self.handle_callback(query).await
        } else if let Some(message) = update.message {
            self.handle_message(message).await
        } else {
            Ok(())
        }
    }

    async fn handle_message(&self, message: Message) -> Result<()> {
        let (Some(user), Some(text)) = (message.from.as_ref(), message.text.as_deref()) else {
            return Ok(());
        };
        let Some(command) = parse_command(text) else {
            return Ok(());
        };
        let chat_id = message.chat.id;

        match command {
            "start" if !message.chat.is_private() => {
                self.client.send_message(chat_id, PRIVATE_ONLY_TEXT, None).await?;
            }
            "start" => self.start(user.id, chat_id).await?,
            "help" => {
                let text = if self.engine.is_verified(user.id).await? { HELP_TEXT } else { GATE_TEXT };
                self.client.send_message(chat_id, text, None).await?;
            }
            other => {
                if !self.engine.is_verified(user.id).await? {
                    debug!("Gated /{} for unverified user {}", other, user.id);
                    self.client.send_message(chat_id, GATE_TEXT, None).await?;
                }
            }
        }
        Ok(())
    }

    async fn start(&self, user_id: UserId, chat_id: i64) -> Result<()> {
        match self.engine.initiate(user_id).await? {
            InitiateOutcome::AlreadyVerified => {
                self.client.send_message(chat_id, ALREADY_VERIFIED_TEXT, None).await?;
            }
            InitiateOutcome::Prompt(prompt) => {
                let keyboard = prompt_keyboard(&prompt);
                let sent = self
                    .client
                    .send_message(chat_id, &prompt_text(self.engine.groups()), Some(&keyboard))
                    .await?;
                self.engine
                    .record_prompt(
                        user_id,
                        MessageRef {
                            chat_id: sent.chat.id,
                            message_id: sent.message_id,
                        },
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_callback(&self, query: CallbackQuery) -> Result<()> {
        // Stop the client's loading spinner whatever happens next
        if let Err(e) = self.client.answer_callback_query(&query.id).await {
            debug!("answerCallbackQuery failed: {}", e);
        }

        if query.data.as_deref() != Some(RECHECK_CALLBACK_DATA) {
            return Ok(());
        }

        let user_id = query.from.id;
        let result = self.engine.recheck(user_id).await?;

        let target = match query.message.as_ref() {
            Some(m) => Some(MessageRef {
                chat_id: m.chat.id,
                message_id: m.message_id,
            }),
            None => self.engine.prompt_ref(user_id).await?,
        };

        let groups = self.engine.groups();
        let (text, keyboard) = if result.success {
            (success_text(), None)
        } else {
            (
                failure_text(&result, groups),
                Some(prompt_keyboard(&PromptDescriptor::for_groups(groups))),
            )
        };

        match target {
            Some(m) => match self
                .client
                .edit_message_text(m.chat_id, m.message_id, &text, keyboard.as_ref())
                .await
            {
                Ok(()) => {}
                // Repeated taps with an unchanged result leave the prompt as is
                Err(e) if e.is_not_modified() => debug!("Prompt for user {} unchanged", user_id),
                Err(e) => return Err(e.into()),
            },
            None => {
                self.client.send_message(user_id, &text, keyboard.as_ref()).await?;
            }
        }
        Ok(())
    }
}

/// `/start@SomeBot args` -> `start`
pub fn parse_command(text: &str) -> Option<&str> {
    let first = text.trim().split_whitespace().next()?;
    let command = first.strip_prefix('/')?;
    let command = command.split('@').next().unwrap_or(command);
    (!command.is_empty()).then_some(command)
}

pub fn prompt_text(groups: &RequiredGroups) -> String {
    format!(
        "⚠️ Please join our channel and group before using this bot:\n\n\
         • Channel: {}\n\
         • Group: {}\n\n\
         Once you have joined, tap \"✅ I have joined\" below.",
        groups.channel, groups.group
    )
}

/// Two join buttons on the first row, the recheck button on the second
pub fn prompt_keyboard(prompt: &PromptDescriptor) -> InlineKeyboardMarkup {
    let links = prompt
        .join_links
        .iter()
        .map(|link| {
            let label = match link.kind {
                RequiredGroup::Channel => "Join channel",
                RequiredGroup::Group => "Join group",
            };
            InlineKeyboardButton::url(label, &link.url)
        })
        .collect();

    InlineKeyboardMarkup {
        inline_keyboard: vec![
            links,
            vec![InlineKeyboardButton::callback(
                "✅ I have joined",
                &prompt.recheck_action.callback_data,
            )],
        ],
    }
}

pub fn success_text() -> String {
    "🎉 Verification complete, thanks for joining! You can now use all bot features.\n\n\
     Send /help to see what I can do."
        .to_string()
}

pub fn failure_text(result: &CheckResult, groups: &RequiredGroups) -> String {
    let missing: Vec<String> = result
        .missing
        .iter()
        .map(|kind| format!("{} {}", kind.display_name(), groups.handle(*kind)))
        .collect();

    let mut text = format!(
        "❌ Verification failed. You have not joined: {}\n\n\
         Join using the buttons below, then tap \"✅ I have joined\" again.",
        missing.join(", ")
    );
    if !result.inconclusive.is_empty() {
        text.push_str("\n\n(Telegram could not confirm some memberships just now. If you already joined, try again in a moment.)");
    }
    text
}
