//! ============================================================================
//! Database Types - Serializable records for redb storage
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::{MessageRef, UserId};

/// Per-user verification state.
/// One record per user, created lazily on first lookup and never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub user_id: UserId,
    pub has_joined_channel: bool,
    pub has_joined_group: bool,
    /// Only ever set by the engine after both memberships were confirmed
    pub verified: bool,
    /// Last verification prompt sent to this user
    pub prompt_message_ref: Option<MessageRef>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl VerificationRecord {
    pub fn new(user_id: UserId, now: i64) -> Self {
        Self {
            user_id,
            has_joined_channel: false,
            has_joined_group: false,
            verified: false,
            prompt_message_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply the supplied fields, leaving the rest untouched
    pub fn apply(&mut self, update: &StatusUpdate, now: i64) {
        if let Some(v) = update.has_joined_channel {
            self.has_joined_channel = v;
        }
        if let Some(v) = update.has_joined_group {
            self.has_joined_group = v;
        }
        if let Some(v) = update.verified {
            self.verified = v;
        }
        if let Some(v) = update.prompt_message_ref {
            self.prompt_message_ref = v;
        }
        self.updated_at = now;
    }
}

/// Mutable fields of a [`VerificationRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusField {
    HasJoinedChannel,
    HasJoinedGroup,
    Verified,
    PromptMessageRef,
}

impl StatusField {
    pub const ALL: [StatusField; 4] = [
        StatusField::HasJoinedChannel,
        StatusField::HasJoinedGroup,
        StatusField::Verified,
        StatusField::PromptMessageRef,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusField::HasJoinedChannel => "has_joined_channel",
            StatusField::HasJoinedGroup => "has_joined_group",
            StatusField::Verified => "verified",
            StatusField::PromptMessageRef => "prompt_message_ref",
        }
    }
}

impl FromStr for StatusField {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatusField::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| StoreError::InvalidField(s.to_string()))
    }
}

impl fmt::Display for StatusField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partial update of a verification record.
/// `None` means "keep the stored value".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pub has_joined_channel: Option<bool>,
    pub has_joined_group: Option<bool>,
    pub verified: Option<bool>,
    /// `Some(None)` clears the stored reference
    pub prompt_message_ref: Option<Option<MessageRef>>,
}

impl StatusUpdate {
    pub fn memberships(channel: bool, group: bool) -> Self {
        Self {
            has_joined_channel: Some(channel),
            has_joined_group: Some(group),
            ..Self::default()
        }
    }

    pub fn verified() -> Self {
        Self {
            verified: Some(true),
            ..Self::default()
        }
    }

    pub fn prompt(message_ref: MessageRef) -> Self {
        Self {
            prompt_message_ref: Some(Some(message_ref)),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Set a field from its textual name and value (CLI / admin input)
    pub fn set(&mut self, field: &str, value: &str) -> Result<(), StoreError> {
        let field: StatusField = field.parse()?;
        let invalid = || StoreError::InvalidValue {
            field: field.as_str(),
            value: value.to_string(),
        };

        match field {
            StatusField::HasJoinedChannel => {
                self.has_joined_channel = Some(parse_bool(value).ok_or_else(invalid)?)
            }
            StatusField::HasJoinedGroup => {
                self.has_joined_group = Some(parse_bool(value).ok_or_else(invalid)?)
            }
            StatusField::Verified => self.verified = Some(parse_bool(value).ok_or_else(invalid)?),
            StatusField::PromptMessageRef => {
                self.prompt_message_ref = Some(parse_message_ref(value).ok_or_else(invalid)?)
            }
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// `chat_id:message_id`, or `none` to clear
fn parse_message_ref(value: &str) -> Option<Option<MessageRef>> {
    if matches!(value.to_lowercase().as_str(), "none" | "null" | "") {
        return Some(None);
    }
    let (chat, message) = value.split_once(':')?;
    Some(Some(MessageRef {
        chat_id: chat.trim().parse().ok()?,
        message_id: message.trim().parse().ok()?,
    }))
}

/// Store error taxonomy
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No verification record for user {0}")]
    NotFound(UserId),

    #[error("Unknown status field '{0}'")]
    InvalidField(String),

    #[error("Invalid value '{value}' for field {field}")]
    InvalidValue { field: &'static str, value: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Codec error: {0}")]
    Codec(String),
}

/// Summary counts for the inspection tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbStats {
    pub total_users: usize,
    pub verified_users: usize,
    pub pending_users: usize,
    /// Pending users that have been sent a prompt
    pub prompted_users: usize,
}
