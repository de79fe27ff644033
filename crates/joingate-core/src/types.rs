//! ============================================================================
//! Core Types for JoinGate
//! ============================================================================
//! Identifiers, required-group descriptors, and the result descriptors the
//! verification engine hands back to the presentation layer.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::db::StoreError;

/// Platform user identifier (Telegram ids are signed 64-bit)
pub type UserId = i64;

/// Callback payload carried by the "I have joined" button
pub const RECHECK_CALLBACK_DATA: &str = "check_join_status";

/// Public handle of a channel or group, stored without the leading `@`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupHandle(String);

impl GroupHandle {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().trim_start_matches('@').to_string())
    }

    /// Bare handle, e.g. `my_channel`
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Chat identifier accepted by the Bot API, e.g. `@my_channel`
    pub fn chat_id(&self) -> String {
        format!("@{}", self.0)
    }

    /// Public invite link for the chat
    pub fn join_url(&self) -> String {
        format!("https://t.me/{}", self.0)
    }
}

impl fmt::Display for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// The two memberships a user must prove
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredGroup {
    Channel,
    Group,
}

impl RequiredGroup {
    pub fn display_name(&self) -> &'static str {
        match self {
            RequiredGroup::Channel => "channel",
            RequiredGroup::Group => "group",
        }
    }
}

/// Handles of the channel and group every user has to join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredGroups {
    pub channel: GroupHandle,
    pub group: GroupHandle,
}

impl RequiredGroups {
    pub fn new(channel: &str, group: &str) -> Self {
        Self {
            channel: GroupHandle::new(channel),
            group: GroupHandle::new(group),
        }
    }

    pub fn handle(&self, kind: RequiredGroup) -> &GroupHandle {
        match kind {
            RequiredGroup::Channel => &self.channel,
            RequiredGroup::Group => &self.group,
        }
    }
}

/// Reference to a message the bot sent, so it can be edited in place later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i64,
}

/// A join button shown in the verification prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinLink {
    pub kind: RequiredGroup,
    pub handle: GroupHandle,
    pub url: String,
}

/// The "I have joined" button
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecheckAction {
    pub callback_data: String,
}

impl Default for RecheckAction {
    fn default() -> Self {
        Self {
            callback_data: RECHECK_CALLBACK_DATA.to_string(),
        }
    }
}

/// Everything the presentation layer needs to render a verification prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub join_links: Vec<JoinLink>,
    pub recheck_action: RecheckAction,
}

impl PromptDescriptor {
    pub fn for_groups(groups: &RequiredGroups) -> Self {
        let join_links = [RequiredGroup::Channel, RequiredGroup::Group]
            .into_iter()
            .map(|kind| {
                let handle = groups.handle(kind).clone();
                JoinLink {
                    kind,
                    url: handle.join_url(),
                    handle,
                }
            })
            .collect();

        Self {
            join_links,
            recheck_action: RecheckAction::default(),
        }
    }
}

/// Outcome of starting the verification flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitiateOutcome {
    AlreadyVerified,
    Prompt(PromptDescriptor),
}

/// Outcome of a recheck cycle
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckResult {
    pub success: bool,
    /// Memberships that could not be confirmed this cycle
    pub missing: BTreeSet<RequiredGroup>,
    /// Subset of `missing` where the oracle was unreachable rather than negative
    pub inconclusive: BTreeSet<RequiredGroup>,
}

impl CheckResult {
    pub fn passed() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }
}

/// Error types for the verification engine
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Background task failed: {0}")]
    Worker(String),
}
