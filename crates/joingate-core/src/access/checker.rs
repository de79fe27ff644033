//! ============================================================================
//! Membership Checker - Group membership lookups for the verification gate
//! ============================================================================
//! Asks an external membership oracle whether a user belongs to a chat and
//! folds the answer into Member / NotMember / Unknown. Anything that is not
//! positive proof of membership fails closed.
//! ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{GroupHandle, UserId};

/// Default per-call timeout for membership lookups
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Membership status vocabulary of the chat platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

/// Errors reported by a membership oracle
#[derive(Debug, Clone, thiserror::Error)]
pub enum OracleError {
    /// The oracle refused the query (user never seen by the chat, unknown chat, no rights)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The oracle could not be reached or is overloaded
    #[error("Oracle unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid oracle response: {0}")]
    InvalidResponse(String),

    #[error("Oracle call timed out")]
    TimedOut,
}

impl OracleError {
    /// Transient failures that a later attempt may resolve
    pub fn is_retryable(&self) -> bool {
        matches!(self, OracleError::Unavailable(_) | OracleError::TimedOut)
    }
}

/// Source of truth for "is user X a member of chat Y"
#[async_trait]
pub trait MembershipOracle: Send + Sync {
    async fn member_status(
        &self,
        chat: &GroupHandle,
        user_id: UserId,
    ) -> Result<ChatMemberStatus, OracleError>;
}

/// Why a membership lookup produced no answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownReason {
    /// Bad-request class: retrying will not help
    Rejected,
    /// Transient: network, service error, timeout, garbled reply
    Unavailable,
}

/// Tri-state membership outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Member,
    NotMember,
    Unknown(UnknownReason),
}

impl MembershipStatus {
    pub fn from_chat_status(status: ChatMemberStatus) -> Self {
        match status {
            ChatMemberStatus::Left | ChatMemberStatus::Kicked => MembershipStatus::NotMember,
            _ => MembershipStatus::Member,
        }
    }

    pub fn from_error(error: &OracleError) -> Self {
        match error {
            OracleError::BadRequest(_) => MembershipStatus::Unknown(UnknownReason::Rejected),
            _ => MembershipStatus::Unknown(UnknownReason::Unavailable),
        }
    }

    /// Only positive proof counts
    pub fn is_member(&self) -> bool {
        matches!(self, MembershipStatus::Member)
    }

    pub fn is_inconclusive(&self) -> bool {
        matches!(self, MembershipStatus::Unknown(UnknownReason::Unavailable))
    }
}

/// Membership oracle adapter with a bounded call time
#[derive(Clone)]
pub struct MembershipChecker {
    oracle: Arc<dyn MembershipOracle>,
    timeout: Duration,
}

impl MembershipChecker {
    pub fn new(oracle: Arc<dyn MembershipOracle>) -> Self {
        Self::with_timeout(oracle, DEFAULT_ORACLE_TIMEOUT)
    }

    pub fn with_timeout(oracle: Arc<dyn MembershipOracle>, timeout: Duration) -> Self {
        Self { oracle, timeout }
    }

    /// Single attempt, no retry
    pub async fn check_membership(&self, chat: &GroupHandle, user_id: UserId) -> MembershipStatus {
        let outcome = match tokio::time::timeout(self.timeout, self.oracle.member_status(chat, user_id)).await {
            Ok(result) => result,
            Err(_) => Err(OracleError::TimedOut),
        };

        match outcome {
            Ok(status) => {
                debug!("User {} in {}: {:?}", user_id, chat, status);
                MembershipStatus::from_chat_status(status)
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!("Membership lookup for user {} in {} failed: {} - treating as not joined", user_id, chat, e);
                } else {
                    debug!("Membership lookup for user {} in {} rejected: {}", user_id, chat, e);
                }
                MembershipStatus::from_error(&e)
            }
        }
    }
}
