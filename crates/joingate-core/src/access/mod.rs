//! ============================================================================
//! Access Module - Membership-gated access control
//! ============================================================================
//! A user may use the bot once they have joined both the required channel
//! and the required group.
//!
//! ## Flow
//! - **Initiate**: load (or create) the user's record; verified users are
//!   done, everyone else gets a prompt with two join links and a recheck button
//! - **Recheck**: look up both memberships concurrently, store the results,
//!   and mark the user verified once both are confirmed
//!
//! ## Usage
//! ```rust,ignore
//! use joingate_core::access::{MembershipChecker, VerificationEngine};
//!
//! let checker = MembershipChecker::new(Arc::new(telegram_client));
//! let engine = VerificationEngine::new(store, checker, groups);
//! let result = engine.recheck(user_id).await?;
//! ```
//! ============================================================================

mod checker;
mod gate;

// Re-export public types
pub use checker::{
    ChatMemberStatus, MembershipChecker, MembershipOracle, MembershipStatus, OracleError,
    UnknownReason, DEFAULT_ORACLE_TIMEOUT,
};
pub use gate::VerificationEngine;
