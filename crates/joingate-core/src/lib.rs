//! ============================================================================
//! JOINGATE-CORE: Membership-gated verification
//! ============================================================================
//! This crate handles all backend logic for the JoinGate bot:
//! - Per-user verification records in an embedded redb store
//! - Channel/group membership lookups with fail-closed classification
//! - The verification engine (prompt, recheck, command gate)
//! - Telegram Bot API transport and the long-polling front end
//! ============================================================================

pub mod access;
pub mod bot;
pub mod config;
pub mod db;
pub mod telegram;
pub mod types;

// Re-export main types for convenience
pub use types::*;
pub use access::{MembershipChecker, MembershipOracle, MembershipStatus, VerificationEngine};
pub use bot::GateBot;
pub use config::GateConfig;
pub use db::{StatusField, StatusStore, StatusUpdate, StoreError, VerificationRecord};
pub use telegram::TelegramClient;
