//! ============================================================================
//! Verification Engine - Channel + group membership gate
//! ============================================================================
//! Drives the verification workflow: issues the join prompt, rechecks both
//! memberships concurrently, and persists the outcome in the status store.
//! ============================================================================

use std::sync::Arc;
use tracing::{debug, info};

use super::checker::MembershipChecker;
use crate::db::{StatusStore, StatusUpdate, StoreError, VerificationRecord};
use crate::types::{
    CheckResult, GateError, InitiateOutcome, MessageRef, PromptDescriptor, RequiredGroup,
    RequiredGroups, UserId,
};

/// Orchestrates verification for every user; holds no per-user state
pub struct VerificationEngine {
    store: Arc<StatusStore>,
    checker: MembershipChecker,
    groups: RequiredGroups,
}

impl VerificationEngine {
    pub fn new(store: Arc<StatusStore>, checker: MembershipChecker, groups: RequiredGroups) -> Self {
        Self {
            store,
            checker,
            groups,
        }
    }

    pub fn groups(&self) -> &RequiredGroups {
        &self.groups
    }

    /// Run a blocking store call off the async workers
    async fn with_store<T, F>(&self, f: F) -> Result<T, GateError>
    where
        T: Send + 'static,
        F: FnOnce(&StatusStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| GateError::Worker(e.to_string()))?
            .map_err(GateError::from)
    }

    async fn record(&self, user_id: UserId) -> Result<VerificationRecord, GateError> {
        self.with_store(move |s| s.get_or_init(user_id)).await
    }

    async fn write(&self, user_id: UserId, update: StatusUpdate) -> Result<VerificationRecord, GateError> {
        self.with_store(move |s| s.update(user_id, &update)).await
    }

    /// Start verification. Verified users short-circuit without any write.
    pub async fn initiate(&self, user_id: UserId) -> Result<InitiateOutcome, GateError> {
        let record = self.record(user_id).await?;

        if record.verified {
            debug!("User {} already verified", user_id);
            return Ok(InitiateOutcome::AlreadyVerified);
        }

        Ok(InitiateOutcome::Prompt(PromptDescriptor::for_groups(&self.groups)))
    }

    /// Remember where the prompt was delivered so it can be edited later
    pub async fn record_prompt(&self, user_id: UserId, message: MessageRef) -> Result<(), GateError> {
        self.record(user_id).await?;
        self.write(user_id, StatusUpdate::prompt(message)).await?;
        debug!("Recorded prompt {:?} for user {}", message, user_id);
        Ok(())
    }

    pub async fn prompt_ref(&self, user_id: UserId) -> Result<Option<MessageRef>, GateError> {
        Ok(self.record(user_id).await?.prompt_message_ref)
    }

    /// Re-evaluate both memberships from scratch.
    ///
    /// Both lookups complete before anything is decided. `verified` is only
    /// ever raised here, never cleared.
    pub async fn recheck(&self, user_id: UserId) -> Result<CheckResult, GateError> {
        self.record(user_id).await?;

        let (channel, group) = tokio::join!(
            self.checker.check_membership(&self.groups.channel, user_id),
            self.checker.check_membership(&self.groups.group, user_id),
        );

        let joined_channel = channel.is_member();
        let joined_group = group.is_member();
        self.write(user_id, StatusUpdate::memberships(joined_channel, joined_group))
            .await?;

        if joined_channel && joined_group {
            self.write(user_id, StatusUpdate::verified()).await?;
            info!("User {} verified", user_id);
            return Ok(CheckResult::passed());
        }

        let mut result = CheckResult::default();
        for (kind, status) in [(RequiredGroup::Channel, channel), (RequiredGroup::Group, group)] {
            if !status.is_member() {
                result.missing.insert(kind);
            }
            if status.is_inconclusive() {
                result.inconclusive.insert(kind);
            }
        }

        info!(
            "User {} not verified yet: missing {:?}{}",
            user_id,
            result.missing,
            if result.inconclusive.is_empty() { "" } else { " (oracle unavailable)" }
        );
        Ok(result)
    }

    /// Command gate for the rest of the bot
    pub async fn is_verified(&self, user_id: UserId) -> Result<bool, GateError> {
        Ok(self.record(user_id).await?.verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::checker::{ChatMemberStatus, MembershipOracle, OracleError};
    use crate::types::GroupHandle;
    use async_trait::async_trait;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory oracle; unlisted users get a bad-request error like the real API
    #[derive(Default)]
    struct FakeOracle {
        members: Mutex<HashMap<(String, UserId), ChatMemberStatus>>,
        outages: Mutex<Vec<String>>,
        calls: Mutex<usize>,
    }

    impl FakeOracle {
        fn set(&self, chat: &str, user_id: UserId, status: ChatMemberStatus) {
            self.members
                .lock()
                .unwrap()
                .insert((chat.to_string(), user_id), status);
        }

        fn fail(&self, chat: &str) {
            self.outages.lock().unwrap().push(chat.to_string());
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl MembershipOracle for FakeOracle {
        async fn member_status(
            &self,
            chat: &GroupHandle,
            user_id: UserId,
        ) -> Result<ChatMemberStatus, OracleError> {
            *self.calls.lock().unwrap() += 1;
            if self.outages.lock().unwrap().iter().any(|c| c == chat.as_str()) {
                return Err(OracleError::Unavailable("502 Bad Gateway".into()));
            }
            self.members
                .lock()
                .unwrap()
                .get(&(chat.as_str().to_string(), user_id))
                .copied()
                .ok_or_else(|| OracleError::BadRequest("user not found".into()))
        }
    }

    /// Answers for the group only after the channel lookup has long finished
    struct StaggeredOracle;

    #[async_trait]
    impl MembershipOracle for StaggeredOracle {
        async fn member_status(
            &self,
            chat: &GroupHandle,
            _user_id: UserId,
        ) -> Result<ChatMemberStatus, OracleError> {
            if chat.as_str() == "grp" {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Ok(ChatMemberStatus::Left)
        }
    }

    fn engine_with(oracle: Arc<dyn MembershipOracle>) -> (tempfile::TempDir, Arc<StatusStore>, VerificationEngine) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.redb");
        let store = Arc::new(StatusStore::open(Some(path.to_str().unwrap())).unwrap());
        let engine = VerificationEngine::new(
            Arc::clone(&store),
            MembershipChecker::new(oracle),
            RequiredGroups::new("@chan", "@grp"),
        );
        (dir, store, engine)
    }

    fn missing(kinds: &[RequiredGroup]) -> BTreeSet<RequiredGroup> {
        kinds.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_initiate_unverified_returns_prompt() {
        let (_dir, store, engine) = engine_with(Arc::new(FakeOracle::default()));

        match engine.initiate(10).await.unwrap() {
            InitiateOutcome::Prompt(prompt) => {
                assert_eq!(prompt.join_links.len(), 2);
                assert_eq!(prompt.join_links[0].url, "https://t.me/chan");
                assert_eq!(prompt.join_links[1].url, "https://t.me/grp");
            }
            other => panic!("expected prompt, got {:?}", other),
        }
        assert!(store.get(10).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_record_prompt_persists_reference() {
        let (_dir, _store, engine) = engine_with(Arc::new(FakeOracle::default()));
        let message = MessageRef {
            chat_id: 10,
            message_id: 555,
        };

        engine.initiate(10).await.unwrap();
        engine.record_prompt(10, message).await.unwrap();
        assert_eq!(engine.prompt_ref(10).await.unwrap(), Some(message));
    }

    #[tokio::test]
    async fn test_full_scenario() {
        let oracle = Arc::new(FakeOracle::default());
        let (_dir, store, engine) = engine_with(oracle.clone());
        let user = 42;

        // Joined neither
        engine.initiate(user).await.unwrap();
        let result = engine.recheck(user).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.missing, missing(&[RequiredGroup::Channel, RequiredGroup::Group]));
        let record = store.get(user).unwrap().unwrap();
        assert!(!record.has_joined_channel && !record.has_joined_group && !record.verified);

        // Joined the channel only
        oracle.set("chan", user, ChatMemberStatus::Member);
        oracle.set("grp", user, ChatMemberStatus::Left);
        let result = engine.recheck(user).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.missing, missing(&[RequiredGroup::Group]));
        let record = store.get(user).unwrap().unwrap();
        assert!(record.has_joined_channel);
        assert!(!record.has_joined_group);
        assert!(!record.verified);

        // Joined both
        oracle.set("grp", user, ChatMemberStatus::Restricted);
        let result = engine.recheck(user).await.unwrap();
        assert_eq!(result, CheckResult::passed());
        assert!(store.get(user).unwrap().unwrap().verified);
        assert!(engine.is_verified(user).await.unwrap());
    }

    #[tokio::test]
    async fn test_initiate_verified_is_idempotent_without_writes() {
        let oracle = Arc::new(FakeOracle::default());
        oracle.set("chan", 7, ChatMemberStatus::Member);
        oracle.set("grp", 7, ChatMemberStatus::Administrator);
        let (_dir, store, engine) = engine_with(oracle.clone());

        engine.recheck(7).await.unwrap();
        let calls_before = oracle.calls();

        assert_eq!(engine.initiate(7).await.unwrap(), InitiateOutcome::AlreadyVerified);
        let after_first = store.get(7).unwrap().unwrap();
        assert_eq!(engine.initiate(7).await.unwrap(), InitiateOutcome::AlreadyVerified);
        let after_second = store.get(7).unwrap().unwrap();

        assert_eq!(after_first, after_second);
        assert_eq!(oracle.calls(), calls_before);
    }

    #[tokio::test]
    async fn test_verified_is_sticky_after_leaving() {
        let oracle = Arc::new(FakeOracle::default());
        oracle.set("chan", 3, ChatMemberStatus::Member);
        oracle.set("grp", 3, ChatMemberStatus::Member);
        let (_dir, store, engine) = engine_with(oracle.clone());
        assert!(engine.recheck(3).await.unwrap().success);

        oracle.set("chan", 3, ChatMemberStatus::Left);
        let result = engine.recheck(3).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.missing, missing(&[RequiredGroup::Channel]));

        let record = store.get(3).unwrap().unwrap();
        assert!(!record.has_joined_channel);
        assert!(record.has_joined_group);
        assert!(record.verified);
        assert_eq!(engine.initiate(3).await.unwrap(), InitiateOutcome::AlreadyVerified);
    }

    #[tokio::test]
    async fn test_oracle_outage_fails_closed() {
        let oracle = Arc::new(FakeOracle::default());
        oracle.set("chan", 5, ChatMemberStatus::Member);
        oracle.set("grp", 5, ChatMemberStatus::Member);
        oracle.fail("grp");
        let (_dir, store, engine) = engine_with(oracle.clone());

        let result = engine.recheck(5).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.missing, missing(&[RequiredGroup::Group]));
        assert_eq!(result.inconclusive, missing(&[RequiredGroup::Group]));
        assert!(!store.get(5).unwrap().unwrap().verified);
    }

    #[tokio::test]
    async fn test_bad_request_counts_as_missing_not_inconclusive() {
        let (_dir, _store, engine) = engine_with(Arc::new(FakeOracle::default()));
        let result = engine.recheck(8).await.unwrap();
        assert_eq!(result.missing, missing(&[RequiredGroup::Channel, RequiredGroup::Group]));
        assert!(result.inconclusive.is_empty());
    }

    #[tokio::test]
    async fn test_recheck_waits_for_both_results() {
        let (_dir, _store, engine) = engine_with(Arc::new(StaggeredOracle));
        let result = engine.recheck(1).await.unwrap();
        assert_eq!(result.missing, missing(&[RequiredGroup::Channel, RequiredGroup::Group]));
        assert!(result.inconclusive.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_users_do_not_interfere() {
        let oracle = Arc::new(FakeOracle::default());
        oracle.set("chan", 100, ChatMemberStatus::Member);
        oracle.set("grp", 100, ChatMemberStatus::Member);
        oracle.set("chan", 200, ChatMemberStatus::Kicked);
        oracle.set("grp", 200, ChatMemberStatus::Member);
        let (_dir, store, engine) = engine_with(oracle);
        let engine = Arc::new(engine);

        let mut handles = Vec::new();
        for _ in 0..10 {
            for user in [100, 200] {
                let engine = Arc::clone(&engine);
                handles.push(tokio::spawn(async move { engine.recheck(user).await.unwrap() }));
            }
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let a = store.get(100).unwrap().unwrap();
        assert!(a.has_joined_channel && a.has_joined_group && a.verified);

        let b = store.get(200).unwrap().unwrap();
        assert!(!b.has_joined_channel);
        assert!(b.has_joined_group);
        assert!(!b.verified);
    }
}
