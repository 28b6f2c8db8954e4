#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{ AtomicBool, AtomicUsize, Ordering };
use std::sync::Arc;
use std::time::Duration;

use messaging_hub::models::{
    ConversationRef,
    ConversationSummary,
    Cursor,
    Group,
    Message,
    Page,
    UserRef,
    UserRole,
};
use messaging_hub::store::{ InMemoryMessageStore, MessageStore };
use messaging_hub::{ MessagingError, Result };

pub fn user(id: &str) -> UserRef {
    UserRef {
        id: id.to_string(),
        display_name: id.to_uppercase(),
        avatar: None,
        role: if id == "dave" { UserRole::Organization } else { UserRole::Volunteer },
    }
}

/// alice, bob, carol and dave; group `g1` holds the first three.
pub fn seeded_store() -> Arc<InMemoryMessageStore> {
    let store = InMemoryMessageStore::new();
    for id in ["alice", "bob", "carol", "dave"] {
        store.add_user(user(id));
    }
    store.add_group(Group {
        id: "g1".into(),
        name: "Beach Cleanup".into(),
        description: "Saturday crew".into(),
        member_ids: ["alice", "bob", "carol"]
            .iter()
            .map(|s| s.to_string())
            .collect::<BTreeSet<_>>(),
    });
    Arc::new(store)
}

/// Wraps a store and fails appends while offline or when the content contains a marker.
pub struct FlakyStore {
    inner: Arc<dyn MessageStore>,
    offline: AtomicBool,
    reject_marker: Option<String>,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn MessageStore>) -> Self {
        Self { inner, offline: AtomicBool::new(false), reject_marker: None }
    }

    pub fn rejecting(inner: Arc<dyn MessageStore>, marker: &str) -> Self {
        Self { inner, offline: AtomicBool::new(false), reject_marker: Some(marker.to_string()) }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self, content: Option<&str>) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(MessagingError::StoreUnavailable("network unreachable".into()));
        }
        if let (Some(marker), Some(content)) = (&self.reject_marker, content) {
            if content.contains(marker.as_str()) {
                return Err(MessagingError::StoreUnavailable("write rejected".into()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for FlakyStore {
    async fn append_direct_message(&self, sender_id: &str, receiver_id: &str, content: &str) -> Result<Message> {
        self.check(Some(content))?;
        self.inner.append_direct_message(sender_id, receiver_id, content).await
    }

    async fn append_group_message(&self, sender_id: &str, group_id: &str, content: &str) -> Result<Message> {
        self.check(Some(content))?;
        self.inner.append_group_message(sender_id, group_id, content).await
    }

    async fn page_direct_messages(
        &self,
        user_a: &str,
        user_b: &str,
        cursor: Option<&Cursor>,
        limit: usize
    ) -> Result<Page> {
        self.check(None)?;
        self.inner.page_direct_messages(user_a, user_b, cursor, limit).await
    }

    async fn page_group_messages(&self, group_id: &str, cursor: Option<&Cursor>, limit: usize) -> Result<Page> {
        self.check(None)?;
        self.inner.page_group_messages(group_id, cursor, limit).await
    }

    async fn list_conversations_for(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        self.check(None)?;
        self.inner.list_conversations_for(user_id).await
    }

    async fn mark_read(&self, conversation: &ConversationRef, reader_id: &str) -> Result<()> {
        self.check(None)?;
        self.inner.mark_read(conversation, reader_id).await
    }

    async fn get_group(&self, group_id: &str) -> Result<Option<Group>> {
        self.check(None)?;
        self.inner.get_group(group_id).await
    }
}

pub fn contents(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .map(|m| m.content.clone())
        .collect()
}

/// Polls `check` until it holds or five seconds pass.
pub async fn eventually<F>(mut check: F) -> bool where F: FnMut() -> bool {
    for _ in 0..250 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Holds group page reads until a permit is released, to make response ordering observable.
pub struct GatedStore {
    inner: Arc<dyn MessageStore>,
    gate: tokio::sync::Semaphore,
}

impl GatedStore {
    pub fn new(inner: Arc<dyn MessageStore>) -> Self {
        Self { inner, gate: tokio::sync::Semaphore::new(0) }
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }
}

#[async_trait]
impl MessageStore for GatedStore {
    async fn append_direct_message(&self, sender_id: &str, receiver_id: &str, content: &str) -> Result<Message> {
        self.inner.append_direct_message(sender_id, receiver_id, content).await
    }

    async fn append_group_message(&self, sender_id: &str, group_id: &str, content: &str) -> Result<Message> {
        self.inner.append_group_message(sender_id, group_id, content).await
    }

    async fn page_direct_messages(
        &self,
        user_a: &str,
        user_b: &str,
        cursor: Option<&Cursor>,
        limit: usize
    ) -> Result<Page> {
        self.inner.page_direct_messages(user_a, user_b, cursor, limit).await
    }

    async fn page_group_messages(&self, group_id: &str, cursor: Option<&Cursor>, limit: usize) -> Result<Page> {
        let permit = self.gate.acquire().await.map_err(|e| MessagingError::Internal(e.to_string()))?;
        permit.forget();
        self.inner.page_group_messages(group_id, cursor, limit).await
    }

    async fn list_conversations_for(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        self.inner.list_conversations_for(user_id).await
    }

    async fn mark_read(&self, conversation: &ConversationRef, reader_id: &str) -> Result<()> {
        self.inner.mark_read(conversation, reader_id).await
    }

    async fn get_group(&self, group_id: &str) -> Result<Option<Group>> {
        self.inner.get_group(group_id).await
    }
}

/// Reads group pages straight away but, while holding, keeps the response back until a
/// permit is released. Lets a test deliver an old snapshot after a newer one.
pub struct HoldingStore {
    inner: Arc<dyn MessageStore>,
    gate: tokio::sync::Semaphore,
    holding: AtomicBool,
    held: AtomicUsize,
}

impl HoldingStore {
    pub fn new(inner: Arc<dyn MessageStore>) -> Self {
        Self {
            inner,
            gate: tokio::sync::Semaphore::new(0),
            holding: AtomicBool::new(false),
            held: AtomicUsize::new(0),
        }
    }

    pub fn hold(&self, holding: bool) {
        self.holding.store(holding, Ordering::SeqCst);
    }

    /// Responses currently held back.
    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }
}

#[async_trait]
impl MessageStore for HoldingStore {
    async fn append_direct_message(&self, sender_id: &str, receiver_id: &str, content: &str) -> Result<Message> {
        self.inner.append_direct_message(sender_id, receiver_id, content).await
    }

    async fn append_group_message(&self, sender_id: &str, group_id: &str, content: &str) -> Result<Message> {
        self.inner.append_group_message(sender_id, group_id, content).await
    }

    async fn page_direct_messages(
        &self,
        user_a: &str,
        user_b: &str,
        cursor: Option<&Cursor>,
        limit: usize
    ) -> Result<Page> {
        self.inner.page_direct_messages(user_a, user_b, cursor, limit).await
    }

    async fn page_group_messages(&self, group_id: &str, cursor: Option<&Cursor>, limit: usize) -> Result<Page> {
        let page = self.inner.page_group_messages(group_id, cursor, limit).await?;
        if self.holding.load(Ordering::SeqCst) {
            self.held.fetch_add(1, Ordering::SeqCst);
            let permit = self.gate.acquire().await.map_err(|e| MessagingError::Internal(e.to_string()))?;
            permit.forget();
            self.held.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(page)
    }

    async fn list_conversations_for(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        self.inner.list_conversations_for(user_id).await
    }

    async fn mark_read(&self, conversation: &ConversationRef, reader_id: &str) -> Result<()> {
        self.inner.mark_read(conversation, reader_id).await
    }

    async fn get_group(&self, group_id: &str) -> Result<Option<Group>> {
        self.inner.get_group(group_id).await
    }
}
