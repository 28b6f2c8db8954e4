use async_trait::async_trait;
use chrono::{ DateTime, Duration, Utc };
use std::collections::HashMap;
use std::sync::{ RwLock, RwLockReadGuard, RwLockWriteGuard };

use crate::error::{ MessagingError, Result };
use crate::models::{
    ConversationRef,
    ConversationSummary,
    Cursor,
    Group,
    Message,
    MessageId,
    MessagePreview,
    MessageTarget,
    Page,
    UserRef,
};
use crate::pagination::paginate;
use crate::store::{ validate_content, MessageStore };

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, UserRef>,
    groups: HashMap<String, Group>,
    logs: HashMap<ConversationRef, Vec<Message>>,
    unread: HashMap<String, HashMap<ConversationRef, usize>>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl MemoryState {
    /// Store time, strictly increasing so activity ordering follows append order.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(stamp);
        stamp
    }

    fn user(&self, user_id: &str) -> Result<&UserRef> {
        self.users.get(user_id).ok_or_else(|| MessagingError::UnknownUser(user_id.to_string()))
    }

    fn append(&mut self, conversation: ConversationRef, message: Message, recipients: Vec<String>) {
        for recipient in recipients {
            *self.unread
                .entry(recipient)
                .or_default()
                .entry(conversation.clone())
                .or_insert(0) += 1;
        }
        self.logs.entry(conversation).or_default().push(message);
    }

    fn summary(&self, viewer_id: &str, conversation: &ConversationRef, log: &[Message]) -> Option<ConversationSummary> {
        let last = log.last()?;
        let title = match conversation {
            ConversationRef::Direct { participants } => {
                let other = participants.other(viewer_id)?;
                self.users
                    .get(other)
                    .map(|u| u.display_name.clone())
                    .unwrap_or_else(|| other.to_string())
            }
            ConversationRef::Group { group_id } => {
                let group = self.groups.get(group_id)?;
                if !group.is_member(viewer_id) {
                    return None;
                }
                group.name.clone()
            }
        };
        let unread_count = self.unread
            .get(viewer_id)
            .and_then(|per_conv| per_conv.get(conversation))
            .copied()
            .unwrap_or(0);
        Some(ConversationSummary {
            conversation: conversation.clone(),
            title,
            preview: Some(MessagePreview::of(last)),
            unread_count,
            last_activity_at: last.created_at,
        })
    }
}

/// Process-local store. Used by the server when no external database is configured and by
/// tests as the reference store.
#[derive(Default)]
pub struct InMemoryMessageStore {
    state: RwLock<MemoryState>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>> {
        self.state.read().map_err(|_| MessagingError::Internal("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        self.state.write().map_err(|_| MessagingError::Internal("memory store lock poisoned".into()))
    }

    pub fn add_user(&self, user: UserRef) {
        if let Ok(mut state) = self.write() {
            state.users.insert(user.id.clone(), user);
        }
    }

    pub fn add_group(&self, group: Group) {
        if let Ok(mut state) = self.write() {
            state.groups.insert(group.id.clone(), group);
        }
    }

    /// Full log of a conversation, oldest first.
    pub fn log_of(&self, conversation: &ConversationRef) -> Vec<Message> {
        self.read()
            .ok()
            .and_then(|state| state.logs.get(conversation).cloned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append_direct_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str
    ) -> Result<Message> {
        validate_content(content)?;
        if sender_id == receiver_id {
            return Err(MessagingError::InvalidTarget(format!("{} cannot message themselves", sender_id)));
        }
        let mut state = self.write()?;
        let sender = state.user(sender_id)?.clone();
        state.user(receiver_id)?;

        let message = Message {
            id: MessageId::new_server(),
            content: content.to_string(),
            created_at: state.next_timestamp(),
            sender,
            target: MessageTarget::Direct { receiver_id: receiver_id.to_string() },
            is_read: false,
        };
        state.append(
            ConversationRef::direct(sender_id, receiver_id),
            message.clone(),
            vec![receiver_id.to_string()]
        );
        Ok(message)
    }

    async fn append_group_message(
        &self,
        sender_id: &str,
        group_id: &str,
        content: &str
    ) -> Result<Message> {
        validate_content(content)?;
        let mut state = self.write()?;
        let sender = state.user(sender_id)?.clone();
        let group = state.groups
            .get(group_id)
            .ok_or_else(|| MessagingError::UnknownGroup(group_id.to_string()))?;
        if !group.is_member(sender_id) {
            return Err(MessagingError::NotAMember {
                user_id: sender_id.to_string(),
                group_id: group_id.to_string(),
            });
        }
        let recipients = group.member_ids
            .iter()
            .filter(|id| id.as_str() != sender_id)
            .cloned()
            .collect();

        let message = Message {
            id: MessageId::new_server(),
            content: content.to_string(),
            created_at: state.next_timestamp(),
            sender,
            target: MessageTarget::Group { group_id: group_id.to_string() },
            is_read: false,
        };
        state.append(ConversationRef::group(group_id), message.clone(), recipients);
        Ok(message)
    }

    async fn page_direct_messages(
        &self,
        user_a: &str,
        user_b: &str,
        cursor: Option<&Cursor>,
        limit: usize
    ) -> Result<Page> {
        let state = self.read()?;
        let log = state.logs.get(&ConversationRef::direct(user_a, user_b));
        paginate(log.map(Vec::as_slice).unwrap_or(&[]), cursor, limit)
    }

    async fn page_group_messages(
        &self,
        group_id: &str,
        cursor: Option<&Cursor>,
        limit: usize
    ) -> Result<Page> {
        let state = self.read()?;
        let log = state.logs.get(&ConversationRef::group(group_id));
        paginate(log.map(Vec::as_slice).unwrap_or(&[]), cursor, limit)
    }

    async fn list_conversations_for(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        let state = self.read()?;
        let mut summaries: Vec<ConversationSummary> = state.logs
            .iter()
            .filter_map(|(conversation, log)| state.summary(user_id, conversation, log))
            .collect();
        summaries.sort_by(|a, b| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then_with(|| a.conversation.cmp(&b.conversation))
        });
        Ok(summaries)
    }

    async fn mark_read(&self, conversation: &ConversationRef, reader_id: &str) -> Result<()> {
        let mut state = self.write()?;
        if let Some(per_conv) = state.unread.get_mut(reader_id) {
            per_conv.remove(conversation);
        }
        if let Some(log) = state.logs.get_mut(conversation) {
            for message in log.iter_mut().filter(|m| m.sender.id != reader_id) {
                message.is_read = true;
            }
        }
        Ok(())
    }

    async fn get_group(&self, group_id: &str) -> Result<Option<Group>> {
        Ok(self.read()?.groups.get(group_id).cloned())
    }
}
