use async_trait::async_trait;
use chrono::Utc;
use log::{ error, info };
use redis::{ AsyncCommands, Client };
use serde::de::DeserializeOwned;

use crate::config::directory::Directory;
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
use crate::pagination::page_bounds;
use crate::store::{ validate_content, MessageStore };

/// Redis layout, all keys under a configurable prefix:
/// `log:<conversation>` list of message JSON in append order, `inbox:<user>` sorted set of
/// conversation JSON scored by last activity, `unread:<user>` hash of per-conversation
/// counters, `user:<id>` and `group:<id>` directory entries.
pub struct RedisMessageStore {
    client: Client,
    key_prefix: String,
}

impl RedisMessageStore {
    pub fn new(url: &str, key_prefix: &str) -> Result<Self> {
        Ok(Self {
            client: Client::open(url)?,
            key_prefix: key_prefix.to_string(),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn log_key(&self, conversation: &ConversationRef) -> String {
        format!("{}log:{}", self.key_prefix, conversation.key())
    }

    fn inbox_key(&self, user_id: &str) -> String {
        format!("{}inbox:{}", self.key_prefix, user_id)
    }

    fn unread_key(&self, user_id: &str) -> String {
        format!("{}unread:{}", self.key_prefix, user_id)
    }

    fn user_key(&self, user_id: &str) -> String {
        format!("{}user:{}", self.key_prefix, user_id)
    }

    fn group_key(&self, group_id: &str) -> String {
        format!("{}group:{}", self.key_prefix, group_id)
    }

    async fn get_json<T: DeserializeOwned>(
        conn: &mut redis::aio::MultiplexedConnection,
        key: &str
    ) -> Result<Option<T>> {
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn user(&self, conn: &mut redis::aio::MultiplexedConnection, user_id: &str) -> Result<UserRef> {
        Self::get_json(conn, &self.user_key(user_id)).await?.ok_or_else(||
            MessagingError::UnknownUser(user_id.to_string())
        )
    }

    pub async fn install_directory(&self, directory: &Directory) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let mut pipe = redis::pipe();
        for user in &directory.users {
            pipe.set(self.user_key(&user.id), serde_json::to_string(user)?).ignore();
        }
        for group in &directory.groups {
            pipe.set(self.group_key(&group.id), serde_json::to_string(group)?).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        info!(
            "Installed {} users and {} groups into redis",
            directory.users.len(),
            directory.groups.len()
        );
        Ok(())
    }

    /// Appends atomically: log entry, inbox activity for every participant and unread
    /// counters for everyone except the sender.
    async fn append(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        message: &Message,
        participants: &[String]
    ) -> Result<()> {
        let conversation = message.conversation_ref();
        let member = serde_json::to_string(&conversation)?;
        let score = message.created_at.timestamp_micros() as f64;

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.rpush(self.log_key(&conversation), serde_json::to_string(message)?).ignore();
        for participant in participants {
            pipe.zadd(self.inbox_key(participant), &member, score).ignore();
            if participant != &message.sender.id {
                pipe.hincr(self.unread_key(participant), conversation.key(), 1).ignore();
            }
        }
        pipe.query_async::<_, ()>(conn).await?;
        Ok(())
    }

    async fn page(&self, conversation: &ConversationRef, cursor: Option<&Cursor>, limit: usize) -> Result<Page> {
        let mut conn = self.get_connection().await?;
        let key = self.log_key(conversation);
        let total: usize = conn.llen(&key).await?;
        let bounds = page_bounds(total, cursor, limit)?;
        if bounds.start == bounds.end {
            return Ok(Page { messages: Vec::new(), next_cursor: bounds.next_cursor });
        }

        let json_entries: Vec<String> = conn.lrange(
            &key,
            bounds.start as isize,
            (bounds.end as isize) - 1
        ).await?;
        let mut messages = Vec::with_capacity(json_entries.len());
        for json_entry in &json_entries {
            match serde_json::from_str::<Message>(json_entry) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    error!("Error parsing message entry in {}: {}", key, e);
                }
            }
        }
        Ok(Page { messages, next_cursor: bounds.next_cursor })
    }
}

#[async_trait]
impl MessageStore for RedisMessageStore {
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
        let mut conn = self.get_connection().await?;
        let sender = self.user(&mut conn, sender_id).await?;
        self.user(&mut conn, receiver_id).await?;

        let message = Message {
            id: MessageId::new_server(),
            content: content.to_string(),
            created_at: Utc::now(),
            sender,
            target: MessageTarget::Direct { receiver_id: receiver_id.to_string() },
            is_read: false,
        };
        self.append(&mut conn, &message, &[sender_id.to_string(), receiver_id.to_string()]).await?;
        Ok(message)
    }

    async fn append_group_message(
        &self,
        sender_id: &str,
        group_id: &str,
        content: &str
    ) -> Result<Message> {
        validate_content(content)?;
        let mut conn = self.get_connection().await?;
        let sender = self.user(&mut conn, sender_id).await?;
        let group: Group = Self::get_json(&mut conn, &self.group_key(group_id)).await?.ok_or_else(||
            MessagingError::UnknownGroup(group_id.to_string())
        )?;
        if !group.is_member(sender_id) {
            return Err(MessagingError::NotAMember {
                user_id: sender_id.to_string(),
                group_id: group_id.to_string(),
            });
        }

        let message = Message {
            id: MessageId::new_server(),
            content: content.to_string(),
            created_at: Utc::now(),
            sender,
            target: MessageTarget::Group { group_id: group_id.to_string() },
            is_read: false,
        };
        let members: Vec<String> = group.member_ids.into_iter().collect();
        self.append(&mut conn, &message, &members).await?;
        Ok(message)
    }

    async fn page_direct_messages(
        &self,
        user_a: &str,
        user_b: &str,
        cursor: Option<&Cursor>,
        limit: usize
    ) -> Result<Page> {
        self.page(&ConversationRef::direct(user_a, user_b), cursor, limit).await
    }

    async fn page_group_messages(
        &self,
        group_id: &str,
        cursor: Option<&Cursor>,
        limit: usize
    ) -> Result<Page> {
        self.page(&ConversationRef::group(group_id), cursor, limit).await
    }

    async fn list_conversations_for(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        let mut conn = self.get_connection().await?;
        let members: Vec<String> = conn.zrevrange(self.inbox_key(user_id), 0, -1).await?;
        let mut summaries = Vec::with_capacity(members.len());

        for member in members {
            let conversation: ConversationRef = match serde_json::from_str(&member) {
                Ok(c) => c,
                Err(e) => {
                    error!("Error parsing inbox entry for {}: {}", user_id, e);
                    continue;
                }
            };
            let last_json: Option<String> = conn.lindex(self.log_key(&conversation), -1).await?;
            let Some(last) = last_json.map(|j| serde_json::from_str::<Message>(&j)).transpose()? else {
                continue;
            };
            let title = match &conversation {
                ConversationRef::Direct { participants } => {
                    let other = participants.other(user_id).unwrap_or(user_id).to_string();
                    match Self::get_json::<UserRef>(&mut conn, &self.user_key(&other)).await? {
                        Some(user) => user.display_name,
                        None => other,
                    }
                }
                ConversationRef::Group { group_id } => {
                    match Self::get_json::<Group>(&mut conn, &self.group_key(group_id)).await? {
                        Some(group) => group.name,
                        None => group_id.clone(),
                    }
                }
            };
            let unread: Option<usize> = conn.hget(self.unread_key(user_id), conversation.key()).await?;
            summaries.push(ConversationSummary {
                conversation,
                title,
                preview: Some(MessagePreview::of(&last)),
                unread_count: unread.unwrap_or(0),
                last_activity_at: last.created_at,
            });
        }
        Ok(summaries)
    }

    async fn mark_read(&self, conversation: &ConversationRef, reader_id: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let key = self.log_key(conversation);
        let entries: Vec<String> = conn.lrange(&key, 0, -1).await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hdel(self.unread_key(reader_id), conversation.key()).ignore();
        for (index, json) in read_updates(&entries, reader_id)? {
            pipe.lset(&key, index, json).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn get_group(&self, group_id: &str) -> Result<Option<Group>> {
        let mut conn = self.get_connection().await?;
        Self::get_json(&mut conn, &self.group_key(group_id)).await
    }
}

/// Rewritten log entries, by index, for the messages `reader_id` has not read yet. The
/// reader's own messages are left alone.
fn read_updates(entries: &[String], reader_id: &str) -> Result<Vec<(isize, String)>> {
    let mut updates = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        let mut message: Message = serde_json::from_str(entry)?;
        if message.is_read || message.sender.id == reader_id {
            continue;
        }
        message.is_read = true;
        updates.push((index as isize, serde_json::to_string(&message)?));
    }
    Ok(updates)
}
