pub mod memory;
pub mod redis;
pub mod remote;

use async_trait::async_trait;
use log::info;
use std::error::Error;
use std::sync::Arc;

use crate::cli::Args;
use crate::config::directory::Directory;
use crate::error::{ MessagingError, Result };
use crate::models::{ ConversationRef, ConversationSummary, Cursor, Group, Message, Page };

pub use memory::InMemoryMessageStore;
pub use redis::RedisMessageStore;
pub use remote::RemoteMessageStore;

/// Durable message log keyed by conversation. Implementations own ordering: the order in
/// which appends are accepted is the order every reader sees.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append_direct_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str
    ) -> Result<Message>;

    async fn append_group_message(
        &self,
        sender_id: &str,
        group_id: &str,
        content: &str
    ) -> Result<Message>;

    async fn page_direct_messages(
        &self,
        user_a: &str,
        user_b: &str,
        cursor: Option<&Cursor>,
        limit: usize
    ) -> Result<Page>;

    async fn page_group_messages(
        &self,
        group_id: &str,
        cursor: Option<&Cursor>,
        limit: usize
    ) -> Result<Page>;

    async fn list_conversations_for(&self, user_id: &str) -> Result<Vec<ConversationSummary>>;

    async fn mark_read(&self, conversation: &ConversationRef, reader_id: &str) -> Result<()>;

    async fn get_group(&self, group_id: &str) -> Result<Option<Group>>;
}

/// Routes an append to the direct or group endpoint of the store.
pub async fn append_to(
    store: &dyn MessageStore,
    sender_id: &str,
    conversation: &ConversationRef,
    content: &str
) -> Result<Message> {
    match conversation {
        ConversationRef::Direct { participants } => {
            let receiver = participants
                .other(sender_id)
                .ok_or_else(|| MessagingError::NotAParticipant(sender_id.to_string()))?;
            store.append_direct_message(sender_id, receiver, content).await
        }
        ConversationRef::Group { group_id } =>
            store.append_group_message(sender_id, group_id, content).await,
    }
}

pub async fn page_of(
    store: &dyn MessageStore,
    conversation: &ConversationRef,
    cursor: Option<&Cursor>,
    limit: usize
) -> Result<Page> {
    match conversation {
        ConversationRef::Direct { participants } => {
            let (a, b) = participants.users();
            store.page_direct_messages(a, b, cursor, limit).await
        }
        ConversationRef::Group { group_id } =>
            store.page_group_messages(group_id, cursor, limit).await,
    }
}

pub fn validate_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(MessagingError::EmptyContent);
    }
    if content.chars().count() > crate::MAX_CONTENT_CHARS {
        return Err(MessagingError::ContentTooLong { max: crate::MAX_CONTENT_CHARS });
    }
    Ok(())
}

pub async fn create_message_store(
    args: &Args,
    directory: &Directory
) -> std::result::Result<Arc<dyn MessageStore>, Box<dyn Error + Send + Sync>> {
    match args.store_type.to_lowercase().as_str() {
        "memory" => {
            let store = InMemoryMessageStore::new();
            directory.install_into(&store);
            Ok(Arc::new(store))
        }
        "redis" => {
            let store = RedisMessageStore::new(&args.store_redis_url, &args.store_redis_prefix)?;
            store.install_directory(directory).await?;
            Ok(Arc::new(store))
        }
        other =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported message store type: {}", other)
                    )
                )
            ),
    }
}

pub async fn initialize_message_store(
    args: &Args,
    directory: &Directory
) -> std::result::Result<Arc<dyn MessageStore>, Box<dyn Error + Send + Sync>> {
    info!("Messages will be stored in: {}", args.store_type);
    create_message_store(args, directory).await
}
