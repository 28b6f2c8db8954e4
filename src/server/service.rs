use log::{ info, warn };
use std::sync::Arc;

use crate::error::Result;
use crate::models::{ ConversationSummary, Cursor, Message, Page, PushEvent, Target, Group };
use crate::pagination::clamp_page_size;
use crate::resolver::ConversationResolver;
use crate::server::registry::ConnectionRegistry;
use crate::store::{ append_to, page_of, validate_content, MessageStore };

/// Server-side entry point shared by the HTTP API and tests: authorize, hit the store, then
/// announce the change on participants' push channels.
#[derive(Clone)]
pub struct MessagingService {
    store: Arc<dyn MessageStore>,
    resolver: ConversationResolver,
    registry: Arc<ConnectionRegistry>,
    page_size: usize,
}

impl MessagingService {
    pub fn new(store: Arc<dyn MessageStore>, registry: Arc<ConnectionRegistry>, page_size: usize) -> Self {
        Self {
            resolver: ConversationResolver::new(Arc::clone(&store)),
            store,
            registry,
            page_size: clamp_page_size(page_size),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn default_page_size(&self) -> usize {
        self.page_size
    }

    /// Commits a message and returns the stored version. Fan-out runs detached so the
    /// caller's response never waits on other clients' sockets.
    pub async fn send(&self, sender_id: &str, target: &Target, content: &str) -> Result<Message> {
        validate_content(content)?;
        let conversation = self.resolver.resolve(sender_id, target).await?;
        let message = append_to(self.store.as_ref(), sender_id, &conversation, content).await?;
        info!("{} committed message {} to {}", sender_id, message.id, conversation.key());

        match self.resolver.participants(&conversation).await {
            Ok(participants) => {
                self.registry.broadcast(participants, PushEvent::NewMessage {
                    message: message.clone(),
                });
            }
            Err(e) => {
                warn!("Skipping fan-out for {}: {}", conversation.key(), e);
            }
        }
        Ok(message)
    }

    pub async fn page(
        &self,
        viewer_id: &str,
        target: &Target,
        cursor: Option<&Cursor>,
        limit: Option<usize>
    ) -> Result<Page> {
        let conversation = self.resolver.resolve(viewer_id, target).await?;
        let limit = limit.map(clamp_page_size).unwrap_or(self.page_size);
        page_of(self.store.as_ref(), &conversation, cursor, limit).await
    }

    pub async fn mark_read(&self, viewer_id: &str, target: &Target) -> Result<()> {
        let conversation = self.resolver.resolve(viewer_id, target).await?;
        self.store.mark_read(&conversation, viewer_id).await?;
        let participants = self.resolver.participants(&conversation).await?;
        self.registry.broadcast(participants, PushEvent::MessageRead {
            conversation,
            reader_id: viewer_id.to_string(),
        });
        Ok(())
    }

    pub async fn list_conversations(&self, viewer_id: &str) -> Result<Vec<ConversationSummary>> {
        self.store.list_conversations_for(viewer_id).await
    }

    pub async fn group(&self, group_id: &str) -> Result<Option<Group>> {
        self.store.get_group(group_id).await
    }
}
