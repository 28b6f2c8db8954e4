use std::sync::Arc;

use crate::error::{ MessagingError, Result };
use crate::models::{ ConversationRef, Target };
use crate::store::MessageStore;

/// Maps a viewer's target to a conversation identity and checks the viewer may use it.
/// Lookups only; nothing is written.
#[derive(Clone)]
pub struct ConversationResolver {
    store: Arc<dyn MessageStore>,
}

impl ConversationResolver {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, viewer_id: &str, target: &Target) -> Result<ConversationRef> {
        match target {
            Target::Direct(user_id) => {
                if user_id == viewer_id {
                    return Err(
                        MessagingError::InvalidTarget(format!("{} cannot message themselves", viewer_id))
                    );
                }
                Ok(ConversationRef::direct(viewer_id, user_id))
            }
            Target::Group(group_id) => {
                let group = self.store
                    .get_group(group_id).await?
                    .ok_or_else(|| MessagingError::UnknownGroup(group_id.clone()))?;
                if !group.is_member(viewer_id) {
                    return Err(MessagingError::NotAMember {
                        user_id: viewer_id.to_string(),
                        group_id: group_id.clone(),
                    });
                }
                Ok(ConversationRef::group(group_id))
            }
        }
    }

    /// Everyone whose channels receive fan-out for this conversation.
    pub async fn participants(&self, conversation: &ConversationRef) -> Result<Vec<String>> {
        match conversation {
            ConversationRef::Direct { participants } => {
                let (a, b) = participants.users();
                Ok(vec![a.to_string(), b.to_string()])
            }
            ConversationRef::Group { group_id } => {
                let group = self.store
                    .get_group(group_id).await?
                    .ok_or_else(|| MessagingError::UnknownGroup(group_id.clone()))?;
                Ok(group.member_ids.into_iter().collect())
            }
        }
    }
}
