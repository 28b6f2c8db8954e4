use log::debug;
use std::sync::{ Arc, Mutex, MutexGuard, PoisonError };

use crate::error::Result;
use crate::models::{ ConversationRef, ConversationSummary };
use crate::store::MessageStore;

#[derive(Default)]
struct AggregatorState {
    entries: Vec<ConversationSummary>,
    requested: u64,
    applied: u64,
}

/// Cached conversation list of one viewer, newest activity first. Every refresh refetches
/// the whole list; a response older than the one already applied is dropped.
pub struct ConversationListAggregator {
    store: Arc<dyn MessageStore>,
    viewer_id: String,
    state: Mutex<AggregatorState>,
}

impl ConversationListAggregator {
    pub fn new(store: Arc<dyn MessageStore>, viewer_id: &str) -> Self {
        Self {
            store,
            viewer_id: viewer_id.to_string(),
            state: Mutex::new(AggregatorState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, AggregatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `false` when a newer refresh already landed and this response was dropped.
    pub async fn refresh(&self) -> Result<bool> {
        let ticket = {
            let mut state = self.state();
            state.requested += 1;
            state.requested
        };

        let mut entries = self.store.list_conversations_for(&self.viewer_id).await?;
        sort_by_activity(&mut entries);

        let mut state = self.state();
        if ticket < state.applied {
            debug!("Dropping stale conversation list for {} (ticket {} < {})", self.viewer_id, ticket, state.applied);
            return Ok(false);
        }
        state.applied = ticket;
        state.entries = entries;
        Ok(true)
    }

    pub fn list(&self) -> Vec<ConversationSummary> {
        self.state().entries.clone()
    }

    pub fn get(&self, conversation: &ConversationRef) -> Option<ConversationSummary> {
        self.state()
            .entries.iter()
            .find(|s| &s.conversation == conversation)
            .cloned()
    }

    pub fn unread_total(&self) -> usize {
        self.state()
            .entries.iter()
            .map(|s| s.unread_count)
            .sum()
    }
}

fn sort_by_activity(entries: &mut [ConversationSummary]) {
    entries.sort_by(|a, b| {
        b.last_activity_at.cmp(&a.last_activity_at).then_with(|| a.conversation.cmp(&b.conversation))
    });
}
