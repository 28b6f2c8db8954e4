//! UI-facing messaging client: the open conversation's cache, the optimistic send pipeline,
//! the conversation list and the reaction to push events.

pub mod aggregator;
pub mod cache;
pub mod channel;

use log::{ debug, info, warn };
use std::collections::HashMap;
use std::sync::{ Arc, Mutex, MutexGuard, PoisonError };
use tokio::sync::{ broadcast, oneshot };
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::StreamExt;

use crate::error::{ MessagingError, Result };
use crate::models::{
    ConversationRef,
    ConversationSummary,
    Message,
    MessageId,
    PushEvent,
    Target,
    UserRef,
};
use crate::pagination::clamp_page_size;
use crate::store::{ append_to, page_of, validate_content, MessageStore };

pub use aggregator::ConversationListAggregator;
pub use cache::{ ConversationCache, SlotSnapshot };
pub use channel::{ ChannelStatus, PushChannel, PushChannelConfig };

const INVALIDATION_BUFFER: usize = 64;

/// Tells the UI which cached view changed and should be read again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Invalidation {
    Conversation(ConversationRef),
    ConversationList,
    /// Notifications were missed; re-read everything.
    All,
}

#[derive(Debug, PartialEq, Eq)]
pub enum LoadMore {
    Loaded(usize),
    Exhausted,
}

/// A send whose optimistic entry is already visible and whose commit has not run yet.
/// Pass it to [`MessagingClient::commit`] or [`MessagingClient::abandon`]; dropping it only
/// releases the sends queued behind it.
pub struct PendingSend {
    conversation: ConversationRef,
    temporary_id: MessageId,
    content: String,
    snapshot: Option<(u64, SlotSnapshot)>,
    previous: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

impl PendingSend {
    pub fn conversation(&self) -> &ConversationRef {
        &self.conversation
    }

    pub fn temporary_id(&self) -> &MessageId {
        &self.temporary_id
    }
}

#[derive(Default)]
struct ClientState {
    active: Option<ConversationCache>,
    generation: u64,
    /// Completion signal of the last send queued per conversation.
    lanes: HashMap<ConversationRef, oneshot::Receiver<()>>,
}

pub struct MessagingClient {
    store: Arc<dyn MessageStore>,
    viewer: UserRef,
    page_size: usize,
    state: Mutex<ClientState>,
    conversations: ConversationListAggregator,
    invalidations: broadcast::Sender<Invalidation>,
}

impl MessagingClient {
    pub fn new(store: Arc<dyn MessageStore>, viewer: UserRef, page_size: usize) -> Self {
        let (invalidations, _) = broadcast::channel(INVALIDATION_BUFFER);
        Self {
            conversations: ConversationListAggregator::new(Arc::clone(&store), &viewer.id),
            store,
            viewer,
            page_size: clamp_page_size(page_size),
            state: Mutex::new(ClientState::default()),
            invalidations,
        }
    }

    pub fn viewer(&self) -> &UserRef {
        &self.viewer
    }

    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, invalidation: Invalidation) {
        // No receivers is fine; nothing is rendering.
        let _ = self.invalidations.send(invalidation);
    }

    fn conversation_for(&self, target: &Target) -> Result<ConversationRef> {
        if let Target::Direct(user_id) = target {
            if user_id == &self.viewer.id {
                return Err(MessagingError::InvalidTarget(format!("{} cannot message themselves", user_id)));
            }
        }
        Ok(ConversationRef::for_target(&self.viewer.id, target))
    }

    pub fn active_conversation(&self) -> Option<ConversationRef> {
        self.state()
            .active.as_ref()
            .map(|cache| cache.conversation().clone())
    }

    /// Makes `target` the open conversation and loads its newest page. Responses still in
    /// flight for the previously open conversation are discarded when they arrive.
    pub async fn open_conversation(&self, target: &Target) -> Result<usize> {
        let conversation = self.conversation_for(target)?;
        let generation = {
            let mut state = self.state();
            let current = state.active
                .as_ref()
                .filter(|cache| cache.conversation() == &conversation)
                .map(ConversationCache::generation);
            match current {
                Some(generation) => generation,
                None => {
                    state.generation += 1;
                    let generation = state.generation;
                    state.active = Some(ConversationCache::new(conversation.clone(), generation));
                    generation
                }
            }
        };
        self.emit(Invalidation::Conversation(conversation.clone()));
        self.fetch_latest(&conversation, generation).await
    }

    async fn fetch_latest(&self, conversation: &ConversationRef, generation: u64) -> Result<usize> {
        let ticket = {
            let mut state = self.state();
            let ticket = match state.active.as_mut() {
                Some(cache) if cache.generation() == generation => cache.request_latest(),
                _ => {
                    return Ok(0);
                }
            };
            ticket
        };

        let page = page_of(self.store.as_ref(), conversation, None, self.page_size).await?;
        let fetched = page.messages.len();
        {
            let mut state = self.state();
            let applied = match state.active.as_mut() {
                Some(cache) if cache.generation() == generation => cache.apply_fetched(ticket, page),
                _ => false,
            };
            if !applied {
                debug!("Discarding stale page for {} (ticket {})", conversation.key(), ticket);
                return Ok(0);
            }
        }
        self.emit(Invalidation::Conversation(conversation.clone()));
        Ok(fetched)
    }

    /// Refetches the newest page of the open conversation.
    pub async fn refresh(&self) -> Result<()> {
        let active = self.state()
            .active.as_ref()
            .map(|cache| (cache.conversation().clone(), cache.generation()));
        if let Some((conversation, generation)) = active {
            self.fetch_latest(&conversation, generation).await?;
        }
        Ok(())
    }

    async fn refresh_if_open(&self, conversation: &ConversationRef) -> Result<()> {
        let generation = match self.state().active.as_ref() {
            Some(cache) if cache.conversation() == conversation => cache.generation(),
            _ => {
                return Ok(());
            }
        };
        self.fetch_latest(conversation, generation).await.map(|_| ())
    }

    /// Fetches the page before the oldest cached one. Opens the conversation first when it
    /// is not the one on screen.
    pub async fn load_more(&self, target: &Target) -> Result<LoadMore> {
        let conversation = self.conversation_for(target)?;
        let position = {
            let state = self.state();
            match state.active.as_ref() {
                Some(cache) if cache.conversation() == &conversation && cache.is_loaded() =>
                    Some((cache.generation(), cache.next_cursor().cloned())),
                _ => None,
            }
        };

        let (generation, cursor) = match position {
            None => {
                return self.open_conversation(target).await.map(LoadMore::Loaded);
            }
            Some((_, None)) => {
                return Ok(LoadMore::Exhausted);
            }
            Some((generation, Some(cursor))) => (generation, cursor),
        };

        let page = page_of(self.store.as_ref(), &conversation, Some(&cursor), self.page_size).await?;
        let added = {
            let mut state = self.state();
            match state.active.as_mut() {
                Some(cache) if cache.generation() == generation => cache.apply_older(page),
                _ => {
                    debug!("Discarding stale older page for {}", conversation.key());
                    return Ok(LoadMore::Loaded(0));
                }
            }
        };
        self.emit(Invalidation::Conversation(conversation));
        Ok(LoadMore::Loaded(added))
    }

    /// Cached history of `target` including optimistic entries; empty unless it is open.
    pub fn get_cached_messages(&self, target: &Target) -> Vec<Message> {
        let Ok(conversation) = self.conversation_for(target) else {
            return Vec::new();
        };
        match self.state().active.as_ref() {
            Some(cache) if cache.conversation() == &conversation => cache.messages(),
            _ => Vec::new(),
        }
    }

    pub fn has_more(&self, target: &Target) -> bool {
        let Ok(conversation) = self.conversation_for(target) else {
            return false;
        };
        match self.state().active.as_ref() {
            Some(cache) if cache.conversation() == &conversation => !cache.is_exhausted(),
            _ => false,
        }
    }

    /// Optimistic phase of a send. Runs without suspending: validates, shows the entry in
    /// the open conversation and takes this send's place in the conversation's commit order.
    pub fn begin_send(&self, target: &Target, content: &str) -> Result<PendingSend> {
        validate_content(content)?;
        let conversation = self.conversation_for(target)?;
        let message_target = conversation
            .message_target(&self.viewer.id)
            .ok_or_else(|| MessagingError::NotAParticipant(self.viewer.id.clone()))?;
        let message = Message::optimistic(self.viewer.clone(), message_target, content);
        let temporary_id = message.id.clone();

        let (done, next) = oneshot::channel();
        let (snapshot, previous) = {
            let mut state = self.state();
            let snapshot = match state.active.as_mut() {
                Some(cache) if cache.conversation() == &conversation =>
                    Some((cache.generation(), cache.append_optimistic(message))),
                _ => None,
            };
            release_lanes(&mut state);
            let previous = state.lanes.insert(conversation.clone(), next);
            (snapshot, previous)
        };

        if snapshot.is_some() {
            self.emit(Invalidation::Conversation(conversation.clone()));
        }
        Ok(PendingSend {
            conversation,
            temporary_id,
            content: content.to_string(),
            snapshot,
            previous,
            done,
        })
    }

    /// Commit and reconciliation phases. Waits for earlier sends to the same conversation,
    /// then appends to the store. On failure the optimistic entry is rolled back and the
    /// error returned; there is no retry.
    pub async fn commit(&self, pending: PendingSend) -> Result<Message> {
        let PendingSend { conversation, temporary_id, content, snapshot, previous, done } = pending;
        if let Some(previous) = previous {
            // An error only means the earlier send was dropped uncommitted.
            let _ = previous.await;
        }

        let result = append_to(self.store.as_ref(), &self.viewer.id, &conversation, &content).await;
        let _ = done.send(());
        release_lanes(&mut self.state());

        match result {
            Ok(stored) => {
                {
                    let mut state = self.state();
                    if let Some(cache) = state.active.as_mut() {
                        if cache.conversation() == &conversation {
                            cache.confirm(&temporary_id, &stored);
                        }
                    }
                }
                self.reconcile(&conversation).await;
                Ok(stored)
            }
            Err(err) => {
                if let Some((generation, snapshot)) = snapshot {
                    let mut state = self.state();
                    if let Some(cache) = state.active.as_mut() {
                        if cache.generation() == generation {
                            cache.rollback(snapshot, &temporary_id);
                        }
                    }
                }
                warn!("Send {} to {} failed and was rolled back: {}", temporary_id, conversation.key(), err);
                self.emit(Invalidation::Conversation(conversation));
                Err(err)
            }
        }
    }

    /// Withdraws a send that will not be committed.
    pub fn abandon(&self, pending: PendingSend) {
        let PendingSend { conversation, temporary_id, snapshot, done, .. } = pending;
        drop(done);
        let mut state = self.state();
        if let Some((generation, snapshot)) = snapshot {
            if let Some(cache) = state.active.as_mut() {
                if cache.generation() == generation {
                    cache.rollback(snapshot, &temporary_id);
                }
            }
        }
        release_lanes(&mut state);
        drop(state);
        self.emit(Invalidation::Conversation(conversation));
    }

    pub async fn send_message(&self, target: &Target, content: &str) -> Result<Message> {
        let pending = self.begin_send(target, content)?;
        self.commit(pending).await
    }

    /// Refetches after a successful send. The send itself already succeeded, so failures
    /// here are only logged; the next push event or resync catches up.
    async fn reconcile(&self, conversation: &ConversationRef) {
        if let Err(err) = self.refresh_if_open(conversation).await {
            warn!("Refetch of {} after send failed: {}", conversation.key(), err);
        }
        if let Err(err) = self.refresh_conversation_list().await {
            warn!("Conversation list refresh after send failed: {}", err);
        }
    }

    pub async fn mark_read(&self, target: &Target) -> Result<()> {
        let conversation = self.conversation_for(target)?;
        self.store.mark_read(&conversation, &self.viewer.id).await?;
        self.refresh_if_open(&conversation).await?;
        self.refresh_conversation_list().await
    }

    pub fn conversation_list(&self) -> Vec<ConversationSummary> {
        self.conversations.list()
    }

    pub fn unread_total(&self) -> usize {
        self.conversations.unread_total()
    }

    pub async fn refresh_conversation_list(&self) -> Result<()> {
        if self.conversations.refresh().await? {
            self.emit(Invalidation::ConversationList);
        }
        Ok(())
    }

    /// Reacts to one push event: refetch the conversation if it is open, then the list.
    pub async fn process_event(&self, event: &PushEvent) {
        let conversation = event.conversation();
        debug!("Push event for {} received by {}", conversation.key(), self.viewer.id);
        if let Err(err) = self.refresh_if_open(&conversation).await {
            warn!("Refetch of {} after push event failed: {}", conversation.key(), err);
        }
        if let Err(err) = self.refresh_conversation_list().await {
            warn!("Conversation list refresh after push event failed: {}", err);
        }
    }

    /// Schedules `process_event` without blocking the caller.
    pub fn handle_push_event(self: &Arc<Self>, event: PushEvent) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move { client.process_event(&event).await })
    }

    /// Full refetch of everything cached, for when push events may have been missed.
    pub async fn resync(&self) -> Result<()> {
        info!("Resynchronising messaging state for {}", self.viewer.id);
        self.refresh().await?;
        self.refresh_conversation_list().await?;
        self.emit(Invalidation::All);
        Ok(())
    }

    pub fn invalidations(&self) -> BroadcastStream<Invalidation> {
        BroadcastStream::new(self.invalidations.subscribe())
    }

    /// Calls `callback` for every invalidation until the client is dropped.
    pub fn subscribe_to_invalidation<F>(&self, callback: F) -> JoinHandle<()>
        where F: Fn(Invalidation) + Send + 'static
    {
        let mut stream = self.invalidations();
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(invalidation) => callback(invalidation),
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        warn!("Invalidation subscriber lagged behind by {} notifications", missed);
                        callback(Invalidation::All);
                    }
                }
            }
        })
    }
}

/// Forgets lanes whose last send has finished or was dropped; a later send to that
/// conversation then has nothing to wait for.
fn release_lanes(state: &mut ClientState) {
    state.lanes.retain(|_, last| matches!(last.try_recv(), Err(oneshot::error::TryRecvError::Empty)));
}
