//! Client-side cache slot for the open conversation.
//!
//! A slot holds two layers: the confirmed history accumulated from store pages (oldest
//! first) and the optimistic overlay of sends the store has not confirmed yet. Refetches
//! only ever replace the confirmed layer, so an in-flight send is never dropped by one.

use crate::models::{ ConversationRef, Cursor, Message, MessageId, Page };

#[derive(Clone, Debug, PartialEq)]
struct PendingEntry {
    message: Message,
    /// Store id once the send has been committed; the entry is dropped when a refetch
    /// brings that id into the confirmed layer.
    confirmed_as: Option<MessageId>,
}

/// Exact copy of a slot, taken right before an optimistic append.
#[derive(Clone, Debug)]
pub struct SlotSnapshot {
    revision: u64,
    confirmed: Vec<Message>,
    next_cursor: Option<Cursor>,
    loaded: bool,
    pending: Vec<PendingEntry>,
}

#[derive(Debug)]
pub struct ConversationCache {
    conversation: ConversationRef,
    generation: u64,
    confirmed: Vec<Message>,
    next_cursor: Option<Cursor>,
    loaded: bool,
    pending: Vec<PendingEntry>,
    revision: u64,
    /// Newest-page fetch tickets: handed out and last merged.
    requested: u64,
    applied: u64,
}

impl ConversationCache {
    pub fn new(conversation: ConversationRef, generation: u64) -> Self {
        Self {
            conversation,
            generation,
            confirmed: Vec::new(),
            next_cursor: None,
            loaded: false,
            pending: Vec::new(),
            revision: 0,
            requested: 0,
            applied: 0,
        }
    }

    pub fn conversation(&self) -> &ConversationRef {
        &self.conversation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn next_cursor(&self) -> Option<&Cursor> {
        self.next_cursor.as_ref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.loaded && self.next_cursor.is_none()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Confirmed history followed by the optimistic overlay.
    pub fn messages(&self) -> Vec<Message> {
        self.confirmed
            .iter()
            .cloned()
            .chain(self.pending.iter().map(|entry| entry.message.clone()))
            .collect()
    }

    /// Confirmed history only, which is what every client converges on.
    pub fn confirmed_messages(&self) -> &[Message] {
        &self.confirmed
    }

    fn snapshot(&self) -> SlotSnapshot {
        SlotSnapshot {
            revision: self.revision,
            confirmed: self.confirmed.clone(),
            next_cursor: self.next_cursor.clone(),
            loaded: self.loaded,
            pending: self.pending.clone(),
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    pub fn append_optimistic(&mut self, message: Message) -> SlotSnapshot {
        let snapshot = self.snapshot();
        self.pending.push(PendingEntry { message, confirmed_as: None });
        self.touch();
        snapshot
    }

    /// Undoes a failed send. When nothing else touched the slot since the append, the
    /// snapshot is restored verbatim; otherwise only that send's entry is removed so later
    /// sends and refetched pages survive.
    pub fn rollback(&mut self, snapshot: SlotSnapshot, temporary_id: &MessageId) {
        if self.revision == snapshot.revision + 1 {
            self.confirmed = snapshot.confirmed;
            self.next_cursor = snapshot.next_cursor;
            self.loaded = snapshot.loaded;
            self.pending = snapshot.pending;
        } else {
            self.pending.retain(|entry| &entry.message.id != temporary_id);
        }
        self.touch();
    }

    /// Records the store's version of an optimistic entry. The entry keeps its place until
    /// the next refetch brings in the stored message.
    pub fn confirm(&mut self, temporary_id: &MessageId, stored: &Message) {
        if let Some(entry) = self.pending.iter_mut().find(|e| &e.message.id == temporary_id) {
            entry.message.created_at = stored.created_at;
            entry.confirmed_as = Some(stored.id.clone());
        }
        self.prune_pending();
        self.touch();
    }

    /// Ticket for a newest-page fetch about to be sent.
    pub fn request_latest(&mut self) -> u64 {
        self.requested += 1;
        self.requested
    }

    /// Merges the response to `ticket` unless a later fetch already landed. Returns whether
    /// the page was applied.
    pub fn apply_fetched(&mut self, ticket: u64, page: Page) -> bool {
        if ticket < self.applied {
            return false;
        }
        self.applied = ticket;
        self.apply_latest(page);
        true
    }

    /// Merges a fresh newest page. History older than the page is kept when the page
    /// overlaps what is cached; a page with no overlap replaces the cache and its cursor.
    pub fn apply_latest(&mut self, page: Page) {
        let overlap = page.messages
            .first()
            .and_then(|first| self.confirmed.iter().position(|m| m.id == first.id));

        match overlap {
            _ if !self.loaded || self.confirmed.is_empty() => {
                self.next_cursor = page.next_cursor;
                self.confirmed = page.messages;
            }
            Some(index) => {
                self.confirmed.truncate(index);
                self.confirmed.extend(page.messages);
            }
            None if page.messages.is_empty() => {}
            None => {
                self.next_cursor = page.next_cursor;
                self.confirmed = page.messages;
            }
        }
        self.loaded = true;
        self.prune_pending();
        self.touch();
    }

    /// Prepends an older page fetched with the current cursor.
    pub fn apply_older(&mut self, page: Page) -> usize {
        let older: Vec<Message> = page.messages
            .into_iter()
            .filter(|m| !self.confirmed.iter().any(|c| c.id == m.id))
            .collect();
        let added = older.len();
        self.confirmed.splice(0..0, older);
        self.next_cursor = page.next_cursor;
        self.prune_pending();
        self.touch();
        added
    }

    fn prune_pending(&mut self) {
        let confirmed = &self.confirmed;
        self.pending.retain(|entry| {
            match &entry.confirmed_as {
                Some(id) => !confirmed.iter().any(|m| &m.id == id),
                None => true,
            }
        });
    }
}
