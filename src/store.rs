//! In-memory conversation store: the single source of truth the UI renders from.

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{ChatError, Result};
use crate::events::StoreEvent;
use crate::persistence::ThreadPersistence;
use crate::thread::{derive_title, Message, MessageId, Role, Thread, ThreadId};

const EVENT_CAPACITY: usize = 1024;

/// Ordered collection of threads (most recent first) plus the current selection.
///
/// Every mutation is applied synchronously, mirrored to persistence when one is
/// attached, and announced to subscribers as a [`StoreEvent`].
pub struct ConversationStore {
    threads: Vec<Thread>,
    active_thread_id: Option<ThreadId>,
    persistence: Option<ThreadPersistence>,
    events: broadcast::Sender<StoreEvent>,
}

impl ConversationStore {
    /// Empty store without persistence
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            threads: Vec::new(),
            active_thread_id: None,
            persistence: None,
            events,
        }
    }

    /// Store restored from `persistence`; the most recent thread becomes active
    pub fn with_persistence(persistence: ThreadPersistence) -> Self {
        let mut store = Self::new();
        store.threads = persistence.load();
        store.active_thread_id = store.threads.first().map(|t| t.id.clone());
        store.persistence = Some(persistence);
        info!(count = store.threads.len(), "conversation store ready");
        store
    }

    /// Receive a [`StoreEvent`] for every subsequent mutation
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub fn active_thread_id(&self) -> Option<&ThreadId> {
        self.active_thread_id.as_ref()
    }

    pub fn active_thread(&self) -> Option<&Thread> {
        self.active_thread_id.as_ref().and_then(|id| self.thread(id))
    }

    pub fn thread(&self, id: &ThreadId) -> Option<&Thread> {
        self.threads.iter().find(|t| &t.id == id)
    }

    /// Resolve a full id or an unambiguous id prefix
    pub fn resolve_id(&self, query: &str) -> Result<ThreadId> {
        if let Some(thread) = self.threads.iter().find(|t| t.id.as_str() == query) {
            return Ok(thread.id.clone());
        }

        let mut matches = self.threads.iter().filter(|t| t.id.as_str().starts_with(query));
        match (matches.next(), matches.next()) {
            (Some(thread), None) if !query.is_empty() => Ok(thread.id.clone()),
            _ => Err(ChatError::ThreadNotFound(ThreadId::from(query))),
        }
    }

    /// Insert a new empty thread at the front and make it active
    pub fn create_thread(&mut self) -> ThreadId {
        let thread = Thread::new();
        let thread_id = thread.id.clone();
        self.threads.insert(0, thread);
        self.active_thread_id = Some(thread_id.clone());

        info!(thread_id = %thread_id, "created thread");
        self.persist();
        self.publish(StoreEvent::ThreadCreated {
            thread_id: thread_id.clone(),
        });
        self.publish(StoreEvent::SelectionChanged {
            thread_id: Some(thread_id.clone()),
        });
        thread_id
    }

    /// Select `id`, or clear the selection when no such thread exists
    pub fn select_thread(&mut self, id: &ThreadId) {
        self.active_thread_id = self.thread(id).map(|t| t.id.clone());
        if self.active_thread_id.is_none() {
            debug!(thread_id = %id, "selected thread not found, selection cleared");
        }
        self.publish(StoreEvent::SelectionChanged {
            thread_id: self.active_thread_id.clone(),
        });
    }

    /// Remove `id` if present; clears the selection when it pointed there
    pub fn delete_thread(&mut self, id: &ThreadId) {
        let Some(index) = self.position(id) else {
            debug!(thread_id = %id, "delete of unknown thread ignored");
            return;
        };

        self.threads.remove(index);
        info!(thread_id = %id, "deleted thread");
        self.persist();
        self.publish(StoreEvent::ThreadDeleted {
            thread_id: id.clone(),
        });

        if self.active_thread_id.as_ref() == Some(id) {
            self.active_thread_id = None;
            self.publish(StoreEvent::SelectionChanged { thread_id: None });
        }
    }

    /// Append a user message and an empty assistant placeholder to a thread.
    ///
    /// The first turn also derives the thread title. The thread moves to the front.
    pub fn append_turn(
        &mut self,
        thread_id: &ThreadId,
        user_text: &str,
    ) -> Result<(MessageId, MessageId)> {
        let index = self
            .position(thread_id)
            .ok_or_else(|| ChatError::ThreadNotFound(thread_id.clone()))?;

        let mut thread = self.threads.remove(index);
        if thread.messages.is_empty() {
            thread.title = derive_title(user_text);
        }

        let user = Message::user(user_text);
        let assistant = Message::assistant_placeholder();
        let ids = (user.id.clone(), assistant.id.clone());
        thread.messages.push(user);
        thread.messages.push(assistant);
        thread.touch();
        self.threads.insert(0, thread);

        debug!(thread_id = %thread_id, "appended turn");
        self.persist();
        self.publish(StoreEvent::TurnAppended {
            thread_id: thread_id.clone(),
            user_message_id: ids.0.clone(),
            assistant_message_id: ids.1.clone(),
        });
        Ok(ids)
    }

    /// Replace the content of an assistant message in place
    pub fn update_assistant_content(
        &mut self,
        thread_id: &ThreadId,
        message_id: &MessageId,
        text: &str,
    ) -> Result<()> {
        let thread = self
            .threads
            .iter_mut()
            .find(|t| &t.id == thread_id)
            .ok_or_else(|| ChatError::ThreadNotFound(thread_id.clone()))?;

        let message = thread
            .message_mut(message_id)
            .filter(|m| m.role == Role::Assistant)
            .ok_or_else(|| ChatError::MessageNotFound {
                thread: thread_id.clone(),
                message: message_id.clone(),
            })?;

        message.content.clear();
        message.content.push_str(text);
        thread.touch();

        self.persist();
        self.publish(StoreEvent::ContentUpdated {
            thread_id: thread_id.clone(),
            message_id: message_id.clone(),
            content: text.to_string(),
        });
        Ok(())
    }

    fn position(&self, id: &ThreadId) -> Option<usize> {
        self.threads.iter().position(|t| &t.id == id)
    }

    fn persist(&self) {
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save(&self.threads) {
                warn!(error = %e, "failed to persist threads");
            }
        }
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}
