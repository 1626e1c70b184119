use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::agent::{ChatOrchestrator, TurnOutcome};
use crate::config::Config;
use crate::error::ChatError;
use crate::events::StoreEvent;
use crate::llm::{ChatBackend, LlmClient};
use crate::persistence::ThreadPersistence;
use crate::storage::{FileStore, KeyValueStore, MemoryStore};
use crate::store::ConversationStore;
use crate::thread::{Thread, ThreadId};

/// Public surface of the chat core: the observable store plus the four user actions.
pub struct ChatSession {
    store: ConversationStore,
    orchestrator: ChatOrchestrator,
}

impl ChatSession {
    pub fn new(store: ConversationStore, orchestrator: ChatOrchestrator) -> Self {
        Self {
            store,
            orchestrator,
        }
    }

    /// Build a session from configuration: file-backed threads (or in-memory when
    /// `ephemeral`) and the configured model provider
    pub fn open(config: &Config, ephemeral: bool) -> Result<Self> {
        let backend: Arc<dyn KeyValueStore> = if ephemeral {
            Arc::new(MemoryStore::new())
        } else {
            let files = FileStore::new(&config.data_dir);
            files
                .ensure_directories()
                .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;
            Arc::new(files)
        };

        let client = LlmClient::new(config.clone())?;
        Ok(Self::with_backends(config, backend, Arc::new(client)))
    }

    pub fn with_backends(
        config: &Config,
        storage: Arc<dyn KeyValueStore>,
        model: Arc<dyn ChatBackend>,
    ) -> Self {
        let store = ConversationStore::with_persistence(ThreadPersistence::new(storage));
        let orchestrator = ChatOrchestrator::from_config(model, config);
        info!(
            provider = %config.provider,
            model = config.model(),
            threads = store.threads().len(),
            "chat session opened"
        );
        Self::new(store, orchestrator)
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn threads(&self) -> &[Thread] {
        self.store.threads()
    }

    pub fn active_thread_id(&self) -> Option<&ThreadId> {
        self.store.active_thread_id()
    }

    pub fn active_thread(&self) -> Option<&Thread> {
        self.store.active_thread()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    pub fn create_thread(&mut self) -> ThreadId {
        self.store.create_thread()
    }

    pub fn select_thread(&mut self, id: &ThreadId) {
        self.store.select_thread(id);
    }

    pub fn delete_thread(&mut self, id: &ThreadId) {
        self.store.delete_thread(id);
    }

    /// Resolve a full id or unique prefix
    pub fn resolve_id(&self, query: &str) -> Result<ThreadId, ChatError> {
        self.store.resolve_id(query)
    }

    /// Submit a message to the active thread and wait for the full reply
    pub async fn submit_message(&mut self, text: &str) -> Result<TurnOutcome, ChatError> {
        self.orchestrator.submit_message(&mut self.store, text).await
    }

    /// Submit without waiting; fragments are applied by [`poll_turns`](Self::poll_turns)
    pub async fn begin_submit(&mut self, text: &str) -> Result<ThreadId, ChatError> {
        self.orchestrator.begin_turn(&mut self.store, text).await
    }

    /// Wait for the next fragment of the reply streaming into `thread_id`; the outcome
    /// once that reply has finished
    pub async fn next_update(
        &mut self,
        thread_id: &ThreadId,
    ) -> Result<Option<TurnOutcome>, ChatError> {
        self.orchestrator.next_update(&mut self.store, thread_id).await
    }

    /// Apply buffered fragments of in-flight turns; returns the turns that finished
    pub fn poll_turns(&mut self) -> Vec<TurnOutcome> {
        self.orchestrator.poll_turns(&mut self.store)
    }

    pub fn is_streaming(&self, thread_id: &ThreadId) -> bool {
        self.orchestrator.is_streaming(thread_id)
    }

    pub fn has_active_turns(&self) -> bool {
        self.orchestrator.has_active_turns()
    }

    /// Move the selection `offset` places through the thread list, wrapping around
    pub fn select_relative(&mut self, offset: isize) {
        let threads = self.store.threads();
        if threads.is_empty() {
            return;
        }

        let len = threads.len() as isize;
        let current = self
            .store
            .active_thread_id()
            .and_then(|id| threads.iter().position(|t| &t.id == id))
            .map(|i| i as isize);
        let next = match current {
            Some(i) => (i + offset).rem_euclid(len),
            None if offset < 0 => len - 1,
            None => 0,
        };

        let id = threads[next as usize].id.clone();
        self.store.select_thread(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmEvent, LlmRequest};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct EchoBackend;

    #[async_trait]
    impl ChatBackend for EchoBackend {
        async fn stream_chat(
            &self,
            request: LlmRequest,
        ) -> crate::error::Result<mpsc::Receiver<LlmEvent>> {
            let (tx, rx) = mpsc::channel(4);
            tx.try_send(LlmEvent::TextDelta(format!("echo: {}", request.prompt)))
                .unwrap();
            tx.try_send(LlmEvent::StreamComplete).unwrap();
            Ok(rx)
        }
    }

    fn session() -> ChatSession {
        ChatSession::with_backends(
            &Config::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(EchoBackend),
        )
    }

    #[tokio::test]
    async fn submit_goes_to_active_thread() {
        let mut session = session();
        let id = session.create_thread();
        let outcome = session.submit_message("ping").await.unwrap();

        assert_eq!(outcome.thread_id, id);
        assert_eq!(outcome.content, "echo: ping");
        assert_eq!(session.active_thread().unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn submit_after_deleting_active_starts_new_thread() {
        let mut session = session();
        let first = session.create_thread();
        session.delete_thread(&first);

        let outcome = session.submit_message("hello").await.unwrap();
        assert_ne!(outcome.thread_id, first);
        assert_eq!(session.threads().len(), 1);
    }

    #[test]
    fn select_relative_wraps() {
        let mut session = session();
        let oldest = session.create_thread();
        let middle = session.create_thread();
        let newest = session.create_thread();

        session.select_relative(1);
        assert_eq!(session.active_thread_id(), Some(&middle));
        session.select_relative(1);
        assert_eq!(session.active_thread_id(), Some(&oldest));
        session.select_relative(1);
        assert_eq!(session.active_thread_id(), Some(&newest));
        session.select_relative(-1);
        assert_eq!(session.active_thread_id(), Some(&oldest));
    }
}
