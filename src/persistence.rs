//! Mirrors the full thread list into a durable key-value store.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{ChatError, Result};
use crate::storage::KeyValueStore;
use crate::thread::Thread;

/// Key under which the whole thread list is stored
pub const THREADS_KEY: &str = "lumina_threads";

/// Reads and writes the thread list as a single JSON document
#[derive(Clone)]
pub struct ThreadPersistence {
    backend: Arc<dyn KeyValueStore>,
    key: String,
}

impl ThreadPersistence {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            key: THREADS_KEY.to_string(),
        }
    }

    /// Load the stored threads.
    ///
    /// A missing document, an unreadable backend or malformed content all yield an
    /// empty list; the last two are logged.
    pub fn load(&self) -> Vec<Thread> {
        match self.try_load() {
            Ok(threads) => threads,
            Err(e) => {
                warn!(key = %self.key, error = %e, "discarding persisted threads");
                Vec::new()
            }
        }
    }

    /// Like [`load`](Self::load) but reports why nothing could be restored
    pub fn try_load(&self) -> Result<Vec<Thread>> {
        let Some(content) = self.backend.get(&self.key)? else {
            debug!(key = %self.key, "no persisted threads");
            return Ok(Vec::new());
        };

        let threads: Vec<Thread> =
            serde_json::from_str(&content).map_err(ChatError::MalformedPersistedState)?;
        debug!(count = threads.len(), "loaded persisted threads");
        Ok(threads)
    }

    /// Overwrite the stored document with `threads`
    pub fn save(&self, threads: &[Thread]) -> Result<()> {
        let content = serde_json::to_string(threads).map_err(|e| {
            // Serializing owned strings and timestamps cannot fail in practice.
            ChatError::Storage(std::io::Error::other(e))
        })?;
        self.backend.set(&self.key, &content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::thread::Message;

    fn persistence() -> (MemoryStore, ThreadPersistence) {
        let backend = MemoryStore::new();
        let persistence = ThreadPersistence::new(Arc::new(backend.clone()));
        (backend, persistence)
    }

    #[test]
    fn missing_key_loads_empty() {
        let (_, persistence) = persistence();
        assert!(persistence.load().is_empty());
    }

    #[test]
    fn malformed_content_loads_empty() {
        let (backend, persistence) = persistence();
        backend.set(THREADS_KEY, "{not json").unwrap();

        assert!(persistence.load().is_empty());
        assert!(matches!(
            persistence.try_load(),
            Err(ChatError::MalformedPersistedState(_))
        ));
    }

    #[test]
    fn wrong_shape_is_malformed() {
        let (backend, persistence) = persistence();
        backend.set(THREADS_KEY, r#"{"threads": []}"#).unwrap();
        assert!(persistence.load().is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_, persistence) = persistence();
        let mut thread = Thread::new();
        thread.title = "Hello".to_string();
        thread.messages.push(Message::user("Hello"));
        let mut reply = Message::assistant_placeholder();
        reply.content = "Hi there!".to_string();
        thread.messages.push(reply);
        let threads = vec![thread, Thread::new()];

        persistence.save(&threads).unwrap();
        assert_eq!(persistence.load(), threads);
    }
}
