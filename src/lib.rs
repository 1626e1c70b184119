//! Lumina: a streaming chat client with persistent conversation threads.

pub mod agent;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod persistence;
pub mod session;
pub mod storage;
pub mod store;
pub mod streaming;
pub mod thread;
pub mod ui;

pub use agent::{ChatOrchestrator, TurnOutcome};
pub use config::{Config, ProviderKind};
pub use error::{ChatError, Result};
pub use events::StoreEvent;
pub use llm::{ChatBackend, LlmClient, LlmEvent, LlmRequest};
pub use persistence::ThreadPersistence;
pub use session::ChatSession;
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use store::ConversationStore;
pub use streaming::{TurnState, STREAM_ERROR_MESSAGE};
pub use thread::{Message, MessageId, Role, Thread, ThreadId};
