use thiserror::Error;

use crate::thread::{MessageId, ThreadId};

/// Errors surfaced by the conversation core.
///
/// None of these are fatal: callers either report them or degrade to a visible,
/// recoverable state.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("thread {0} not found")]
    ThreadNotFound(ThreadId),

    #[error("message {message} not found in thread {thread}")]
    MessageNotFound { thread: ThreadId, message: MessageId },

    #[error("persisted thread data is malformed: {0}")]
    MalformedPersistedState(#[source] serde_json::Error),

    #[error("stream failed: {0}")]
    StreamFailure(String),

    #[error("a reply is still streaming into thread {0}")]
    TurnInProgress(ThreadId),

    #[error("message is empty")]
    EmptyMessage,

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("invalid storage key {0:?}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ChatError {
    /// Whether this error means a referenced thread or message does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ChatError::ThreadNotFound(_) | ChatError::MessageNotFound { .. }
        )
    }
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;
