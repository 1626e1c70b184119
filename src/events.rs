use crate::thread::{MessageId, ThreadId};

/// Change notifications published by the conversation store after each mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A new, empty thread was inserted at the front
    ThreadCreated { thread_id: ThreadId },

    /// The active thread changed; `None` means nothing is selected
    SelectionChanged { thread_id: Option<ThreadId> },

    /// A thread was removed
    ThreadDeleted { thread_id: ThreadId },

    /// A user message and its assistant placeholder were appended
    TurnAppended {
        thread_id: ThreadId,
        user_message_id: MessageId,
        assistant_message_id: MessageId,
    },

    /// An assistant message's content was replaced
    ContentUpdated {
        thread_id: ThreadId,
        message_id: MessageId,
        content: String,
    },
}
