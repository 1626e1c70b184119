//! Conversation data model: threads and the messages they own.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Label shown for a thread whose title has not been derived yet
pub const DEFAULT_TITLE: &str = "New Chat";

/// Maximum number of characters kept from the first user message when deriving a title
pub const TITLE_MAX_CHARS: usize = 40;

const TITLE_ELLIPSIS: &str = "...";

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random identifier
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// First eight characters, for compact display
            pub fn short(&self) -> &str {
                let end = self.0.char_indices().nth(8).map_or(self.0.len(), |(i, _)| i);
                &self.0[..end]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

opaque_id!(
    /// Identifier of a conversation thread
    ThreadId
);
opaque_id!(
    /// Identifier of a single message
    MessageId
);

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message inside a thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    /// An assistant message with no content yet; the UI renders it as "thinking"
    pub fn assistant_placeholder() -> Self {
        Self::new(Role::Assistant, String::new())
    }

    fn new(role: Role, content: String) -> Self {
        Self {
            id: MessageId::generate(),
            role,
            content,
            timestamp: now(),
        }
    }

    /// Whether this is an assistant message still waiting for its first fragment
    pub fn is_pending(&self) -> bool {
        self.role == Role::Assistant && self.content.is_empty()
    }
}

/// One persisted conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: ThreadId,
    /// Empty until the first user message is submitted
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    pub fn new() -> Self {
        Self {
            id: ThreadId::generate(),
            title: String::new(),
            messages: Vec::new(),
            updated_at: now(),
        }
    }

    /// Title to present, falling back to the default label for untitled threads
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            DEFAULT_TITLE
        } else {
            &self.title
        }
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn message_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn touch(&mut self) {
        self.updated_at = now();
    }
}

impl Default for Thread {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive a thread title from the first user message.
///
/// Whitespace runs collapse to single spaces; text longer than [`TITLE_MAX_CHARS`]
/// is cut at a character boundary and marked with an ellipsis.
pub fn derive_title(text: &str) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.chars().count() <= TITLE_MAX_CHARS {
        return normalized;
    }

    let mut title: String = normalized.chars().take(TITLE_MAX_CHARS).collect();
    title.push_str(TITLE_ELLIPSIS);
    title
}

/// Current time at millisecond precision, matching the persisted format
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}
