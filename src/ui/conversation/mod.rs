//! Conversation UI components for chat interface

pub mod commands;
pub mod composer;
pub mod history;
pub mod manager;
pub mod sidebar;
pub mod streaming;

pub use commands::{get_help_text, parse_slash_command, ParsedCommand, SlashCommand};
pub use composer::{ComposerResult, ConversationComposer};
pub use history::{ConversationHistory, SUGGESTIONS};
pub use manager::{ConversationAction, ConversationManager};
pub use sidebar::{ThreadList, SIDEBAR_WIDTH};
pub use streaming::FRAME_MS;
