use std::str::FromStr;

use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Commands that can be invoked by starting a message with a leading slash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    /// Start a new chat
    New,
    /// Open a chat by its position in the sidebar
    Open,
    /// Put a suggested prompt from the welcome screen into the composer
    Try,
    /// Delete the current chat
    Delete,
    /// Show help
    Help,
    /// Exit the application
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: SlashCommand,
    pub argument: Option<String>,
}

impl ParsedCommand {
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }

    /// Zero-based position for `/open <n>` and `/try <n>` (users count from 1)
    pub fn index(&self) -> Option<usize> {
        if !matches!(self.command, SlashCommand::Open | SlashCommand::Try) {
            return None;
        }

        let n: usize = self.argument()?.trim().parse().ok()?;
        n.checked_sub(1)
    }
}

impl SlashCommand {
    /// User-visible description shown in help.
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::New => "start a new chat",
            SlashCommand::Open => "open chat <n> from the sidebar",
            SlashCommand::Try => "fill in suggestion <n> from the welcome screen",
            SlashCommand::Delete => "delete the current chat",
            SlashCommand::Help => "show available commands",
            SlashCommand::Quit => "exit the application",
        }
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }
}

/// Parse a slash command from user input
pub fn parse_slash_command(input: &str) -> Option<ParsedCommand> {
    let rest = input.trim().strip_prefix('/')?;

    let mut parts = rest.split_whitespace();
    let head = parts.next()?;
    let tail: Vec<&str> = parts.collect();

    let command = SlashCommand::from_str(head).ok().or_else(|| match head.to_lowercase().as_str() {
        "q" | "bye" | "exit" => Some(SlashCommand::Quit),
        "n" | "clear" => Some(SlashCommand::New),
        "o" | "select" => Some(SlashCommand::Open),
        "rm" | "del" => Some(SlashCommand::Delete),
        "h" | "?" => Some(SlashCommand::Help),
        _ => None,
    })?;

    let argument = if tail.is_empty() {
        None
    } else {
        Some(tail.join(" "))
    };

    Some(ParsedCommand { command, argument })
}

/// Get help text for all available commands
pub fn get_help_text() -> String {
    let mut help = String::from("Available commands:\n");
    for command in SlashCommand::iter() {
        help.push_str(&format!("/{} - {}\n", command.command(), command.description()));
    }

    help.push_str("\nKeys: Enter send, Alt+Enter newline, Ctrl+N new chat, Ctrl+Up/Down switch chat,");
    help.push_str("\nCtrl+D delete chat, Ctrl+B toggle sidebar, PageUp/PageDown scroll, Esc quit");

    help
}
