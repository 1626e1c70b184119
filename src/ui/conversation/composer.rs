use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

use super::commands::{parse_slash_command, ParsedCommand};

const MAX_VISIBLE_LINES: u16 = 5;

/// What a key press in the composer produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposerResult {
    None,
    Submitted(String),
    Command(ParsedCommand),
}

/// Multi-line message input
#[derive(Debug, Clone, Default)]
pub struct ConversationComposer {
    content: String,
    /// Byte offset, always on a char boundary
    cursor: usize,
    busy: bool,
}

impl ConversationComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle key input
    pub fn handle_key(&mut self, key: KeyEvent) -> ComposerResult {
        match key.code {
            KeyCode::Enter if key.modifiers.intersects(KeyModifiers::ALT | KeyModifiers::SHIFT) => {
                self.insert_char('\n');
            }
            KeyCode::Enter => return self.submit(),
            KeyCode::Char(c) => self.insert_char(c),
            KeyCode::Backspace => {
                if let Some(prev) = self.prev_boundary() {
                    self.content.replace_range(prev..self.cursor, "");
                    self.cursor = prev;
                }
            }
            KeyCode::Delete => {
                if let Some(next) = self.next_boundary() {
                    self.content.replace_range(self.cursor..next, "");
                }
            }
            KeyCode::Left => {
                if let Some(prev) = self.prev_boundary() {
                    self.cursor = prev;
                }
            }
            KeyCode::Right => {
                if let Some(next) = self.next_boundary() {
                    self.cursor = next;
                }
            }
            KeyCode::Home => self.cursor = 0,
            KeyCode::End => self.cursor = self.content.len(),
            _ => {}
        }

        ComposerResult::None
    }

    fn submit(&mut self) -> ComposerResult {
        if self.content.trim().is_empty() {
            return ComposerResult::None;
        }

        let content = std::mem::take(&mut self.content);
        self.cursor = 0;
        match parse_slash_command(&content) {
            Some(command) => ComposerResult::Command(command),
            None => ComposerResult::Submitted(content.trim().to_string()),
        }
    }

    /// Insert a character at the cursor position
    fn insert_char(&mut self, c: char) {
        self.content.insert(self.cursor, c);
        self.cursor += c.len_utf8();
    }

    fn prev_boundary(&self) -> Option<usize> {
        self.content[..self.cursor].char_indices().next_back().map(|(i, _)| i)
    }

    fn next_boundary(&self) -> Option<usize> {
        self.content[self.cursor..]
            .chars()
            .next()
            .map(|c| self.cursor + c.len_utf8())
    }

    /// Restore text that could not be sent
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.cursor = self.content.len();
    }

    /// Mark that a reply is streaming into the current chat
    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Rows needed to render, borders included
    pub fn height(&self) -> u16 {
        let lines = self.content.split('\n').count() as u16;
        lines.clamp(1, MAX_VISIBLE_LINES) + 2
    }
}

impl Widget for &ConversationComposer {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let title = if self.busy {
            " Lumina is replying... "
        } else {
            " Message Lumina (Enter to send, /help for commands) "
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .title(title)
            .style(Style::default().fg(if self.busy { Color::Gray } else { Color::Green }));

        let inner_area = block.inner(area);
        block.render(area, buf);

        if self.content.is_empty() {
            let placeholder_line = Line::from(vec![Span::styled(
                "Ask anything...",
                Style::default().fg(Color::DarkGray),
            )]);
            buf.set_line(inner_area.x, inner_area.y, &placeholder_line, inner_area.width);
            return;
        }

        // Render content with cursor indicator
        let mut content = self.content.clone();
        content.insert(self.cursor, '▌');

        let lines: Vec<&str> = content.split('\n').collect();
        let visible = inner_area.height as usize;
        let start = lines.len().saturating_sub(visible);
        for (i, line_text) in lines[start..].iter().enumerate() {
            let line = Line::from(vec![Span::styled(
                *line_text,
                Style::default().fg(Color::White),
            )]);
            buf.set_line(inner_area.x, inner_area.y + i as u16, &line, inner_area.width);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::conversation::commands::SlashCommand;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_text(composer: &mut ConversationComposer, text: &str) {
        for c in text.chars() {
            composer.handle_key(key(KeyCode::Char(c)));
        }
    }

    #[test]
    fn enter_submits_trimmed_text_and_clears() {
        let mut composer = ConversationComposer::new();
        type_text(&mut composer, "  hello ");
        assert_eq!(
            composer.handle_key(key(KeyCode::Enter)),
            ComposerResult::Submitted("hello".to_string())
        );
        assert!(composer.content().is_empty());
    }

    #[test]
    fn blank_input_is_not_submitted() {
        let mut composer = ConversationComposer::new();
        type_text(&mut composer, "   ");
        assert_eq!(composer.handle_key(key(KeyCode::Enter)), ComposerResult::None);
        assert_eq!(composer.content(), "   ");
    }

    #[test]
    fn alt_enter_inserts_newline() {
        let mut composer = ConversationComposer::new();
        type_text(&mut composer, "a");
        composer.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::ALT));
        type_text(&mut composer, "b");
        assert_eq!(composer.content(), "a\nb");
        assert_eq!(composer.height(), 4);
    }

    #[test]
    fn editing_handles_multibyte_characters() {
        let mut composer = ConversationComposer::new();
        type_text(&mut composer, "héé");
        composer.handle_key(key(KeyCode::Left));
        composer.handle_key(key(KeyCode::Backspace));
        assert_eq!(composer.content(), "hé");
        composer.handle_key(key(KeyCode::Home));
        composer.handle_key(key(KeyCode::Delete));
        assert_eq!(composer.content(), "é");
    }

    #[test]
    fn slash_input_becomes_command() {
        let mut composer = ConversationComposer::new();
        type_text(&mut composer, "/open 3");
        match composer.handle_key(key(KeyCode::Enter)) {
            ComposerResult::Command(parsed) => {
                assert_eq!(parsed.command, SlashCommand::Open);
                assert_eq!(parsed.index(), Some(2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
