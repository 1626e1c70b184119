//! Conversation transcript for the active thread

use crate::thread::{Message, Role, Thread};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

use super::streaming::{cursor_span, thinking_line};

/// Renders the messages of one thread, newest at the bottom
pub struct ConversationHistory<'a> {
    thread: Option<&'a Thread>,
    streaming: bool,
    /// Lines scrolled up from the bottom
    scroll: u16,
    tick: u64,
}

impl<'a> ConversationHistory<'a> {
    pub fn new(thread: Option<&'a Thread>) -> Self {
        Self {
            thread,
            streaming: false,
            scroll: 0,
            tick: 0,
        }
    }

    /// Whether the last assistant message is still receiving fragments
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn scroll(mut self, scroll: u16) -> Self {
        self.scroll = scroll;
        self
    }

    pub fn tick(mut self, tick: u64) -> Self {
        self.tick = tick;
        self
    }

    /// All transcript lines for a given content width
    pub fn lines(&self, width: u16) -> Vec<Line<'a>> {
        let Some(thread) = self.thread.filter(|t| !t.messages.is_empty()) else {
            return welcome_lines();
        };

        let mut all_lines = Vec::new();
        let last_index = thread.messages.len() - 1;
        for (index, message) in thread.messages.iter().enumerate() {
            let live = self.streaming && index == last_index;
            all_lines.extend(self.render_message(message, width, live));
            // spacing between messages
            all_lines.push(Line::from(""));
        }
        all_lines
    }

    /// Render a single message into lines
    fn render_message(&self, message: &'a Message, width: u16, live: bool) -> Vec<Line<'a>> {
        let (label, label_style) = match message.role {
            Role::User => ("You", Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD)),
            Role::Assistant => (
                "Lumina",
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            ),
        };
        let timestamp = message
            .timestamp
            .with_timezone(&chrono::Local)
            .format("%H:%M")
            .to_string();

        let mut lines = vec![Line::from(vec![
            Span::styled(label, label_style),
            Span::styled(format!(" · {}", timestamp), Style::default().fg(Color::DarkGray)),
        ])];

        if message.is_pending() {
            lines.push(thinking_line(self.tick));
            return lines;
        }

        let content_style = match message.role {
            Role::User => Style::default().fg(Color::White),
            Role::Assistant => Style::default().fg(Color::Gray),
        };
        let wrapped = wrap_text(&message.content, width.saturating_sub(2) as usize);
        let count = wrapped.len();
        for (i, content_line) in wrapped.into_iter().enumerate() {
            let mut spans = vec![Span::raw("  "), Span::styled(content_line, content_style)];
            if live && i + 1 == count {
                spans.push(cursor_span(self.tick));
            }
            lines.push(Line::from(spans));
        }
        lines
    }
}

impl Widget for ConversationHistory<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let title = self
            .thread
            .map(|t| format!(" {} ", t.display_title()))
            .unwrap_or_else(|| " Lumina AI ".to_string());
        let block = Block::default().borders(Borders::ALL).title(title);

        let inner_area = block.inner(area);
        block.render(area, buf);

        let all_lines = self.lines(inner_area.width);

        // Determine the range of lines to display from the bottom
        let height = inner_area.height as usize;
        let total = all_lines.len();
        let max_scroll = total.saturating_sub(height);
        let scroll = (self.scroll as usize).min(max_scroll);
        let end = total - scroll;
        let start = end.saturating_sub(height);

        for (i, line) in all_lines[start..end].iter().enumerate() {
            buf.set_line(inner_area.x, inner_area.y + i as u16, line, inner_area.width);
        }
    }
}

/// Starter prompts offered on the welcome screen, picked with `/try <n>`
pub const SUGGESTIONS: [&str; 4] = [
    "Analyze a complex philosophical concept",
    "Write a clean, documented Python script",
    "Draft a professional cover letter",
    "Explain quantum entanglement simply",
];

fn welcome_lines() -> Vec<Line<'static>> {
    let mut lines = vec![
        Line::from(vec![Span::styled(
            "How can I help you today?",
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        )]),
        Line::from(""),
        Line::from(vec![Span::styled(
            "Sophisticated reasoning, deep insights, and clear answers.",
            Style::default().fg(Color::Gray),
        )]),
        Line::from(""),
    ];

    for (i, suggestion) in SUGGESTIONS.iter().enumerate() {
        lines.push(Line::from(vec![
            Span::styled(format!("  {}. ", i + 1), Style::default().fg(Color::DarkGray)),
            Span::styled(*suggestion, Style::default().fg(Color::White)),
        ]));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(vec![Span::styled(
        "Type /try <n> to use a suggestion. Enter sends, Alt+Enter adds a new line.",
        Style::default().fg(Color::DarkGray),
    )]));
    lines
}

/// Wrap text to fit within the given width, keeping explicit line breaks
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut current_line = String::new();
        let mut current_width = 0;

        for word in paragraph.split_whitespace() {
            let word_width = word.chars().count();
            if current_width > 0 && current_width + 1 + word_width > width {
                lines.push(std::mem::take(&mut current_line));
                current_width = 0;
            }
            if current_width > 0 {
                current_line.push(' ');
                current_width += 1;
            }

            // Hard-split words longer than a full line
            let mut chars: Vec<char> = word.chars().collect();
            while current_width + chars.len() > width {
                let take = width - current_width;
                current_line.extend(chars.drain(..take));
                lines.push(std::mem::take(&mut current_line));
                current_width = 0;
            }
            current_width += chars.len();
            current_line.extend(chars);
        }

        lines.push(current_line);
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.to_string()).collect()
    }

    #[test]
    fn wrap_breaks_on_words_and_keeps_newlines() {
        assert_eq!(
            wrap_text("the quick brown fox\njumps", 10),
            vec!["the quick", "brown fox", "jumps"]
        );
        assert_eq!(wrap_text("", 10), vec![""]);
        assert_eq!(wrap_text("a\n\nb", 10), vec!["a", "", "b"]);
    }

    #[test]
    fn wrap_splits_overlong_words() {
        assert_eq!(wrap_text("abcdefgh", 3), vec!["abc", "def", "gh"]);
        assert_eq!(wrap_text("ab cdefgh", 4), vec!["ab c", "defg", "h"]);
    }

    #[test]
    fn empty_thread_shows_welcome() {
        let thread = Thread::new();
        let lines = ConversationHistory::new(Some(&thread)).lines(40);
        let rendered: Vec<String> = lines.iter().map(text_of).collect();
        assert_eq!(rendered[0], "How can I help you today?");
        assert!(rendered.contains(&"  1. Analyze a complex philosophical concept".to_string()));
        assert!(rendered.contains(&"  4. Explain quantum entanglement simply".to_string()));
    }

    #[test]
    fn pending_reply_shows_thinking_indicator() {
        let mut thread = Thread::new();
        thread.messages.push(Message::user("Hello"));
        thread.messages.push(Message::assistant_placeholder());

        let lines = ConversationHistory::new(Some(&thread)).streaming(true).lines(40);
        let rendered: Vec<String> = lines.iter().map(text_of).collect();
        assert!(rendered.iter().any(|l| l.contains("Lumina is thinking")));
        assert!(rendered.iter().any(|l| l.trim() == "Hello"));
    }

    #[test]
    fn streaming_reply_gets_cursor() {
        let mut thread = Thread::new();
        thread.messages.push(Message::user("Hello"));
        let mut reply = Message::assistant_placeholder();
        reply.content = "Hi there".to_string();
        thread.messages.push(reply);

        let lines = ConversationHistory::new(Some(&thread)).streaming(true).lines(40);
        let rendered: Vec<String> = lines.iter().map(text_of).collect();
        assert!(rendered.iter().any(|l| l == "  Hi there▋"));
        assert!(!rendered.iter().any(|l| l.contains("thinking")));
    }
}
