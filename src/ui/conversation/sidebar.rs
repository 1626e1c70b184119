use crate::thread::{Thread, ThreadId};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

pub const SIDEBAR_WIDTH: u16 = 32;

/// "Recent Chats" list, most recent first
pub struct ThreadList<'a> {
    threads: &'a [Thread],
    active: Option<&'a ThreadId>,
    /// Parallel to `threads`: whether a reply is streaming into that chat
    busy: &'a [bool],
}

impl<'a> ThreadList<'a> {
    pub fn new(threads: &'a [Thread], active: Option<&'a ThreadId>, busy: &'a [bool]) -> Self {
        Self {
            threads,
            active,
            busy,
        }
    }

    pub fn lines(&self, width: u16) -> Vec<Line<'a>> {
        let mut lines = vec![
            Line::from(Span::styled(
                "+ New Chat (Ctrl+N)",
                Style::default().fg(Color::Green),
            )),
            Line::from(""),
        ];

        if self.threads.is_empty() {
            lines.push(Line::from(Span::styled(
                "No history yet",
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
            return lines;
        }

        for (index, thread) in self.threads.iter().enumerate() {
            let is_active = self.active == Some(&thread.id);
            let is_busy = self.busy.get(index).copied().unwrap_or(false);

            let number = format!("{:>2}. ", index + 1);
            let marker = if is_busy { " …" } else { "" };
            let room = (width as usize)
                .saturating_sub(number.chars().count() + marker.chars().count());
            let title = fit(thread.display_title(), room);

            let style = if is_active {
                Style::default().fg(Color::Black).bg(Color::Cyan).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Gray)
            };
            lines.push(Line::from(vec![
                Span::styled(number, Style::default().fg(Color::DarkGray)),
                Span::styled(title, style),
                Span::styled(marker, Style::default().fg(Color::Yellow)),
            ]));
        }
        lines
    }
}

impl Widget for ThreadList<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default().borders(Borders::ALL).title(" Recent Chats ");
        let inner_area = block.inner(area);
        block.render(area, buf);

        for (i, line) in self
            .lines(inner_area.width)
            .iter()
            .take(inner_area.height as usize)
            .enumerate()
        {
            buf.set_line(inner_area.x, inner_area.y + i as u16, line, inner_area.width);
        }
    }
}

/// Shorten to `width` chars, marking the cut with '…'
fn fit(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}
