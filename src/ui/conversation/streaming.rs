//! Animated indicators for replies that are still arriving.

use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
};

/// Milliseconds per animation frame
pub const FRAME_MS: u64 = 300;

/// "Lumina is thinking..." shown while an assistant message is still empty
pub fn thinking_line(tick: u64) -> Line<'static> {
    let dots = match tick % 4 {
        0 => ".",
        1 => "..",
        2 => "...",
        _ => "   ",
    };

    Line::from(vec![
        Span::raw("  "),
        Span::styled(
            "Lumina is thinking",
            Style::default().fg(Color::Magenta).add_modifier(Modifier::ITALIC),
        ),
        Span::styled(dots, Style::default().fg(Color::Yellow)),
    ])
}

/// Blinking block appended to the last line of a streaming reply
pub fn cursor_span(tick: u64) -> Span<'static> {
    let cursor = if tick % 2 == 0 { "▋" } else { " " };
    Span::styled(cursor, Style::default().fg(Color::Yellow))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thinking_dots_cycle() {
        let text = |tick| {
            thinking_line(tick)
                .spans
                .iter()
                .map(|s| s.content.to_string())
                .collect::<String>()
        };
        assert!(text(0).ends_with("thinking."));
        assert!(text(2).ends_with("thinking..."));
        assert_eq!(text(1), text(5));
    }
}
