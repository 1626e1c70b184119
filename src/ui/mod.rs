//! Terminal chat interface

pub mod conversation;

use crate::session::ChatSession;
use anyhow::{Context, Result};
use conversation::{ConversationAction, ConversationManager};
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::{self, Stdout};
use std::time::Duration;
use tracing::info;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

type ChatTerminal = Terminal<CrosstermBackend<Stdout>>;

/// Run the interactive chat until the user quits
pub async fn run(session: ChatSession, show_sidebar: bool) -> Result<()> {
    let mut terminal = setup_terminal().context("Failed to initialise terminal")?;
    let mut manager = ConversationManager::new(session, show_sidebar);

    let result = event_loop(&mut terminal, &mut manager).await;
    restore_terminal(&mut terminal);
    result
}

async fn event_loop(terminal: &mut ChatTerminal, manager: &mut ConversationManager) -> Result<()> {
    info!("chat interface started");
    loop {
        manager.process_streaming_chunks();
        terminal.draw(|f| manager.render(f))?;

        if !event::poll(POLL_INTERVAL)? {
            // Let spawned stream readers make progress
            tokio::task::yield_now().await;
            continue;
        }

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            if manager.handle_key(key).await? == ConversationAction::Exit {
                break;
            }
        }
    }

    if manager.session().has_active_turns() {
        info!("exiting with replies still streaming");
    }
    Ok(())
}

fn setup_terminal() -> Result<ChatTerminal> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(terminal: &mut ChatTerminal) {
    let _ = disable_raw_mode();
    let _ = execute!(terminal.backend_mut(), LeaveAlternateScreen);
    let _ = terminal.show_cursor();
}
