use crate::error::ChatError;
use crate::session::ChatSession;
use crate::streaming::TurnState;
use crate::ui::conversation::{
    get_help_text, ComposerResult, ConversationComposer, ConversationHistory, ParsedCommand,
    SlashCommand, ThreadList, FRAME_MS, SIDEBAR_WIDTH, SUGGESTIONS,
};
use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    text::Line,
    widgets::{Paragraph, Wrap},
    Frame,
};
use std::time::Instant;
use tracing::{debug, warn};

const SCROLL_STEP: u16 = 5;

/// Actions that can be requested by the conversation manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationAction {
    None,
    Exit,
}

/// Owns the chat session and routes keys and slash commands to it
pub struct ConversationManager {
    session: ChatSession,
    composer: ConversationComposer,
    show_sidebar: bool,
    scroll: u16,
    notice: Option<String>,
    started: Instant,
}

impl ConversationManager {
    pub fn new(session: ChatSession, show_sidebar: bool) -> Self {
        Self {
            session,
            composer: ConversationComposer::new(),
            show_sidebar,
            scroll: 0,
            notice: None,
            started: Instant::now(),
        }
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn composer(&self) -> &ConversationComposer {
        &self.composer
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn show_sidebar(&self) -> bool {
        self.show_sidebar
    }

    /// Apply streamed fragments (called from main loop)
    pub fn process_streaming_chunks(&mut self) {
        for outcome in self.session.poll_turns() {
            if outcome.state == TurnState::Failed {
                let reason = outcome.error.unwrap_or_default();
                warn!(thread = %outcome.thread_id.short(), %reason, "reply failed");
                self.notice = Some(format!("Reply failed: {}", reason));
            }
        }

        let busy = self
            .session
            .active_thread_id()
            .is_some_and(|id| self.session.is_streaming(id));
        self.composer.set_busy(busy);
    }

    /// Handle key input
    pub async fn handle_key(&mut self, key: KeyEvent) -> Result<ConversationAction> {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        if ctrl || matches!(key.code, KeyCode::Esc | KeyCode::PageUp | KeyCode::PageDown) {
            self.notice = None;
        }

        match key.code {
            KeyCode::Esc => return Ok(ConversationAction::Exit),
            KeyCode::Char('c') if ctrl => return Ok(ConversationAction::Exit),
            KeyCode::Char('n') if ctrl => self.new_chat(),
            KeyCode::Char('d') if ctrl => self.delete_active(),
            KeyCode::Char('b') if ctrl => self.show_sidebar = !self.show_sidebar,
            KeyCode::Up if ctrl => self.switch_chat(-1),
            KeyCode::Down if ctrl => self.switch_chat(1),
            KeyCode::PageUp => self.scroll = self.scroll.saturating_add(SCROLL_STEP),
            KeyCode::PageDown => self.scroll = self.scroll.saturating_sub(SCROLL_STEP),
            _ if ctrl => {}
            _ => match self.composer.handle_key(key) {
                ComposerResult::Submitted(input) => {
                    self.notice = None;
                    self.handle_input(input).await;
                }
                ComposerResult::Command(command) => {
                    self.notice = None;
                    return Ok(self.handle_slash_command(command));
                }
                ComposerResult::None => {}
            },
        }

        Ok(ConversationAction::None)
    }

    /// Send user input; rejected text goes back into the composer
    async fn handle_input(&mut self, input: String) {
        match self.session.begin_submit(&input).await {
            Ok(thread_id) => {
                debug!(thread = %thread_id.short(), "message submitted");
                self.scroll = 0;
                self.composer.set_busy(true);
            }
            Err(err) => {
                self.notice = Some(match &err {
                    ChatError::TurnInProgress(_) => {
                        "Lumina is still replying in this chat. Wait for it to finish.".to_string()
                    }
                    other => other.to_string(),
                });
                self.composer.set_content(input);
            }
        }
    }

    /// Handle slash commands
    fn handle_slash_command(&mut self, command: ParsedCommand) -> ConversationAction {
        match command.command {
            SlashCommand::New => self.new_chat(),
            SlashCommand::Delete => self.delete_active(),
            SlashCommand::Open => match command.index() {
                Some(index) if index < self.session.threads().len() => {
                    let id = self.session.threads()[index].id.clone();
                    self.session.select_thread(&id);
                    self.scroll = 0;
                }
                _ => {
                    self.notice = Some(format!(
                        "Usage: /open <n> with n between 1 and {}",
                        self.session.threads().len()
                    ));
                }
            },
            SlashCommand::Try => match command.index().and_then(|i| SUGGESTIONS.get(i)) {
                Some(suggestion) => self.composer.set_content(*suggestion),
                None => {
                    self.notice = Some(format!(
                        "Usage: /try <n> with n between 1 and {}",
                        SUGGESTIONS.len()
                    ));
                }
            },
            SlashCommand::Help => self.notice = Some(get_help_text()),
            SlashCommand::Quit => return ConversationAction::Exit,
        }
        ConversationAction::None
    }

    fn new_chat(&mut self) {
        self.session.create_thread();
        self.scroll = 0;
    }

    fn delete_active(&mut self) {
        if let Some(id) = self.session.active_thread_id().cloned() {
            self.session.delete_thread(&id);
            self.scroll = 0;
        }
    }

    fn switch_chat(&mut self, offset: isize) {
        self.session.select_relative(offset);
        self.scroll = 0;
    }

    /// Render the conversation UI components
    pub fn render(&self, f: &mut Frame) {
        let area = f.size();
        let main_area = if self.show_sidebar {
            let columns = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Length(SIDEBAR_WIDTH), Constraint::Min(20)])
                .split(area);

            let threads = self.session.threads();
            let busy: Vec<bool> = threads
                .iter()
                .map(|t| self.session.is_streaming(&t.id))
                .collect();
            f.render_widget(
                ThreadList::new(threads, self.session.active_thread_id(), &busy),
                columns[0],
            );
            columns[1]
        } else {
            area
        };

        let notice_height = self
            .notice
            .as_ref()
            .map(|n| n.lines().count() as u16)
            .unwrap_or(0);
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(5),                       // History
                Constraint::Length(notice_height),        // Notice
                Constraint::Length(self.composer.height()), // Composer
            ])
            .split(main_area);

        let streaming = self
            .session
            .active_thread_id()
            .is_some_and(|id| self.session.is_streaming(id));
        let tick = self.started.elapsed().as_millis() as u64 / FRAME_MS;
        f.render_widget(
            ConversationHistory::new(self.session.active_thread())
                .streaming(streaming)
                .scroll(self.scroll)
                .tick(tick),
            chunks[0],
        );

        if let Some(notice) = &self.notice {
            let lines: Vec<Line> = notice.lines().map(Line::from).collect();
            f.render_widget(
                Paragraph::new(lines)
                    .style(Style::default().fg(Color::Yellow))
                    .wrap(Wrap { trim: false }),
                chunks[1],
            );
        }

        f.render_widget(&self.composer, chunks[2]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::{ChatBackend, LlmEvent, LlmRequest};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    /// Hands the test the sending half of every stream it opens
    #[derive(Default)]
    struct ManualBackend {
        senders: Mutex<Vec<mpsc::Sender<LlmEvent>>>,
    }

    #[async_trait]
    impl ChatBackend for ManualBackend {
        async fn stream_chat(
            &self,
            _request: LlmRequest,
        ) -> crate::error::Result<mpsc::Receiver<LlmEvent>> {
            let (tx, rx) = mpsc::channel(16);
            self.senders.lock().unwrap().push(tx);
            Ok(rx)
        }
    }

    fn manager() -> (ConversationManager, Arc<ManualBackend>) {
        let backend = Arc::new(ManualBackend::default());
        let session = ChatSession::with_backends(
            &Config::default(),
            Arc::new(MemoryStore::new()),
            backend.clone(),
        );
        (ConversationManager::new(session, true), backend)
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    async fn type_line(manager: &mut ConversationManager, text: &str) -> ConversationAction {
        for c in text.chars() {
            manager.handle_key(key(KeyCode::Char(c))).await.unwrap();
        }
        manager.handle_key(key(KeyCode::Enter)).await.unwrap()
    }

    #[tokio::test]
    async fn enter_sends_and_fragments_stream_in() {
        let (mut manager, backend) = manager();
        type_line(&mut manager, "Hello").await;

        let thread = manager.session().active_thread().unwrap();
        assert_eq!(thread.title, "Hello");
        assert!(thread.messages[1].is_pending());
        assert!(manager.composer().content().is_empty());

        let tx = backend.senders.lock().unwrap()[0].clone();
        tx.send(LlmEvent::TextDelta("Hi".into())).await.unwrap();
        manager.process_streaming_chunks();
        assert_eq!(manager.session().active_thread().unwrap().messages[1].content, "Hi");

        tx.send(LlmEvent::StreamComplete).await.unwrap();
        manager.process_streaming_chunks();
        assert!(!manager.session().has_active_turns());
    }

    #[tokio::test]
    async fn second_message_while_streaming_is_kept_in_composer() {
        let (mut manager, _backend) = manager();
        type_line(&mut manager, "first").await;
        type_line(&mut manager, "second").await;

        assert_eq!(manager.composer().content(), "second");
        assert!(manager.notice().unwrap().contains("still replying"));
        assert_eq!(manager.session().active_thread().unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn failed_reply_shows_notice() {
        let (mut manager, backend) = manager();
        type_line(&mut manager, "Hello").await;

        let tx = backend.senders.lock().unwrap()[0].clone();
        tx.send(LlmEvent::Error("offline".into())).await.unwrap();
        manager.process_streaming_chunks();

        assert_eq!(manager.notice(), Some("Reply failed: offline"));
    }

    #[tokio::test]
    async fn chat_shortcuts_manage_threads() {
        let (mut manager, _backend) = manager();
        manager.handle_key(ctrl('n')).await.unwrap();
        manager.handle_key(ctrl('n')).await.unwrap();
        assert_eq!(manager.session().threads().len(), 2);
        let newest = manager.session().threads()[0].id.clone();

        manager
            .handle_key(KeyEvent::new(KeyCode::Down, KeyModifiers::CONTROL))
            .await
            .unwrap();
        assert_ne!(manager.session().active_thread_id(), Some(&newest));

        manager.handle_key(ctrl('d')).await.unwrap();
        assert_eq!(manager.session().threads().len(), 1);
        assert!(manager.session().active_thread_id().is_none());

        manager.handle_key(ctrl('b')).await.unwrap();
        assert!(!manager.show_sidebar());
        assert!(manager.composer().content().is_empty());
    }

    #[tokio::test]
    async fn slash_commands() {
        let (mut manager, _backend) = manager();
        type_line(&mut manager, "/new").await;
        type_line(&mut manager, "/new").await;
        let oldest = manager.session().threads()[1].id.clone();

        type_line(&mut manager, "/open 2").await;
        assert_eq!(manager.session().active_thread_id(), Some(&oldest));

        type_line(&mut manager, "/open 9").await;
        assert!(manager.notice().unwrap().starts_with("Usage: /open"));

        type_line(&mut manager, "/try 2").await;
        assert_eq!(manager.composer().content(), "Write a clean, documented Python script");
        manager.handle_key(key(KeyCode::Enter)).await.unwrap();
        assert_eq!(
            manager.session().active_thread().unwrap().title,
            "Write a clean, documented Python script"
        );

        type_line(&mut manager, "/try 5").await;
        assert!(manager.notice().unwrap().starts_with("Usage: /try"));

        type_line(&mut manager, "/help").await;
        assert!(manager.notice().unwrap().contains("/quit"));

        assert_eq!(type_line(&mut manager, "/quit").await, ConversationAction::Exit);
    }

    #[tokio::test]
    async fn escape_exits() {
        let (mut manager, _backend) = manager();
        assert_eq!(
            manager.handle_key(key(KeyCode::Esc)).await.unwrap(),
            ConversationAction::Exit
        );
        assert_eq!(manager.handle_key(ctrl('c')).await.unwrap(), ConversationAction::Exit);
    }
}
