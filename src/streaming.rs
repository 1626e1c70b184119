use crate::llm::LlmEvent;

/// Text that replaces an assistant reply whose stream failed
pub const STREAM_ERROR_MESSAGE: &str = "I encountered an error. Please check your connection.";

/// Lifecycle of one submitted turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    /// Placeholder appended, no text received yet
    AwaitingFirstFragment,
    Streaming,
    Completed,
    Failed,
}

impl TurnState {
    pub fn is_finished(self) -> bool {
        matches!(self, TurnState::Completed | TurnState::Failed)
    }
}

/// Folds stream events into the assistant message content for one turn.
///
/// `apply` returns the full replacement text whenever the message should change.
#[derive(Debug, Clone)]
pub struct TurnProgress {
    state: TurnState,
    accumulated: String,
    error: Option<String>,
}

impl TurnProgress {
    pub fn new() -> Self {
        Self {
            state: TurnState::Idle,
            accumulated: String::new(),
            error: None,
        }
    }

    /// The request went out; waiting for the first fragment
    pub fn start(&mut self) {
        if self.state == TurnState::Idle {
            self.state = TurnState::AwaitingFirstFragment;
        }
    }

    /// Process an LLM event, returning new message content if it changed
    pub fn apply(&mut self, event: LlmEvent) -> Option<&str> {
        if self.state.is_finished() {
            return None;
        }

        match event {
            LlmEvent::TextDelta(delta) => {
                if delta.is_empty() {
                    return None;
                }
                self.accumulated.push_str(&delta);
                self.state = TurnState::Streaming;
                Some(self.accumulated.as_str())
            }
            LlmEvent::StreamComplete => {
                self.state = TurnState::Completed;
                None
            }
            LlmEvent::Error(error) => {
                self.fail(error);
                Some(STREAM_ERROR_MESSAGE)
            }
        }
    }

    /// The event channel closed; a stream that ended without an error is complete
    pub fn disconnected(&mut self) {
        if !self.state.is_finished() {
            self.state = TurnState::Completed;
        }
    }

    /// Mark the turn failed without touching the message
    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = TurnState::Failed;
        self.accumulated.clear();
        self.error = Some(error.into());
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Final message content: accumulated text, or the error message after failure
    pub fn content(&self) -> &str {
        match self.state {
            TurnState::Failed => STREAM_ERROR_MESSAGE,
            _ => &self.accumulated,
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl Default for TurnProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> LlmEvent {
        LlmEvent::TextDelta(text.to_string())
    }

    #[test]
    fn fragments_accumulate_in_order() {
        let mut progress = TurnProgress::new();
        progress.start();
        assert_eq!(progress.state(), TurnState::AwaitingFirstFragment);

        assert_eq!(progress.apply(delta("Hi")), Some("Hi"));
        assert_eq!(progress.state(), TurnState::Streaming);
        assert_eq!(progress.apply(delta(" there")), Some("Hi there"));
        assert_eq!(progress.apply(delta("!")), Some("Hi there!"));
        assert_eq!(progress.apply(LlmEvent::StreamComplete), None);

        assert_eq!(progress.state(), TurnState::Completed);
        assert_eq!(progress.content(), "Hi there!");
    }

    #[test]
    fn empty_fragments_do_not_end_thinking() {
        let mut progress = TurnProgress::new();
        progress.start();
        assert_eq!(progress.apply(delta("")), None);
        assert_eq!(progress.state(), TurnState::AwaitingFirstFragment);
    }

    #[test]
    fn failure_discards_partial_text() {
        let mut progress = TurnProgress::new();
        progress.start();
        progress.apply(delta("Hi"));

        let update = progress.apply(LlmEvent::Error("connection reset".to_string()));
        assert_eq!(update, Some(STREAM_ERROR_MESSAGE));
        assert_eq!(progress.state(), TurnState::Failed);
        assert_eq!(progress.content(), STREAM_ERROR_MESSAGE);
        assert_eq!(progress.error(), Some("connection reset"));
    }

    #[test]
    fn events_after_finish_are_ignored() {
        let mut progress = TurnProgress::new();
        progress.start();
        progress.apply(delta("done"));
        progress.apply(LlmEvent::StreamComplete);

        assert_eq!(progress.apply(delta(" more")), None);
        assert_eq!(progress.apply(LlmEvent::Error("late".to_string())), None);
        assert_eq!(progress.content(), "done");
    }

    #[test]
    fn disconnect_without_terminal_event_completes() {
        let mut progress = TurnProgress::new();
        progress.start();
        progress.apply(delta("partial"));
        progress.disconnected();
        assert_eq!(progress.state(), TurnState::Completed);
        assert_eq!(progress.content(), "partial");
    }
}
