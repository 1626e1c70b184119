use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::llm::{ChatBackend, ChatTurn, LlmEvent, LlmRequest};
use crate::store::ConversationStore;
use crate::streaming::{TurnProgress, TurnState};
use crate::thread::{MessageId, ThreadId};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, warn};

/// Result of a finished turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub thread_id: ThreadId,
    pub assistant_message_id: MessageId,
    /// Either [`TurnState::Completed`] or [`TurnState::Failed`]
    pub state: TurnState,
    /// Final content of the assistant message
    pub content: String,
    /// Underlying failure, for diagnostics
    pub error: Option<String>,
}

/// A turn whose fragments are still arriving
struct ActiveTurn {
    thread_id: ThreadId,
    assistant_message_id: MessageId,
    progress: TurnProgress,
    events: mpsc::Receiver<LlmEvent>,
}

impl ActiveTurn {
    /// Apply one event (`None` = channel closed); returns true once the turn is finished
    fn handle(&mut self, event: Option<LlmEvent>, store: &mut ConversationStore) -> bool {
        let Some(event) = event else {
            self.progress.disconnected();
            return true;
        };

        if let Some(content) = self.progress.apply(event).map(str::to_string) {
            if let Err(e) =
                store.update_assistant_content(&self.thread_id, &self.assistant_message_id, &content)
            {
                warn!(thread_id = %self.thread_id, error = %e, "abandoning turn");
                self.progress.fail(e.to_string());
            }
        }
        self.progress.state().is_finished()
    }

    /// Apply everything already buffered without waiting
    fn drain(&mut self, store: &mut ConversationStore) -> bool {
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    if self.handle(Some(event), store) {
                        return true;
                    }
                }
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => return self.handle(None, store),
            }
        }
    }

    fn into_outcome(self) -> TurnOutcome {
        let outcome = TurnOutcome {
            thread_id: self.thread_id,
            assistant_message_id: self.assistant_message_id,
            state: self.progress.state(),
            content: self.progress.content().to_string(),
            error: self.progress.error().map(str::to_string),
        };
        match outcome.state {
            TurnState::Failed => warn!(
                thread_id = %outcome.thread_id,
                error = outcome.error.as_deref().unwrap_or_default(),
                "turn failed"
            ),
            _ => info!(
                thread_id = %outcome.thread_id,
                chars = outcome.content.chars().count(),
                "turn completed"
            ),
        }
        outcome
    }
}

/// Drives submitted messages through the model and into the conversation store.
///
/// At most one turn per thread is in flight; a second submission to the same thread
/// is rejected with [`ChatError::TurnInProgress`].
pub struct ChatOrchestrator {
    backend: Arc<dyn ChatBackend>,
    system_instruction: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    turns: Vec<ActiveTurn>,
}

impl ChatOrchestrator {
    pub fn new(backend: Arc<dyn ChatBackend>, system_instruction: impl Into<String>) -> Self {
        Self {
            backend,
            system_instruction: system_instruction.into(),
            temperature: None,
            max_tokens: None,
            turns: Vec::new(),
        }
    }

    pub fn from_config(backend: Arc<dyn ChatBackend>, config: &Config) -> Self {
        Self::new(backend, config.system_instruction.clone())
            .with_sampling(config.temperature, config.max_tokens)
    }

    pub fn with_sampling(mut self, temperature: Option<f32>, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Whether a reply is currently streaming into `thread_id`
    pub fn is_streaming(&self, thread_id: &ThreadId) -> bool {
        self.turns.iter().any(|t| &t.thread_id == thread_id)
    }

    pub fn has_active_turns(&self) -> bool {
        !self.turns.is_empty()
    }

    /// Append a turn to the active thread (creating one if none is selected) and
    /// open the model stream. Fragments are applied by [`poll_turns`](Self::poll_turns)
    /// or [`finish_turn`](Self::finish_turn).
    pub async fn begin_turn(
        &mut self,
        store: &mut ConversationStore,
        text: &str,
    ) -> Result<ThreadId> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let thread_id = match store.active_thread_id() {
            Some(id) => id.clone(),
            None => store.create_thread(),
        };
        if self.is_streaming(&thread_id) {
            return Err(ChatError::TurnInProgress(thread_id));
        }

        // Context is everything before the new pair, in stored order.
        let history: Vec<ChatTurn> = store
            .thread(&thread_id)
            .map(|thread| {
                thread
                    .messages
                    .iter()
                    .map(|m| ChatTurn {
                        role: m.role,
                        text: m.content.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let (_, assistant_message_id) = store.append_turn(&thread_id, text)?;

        let request = LlmRequest::new(self.system_instruction.clone(), history, text)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        let events = match self.backend.stream_chat(request).await {
            Ok(rx) => rx,
            Err(e) => {
                // Surface setup failures through the same path as mid-stream ones.
                let (tx, rx) = mpsc::channel(1);
                let _ = tx.try_send(LlmEvent::Error(e.to_string()));
                rx
            }
        };

        let mut progress = TurnProgress::new();
        progress.start();
        debug!(thread_id = %thread_id, "turn started");

        self.turns.push(ActiveTurn {
            thread_id: thread_id.clone(),
            assistant_message_id,
            progress,
            events,
        });
        Ok(thread_id)
    }

    /// Apply all fragments received so far; returns the turns that finished
    pub fn poll_turns(&mut self, store: &mut ConversationStore) -> Vec<TurnOutcome> {
        let mut finished = Vec::new();
        let mut index = 0;
        while index < self.turns.len() {
            if self.turns[index].drain(store) {
                finished.push(self.turns.remove(index).into_outcome());
            } else {
                index += 1;
            }
        }
        finished
    }

    /// Wait for the next event of the turn streaming into `thread_id` and apply it.
    ///
    /// Returns the outcome once the turn has finished, `None` while it is still streaming.
    pub async fn next_update(
        &mut self,
        store: &mut ConversationStore,
        thread_id: &ThreadId,
    ) -> Result<Option<TurnOutcome>> {
        let index = self
            .turns
            .iter()
            .position(|t| &t.thread_id == thread_id)
            .ok_or_else(|| ChatError::ThreadNotFound(thread_id.clone()))?;

        let turn = &mut self.turns[index];
        let event = turn.events.recv().await;
        if turn.handle(event, store) {
            return Ok(Some(self.turns.remove(index).into_outcome()));
        }
        Ok(None)
    }

    /// Wait for the turn streaming into `thread_id` to finish
    pub async fn finish_turn(
        &mut self,
        store: &mut ConversationStore,
        thread_id: &ThreadId,
    ) -> Result<TurnOutcome> {
        loop {
            if let Some(outcome) = self.next_update(store, thread_id).await? {
                return Ok(outcome);
            }
        }
    }

    /// Submit `text` and stream the reply to completion
    pub async fn submit_message(
        &mut self,
        store: &mut ConversationStore,
        text: &str,
    ) -> Result<TurnOutcome> {
        let thread_id = self.begin_turn(store, text).await?;
        self.finish_turn(store, &thread_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::STREAM_ERROR_MESSAGE;
    use crate::thread::Role;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays a fixed event script and records each request
    struct ScriptedBackend {
        script: Vec<LlmEvent>,
        requests: Mutex<Vec<LlmRequest>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<LlmEvent>) -> Arc<Self> {
            Arc::new(Self {
                script,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn stream_chat(&self, request: LlmRequest) -> Result<mpsc::Receiver<LlmEvent>> {
            self.requests.lock().unwrap().push(request);
            let (tx, rx) = mpsc::channel(self.script.len().max(1));
            for event in &self.script {
                tx.try_send(event.clone()).unwrap();
            }
            Ok(rx)
        }
    }

    struct UnreachableBackend;

    #[async_trait]
    impl ChatBackend for UnreachableBackend {
        async fn stream_chat(&self, _request: LlmRequest) -> Result<mpsc::Receiver<LlmEvent>> {
            Err(ChatError::Config("no route".to_string()))
        }
    }

    fn delta(text: &str) -> LlmEvent {
        LlmEvent::TextDelta(text.to_string())
    }

    #[tokio::test]
    async fn submit_creates_thread_when_none_active() {
        let backend = ScriptedBackend::new(vec![delta("Hi"), LlmEvent::StreamComplete]);
        let mut orchestrator = ChatOrchestrator::new(backend, "sys");
        let mut store = ConversationStore::new();

        let outcome = orchestrator.submit_message(&mut store, "  Hello  ").await.unwrap();

        assert_eq!(store.threads().len(), 1);
        assert_eq!(store.active_thread_id(), Some(&outcome.thread_id));
        let thread = store.active_thread().unwrap();
        assert_eq!(thread.title, "Hello");
        assert_eq!(thread.messages[0].content, "Hello");
        assert_eq!(outcome.state, TurnState::Completed);
        assert!(!orchestrator.has_active_turns());
    }

    #[tokio::test]
    async fn request_carries_prior_turns_in_order() {
        let backend = ScriptedBackend::new(vec![delta("ok"), LlmEvent::StreamComplete]);
        let mut orchestrator = ChatOrchestrator::new(backend.clone(), "sys")
            .with_sampling(Some(0.3), Some(100));
        let mut store = ConversationStore::new();

        orchestrator.submit_message(&mut store, "first").await.unwrap();
        orchestrator.submit_message(&mut store, "second").await.unwrap();

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].history.is_empty());
        assert_eq!(requests[0].prompt, "first");

        let second = &requests[1];
        assert_eq!(second.system_instruction, "sys");
        assert_eq!(second.temperature, Some(0.3));
        assert_eq!(second.max_tokens, Some(100));
        assert_eq!(
            second.history,
            vec![
                ChatTurn { role: Role::User, text: "first".to_string() },
                ChatTurn { role: Role::Assistant, text: "ok".to_string() },
            ]
        );
        assert_eq!(second.prompt, "second");
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let backend = ScriptedBackend::new(vec![]);
        let mut orchestrator = ChatOrchestrator::new(backend, "sys");
        let mut store = ConversationStore::new();

        let err = orchestrator.submit_message(&mut store, "   \n").await.unwrap_err();
        assert!(matches!(err, ChatError::EmptyMessage));
        assert!(store.threads().is_empty());
    }

    #[tokio::test]
    async fn second_submission_while_streaming_is_rejected() {
        let backend = ScriptedBackend::new(vec![delta("slow")]);
        let mut orchestrator = ChatOrchestrator::new(backend, "sys");
        let mut store = ConversationStore::new();

        let thread_id = orchestrator.begin_turn(&mut store, "one").await.unwrap();
        assert!(orchestrator.is_streaming(&thread_id));

        let err = orchestrator.begin_turn(&mut store, "two").await.unwrap_err();
        assert!(matches!(err, ChatError::TurnInProgress(id) if id == thread_id));
        assert_eq!(store.thread(&thread_id).unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn poll_applies_buffered_fragments() {
        let backend = ScriptedBackend::new(vec![delta("Hi"), delta(" there"), LlmEvent::StreamComplete]);
        let mut orchestrator = ChatOrchestrator::new(backend, "sys");
        let mut store = ConversationStore::new();

        let thread_id = orchestrator.begin_turn(&mut store, "Hello").await.unwrap();
        let finished = orchestrator.poll_turns(&mut store);

        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].thread_id, thread_id);
        assert_eq!(finished[0].content, "Hi there");
        let reply = store.thread(&thread_id).unwrap().last_message().unwrap().clone();
        assert_eq!(reply.content, "Hi there");
    }

    #[tokio::test]
    async fn backend_setup_failure_fails_the_turn() {
        let mut orchestrator = ChatOrchestrator::new(Arc::new(UnreachableBackend), "sys");
        let mut store = ConversationStore::new();

        let outcome = orchestrator.submit_message(&mut store, "Hello").await.unwrap();
        assert_eq!(outcome.state, TurnState::Failed);
        assert_eq!(
            store.active_thread().unwrap().last_message().unwrap().content,
            STREAM_ERROR_MESSAGE
        );
        assert!(outcome.error.unwrap().contains("no route"));
    }

    #[tokio::test]
    async fn deleting_thread_mid_stream_abandons_turn() {
        let backend = ScriptedBackend::new(vec![delta("Hi"), LlmEvent::StreamComplete]);
        let mut orchestrator = ChatOrchestrator::new(backend, "sys");
        let mut store = ConversationStore::new();

        let thread_id = orchestrator.begin_turn(&mut store, "Hello").await.unwrap();
        store.delete_thread(&thread_id);

        let outcome = orchestrator.finish_turn(&mut store, &thread_id).await.unwrap();
        assert_eq!(outcome.state, TurnState::Failed);
        assert!(store.threads().is_empty());
    }

    #[tokio::test]
    async fn next_update_applies_one_event_at_a_time() {
        let backend = ScriptedBackend::new(vec![delta("Hi"), delta(" there"), LlmEvent::StreamComplete]);
        let mut orchestrator = ChatOrchestrator::new(backend, "sys");
        let mut store = ConversationStore::new();

        let thread_id = orchestrator.begin_turn(&mut store, "Hello").await.unwrap();
        let reply = |store: &ConversationStore| {
            store.thread(&thread_id).unwrap().last_message().unwrap().content.clone()
        };

        assert!(orchestrator.next_update(&mut store, &thread_id).await.unwrap().is_none());
        assert_eq!(reply(&store), "Hi");
        assert!(orchestrator.next_update(&mut store, &thread_id).await.unwrap().is_none());
        assert_eq!(reply(&store), "Hi there");

        let outcome = orchestrator.next_update(&mut store, &thread_id).await.unwrap().unwrap();
        assert_eq!(outcome.state, TurnState::Completed);
        assert!(!orchestrator.is_streaming(&thread_id));

        let err = orchestrator.next_update(&mut store, &thread_id).await.unwrap_err();
        assert!(matches!(err, ChatError::ThreadNotFound(_)));
    }
}
