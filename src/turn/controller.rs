//! One complete turn: utterance in, spoken or printed response out
//!
//! ```text
//! utterance ─► history ─► IntentPlanner ─► ToolExecutor ─► ResponseStreamer ─► history
//!                                                               │                │
//!                                                        SpeechPipeline     SessionStore
//!                                                                           FactExtractor
//! ```
//!
//! The controller owns the conversation history; nothing else mutates it.
//! Every failure inside a turn is caught here, shown to the user, and the
//! state machine is forced back to `Idle` unless an interrupt already
//! handed it to a newer session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::history::{ConversationHistory, system_prompt};
use super::memory::{FactExtractor, SHUTDOWN_JOIN_TIMEOUT};
use super::recorder::{Recorder, Utterance};
use super::streamer::{ResponseMode, ResponseStreamer};
use crate::config::{Config, ConversationConfig};
use crate::db::{FactStore, SessionStore};
use crate::display::DisplaySink;
use crate::llm::{ChatCompletion, ChatMessage, Role};
use crate::planner::{IntentPlanner, TurnContext};
use crate::state::{
    InteractionMode, ListenTrigger, ProcessTrigger, RecordingState, RecordingStateMachine, TurnToken,
};
use crate::tools::{ExecutionReport, ToolExecutor, preview};
use crate::voice::synthesis::SpeechPipeline;
use crate::voice::{SAMPLE_RATE, Transcriber, samples_to_wav};
use crate::{Error, Result};

/// Length of tool result previews shown to the user
const TOOL_PREVIEW_CHARS: usize = 80;

/// Models and behavior switches for the turn pipeline
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub model: String,
    pub classifier_model: String,
    pub temperature: f32,
    pub conversation: ConversationConfig,
    /// Start listening again after a voice response
    pub auto_listen: bool,
    /// Speak responses in chat mode too
    pub speak_chat_responses: bool,
}

impl TurnSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.llm.model.clone(),
            classifier_model: config.llm.classifier_model.clone(),
            temperature: config.llm.temperature,
            conversation: config.conversation.clone(),
            auto_listen: config.voice.auto_listen,
            speak_chat_responses: config.voice.speak_chat_responses,
        }
    }
}

/// Runs turns against the shared state machine
pub struct TurnController {
    state: Arc<RecordingStateMachine>,
    chat: Arc<dyn ChatCompletion>,
    planner: IntentPlanner,
    executor: ToolExecutor,
    streamer: ResponseStreamer,
    display: Arc<dyn DisplaySink>,
    settings: TurnSettings,
    history: ConversationHistory,
    context: TurnContext,
    speech: Option<SpeechPipeline>,
    recorder: Option<Arc<Recorder>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    sessions: Option<Arc<dyn SessionStore>>,
    facts: Option<Arc<dyn FactStore>>,
    extractor: Option<FactExtractor>,
    muted: Arc<AtomicBool>,
}

impl TurnController {
    /// Create a controller; the planner shares the executor's registry
    #[must_use]
    pub fn new(
        state: Arc<RecordingStateMachine>,
        chat: Arc<dyn ChatCompletion>,
        executor: ToolExecutor,
        display: Arc<dyn DisplaySink>,
        settings: TurnSettings,
    ) -> Self {
        let planner = IntentPlanner::new(
            Arc::clone(&chat),
            settings.classifier_model.clone(),
            Arc::clone(executor.registry()),
        );
        let streamer = ResponseStreamer::new(Arc::clone(&chat), settings.model.clone(), settings.temperature);
        let history = ConversationHistory::new(system_prompt(&settings.conversation, &[]));

        Self {
            state,
            chat,
            planner,
            executor,
            streamer,
            display,
            settings,
            history,
            context: TurnContext::default(),
            speech: None,
            recorder: None,
            transcriber: None,
            sessions: None,
            facts: None,
            extractor: None,
            muted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Speak responses through this pipeline
    #[must_use]
    pub fn with_speech(mut self, speech: SpeechPipeline) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Listen again through this recorder after voice responses
    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    #[must_use]
    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Persist exchanges to this store
    #[must_use]
    pub fn with_sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Inject stored facts into the system prompt and extract new ones
    ///
    /// Extraction only runs when memory is enabled.
    #[must_use]
    pub fn with_facts(mut self, facts: Arc<dyn FactStore>) -> Self {
        if self.settings.conversation.memory_enabled {
            self.extractor = Some(FactExtractor::new(
                Arc::clone(&self.chat),
                self.settings.classifier_model.clone(),
                Arc::clone(&facts),
            ));
        }
        self.facts = Some(facts);
        self
    }

    /// Share the display's mute flag
    #[must_use]
    pub fn with_muted(mut self, muted: Arc<AtomicBool>) -> Self {
        self.muted = muted;
        self
    }

    /// Model answering final responses
    #[must_use]
    pub fn model(&self) -> &str {
        &self.settings.model
    }

    /// Answer with `model` from the next turn on
    pub fn set_model(&mut self, model: impl Into<String>) {
        let model = model.into();
        tracing::info!(from = %self.settings.model, to = %model, "response model changed");
        self.streamer = ResponseStreamer::new(Arc::clone(&self.chat), model.clone(), self.settings.temperature);
        self.settings.model = model;
    }

    #[must_use]
    pub const fn history(&self) -> &ConversationHistory {
        &self.history
    }

    #[must_use]
    pub const fn context(&self) -> &TurnContext {
        &self.context
    }

    /// Seed the history with the tail of earlier sessions
    ///
    /// Returns how many messages were restored.
    pub fn restore_history(&mut self) -> usize {
        let Some(sessions) = &self.sessions else {
            return 0;
        };

        let max = match self.settings.conversation.max_history_messages {
            0 => ConversationConfig::default().max_history_messages,
            n => n,
        };

        match sessions.load_recent(max) {
            Ok(previous) => {
                let count = previous.len();
                self.history.seed(previous);
                tracing::info!(count, "previous conversation restored");
                count
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to restore previous conversation");
                0
            }
        }
    }

    /// Run a typed turn
    ///
    /// Returns the response, or `None` if the turn was refused or failed.
    pub async fn submit_text(&mut self, text: &str) -> Option<String> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let turn = match self.state.begin_processing(ProcessTrigger::ChatSubmit) {
            Ok(turn) => turn,
            Err(e) => {
                tracing::debug!(error = %e, "text submission refused");
                self.display.error("Still working on the last request.");
                return None;
            }
        };

        self.display.message(Role::User, text);
        self.run(turn, text).await
    }

    /// Run the turn that `Recorder::finish` started for a recording
    pub async fn process_recording(&mut self, utterance: Utterance) -> Option<String> {
        let Utterance { turn, samples } = utterance;
        let transcript = match self.transcribe(samples).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                if self.state.finish_processing(turn) {
                    self.status("Didn't catch that.");
                }
                return None;
            }
            Err(e) => {
                self.fail(turn, &e);
                return None;
            }
        };

        self.display.message(Role::User, &transcript);
        self.run(turn, &transcript).await
    }

    /// Wait for background work before exit
    pub async fn shutdown(&mut self) {
        if let Some(extractor) = &mut self.extractor {
            extractor.shutdown(SHUTDOWN_JOIN_TIMEOUT).await;
        }
    }

    async fn transcribe(&self, samples: Option<Vec<f32>>) -> Result<Option<String>> {
        let Some(samples) = samples.filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        let transcriber = self
            .transcriber
            .as_ref()
            .ok_or_else(|| Error::Stt("no transcriber configured".to_string()))?;

        let wav = samples_to_wav(&samples, SAMPLE_RATE)?;
        let text = transcriber
            .transcribe(&wav)
            .await?
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        if let Some(text) = &text {
            tracing::info!(transcript = %preview(text, 60), "transcribed");
        }
        Ok(text)
    }

    /// Outer boundary: success returns to `Idle`, failure forces it
    async fn run(&mut self, turn: TurnToken, utterance: &str) -> Option<String> {
        match self.turn(utterance).await {
            Ok(response) => {
                // False when an interrupt already moved the machine on
                if self.state.finish_processing(turn) {
                    self.relisten();
                }
                Some(response)
            }
            Err(e) => {
                self.fail(turn, &e);
                None
            }
        }
    }

    async fn turn(&mut self, utterance: &str) -> Result<String> {
        let mode = self.state.mode();
        tracing::info!(%mode, chars = utterance.len(), "turn started");

        self.refresh_system_prompt();
        self.history.push(ChatMessage::user(utterance));
        self.compact().await;

        let conversation = self.history.conversation();
        let earlier = &conversation[..conversation.len().saturating_sub(1)];
        let plan = self.planner.plan(utterance, earlier, &self.context).await;

        let mut tool_context = false;
        let report = if plan.is_empty() {
            ExecutionReport::default()
        } else {
            self.status("Working on it...");
            let report = self.executor.execute(&plan, utterance).await;
            for call in &report.calls {
                self.display
                    .tool_activity(&call.tool_name, &preview(&call.output, TOOL_PREVIEW_CHARS));
            }
            if let Some(context) = report.context_message() {
                self.history.push(ChatMessage::tool_context(context));
                tool_context = true;
            }
            report
        };

        let response = self.respond(mode, &report, tool_context).await?;

        self.history.push(ChatMessage::assistant(&response));
        self.persist(utterance, &response);
        if let Some(extractor) = &mut self.extractor {
            extractor.spawn(utterance, &response);
        }
        self.context = TurnContext::after(&report);

        Ok(response)
    }

    /// Voice turns stream into the speech pipeline; chat turns and turns
    /// that changed the interface are buffered
    async fn respond(
        &mut self,
        mode: InteractionMode,
        report: &ExecutionReport,
        tool_context: bool,
    ) -> Result<String> {
        let muted = self.muted.load(Ordering::SeqCst);
        let speech = self.speech.clone().filter(|_| !muted);

        let streamed = mode == InteractionMode::Voice && !report.ran_self_control();
        if !streamed {
            let response = self
                .streamer
                .respond(&mut self.history, ResponseMode::Buffered, tool_context, self.display.as_ref(), None)
                .await?;

            // Re-read: the turn may have just muted or unmuted
            let speak_now = !self.muted.load(Ordering::SeqCst)
                && (mode == InteractionMode::Voice || self.settings.speak_chat_responses);
            if let (true, Some(speech)) = (speak_now, &self.speech) {
                self.status("Speaking...");
                let report = speech.speak(&response, &self.state).await;
                tracing::debug!(played = report.played, interrupted = report.interrupted, "response spoken");
            }
            return Ok(response);
        }

        let Some(speech) = speech else {
            return self
                .streamer
                .respond(&mut self.history, ResponseMode::Streamed, tool_context, self.display.as_ref(), None)
                .await;
        };

        self.status("Speaking...");
        let (mut feed, queue) = speech.begin(&self.state);
        let Self {
            streamer,
            history,
            display,
            state,
            ..
        } = self;

        let producing = async {
            let result = streamer
                .respond(history, ResponseMode::Streamed, tool_context, display.as_ref(), Some(&mut feed))
                .await;
            feed.finish().await;
            result
        };
        let (response, drained) = tokio::join!(producing, queue.drain(state));

        tracing::info!(
            played = drained.played,
            discarded = drained.discarded,
            failed = drained.failed,
            interrupted = drained.interrupted,
            "speech finished"
        );
        response
    }

    fn refresh_system_prompt(&mut self) {
        let facts = match &self.facts {
            Some(store) if self.settings.conversation.memory_enabled => {
                store.list_facts().unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "failed to load facts");
                    Vec::new()
                })
            }
            _ => Vec::new(),
        };
        self.history
            .set_system_prompt(system_prompt(&self.settings.conversation, &facts));
    }

    async fn compact(&mut self) {
        let max = self.settings.conversation.max_history_messages;
        if max == 0 {
            return;
        }

        let summarizer = self.settings.conversation.summarize_overflow.then_some((
            self.chat.as_ref(),
            self.settings.classifier_model.as_str(),
        ));
        self.history.compact(max, summarizer).await;
    }

    /// Store the exchange; tool context never leaves memory
    fn persist(&self, user: &str, assistant: &str) {
        if let Some(sessions) = &self.sessions
            && let Err(e) = sessions.append_exchange(user, assistant)
        {
            tracing::warn!(error = %e, "failed to persist exchange");
        }
    }

    fn relisten(&self) {
        if self.state.mode() != InteractionMode::Voice || !self.settings.auto_listen {
            return;
        }
        let Some(recorder) = &self.recorder else {
            return;
        };

        match recorder.start(ListenTrigger::AutoRelisten) {
            Ok(()) => self.status("Listening..."),
            Err(e) => tracing::debug!(error = %e, "auto-listen skipped"),
        }
    }

    fn fail(&self, turn: TurnToken, error: &Error) {
        tracing::error!(error = %error, "turn failed");
        self.display
            .error(&format!("Sorry, something went wrong: {error}"));

        // An interrupt already handed the machine to a newer session
        let Some(previous) = self.state.abort_turn(turn) else {
            tracing::debug!(?turn, "failed turn was superseded, state left alone");
            return;
        };
        tracing::debug!(?previous, "state forced to idle after failure");

        if previous == RecordingState::Listening
            && let Some(recorder) = &self.recorder
        {
            recorder.endpointer().stop();
        }
        self.state.interrupt();
        if let Some(speech) = &self.speech {
            speech.player().stop();
        }
        self.status("Ready.");
    }

    fn status(&self, text: &str) {
        self.display
            .status(self.state.state(), self.state.mode(), text);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::llm::{CompletionRequest, TokenStream};
    use crate::tools::{Tool, ToolArgs, ToolRegistry, required_str};

    /// Answers by prompt fragment; the final call gets a fixed reply
    struct Brain {
        routes: Vec<(&'static str, &'static str)>,
        answer: Result<&'static str>,
        calls: Mutex<usize>,
    }

    impl Brain {
        fn new(routes: Vec<(&'static str, &'static str)>, answer: Result<&'static str>) -> Self {
            Self {
                routes,
                answer,
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatCompletion for Brain {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            let prompt = &request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            if request.temperature == 0.0 {
                return Ok(self
                    .routes
                    .iter()
                    .find(|(fragment, _)| prompt.contains(fragment))
                    .map_or("none", |(_, reply)| reply)
                    .to_string());
            }
            match &self.answer {
                Ok(text) => Ok((*text).to_string()),
                Err(e) => Err(Error::Llm(e.to_string())),
            }
        }

        async fn stream(&self, request: &CompletionRequest) -> Result<TokenStream> {
            let text = self.complete(request).await?;
            Ok(Box::pin(futures::stream::iter(vec![Ok(text)])))
        }
    }

    #[derive(Default)]
    struct Quiet(Mutex<Vec<String>>);

    impl DisplaySink for Quiet {
        fn status(&self, _: RecordingState, _: InteractionMode, _: &str) {}
        fn message(&self, role: Role, text: &str) {
            self.0.lock().unwrap().push(format!("{}: {text}", role.as_str()));
        }
        fn begin_stream(&self) {}
        fn token(&self, _: &str) {}
        fn end_stream(&self) {}
        fn error(&self, text: &str) {
            self.0.lock().unwrap().push(format!("error: {text}"));
        }
    }

    fn echo_tool() -> Tool {
        Tool::from_fn("echo", "Repeat the text", |args: &ToolArgs| {
            Ok(format!("echo: {}", required_str(args, "text")?))
        })
        .parameters(serde_json::json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        }))
    }

    fn controller(chat: Brain, mode: InteractionMode) -> (TurnController, Arc<Quiet>, Arc<RecordingStateMachine>) {
        let registry = Arc::new(ToolRegistry::builder().register(echo_tool()).build());
        let state = Arc::new(RecordingStateMachine::new(mode));
        let display = Arc::new(Quiet::default());
        let settings = TurnSettings {
            model: "main".to_string(),
            classifier_model: "small".to_string(),
            temperature: 0.7,
            conversation: ConversationConfig {
                memory_enabled: false,
                ..ConversationConfig::default()
            },
            auto_listen: false,
            speak_chat_responses: false,
        };
        let controller = TurnController::new(
            Arc::clone(&state),
            Arc::new(chat),
            ToolExecutor::new(registry),
            display.clone(),
            settings,
        );
        (controller, display, state)
    }

    #[tokio::test]
    async fn chat_turn_with_tool() {
        let brain = Brain::new(
            vec![("Available tools", "echo"), ("Extract the arguments", r#"{"text": "hello"}"#)],
            Ok("You said hello."),
        );
        let (mut controller, display, state) = controller(brain, InteractionMode::Chat);

        let response = controller.submit_text("echo hello").await;

        assert_eq!(response.as_deref(), Some("You said hello."));
        assert_eq!(state.state(), RecordingState::Idle);
        assert_eq!(controller.context().last_tools_used, vec!["echo"]);
        let roles: Vec<Role> = controller.history().conversation().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::User, Role::Assistant]);
        assert!(controller.history().conversation()[1].transient);
        assert!(display.0.lock().unwrap().contains(&"assistant: You said hello.".to_string()));
    }

    #[tokio::test]
    async fn failure_forces_idle() {
        let brain = Brain::new(vec![], Err(Error::Llm("connection refused".to_string())));
        let (mut controller, display, state) = controller(brain, InteractionMode::Chat);

        assert!(controller.submit_text("hello").await.is_none());
        assert_eq!(state.state(), RecordingState::Idle);
        let lines = display.0.lock().unwrap();
        assert!(lines.last().unwrap().starts_with("error: Sorry, something went wrong"));
    }

    #[tokio::test]
    async fn busy_machine_refuses_text() {
        let (mut controller, display, state) = controller(Brain::new(vec![], Ok("hi")), InteractionMode::Chat);
        state.begin_processing(ProcessTrigger::ChatSubmit).unwrap();

        assert!(controller.submit_text("hello").await.is_none());
        assert_eq!(state.state(), RecordingState::Processing);
        assert_eq!(display.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn silent_recording_returns_to_idle() {
        let (mut controller, _, state) = controller(Brain::new(vec![], Ok("hi")), InteractionMode::Voice);
        state.begin_listening(ListenTrigger::Manual).unwrap();
        let turn = state.begin_processing(ProcessTrigger::VadSilence).unwrap();

        let utterance = Utterance { turn, samples: None };
        assert!(controller.process_recording(utterance).await.is_none());
        assert_eq!(state.state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn superseded_failure_keeps_the_new_session() {
        let (mut controller, display, state) = controller(Brain::new(vec![], Ok("hi")), InteractionMode::Voice);
        state.begin_listening(ListenTrigger::Manual).unwrap();
        let turn = state.begin_processing(ProcessTrigger::VadSilence).unwrap();

        // Interrupted and listening again before the old turn fails
        state.force_idle();
        state.begin_listening(ListenTrigger::ResumeAfterInterrupt).unwrap();

        // No transcriber configured: the old turn fails
        let utterance = Utterance {
            turn,
            samples: Some(vec![0.1; 1600]),
        };
        assert!(controller.process_recording(utterance).await.is_none());

        assert_eq!(state.state(), RecordingState::Listening);
        assert!(display.0.lock().unwrap().last().unwrap().starts_with("error: Sorry"));
    }

    #[tokio::test]
    async fn model_change_applies_to_next_turn() {
        let (mut controller, _, _) = controller(Brain::new(vec![], Ok("hi")), InteractionMode::Chat);
        assert_eq!(controller.model(), "main");

        controller.set_model("bigger");
        assert_eq!(controller.model(), "bigger");
        assert_eq!(controller.submit_text("hello").await.as_deref(), Some("hi"));
    }
}
