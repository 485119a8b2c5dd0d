//! Shared test utilities: scripted fakes for every port

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use parley::config::ConversationConfig;
use parley::db::{self, FactRepo, SessionRepo};
use parley::display::DisplaySink;
use parley::llm::{ChatCompletion, CompletionRequest, Role, TokenStream};
use parley::tools::{UiAction, UiControl};
use parley::voice::{AudioClip, ClipPlayer, SAMPLE_RATE, SpeechSynthesizer, Transcriber};
use parley::{Error, InteractionMode, RecordingState, Result, TurnSettings};

/// Chat model that answers classifier calls by prompt fragment and final
/// calls from a queue
#[derive(Default)]
pub struct ScriptedChat {
    routes: Vec<(String, String)>,
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedChat {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifier prompts containing `fragment` get `reply`; first match wins
    #[must_use]
    pub fn route(mut self, fragment: &str, reply: &str) -> Self {
        self.routes.push((fragment.to_string(), reply.to_string()));
        self
    }

    /// Queue the next final response
    #[must_use]
    pub fn reply(self, text: &str) -> Self {
        self.replies.lock().unwrap().push_back(text.to_string());
        self
    }

    /// Every request seen so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests for the final response, classifier calls excluded
    pub fn final_requests(&self) -> Vec<CompletionRequest> {
        self.requests()
            .into_iter()
            .filter(|r| !is_classifier(r))
            .collect()
    }

    fn answer(&self, request: &CompletionRequest) -> String {
        self.requests.lock().unwrap().push(request.clone());

        if is_classifier(request) {
            let prompt = request
                .messages
                .last()
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            return self
                .routes
                .iter()
                .find(|(fragment, _)| prompt.contains(fragment.as_str()))
                .map_or_else(|| "none".to_string(), |(_, reply)| reply.clone());
        }

        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default()
    }
}

fn is_classifier(request: &CompletionRequest) -> bool {
    request.temperature <= f32::EPSILON
}

#[async_trait]
impl ChatCompletion for ScriptedChat {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        Ok(self.answer(request))
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<TokenStream> {
        let text = self.answer(request);
        let deltas: Vec<Result<String>> = text
            .split_inclusive(' ')
            .map(|d| Ok(d.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(deltas)))
    }
}

/// Synthesizer that records what it was asked to say
#[derive(Default)]
pub struct EchoSynth {
    pub spoken: Mutex<Vec<String>>,
}

#[async_trait]
impl SpeechSynthesizer for EchoSynth {
    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(AudioClip::new(vec![0.0; 160], SAMPLE_RATE))
    }
}

/// Player that takes `play_time` per clip and honors stop like a device
pub struct FakePlayer {
    play_time: Duration,
    stopped: AtomicBool,
    started: Mutex<usize>,
}

impl FakePlayer {
    #[must_use]
    pub fn new(play_time: Duration) -> Self {
        Self {
            play_time,
            stopped: AtomicBool::new(false),
            started: Mutex::new(0),
        }
    }

    /// Clips that began playing
    pub fn started(&self) -> usize {
        *self.started.lock().unwrap()
    }
}

#[async_trait]
impl ClipPlayer for FakePlayer {
    async fn play(&self, _clip: AudioClip) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(());
        }
        *self.started.lock().unwrap() += 1;

        let step = Duration::from_millis(5);
        let mut elapsed = Duration::ZERO;
        while elapsed < self.play_time && !self.stopped.load(Ordering::SeqCst) {
            tokio::time::sleep(step).await;
            elapsed += step;
        }
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn rearm(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }
}

/// Something the display was told
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    Status(RecordingState, InteractionMode, String),
    Message(Role, String),
    BeginStream,
    Token(String),
    EndStream,
    Tool(String, String),
    Error(String),
}

/// Display that records every notification
#[derive(Default)]
pub struct RecordingDisplay {
    pub events: Mutex<Vec<DisplayEvent>>,
}

impl RecordingDisplay {
    fn record(&self, event: DisplayEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<DisplayEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Concatenated streamed tokens
    pub fn streamed(&self) -> String {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DisplayEvent::Token(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DisplayEvent::Error(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn tools(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DisplayEvent::Tool(name, _) => Some(name),
                _ => None,
            })
            .collect()
    }
}

impl DisplaySink for RecordingDisplay {
    fn status(&self, state: RecordingState, mode: InteractionMode, text: &str) {
        self.record(DisplayEvent::Status(state, mode, text.to_string()));
    }

    fn message(&self, role: Role, text: &str) {
        self.record(DisplayEvent::Message(role, text.to_string()));
    }

    fn begin_stream(&self) {
        self.record(DisplayEvent::BeginStream);
    }

    fn token(&self, text: &str) {
        self.record(DisplayEvent::Token(text.to_string()));
    }

    fn end_stream(&self) {
        self.record(DisplayEvent::EndStream);
    }

    fn tool_activity(&self, tool: &str, preview: &str) {
        self.record(DisplayEvent::Tool(tool.to_string(), preview.to_string()));
    }

    fn error(&self, text: &str) {
        self.record(DisplayEvent::Error(text.to_string()));
    }
}

/// Transcriber with a fixed answer
pub struct FixedTranscriber(pub Option<String>);

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, wav: &[u8]) -> Result<Option<String>> {
        assert!(!wav.is_empty(), "transcriber got no audio");
        Ok(self.0.clone())
    }
}

/// Interface port for tests that never change the interface
pub struct NoUi;

impl UiControl for NoUi {
    fn apply(&self, action: &UiAction) -> Result<String> {
        Err(Error::Tool(format!("no interface for {}", action.name())))
    }
}

/// In-memory session and fact stores
#[must_use]
pub fn memory_stores() -> (Arc<SessionRepo>, Arc<FactRepo>) {
    let pool = db::init_memory().expect("failed to init test db");
    let sessions = SessionRepo::start(pool.clone()).expect("failed to start session");
    (Arc::new(sessions), Arc::new(FactRepo::new(pool)))
}

/// Turn settings with auto-listen off
#[must_use]
pub fn settings(memory_enabled: bool) -> TurnSettings {
    TurnSettings {
        model: "main".to_string(),
        classifier_model: "small".to_string(),
        temperature: 0.7,
        conversation: ConversationConfig {
            memory_enabled,
            ..ConversationConfig::default()
        },
        auto_listen: false,
        speak_chat_responses: false,
    }
}

/// Generate sine wave audio samples
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn sine(frequency: f32, samples: usize, amplitude: f32) -> Vec<f32> {
    (0..samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
#[must_use]
pub fn silence(samples: usize) -> Vec<f32> {
    vec![0.0; samples]
}
