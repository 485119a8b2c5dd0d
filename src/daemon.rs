//! Daemon - wires the adapters together and runs the event loop
//!
//! One loop multiplexes terminal input, auto-stop events from the audio
//! callback, mode requests from the self-control tool, and ctrl-c. Turns run
//! on spawned tasks behind the controller lock, so the loop stays free to
//! interrupt speech or stop a recording while a turn is in flight. Model
//! changes queue on the same lock and land between turns.

use std::sync::Arc;

use tokio::io::AsyncBufReadExt;
use tokio::sync::{Mutex, mpsc};

use crate::config::Config;
use crate::llm::Role;
use crate::db::{self, DbPool, FactRepo, SessionRepo};
use crate::display::{DisplaySink, TerminalDisplay};
use crate::llm::{OpenAiChat, OpenAiVision};
use crate::state::{InteractionMode, ListenTrigger, ProcessTrigger, RecordingState, RecordingStateMachine};
use crate::tools::{ToolExecutor, default_registry};
use crate::turn::{Recorder, SwitchEffects, TurnController, TurnSettings};
use crate::voice::synthesis::SpeechPipeline;
use crate::voice::{
    AudioCapture, AudioEndpointer, AutoStop, CpalPlayer, EnergyVad, OpenAiSpeech, WhisperTranscriber,
};
use crate::{Error, Result};

/// Database file name inside the data directory
pub const DB_FILE: &str = "parley.db";

/// A line typed into the terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Quit,
    ToggleMode,
    SetMode(InteractionMode),
    /// Empty line: start, stop, or interrupt
    PushToTalk,
    /// `/model` lists models, `/model <name>` switches the response model
    Model(Option<String>),
    Text(String),
}

impl InputCommand {
    #[must_use]
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" => Self::PushToTalk,
            "/quit" | "/exit" => Self::Quit,
            "/mode" => Self::ToggleMode,
            "/voice" => Self::SetMode(InteractionMode::Voice),
            "/chat" => Self::SetMode(InteractionMode::Chat),
            "/model" => Self::Model(None),
            text => match text.strip_prefix("/model ") {
                Some(name) => Self::Model(Some(name.trim().to_string())),
                None => Self::Text(text.to_string()),
            },
        }
    }
}

/// Audio side of the assistant
struct VoiceIo {
    recorder: Arc<Recorder>,
    speech: SpeechPipeline,
    capture: AudioCapture,
}

/// The Parley daemon
pub struct Daemon {
    config: Config,
    db: DbPool,
}

impl Daemon {
    /// Create a daemon with its database opened
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be initialized
    pub fn new(config: Config) -> Result<Self> {
        let db_path = config.data_dir.join(DB_FILE);
        let db = db::init(&db_path)?;
        tracing::info!(path = %db_path.display(), "database initialized");

        Ok(Self { config, db })
    }

    /// Run until `/quit`, end of input, or ctrl-c
    ///
    /// With `audio` off only chat mode is available.
    ///
    /// # Errors
    ///
    /// Returns error if an adapter or the audio devices fail to start
    #[allow(clippy::future_not_send)]
    pub async fn run(self, mode: InteractionMode, audio: bool) -> Result<()> {
        let config = &self.config;
        let mode = if audio { mode } else { InteractionMode::Chat };

        let chat = Arc::new(OpenAiChat::new(&config.llm.base_url, config.llm.api_key.clone())?);
        chat.check_connection(&config.llm.model).await?;
        let state = Arc::new(RecordingStateMachine::new(mode));

        let (mode_tx, mut mode_rx) = mpsc::unbounded_channel();
        let terminal = Arc::new(
            TerminalDisplay::new(
                config.conversation.assistant_name.clone(),
                config.conversation.user_name.clone().unwrap_or_else(|| "You".to_string()),
            )
            .with_mode_requests(mode_tx),
        );
        let display: Arc<dyn DisplaySink> = terminal.clone();

        let sessions = Arc::new(SessionRepo::start(self.db.clone())?);
        let facts = Arc::new(FactRepo::new(self.db.clone()));

        let registry = Arc::new(default_registry(&config.tools, facts.clone(), terminal.clone()));
        tracing::info!(tools = registry.len(), "tool registry ready");

        let vision = Arc::new(OpenAiVision::new(
            &config.llm.base_url,
            config.llm.api_key.clone(),
            config.llm.vision_model.clone(),
        )?);
        let executor = ToolExecutor::new(registry)
            .with_vision(vision)
            .with_ui(terminal.clone());

        let mut controller = TurnController::new(
            Arc::clone(&state),
            chat.clone(),
            executor,
            Arc::clone(&display),
            TurnSettings::from_config(config),
        )
        .with_sessions(sessions)
        .with_facts(facts)
        .with_muted(terminal.muted());

        let (auto_tx, mut auto_rx) = mpsc::unbounded_channel();
        let voice = if audio {
            let voice = self.start_voice(&state, auto_tx)?;
            controller = controller
                .with_speech(voice.speech.clone())
                .with_recorder(Arc::clone(&voice.recorder))
                .with_transcriber(Arc::new(WhisperTranscriber::new(
                    &config.voice.base_url,
                    config.llm.api_key.clone(),
                    config.voice.stt_model.clone(),
                )?));
            Some(voice)
        } else {
            drop(auto_tx);
            None
        };

        controller.restore_history();
        let controller = Arc::new(Mutex::new(controller));

        let mut input = spawn_input_reader();
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        let events = EventLoop {
            state,
            display,
            controller: Arc::clone(&controller),
            chat,
            voice: voice.as_ref(),
            keep_speaking: config.voice.keep_speaking_on_mode_switch,
        };
        events.ready();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                line = input.recv() => {
                    let Some(line) = line else {
                        tracing::info!("input closed");
                        break;
                    };
                    if !events.handle_input(InputCommand::parse(&line)).await {
                        break;
                    }
                }
                Some(stop) = auto_rx.recv() => events.handle_auto_stop(stop),
                Some(target) = mode_rx.recv() => events.switch_mode(target).await,
            }
        }

        let state = Arc::clone(&events.state);
        drop(events);
        if let Some(mut voice) = voice {
            voice.speech.interrupt(&state);
            voice.capture.stop();
        }
        controller.lock().await.shutdown().await;

        tracing::info!("parley stopped");
        Ok(())
    }

    fn start_voice(
        &self,
        state: &Arc<RecordingStateMachine>,
        auto_tx: mpsc::UnboundedSender<AutoStop>,
    ) -> Result<VoiceIo> {
        let voice = &self.config.voice;

        let synthesizer = Arc::new(OpenAiSpeech::new(
            &voice.base_url,
            self.config.llm.api_key.clone(),
            voice.tts_model.clone(),
            voice.tts_voice.clone(),
            voice.tts_speed,
        )?);
        let speech = SpeechPipeline::new(synthesizer, Arc::new(CpalPlayer::new()));

        let endpointer = Arc::new(
            AudioEndpointer::new(Box::new(EnergyVad::default()), voice.endpoint)
                .with_auto_stop_sender(auto_tx),
        );
        let mut capture = AudioCapture::new()?;
        capture.start(Arc::clone(&endpointer))?;

        tracing::info!(
            threshold = voice.endpoint.vad_threshold,
            silence = ?voice.endpoint.silence_duration,
            timeout = ?voice.endpoint.listening_timeout,
            "audio started"
        );

        Ok(VoiceIo {
            recorder: Arc::new(Recorder::new(Arc::clone(state), endpointer)),
            speech,
            capture,
        })
    }
}

/// Stdin lines forwarded from a reader task
fn spawn_input_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read input");
                    break;
                }
            }
        }
    });
    rx
}

struct EventLoop<'a> {
    state: Arc<RecordingStateMachine>,
    display: Arc<dyn DisplaySink>,
    controller: Arc<Mutex<TurnController>>,
    chat: Arc<OpenAiChat>,
    voice: Option<&'a VoiceIo>,
    keep_speaking: bool,
}

impl EventLoop<'_> {
    fn ready(&self) {
        let hint = match (self.state.mode(), self.voice.is_some()) {
            (InteractionMode::Voice, _) => "Press Enter to talk. /chat, /mode, /model, or /quit.",
            (InteractionMode::Chat, true) => "Type a message. /voice, /mode, /model, or /quit.",
            (InteractionMode::Chat, false) => "Type a message. /model or /quit.",
        };
        self.status(hint);
    }

    /// Returns false when the loop should stop
    async fn handle_input(&self, command: InputCommand) -> bool {
        match command {
            InputCommand::Quit => return false,
            InputCommand::ToggleMode => self.switch_mode(self.state.mode().toggled()).await,
            InputCommand::SetMode(target) => self.switch_mode(target).await,
            InputCommand::PushToTalk => self.push_to_talk(),
            InputCommand::Model(name) => self.change_model(name),
            InputCommand::Text(text) => {
                let controller = Arc::clone(&self.controller);
                tokio::spawn(async move {
                    controller.lock().await.submit_text(&text).await;
                });
            }
        }
        true
    }

    fn push_to_talk(&self) {
        let Some(voice) = self.voice else {
            return;
        };
        if self.state.mode() != InteractionMode::Voice {
            return;
        }

        // Interrupting never waits for the turn that is speaking
        if self.state.is_speaking() {
            voice.speech.interrupt(&self.state);
            self.state.force_idle();
            self.start_listening(voice, ListenTrigger::ResumeAfterInterrupt);
            return;
        }

        match self.state.state() {
            RecordingState::Idle => self.start_listening(voice, ListenTrigger::Manual),
            RecordingState::Listening => self.finish_listening(voice, ProcessTrigger::ManualStop),
            RecordingState::Processing => self.status("Still thinking..."),
        }
    }

    fn handle_auto_stop(&self, stop: AutoStop) {
        let Some(voice) = self.voice else {
            return;
        };
        tracing::info!(?stop, "auto-stop");

        match stop {
            AutoStop::Silence => self.finish_listening(voice, ProcessTrigger::VadSilence),
            AutoStop::Timeout => {
                if voice.recorder.abandon() {
                    self.status("No speech detected.");
                }
            }
        }
    }

    fn start_listening(&self, voice: &VoiceIo, trigger: ListenTrigger) {
        match voice.recorder.start(trigger) {
            Ok(()) => self.status("Listening..."),
            Err(e) => tracing::debug!(error = %e, "listen request ignored"),
        }
    }

    fn finish_listening(&self, voice: &VoiceIo, trigger: ProcessTrigger) {
        let utterance = match voice.recorder.finish(trigger) {
            Ok(utterance) => utterance,
            // A manual stop and an auto-stop can race; the loser lands here
            Err(e) => {
                tracing::debug!(error = %e, "stop request ignored");
                return;
            }
        };

        self.status("Thinking...");
        let controller = Arc::clone(&self.controller);
        tokio::spawn(async move {
            controller.lock().await.process_recording(utterance).await;
        });
    }

    /// List models, or switch once the running turn releases the controller
    fn change_model(&self, requested: Option<String>) {
        let chat = Arc::clone(&self.chat);
        let controller = Arc::clone(&self.controller);
        let display = Arc::clone(&self.display);

        tokio::spawn(async move {
            let available = match chat.list_models().await {
                Ok(models) => models,
                Err(e) => {
                    display.error(&format!("Couldn't list models: {e}"));
                    return;
                }
            };

            let Some(requested) = requested else {
                let current = controller.lock().await.model().to_string();
                display.message(Role::System, &model_list(&available, &current));
                return;
            };

            match resolve_model(&available, &requested) {
                Ok(model) => {
                    controller.lock().await.set_model(model.as_str());
                    display.message(Role::System, &format!("Now answering with {model}."));
                }
                Err(e) => display.error(&e.to_string()),
            }
        });
    }

    async fn switch_mode(&self, target: InteractionMode) {
        if target == InteractionMode::Voice && self.voice.is_none() {
            self.display.error("Voice mode needs audio devices.");
            return;
        }

        let effects = SwitchEffects {
            recorder: self.voice.map(|v| v.recorder.as_ref()),
            speech: self.voice.map(|v| &v.speech),
        };
        if self.state.switch_mode(target, self.keep_speaking, &effects).await {
            self.ready();
        }
    }

    fn status(&self, text: &str) {
        self.display
            .status(self.state.state(), self.state.mode(), text);
    }
}

/// Match a requested name against the server's models
///
/// An untagged name matches its `:latest` tag, or its only tagged variant.
fn resolve_model(available: &[String], requested: &str) -> Result<String> {
    if available.iter().any(|m| m == requested) {
        return Ok(requested.to_string());
    }

    let prefix = format!("{requested}:");
    let tagged: Vec<&String> = available.iter().filter(|m| m.starts_with(&prefix)).collect();
    let latest = format!("{requested}:latest");

    match tagged.as_slice() {
        [only] => Ok((*only).clone()),
        [] => Err(Error::Config(format!("unknown model '{requested}', see /model"))),
        many => many
            .iter()
            .find(|m| **m == &latest)
            .map(|m| (*m).clone())
            .ok_or_else(|| {
                Error::Config(format!(
                    "'{requested}' is ambiguous: {}",
                    many.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ")
                ))
            }),
    }
}

/// Available models with the current one marked
fn model_list(available: &[String], current: &str) -> String {
    if available.is_empty() {
        return "The server lists no models.".to_string();
    }

    let lines: Vec<String> = available
        .iter()
        .map(|m| {
            let marker = if m == current { '*' } else { ' ' };
            format!("{marker} {m}")
        })
        .collect();
    format!("Models (/model <name> to switch):\n{}", lines.join("\n"))
}
