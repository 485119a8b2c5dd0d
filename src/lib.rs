//! Parley - a local voice assistant
//!
//! This library provides the core of the assistant:
//! - Voice capture with inline endpointing, transcription, and speech output
//! - A recording state machine shared by the input and turn tasks
//! - Intent planning and tool execution
//! - Streamed responses segmented into sentences for synthesis
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Front ends                        │
//! │   Microphone  │  Terminal input  │  Terminal display │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                    Parley                            │
//! │   Endpointer │ State machine │ Turn controller       │
//! │   Planner    │ Tools         │ Speech pipeline       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │        OpenAI-compatible server (local or remote)    │
//! │   Chat  │  Classifier  │  Vision  │  STT  │  TTS     │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod daemon;
pub mod db;
pub mod display;
pub mod error;
pub mod llm;
pub mod planner;
pub mod state;
pub mod tools;
pub mod turn;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use state::{InteractionMode, RecordingState, RecordingStateMachine, TurnToken};
pub use tools::{ToolExecutor, ToolRegistry};
pub use turn::{TurnController, TurnSettings};
