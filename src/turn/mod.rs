//! Turn pipeline: history, response generation, memory, and orchestration

mod controller;
pub mod history;
mod memory;
mod recorder;
mod streamer;

pub use controller::{TurnController, TurnSettings};
pub use history::{ConversationHistory, SUMMARY_HEADER, system_prompt};
pub use memory::{FactExtractor, SHUTDOWN_JOIN_TIMEOUT};
pub use recorder::{Recorder, SwitchEffects, Utterance};
pub use streamer::{FALLBACK_RESPONSE, ResponseMode, ResponseStreamer};
