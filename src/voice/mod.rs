//! Voice processing module
//!
//! Microphone capture with inline endpointing, transcription, sentence
//! segmentation, synthesis, and clip playback.

mod capture;
mod endpointer;
mod playback;
mod segmenter;
mod stt;
pub mod synthesis;
mod tts;
mod vad;

use std::time::Duration;

use async_trait::async_trait;

pub use capture::{AudioCapture, samples_to_wav};
pub use endpointer::{AudioEndpointer, AutoStop, VadWindowState};
pub use playback::{CpalPlayer, decode_mp3, resample};
pub use segmenter::{MIN_SENTENCE_CHARS, SentenceChunk, SentenceSegmenter};
pub use stt::WhisperTranscriber;
pub use tts::OpenAiSpeech;
pub use vad::{EnergyVad, VAD_WINDOW_SAMPLES, VoiceActivityModel, calculate_energy};

use crate::Result;

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Mono audio held in memory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioClip {
    /// Samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioClip {
    /// Create a clip
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playback length
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Whether the clip has no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Converts recorded speech to text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV audio
    ///
    /// Returns `None` when nothing intelligible was said.
    ///
    /// # Errors
    ///
    /// Returns error if the transcription backend fails
    async fn transcribe(&self, wav: &[u8]) -> Result<Option<String>>;
}

/// Turns text into audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize one sentence
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or decoding fails
    async fn synthesize(&self, text: &str) -> Result<AudioClip>;
}

/// Plays clips to the speakers
#[async_trait]
pub trait ClipPlayer: Send + Sync {
    /// Play a clip to completion, or until [`ClipPlayer::stop`] is called
    ///
    /// Returns immediately while stopped.
    ///
    /// # Errors
    ///
    /// Returns error if the output device fails
    async fn play(&self, clip: AudioClip) -> Result<()>;

    /// Halt the clip currently playing and refuse new ones until re-armed
    fn stop(&self);

    /// Accept clips again after a stop
    fn rearm(&self);
}
