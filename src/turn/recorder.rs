//! Recording sessions: state transitions paired with endpointer start/stop

use std::sync::Arc;

use crate::Result;
use crate::state::{ListenTrigger, ModeSwitchEffects, ProcessTrigger, RecordingStateMachine, TurnToken};
use crate::voice::AudioEndpointer;
use crate::voice::synthesis::SpeechPipeline;

/// A finished recording and the turn that will process it
#[derive(Debug)]
pub struct Utterance {
    pub turn: TurnToken,
    /// `None` when nothing was recorded
    pub samples: Option<Vec<f32>>,
}

/// Starts and stops listening sessions
///
/// The state transition always happens first so a rejected transition
/// never touches the endpointer.
pub struct Recorder {
    state: Arc<RecordingStateMachine>,
    endpointer: Arc<AudioEndpointer>,
}

impl Recorder {
    #[must_use]
    pub const fn new(state: Arc<RecordingStateMachine>, endpointer: Arc<AudioEndpointer>) -> Self {
        Self { state, endpointer }
    }

    #[must_use]
    pub fn endpointer(&self) -> &Arc<AudioEndpointer> {
        &self.endpointer
    }

    /// Enter `Listening` and start buffering audio
    ///
    /// # Errors
    ///
    /// Returns error if the machine is not idle
    pub fn start(&self, trigger: ListenTrigger) -> Result<()> {
        self.state.begin_listening(trigger)?;
        self.endpointer.start();
        tracing::info!(?trigger, "listening started");
        Ok(())
    }

    /// Enter `Processing` and take the buffered audio
    ///
    /// # Errors
    ///
    /// Returns error if the machine is not listening
    pub fn finish(&self, trigger: ProcessTrigger) -> Result<Utterance> {
        let turn = self.state.begin_processing(trigger)?;
        let samples = self.endpointer.stop();
        tracing::info!(
            ?trigger,
            samples = samples.as_ref().map_or(0, Vec::len),
            "listening stopped"
        );
        Ok(Utterance { turn, samples })
    }

    /// Discard the session and return to `Idle`
    ///
    /// Returns whether a session was active.
    pub fn abandon(&self) -> bool {
        self.endpointer.stop();
        self.state.abandon_listening()
    }
}

/// Side effects of a mode switch over the live recorder and speech pipeline
pub struct SwitchEffects<'a> {
    pub recorder: Option<&'a Recorder>,
    pub speech: Option<&'a SpeechPipeline>,
}

impl ModeSwitchEffects for SwitchEffects<'_> {
    fn stop_recording(&self) {
        if let Some(recorder) = self.recorder {
            let discarded = recorder.endpointer.stop();
            tracing::debug!(had_audio = discarded.is_some(), "recording stopped for mode switch");
        }
    }

    fn stop_speech(&self) {
        if let Some(speech) = self.speech {
            speech.player().stop();
        }
    }
}
