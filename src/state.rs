//! Recording state machine
//!
//! Owns `{Idle, Listening, Processing}`, the orthogonal `{Voice, Chat}` mode,
//! and the `is_speaking` overlay. All state writes happen under the state
//! lock; reads are lock-free snapshots.
//!
//! Every entry into `Processing` hands out a [`TurnToken`]. Forcing the
//! machine to `Idle` retires the outstanding token, so a turn that was
//! interrupted can no longer end the session that replaced it.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use crate::{Error, Result};

/// Recording state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordingState {
    /// Not recording, waiting for activation
    Idle,
    /// Actively recording and endpointing
    Listening,
    /// Running the turn pipeline
    Processing,
}

impl RecordingState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Listening => 1,
            Self::Processing => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Listening,
            2 => Self::Processing,
            _ => Self::Idle,
        }
    }
}

/// Interaction mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionMode {
    /// Voice input/output
    Voice,
    /// Text input/output
    Chat,
}

impl InteractionMode {
    /// The other mode
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Voice => Self::Chat,
            Self::Chat => Self::Voice,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Voice => 0,
            Self::Chat => 1,
        }
    }

    const fn from_u8(value: u8) -> Self {
        if value == 1 { Self::Chat } else { Self::Voice }
    }
}

impl std::fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Voice => f.write_str("voice"),
            Self::Chat => f.write_str("chat"),
        }
    }
}

impl std::str::FromStr for InteractionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "voice" => Ok(Self::Voice),
            "chat" | "text" => Ok(Self::Chat),
            other => Err(Error::Config(format!("unknown interaction mode: {other}"))),
        }
    }
}

/// Why listening started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenTrigger {
    /// User pressed the push-to-talk key
    Manual,
    /// Automatic follow-up after a voice response
    AutoRelisten,
    /// User interrupted speech playback
    ResumeAfterInterrupt,
}

/// Why processing started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessTrigger {
    /// User pressed the push-to-talk key while listening
    ManualStop,
    /// Endpointer detected end of speech
    VadSilence,
    /// Text submitted in chat mode
    ChatSubmit,
}

/// Identifies one turn from `begin_processing` until it ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnToken(u64);

/// Side effects a mode switch must apply to the rest of the system
pub trait ModeSwitchEffects: Sync {
    /// Stop and discard any active recording
    fn stop_recording(&self);

    /// Halt speech playback immediately
    fn stop_speech(&self);
}

/// Gatekeeper for every recording state transition
pub struct RecordingStateMachine {
    state: AtomicU8,
    mode: AtomicU8,
    speaking: AtomicBool,
    /// Bumped by every `begin_processing` and every forced reset
    epoch: AtomicU64,
    state_lock: Mutex<()>,
    mode_lock: tokio::sync::Mutex<()>,
}

impl RecordingStateMachine {
    /// Create a machine in `Idle` with the given mode
    #[must_use]
    pub fn new(mode: InteractionMode) -> Self {
        Self {
            state: AtomicU8::new(RecordingState::Idle.as_u8()),
            mode: AtomicU8::new(mode.as_u8()),
            speaking: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            state_lock: Mutex::new(()),
            mode_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Current state (best-effort snapshot)
    #[must_use]
    pub fn state(&self) -> RecordingState {
        RecordingState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Current mode (best-effort snapshot)
    #[must_use]
    pub fn mode(&self) -> InteractionMode {
        InteractionMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Whether speech playback is active
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Acquire)
    }

    /// Mark speech playback as started or finished
    pub fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::Release);
    }

    /// Clear the speaking flag, returning whether it was set
    ///
    /// This is the only interrupt signal the playback loop observes.
    pub fn interrupt(&self) -> bool {
        self.speaking.swap(false, Ordering::AcqRel)
    }

    /// `Idle -> Listening`
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the machine is idle
    pub fn begin_listening(&self, trigger: ListenTrigger) -> Result<()> {
        self.transition(|from| match from {
            RecordingState::Idle => Ok(RecordingState::Listening),
            _ => Err("listening may only start from idle"),
        })?;
        tracing::debug!(?trigger, "state: listening");
        Ok(())
    }

    /// `Listening -> Processing` (manual stop, VAD) or `Idle -> Processing` (chat)
    ///
    /// Returns the token that identifies the new turn.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the trigger doesn't match the current state
    pub fn begin_processing(&self, trigger: ProcessTrigger) -> Result<TurnToken> {
        let guard = self.lock_state();
        self.apply(|from| match (from, trigger) {
            (RecordingState::Listening, ProcessTrigger::ManualStop | ProcessTrigger::VadSilence)
            | (RecordingState::Idle, ProcessTrigger::ChatSubmit) => Ok(RecordingState::Processing),
            (RecordingState::Processing, _) => Err("a turn is already processing"),
            (_, ProcessTrigger::ChatSubmit) => Err("chat submit requires idle"),
            _ => Err("processing requires an active listening session"),
        })?;
        let turn = self.advance_epoch();
        drop(guard);

        tracing::debug!(?trigger, ?turn, "state: processing");
        Ok(turn)
    }

    /// `Listening -> Idle` when the session ends without an utterance
    ///
    /// Returns false if the machine was not listening.
    pub fn abandon_listening(&self) -> bool {
        self.transition(|from| match from {
            RecordingState::Listening => Ok(RecordingState::Idle),
            _ => Err("not listening"),
        })
        .is_ok()
    }

    /// `Processing -> Idle` once `turn` has delivered its response
    ///
    /// Returns false and changes nothing when `turn` was retired by a forced
    /// reset, whatever session or turn replaced it.
    pub fn finish_processing(&self, turn: TurnToken) -> bool {
        let _guard = self.lock_state();
        if !self.is_current(turn) {
            tracing::debug!(?turn, "stale turn finished, state left alone");
            return false;
        }
        self.apply(|from| match from {
            RecordingState::Processing => Ok(RecordingState::Idle),
            _ => Err("not processing"),
        })
        .is_ok()
    }

    /// Force `Idle` on behalf of a failed `turn`
    ///
    /// Returns the state that was replaced, or `None` if `turn` is stale.
    pub fn abort_turn(&self, turn: TurnToken) -> Option<RecordingState> {
        let _guard = self.lock_state();
        if !self.is_current(turn) {
            return None;
        }
        let previous = self.state();
        self.reset();
        Some(previous)
    }

    /// Force `Idle` from any state, returning the previous state
    ///
    /// Retires the outstanding turn token.
    pub fn force_idle(&self) -> RecordingState {
        let _guard = self.lock_state();
        let previous = self.state();
        self.reset();
        previous
    }

    /// Switch interaction mode under the mode lock
    ///
    /// Stops any active recording, stops speech unless `keep_speaking` is
    /// set, and resets to `Idle` before the new mode becomes visible.
    /// Returns false if the machine was already in `target`.
    pub async fn switch_mode(
        &self,
        target: InteractionMode,
        keep_speaking: bool,
        effects: &dyn ModeSwitchEffects,
    ) -> bool {
        let _mode_guard = self.mode_lock.lock().await;

        if self.mode() == target {
            return false;
        }

        if self.state() == RecordingState::Listening {
            effects.stop_recording();
        }

        if !keep_speaking && self.interrupt() {
            effects.stop_speech();
        }

        let previous = self.force_idle();
        self.mode.store(target.as_u8(), Ordering::Release);

        tracing::info!(mode = %target, ?previous, "interaction mode switched");
        true
    }

    fn transition(
        &self,
        rule: impl FnOnce(RecordingState) -> std::result::Result<RecordingState, &'static str>,
    ) -> Result<()> {
        let _guard = self.lock_state();
        self.apply(rule)
    }

    /// Caller holds the state lock
    fn apply(
        &self,
        rule: impl FnOnce(RecordingState) -> std::result::Result<RecordingState, &'static str>,
    ) -> Result<()> {
        let from = self.state();
        let to = rule(from).map_err(|reason| Error::InvalidTransition { from, reason })?;
        self.state.store(to.as_u8(), Ordering::Release);
        Ok(())
    }

    /// Caller holds the state lock
    fn reset(&self) {
        self.state
            .store(RecordingState::Idle.as_u8(), Ordering::Release);
        self.advance_epoch();
    }

    fn advance_epoch(&self) -> TurnToken {
        TurnToken(self.epoch.fetch_add(1, Ordering::AcqRel) + 1)
    }

    fn is_current(&self, turn: TurnToken) -> bool {
        self.epoch.load(Ordering::Acquire) == turn.0
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ()> {
        // The guard protects no data, so a poisoned lock is still usable
        self.state_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Default)]
    struct CountingEffects {
        recordings_stopped: AtomicUsize,
        speech_stopped: AtomicUsize,
    }

    impl ModeSwitchEffects for CountingEffects {
        fn stop_recording(&self) {
            self.recordings_stopped.fetch_add(1, Ordering::SeqCst);
        }

        fn stop_speech(&self) {
            self.speech_stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn voice_turn_cycle() {
        let machine = RecordingStateMachine::new(InteractionMode::Voice);
        assert_eq!(machine.state(), RecordingState::Idle);

        machine.begin_listening(ListenTrigger::Manual).unwrap();
        assert_eq!(machine.state(), RecordingState::Listening);

        let turn = machine.begin_processing(ProcessTrigger::VadSilence).unwrap();
        assert_eq!(machine.state(), RecordingState::Processing);

        assert!(machine.finish_processing(turn));
        assert_eq!(machine.state(), RecordingState::Idle);

        // A finished turn cannot finish twice
        assert!(!machine.finish_processing(turn));
    }

    #[test]
    fn listening_only_from_idle() {
        let machine = RecordingStateMachine::new(InteractionMode::Voice);
        machine.begin_listening(ListenTrigger::Manual).unwrap();

        let err = machine.begin_listening(ListenTrigger::AutoRelisten).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: RecordingState::Listening,
                ..
            }
        ));

        machine.begin_processing(ProcessTrigger::ManualStop).unwrap();
        assert!(machine.begin_listening(ListenTrigger::Manual).is_err());
    }

    #[test]
    fn processing_entry_rules() {
        let machine = RecordingStateMachine::new(InteractionMode::Chat);

        // VAD stop without a session is rejected
        assert!(machine.begin_processing(ProcessTrigger::VadSilence).is_err());

        machine.begin_processing(ProcessTrigger::ChatSubmit).unwrap();
        assert!(machine.begin_processing(ProcessTrigger::ChatSubmit).is_err());
    }

    #[test]
    fn finish_does_not_clobber_new_session() {
        let machine = RecordingStateMachine::new(InteractionMode::Voice);
        machine.begin_listening(ListenTrigger::Manual).unwrap();
        let old = machine.begin_processing(ProcessTrigger::ManualStop).unwrap();

        // Interrupt path: force idle and resume listening mid-turn
        machine.force_idle();
        machine
            .begin_listening(ListenTrigger::ResumeAfterInterrupt)
            .unwrap();

        assert!(!machine.finish_processing(old));
        assert_eq!(machine.state(), RecordingState::Listening);
    }

    #[test]
    fn stale_turn_leaves_newer_turn_processing() {
        let machine = RecordingStateMachine::new(InteractionMode::Voice);
        machine.begin_listening(ListenTrigger::Manual).unwrap();
        let old = machine.begin_processing(ProcessTrigger::VadSilence).unwrap();

        machine.force_idle();
        machine
            .begin_listening(ListenTrigger::ResumeAfterInterrupt)
            .unwrap();
        let new = machine.begin_processing(ProcessTrigger::VadSilence).unwrap();
        assert_ne!(old, new);

        assert!(!machine.finish_processing(old));
        assert_eq!(machine.abort_turn(old), None);
        assert_eq!(machine.state(), RecordingState::Processing);

        assert!(machine.finish_processing(new));
        assert_eq!(machine.state(), RecordingState::Idle);
    }

    #[test]
    fn abort_resets_current_turn_only() {
        let machine = RecordingStateMachine::new(InteractionMode::Chat);
        let turn = machine.begin_processing(ProcessTrigger::ChatSubmit).unwrap();

        assert_eq!(machine.abort_turn(turn), Some(RecordingState::Processing));
        assert_eq!(machine.state(), RecordingState::Idle);
        assert_eq!(machine.abort_turn(turn), None);
    }

    #[tokio::test]
    async fn mode_switch_retires_the_running_turn() {
        let machine = RecordingStateMachine::new(InteractionMode::Chat);
        let turn = machine.begin_processing(ProcessTrigger::ChatSubmit).unwrap();

        assert!(
            machine
                .switch_mode(InteractionMode::Voice, false, &CountingEffects::default())
                .await
        );
        machine.begin_listening(ListenTrigger::Manual).unwrap();

        assert!(!machine.finish_processing(turn));
        assert_eq!(machine.state(), RecordingState::Listening);
    }

    #[test]
    fn interrupt_reports_previous_flag() {
        let machine = RecordingStateMachine::new(InteractionMode::Voice);
        assert!(!machine.interrupt());
        machine.set_speaking(true);
        assert!(machine.interrupt());
        assert!(!machine.is_speaking());
    }

    #[tokio::test]
    async fn mode_switch_stops_recording_and_speech() {
        let machine = RecordingStateMachine::new(InteractionMode::Voice);
        let effects = CountingEffects::default();

        machine.begin_listening(ListenTrigger::Manual).unwrap();
        machine.set_speaking(true);

        assert!(machine.switch_mode(InteractionMode::Chat, false, &effects).await);
        assert_eq!(machine.mode(), InteractionMode::Chat);
        assert_eq!(machine.state(), RecordingState::Idle);
        assert!(!machine.is_speaking());
        assert_eq!(effects.recordings_stopped.load(Ordering::SeqCst), 1);
        assert_eq!(effects.speech_stopped.load(Ordering::SeqCst), 1);

        // Same mode is a no-op
        assert!(!machine.switch_mode(InteractionMode::Chat, false, &effects).await);
    }

    #[test]
    fn keep_speaking_preference_survives_switch() {
        let machine = RecordingStateMachine::new(InteractionMode::Voice);
        let effects = CountingEffects::default();
        machine.set_speaking(true);

        tokio_test::block_on(machine.switch_mode(InteractionMode::Chat, true, &effects));
        assert!(machine.is_speaking());
        assert_eq!(effects.speech_stopped.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("Voice".parse::<InteractionMode>().unwrap(), InteractionMode::Voice);
        assert_eq!("chat".parse::<InteractionMode>().unwrap(), InteractionMode::Chat);
        assert!("video".parse::<InteractionMode>().is_err());
        assert_eq!(InteractionMode::Voice.toggled(), InteractionMode::Chat);
    }
}
