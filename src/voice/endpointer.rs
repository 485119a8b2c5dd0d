//! Voice activity endpointing
//!
//! Runs inline in the audio input callback: every frame is buffered for
//! transcription and fed through a rolling VAD window. When the window
//! fills, the model is called once and the silence bookkeeping updated.
//!
//! Silence is detected two ways, by consecutive silent windows and by wall
//! clock since the last voiced window. Either one firing ends the utterance;
//! they only diverge when callbacks arrive irregularly.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::VoiceActivityModel;
use crate::config::EndpointConfig;

/// Why the endpointer asked recording to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoStop {
    /// Speech was followed by enough silence
    Silence,
    /// No speech started before the listening timeout
    Timeout,
}

/// Silence bookkeeping for the active session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VadWindowState {
    /// Consecutive windows below the speech threshold
    pub silent_chunk_count: usize,
    /// Whether any window has crossed the threshold
    pub speech_detected: bool,
    /// When the last voiced window was scored
    pub last_voice_time: Option<Instant>,
}

struct Session {
    recorded: Vec<f32>,
    window: Vec<f32>,
    vad: VadWindowState,
    started_at: Instant,
    stop_requested: bool,
}

struct Inner {
    model: Box<dyn VoiceActivityModel>,
    session: Option<Session>,
}

/// Buffers captured audio and decides when the user stopped talking
pub struct AudioEndpointer {
    inner: Mutex<Inner>,
    config: EndpointConfig,
    window_size: usize,
    silent_chunks_threshold: usize,
    events: Option<mpsc::UnboundedSender<AutoStop>>,
}

impl AudioEndpointer {
    /// Create an endpointer around a voice activity model
    #[must_use]
    pub fn new(model: Box<dyn VoiceActivityModel>, config: EndpointConfig) -> Self {
        let window_size = model.window_size().max(1);
        let window_duration =
            Duration::from_secs_f64(window_size as f64 / f64::from(config.sample_rate.max(1)));
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let silent_chunks_threshold =
            (config.silence_duration.as_secs_f64() / window_duration.as_secs_f64()).floor() as usize;

        tracing::debug!(
            window_size,
            silent_chunks_threshold,
            threshold = config.vad_threshold,
            "endpointer initialized"
        );

        Self {
            inner: Mutex::new(Inner {
                model,
                session: None,
            }),
            config,
            window_size,
            silent_chunks_threshold,
            events: None,
        }
    }

    /// Deliver auto-stop decisions on a channel
    ///
    /// Sending on an unbounded channel never blocks, so this is safe from
    /// the real-time callback.
    #[must_use]
    pub fn with_auto_stop_sender(mut self, tx: mpsc::UnboundedSender<AutoStop>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Number of consecutive silent windows that ends an utterance
    #[must_use]
    pub const fn silent_chunks_threshold(&self) -> usize {
        self.silent_chunks_threshold
    }

    /// Begin a new recording session, discarding any previous one
    pub fn start(&self) {
        self.start_at(Instant::now());
    }

    /// Begin a new recording session at an explicit instant
    pub fn start_at(&self, now: Instant) {
        let mut inner = self.lock();
        inner.session = Some(Session {
            recorded: Vec::new(),
            window: Vec::with_capacity(self.window_size * 2),
            vad: VadWindowState::default(),
            started_at: now,
            stop_requested: false,
        });
        tracing::debug!("recording started");
    }

    /// End the session and return the recorded samples
    ///
    /// Returns `None` if nothing was recorded or no session was active.
    pub fn stop(&self) -> Option<Vec<f32>> {
        let session = self.lock().session.take()?;
        tracing::debug!(samples = session.recorded.len(), "recording stopped");
        (!session.recorded.is_empty()).then_some(session.recorded)
    }

    /// Whether a session is active
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.lock().session.is_some()
    }

    /// Snapshot of the active session's VAD state
    #[must_use]
    pub fn vad_state(&self) -> Option<VadWindowState> {
        self.lock().session.as_ref().map(|s| s.vad)
    }

    /// Feed one captured frame (audio callback entry point)
    pub fn push_frame(&self, frame: &[f32]) -> Option<AutoStop> {
        self.push_frame_at(frame, Instant::now())
    }

    /// Feed one captured frame observed at `now`
    ///
    /// Returns the auto-stop decision the first time one fires in a session.
    pub fn push_frame_at(&self, frame: &[f32], now: Instant) -> Option<AutoStop> {
        let mut guard = self.lock();
        let Inner { model, session } = &mut *guard;
        let session = session.as_mut()?;

        session.recorded.extend_from_slice(frame);
        session.window.extend_from_slice(frame);

        let mut decision = None;

        while session.window.len() >= self.window_size {
            // Scored in place; the audio callback must not allocate per window
            let scored = model.speech_probability(&session.window[..self.window_size], self.config.sample_rate);
            session.window.drain(..self.window_size);

            match scored {
                Ok(probability) if probability >= self.config.vad_threshold => {
                    session.vad.speech_detected = true;
                    session.vad.silent_chunk_count = 0;
                    session.vad.last_voice_time = Some(now);
                }
                Ok(_) => session.vad.silent_chunk_count += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "vad inference failed, window skipped");
                    continue;
                }
            }

            if decision.is_none() && self.silence_elapsed(&session.vad, now) {
                decision = Some(AutoStop::Silence);
            }
        }

        if decision.is_none()
            && !session.vad.speech_detected
            && now.saturating_duration_since(session.started_at) > self.config.listening_timeout
        {
            decision = Some(AutoStop::Timeout);
        }

        if session.stop_requested {
            return None;
        }

        let decision = decision?;
        session.stop_requested = true;
        drop(guard);

        tracing::debug!(?decision, "auto-stop");
        if let Some(tx) = &self.events {
            let _ = tx.send(decision);
        }
        Some(decision)
    }

    fn silence_elapsed(&self, vad: &VadWindowState, now: Instant) -> bool {
        if !vad.speech_detected {
            return false;
        }

        let by_count = vad.silent_chunk_count > self.silent_chunks_threshold;
        let by_clock = vad.last_voice_time.is_some_and(|t| {
            now.saturating_duration_since(t) > self.config.silence_duration
        });

        by_count || by_clock
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    /// Plays back a scripted probability per window
    struct ScriptedVad {
        probabilities: Vec<f32>,
        calls: usize,
    }

    impl VoiceActivityModel for ScriptedVad {
        fn window_size(&self) -> usize {
            4
        }

        fn speech_probability(&mut self, _window: &[f32], _sample_rate: u32) -> Result<f32> {
            let p = self.probabilities.get(self.calls).copied().unwrap_or(0.0);
            self.calls += 1;
            Ok(p)
        }
    }

    fn endpointer(probabilities: Vec<f32>) -> AudioEndpointer {
        // 4-sample windows at 4 Hz => one window per second
        let config = EndpointConfig {
            sample_rate: 4,
            vad_threshold: 0.5,
            silence_duration: Duration::from_secs(2),
            listening_timeout: Duration::from_secs(5),
        };
        AudioEndpointer::new(
            Box::new(ScriptedVad {
                probabilities,
                calls: 0,
            }),
            config,
        )
    }

    const WINDOW: [f32; 4] = [0.1; 4];

    /// Records every window it scores
    struct WindowLog(std::sync::Arc<std::sync::Mutex<Vec<Vec<f32>>>>);

    impl VoiceActivityModel for WindowLog {
        fn window_size(&self) -> usize {
            4
        }

        fn speech_probability(&mut self, window: &[f32], _sample_rate: u32) -> Result<f32> {
            self.0.lock().unwrap().push(window.to_vec());
            Ok(0.0)
        }
    }

    #[test]
    fn windows_span_frame_boundaries() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let config = EndpointConfig {
            sample_rate: 4,
            ..EndpointConfig::default()
        };
        let ep = AudioEndpointer::new(Box::new(WindowLog(seen.clone())), config);
        ep.start();

        ep.push_frame(&[1.0, 2.0, 3.0]);
        assert!(seen.lock().unwrap().is_empty());

        ep.push_frame(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]
        );

        // The leftover sample opens the next window
        ep.push_frame(&[10.0, 11.0, 12.0]);
        assert_eq!(seen.lock().unwrap()[2], vec![9.0, 10.0, 11.0, 12.0]);
        assert_eq!(ep.stop().map(|s| s.len()), Some(12));
    }

    #[test]
    fn threshold_is_floor_of_silence_over_window() {
        let ep = endpointer(vec![]);
        assert_eq!(ep.silent_chunks_threshold(), 2);

        let real = AudioEndpointer::new(
            Box::new(crate::voice::EnergyVad::default()),
            EndpointConfig::default(),
        );
        // 2.0s / (512 / 16000)s = 62.5
        assert_eq!(real.silent_chunks_threshold(), 62);
    }

    #[test]
    fn silence_by_window_count() {
        let ep = endpointer(vec![0.9, 0.1, 0.1, 0.1]);
        let t0 = Instant::now();
        ep.start_at(t0);

        // Frames arrive faster than real time so only the count check can fire
        assert_eq!(ep.push_frame_at(&WINDOW, t0), None);
        assert_eq!(ep.push_frame_at(&WINDOW, t0), None);
        assert_eq!(ep.push_frame_at(&WINDOW, t0), None);
        assert_eq!(ep.push_frame_at(&WINDOW, t0), Some(AutoStop::Silence));
    }

    #[test]
    fn silence_by_wall_clock() {
        let ep = endpointer(vec![0.9, 0.1]);
        let t0 = Instant::now();
        ep.start_at(t0);

        assert_eq!(ep.push_frame_at(&WINDOW, t0), None);
        // One silent window, but callbacks stalled for three seconds
        assert_eq!(
            ep.push_frame_at(&WINDOW, t0 + Duration::from_secs(3)),
            Some(AutoStop::Silence)
        );
    }

    #[test]
    fn never_silence_without_speech() {
        let ep = endpointer(vec![0.1; 10]);
        let t0 = Instant::now();
        ep.start_at(t0);

        for i in 0..4 {
            assert_eq!(ep.push_frame_at(&WINDOW, t0 + Duration::from_secs(i)), None);
        }
        let state = ep.vad_state().unwrap();
        assert!(!state.speech_detected);
        assert_eq!(state.silent_chunk_count, 4);
    }

    #[test]
    fn timeout_without_speech() {
        let ep = endpointer(vec![0.1; 10]);
        let t0 = Instant::now();
        ep.start_at(t0);

        assert_eq!(ep.push_frame_at(&WINDOW, t0 + Duration::from_secs(5)), None);
        assert_eq!(
            ep.push_frame_at(&WINDOW, t0 + Duration::from_secs(6)),
            Some(AutoStop::Timeout)
        );
    }

    #[test]
    fn no_timeout_once_speech_started() {
        let ep = endpointer(vec![0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.9]);
        let t0 = Instant::now();
        ep.start_at(t0);

        for i in 0..7 {
            assert_eq!(ep.push_frame_at(&WINDOW, t0 + Duration::from_secs(i)), None);
        }
    }

    #[test]
    fn speech_resets_silent_count() {
        let ep = endpointer(vec![0.9, 0.1, 0.1, 0.9, 0.1, 0.1]);
        let t0 = Instant::now();
        ep.start_at(t0);

        for _ in 0..6 {
            assert_eq!(ep.push_frame_at(&WINDOW, t0), None);
        }
        assert_eq!(ep.vad_state().unwrap().silent_chunk_count, 2);
    }

    #[test]
    fn fires_once_and_notifies_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ep = endpointer(vec![0.9, 0.1, 0.1, 0.1, 0.1, 0.1]).with_auto_stop_sender(tx);
        let t0 = Instant::now();
        ep.start_at(t0);

        let fired: Vec<_> = (0..6).filter_map(|_| ep.push_frame_at(&WINDOW, t0)).collect();
        assert_eq!(fired, vec![AutoStop::Silence]);
        assert_eq!(rx.try_recv().unwrap(), AutoStop::Silence);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn partial_frames_accumulate_into_windows() {
        let ep = endpointer(vec![0.9]);
        let t0 = Instant::now();
        ep.start_at(t0);

        ep.push_frame_at(&[0.1, 0.1, 0.1], t0);
        assert!(!ep.vad_state().unwrap().speech_detected);
        ep.push_frame_at(&[0.1, 0.1], t0);
        assert!(ep.vad_state().unwrap().speech_detected);
    }

    #[test]
    fn stop_returns_buffer_and_resets() {
        let ep = endpointer(vec![0.9]);
        assert_eq!(ep.stop(), None);

        ep.start();
        assert_eq!(ep.stop(), None, "empty session yields nothing");

        ep.start();
        ep.push_frame(&[0.25, 0.5]);
        ep.push_frame(&[0.75]);
        assert_eq!(ep.stop(), Some(vec![0.25, 0.5, 0.75]));
        assert!(!ep.is_recording());
        assert!(ep.vad_state().is_none());

        // Frames outside a session are ignored
        assert_eq!(ep.push_frame(&WINDOW), None);
    }
}
