//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parley::config::EndpointConfig;
use parley::voice::synthesis::SpeechPipeline;
use parley::voice::{
    AudioEndpointer, AutoStop, EnergyVad, SAMPLE_RATE, SentenceSegmenter, VAD_WINDOW_SAMPLES,
    samples_to_wav,
};
use parley::{InteractionMode, RecordingStateMachine};

mod common;

use common::{EchoSynth, FakePlayer, silence, sine};

/// Duration of one VAD window at 16 kHz
const WINDOW_MS: u64 = 32;

fn at(t0: Instant, windows: u64) -> Instant {
    t0 + Duration::from_millis(WINDOW_MS * windows)
}

fn endpointer() -> AudioEndpointer {
    AudioEndpointer::new(Box::new(EnergyVad::default()), EndpointConfig::default())
}

#[test]
fn test_silence_after_speech_stops_recording() {
    let ep = endpointer();
    assert_eq!(ep.silent_chunks_threshold(), 62);

    let t0 = Instant::now();
    ep.start_at(t0);

    // Half a second of speech, all observed at t0
    assert_eq!(ep.push_frame_at(&sine(440.0, 16 * VAD_WINDOW_SAMPLES, 0.3), t0), None);
    assert!(ep.vad_state().unwrap().speech_detected);

    let frame = silence(VAD_WINDOW_SAMPLES);
    for k in 1..=62 {
        assert_eq!(ep.push_frame_at(&frame, at(t0, k)), None, "fired early at window {k}");
    }
    assert_eq!(ep.push_frame_at(&frame, at(t0, 63)), Some(AutoStop::Silence));

    // Fires once per session
    assert_eq!(ep.push_frame_at(&frame, at(t0, 64)), None);

    let recorded = ep.stop().unwrap();
    assert_eq!(recorded.len(), (16 + 64) * VAD_WINDOW_SAMPLES);
}

#[test]
fn test_quiet_noise_counts_as_silence() {
    let ep = endpointer();
    let t0 = Instant::now();
    ep.start_at(t0);

    ep.push_frame_at(&sine(440.0, 4 * VAD_WINDOW_SAMPLES, 0.3), t0);

    // Background hum well below the speech level
    let hum = sine(120.0, VAD_WINDOW_SAMPLES, 0.02);
    let fired = (1..=80).find_map(|k| ep.push_frame_at(&hum, at(t0, k)));
    assert_eq!(fired, Some(AutoStop::Silence));
}

#[test]
fn test_timeout_without_speech() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let ep = endpointer().with_auto_stop_sender(tx);

    let t0 = Instant::now();
    ep.start_at(t0);

    let frame = silence(VAD_WINDOW_SAMPLES);
    // 156 windows = 4.992s, still inside the 5s timeout
    for k in 1..=156 {
        assert_eq!(ep.push_frame_at(&frame, at(t0, k)), None);
    }
    assert_eq!(ep.push_frame_at(&frame, at(t0, 157)), Some(AutoStop::Timeout));

    // Silence never fires without speech, even long after the timeout
    for k in 158..=400 {
        assert_eq!(ep.push_frame_at(&frame, at(t0, k)), None);
    }

    assert_eq!(rx.try_recv().unwrap(), AutoStop::Timeout);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_speech_before_timeout_prevents_it() {
    let ep = endpointer();
    let t0 = Instant::now();
    ep.start_at(t0);

    // Speech starts four seconds in
    assert_eq!(ep.push_frame_at(&silence(VAD_WINDOW_SAMPLES), at(t0, 125)), None);
    assert_eq!(ep.push_frame_at(&sine(440.0, VAD_WINDOW_SAMPLES, 0.3), at(t0, 126)), None);
    assert_eq!(ep.push_frame_at(&sine(440.0, VAD_WINDOW_SAMPLES, 0.3), at(t0, 200)), None);
}

#[test]
fn test_segmentation_is_loss_free() {
    let texts = [
        "Sure thing! It's about 21 degrees in Lisbon right now. Mr. Smith said hi.\n\nAnything else?",
        "No punctuation at all in this one",
        "Short. Bits. Here... and there?! Done.   ",
        "Ünïcödé sentences work too. ¿Verdad? ¡Claro que sí! 日本語の文も大丈夫です。",
    ];

    for text in texts {
        for step in [1, 3, 7, text.len()] {
            let mut segmenter = SentenceSegmenter::default();
            let mut rebuilt = String::new();

            let chars: Vec<char> = text.chars().collect();
            for delta in chars.chunks(step) {
                let delta: String = delta.iter().collect();
                for chunk in segmenter.push(&delta) {
                    rebuilt.push_str(&chunk.text);
                }
            }
            if let Some(chunk) = segmenter.finish() {
                rebuilt.push_str(&chunk.text);
            }

            assert_eq!(rebuilt, text, "lost text with step {step}");
        }
    }
}

#[tokio::test]
async fn test_interrupt_discards_queued_clips() {
    let state = Arc::new(RecordingStateMachine::new(InteractionMode::Voice));
    let synth = Arc::new(EchoSynth::default());
    let player = Arc::new(FakePlayer::new(Duration::from_millis(300)));
    let pipeline = SpeechPipeline::new(synth.clone(), player.clone());

    let (mut feed, queue) = pipeline.begin(&state);
    assert!(state.is_speaking());

    let drain = {
        let state = Arc::clone(&state);
        tokio::spawn(async move { queue.drain(&state).await })
    };

    feed.push("The first sentence is here. The second one follows it. ")
        .await;
    feed.push("A third sentence arrives. And finally a fourth one.")
        .await;
    feed.finish().await;

    tokio::time::timeout(Duration::from_secs(2), async {
        while player.started() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first clip never started");

    assert!(pipeline.interrupt(&state));
    let started_at_interrupt = player.started();

    let report = tokio::time::timeout(Duration::from_secs(1), drain)
        .await
        .expect("queue not drained in time")
        .unwrap();

    assert_eq!(player.started(), started_at_interrupt);
    assert_eq!(report.played, 1);
    assert!(report.interrupted);
    assert!(!state.is_speaking());
}

#[tokio::test]
async fn test_clips_play_in_order() {
    let state = RecordingStateMachine::new(InteractionMode::Voice);
    let synth = Arc::new(EchoSynth::default());
    let player = Arc::new(FakePlayer::new(Duration::ZERO));
    let pipeline = SpeechPipeline::new(synth.clone(), player.clone());

    let report = pipeline
        .speak("The first sentence is here. The second one follows it. Third and last.", &state)
        .await;

    assert_eq!(report.played, 3);
    assert!(!report.interrupted);
    assert_eq!(
        *synth.spoken.lock().unwrap(),
        vec![
            "The first sentence is here.",
            "The second one follows it.",
            "Third and last."
        ]
    );
    assert!(!state.is_speaking());
}

#[test]
fn test_wav_roundtrip() {
    let original_samples: Vec<f32> = vec![0.0, 0.5, -0.5, 1.0, -1.0, 0.25];
    let wav_data = samples_to_wav(&original_samples, SAMPLE_RATE).unwrap();

    // Read WAV back
    let cursor = Cursor::new(wav_data);
    let mut reader = hound::WavReader::new(cursor).unwrap();

    let spec = reader.spec();
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.channels, 1);

    let read_samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(read_samples.len(), original_samples.len());
    assert_eq!(read_samples[1], 16383);
}
