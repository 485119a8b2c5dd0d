//! Sentence-segmented speech synthesis and playback
//!
//! ```text
//! token stream ─► SentenceFeed ─(bounded, 3)─► synthesis worker ─(unbounded)─► ClipQueue::drain
//!                 segmenter                     SpeechSynthesizer               ClipPlayer
//! ```
//!
//! The feed and the drain run concurrently on the turn task; the worker is a
//! separate task scoped to one response. Clearing the speaking flag is the
//! only interrupt signal: queued clips are dropped instead of played and the
//! worker is aborted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{AudioClip, ClipPlayer, SentenceChunk, SentenceSegmenter, SpeechSynthesizer};
use crate::state::RecordingStateMachine;

/// Sentences that may wait for the synthesis worker
pub const SENTENCE_QUEUE_CAPACITY: usize = 3;

/// How long to wait for the worker after the queue is drained
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Message on the sentence queue
#[derive(Debug)]
enum SentenceMsg {
    Sentence(SentenceChunk),
    /// No more sentences for this response
    Finish,
}

/// Synthesized audio awaiting playback
#[derive(Debug)]
pub struct SynthesizedClip {
    /// Sentence position in the response
    pub index: usize,
    /// Text that was spoken
    pub text: String,
    /// Decoded audio
    pub clip: AudioClip,
}

/// Outcome of draining a response's clips
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Clips handed to the player
    pub played: usize,
    /// Clips dropped because speech was interrupted
    pub discarded: usize,
    /// Clips whose playback failed
    pub failed: usize,
    /// Whether an interrupt was observed
    pub interrupted: bool,
}

/// Starts per-response synthesis pipelines
#[derive(Clone)]
pub struct SpeechPipeline {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    player: Arc<dyn ClipPlayer>,
    join_timeout: Duration,
}

impl SpeechPipeline {
    /// Create a pipeline over a synthesizer and a player
    #[must_use]
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, player: Arc<dyn ClipPlayer>) -> Self {
        Self {
            synthesizer,
            player,
            join_timeout: WORKER_JOIN_TIMEOUT,
        }
    }

    /// Override the worker join timeout
    #[must_use]
    pub const fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Player used for this pipeline's clips
    #[must_use]
    pub fn player(&self) -> &Arc<dyn ClipPlayer> {
        &self.player
    }

    /// Stop speech: clear the speaking flag, then halt the current clip
    ///
    /// Returns whether speech was in progress.
    pub fn interrupt(&self, state: &RecordingStateMachine) -> bool {
        let was_speaking = state.interrupt();
        self.player.stop();
        if was_speaking {
            tracing::info!("speech interrupted");
        }
        was_speaking
    }

    /// Spawn a synthesis worker for one response
    ///
    /// Marks the assistant as speaking and re-arms the player.
    #[must_use]
    pub fn begin(&self, state: &RecordingStateMachine) -> (SentenceFeed, ClipQueue) {
        state.set_speaking(true);
        self.player.rearm();

        let (sentence_tx, sentence_rx) = mpsc::channel(SENTENCE_QUEUE_CAPACITY);
        let (clip_tx, clip_rx) = mpsc::unbounded_channel();

        let worker = tokio::spawn(run_worker(
            Arc::clone(&self.synthesizer),
            sentence_rx,
            clip_tx,
        ));

        let feed = SentenceFeed {
            segmenter: SentenceSegmenter::default(),
            tx: sentence_tx,
        };
        let queue = ClipQueue {
            rx: clip_rx,
            worker,
            player: Arc::clone(&self.player),
            join_timeout: self.join_timeout,
        };

        (feed, queue)
    }

    /// Speak a complete text through a fresh pipeline
    pub async fn speak(&self, text: &str, state: &RecordingStateMachine) -> DrainReport {
        let (mut feed, queue) = self.begin(state);
        let feeding = async move {
            feed.push(text).await;
            feed.finish().await;
        };
        let ((), report) = tokio::join!(feeding, queue.drain(state));
        report
    }
}

/// Producer half: segments streamed text onto the sentence queue
pub struct SentenceFeed {
    segmenter: SentenceSegmenter,
    tx: mpsc::Sender<SentenceMsg>,
}

impl SentenceFeed {
    /// Append a streamed delta, queueing any completed sentences
    ///
    /// Waits while the queue is full. Once the worker is gone the text is
    /// still segmented but nothing is queued.
    pub async fn push(&mut self, delta: &str) {
        for chunk in self.segmenter.push(delta) {
            self.send(SentenceMsg::Sentence(chunk)).await;
        }
    }

    /// Flush the remaining text and signal the worker to finish
    pub async fn finish(mut self) {
        if let Some(chunk) = self.segmenter.finish() {
            self.send(SentenceMsg::Sentence(chunk)).await;
        }
        self.send(SentenceMsg::Finish).await;
    }

    async fn send(&self, msg: SentenceMsg) {
        if self.tx.is_closed() {
            return;
        }
        if let SentenceMsg::Sentence(chunk) = &msg {
            tracing::trace!(index = chunk.index, "sentence queued");
        }
        let _ = self.tx.send(msg).await;
    }
}

/// Consumer half: plays synthesized clips in order
pub struct ClipQueue {
    rx: mpsc::UnboundedReceiver<SynthesizedClip>,
    worker: JoinHandle<()>,
    player: Arc<dyn ClipPlayer>,
    join_timeout: Duration,
}

impl ClipQueue {
    /// Play clips in FIFO order until the worker finishes
    ///
    /// The speaking flag is checked before every clip. Once it is cleared
    /// the remaining clips are discarded without waiting and the worker is
    /// aborted. Clears the speaking flag when done.
    pub async fn drain(mut self, state: &RecordingStateMachine) -> DrainReport {
        let mut report = DrainReport::default();

        while let Some(item) = self.rx.recv().await {
            if !state.is_speaking() {
                if !report.interrupted {
                    report.interrupted = true;
                    // Stop accepting clips and abandon in-flight synthesis
                    self.rx.close();
                    self.worker.abort();
                }
                tracing::debug!(index = item.index, "discarding clip after interrupt");
                report.discarded += 1;
                continue;
            }

            tracing::debug!(index = item.index, text = %item.text, "playing clip");
            match self.player.play(item.clip).await {
                Ok(()) => report.played += 1,
                Err(e) => {
                    tracing::warn!(index = item.index, error = %e, "clip playback failed");
                    report.failed += 1;
                }
            }
        }

        if !state.is_speaking() {
            report.interrupted = true;
        }

        if !report.interrupted {
            match tokio::time::timeout(self.join_timeout, &mut self.worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "synthesis worker panicked"),
                Err(_) => {
                    tracing::warn!("synthesis worker did not finish in time, aborting");
                    self.worker.abort();
                }
            }
        } else {
            self.worker.abort();
        }

        state.set_speaking(false);
        tracing::debug!(?report, "playback drained");
        report
    }
}

async fn run_worker(
    synthesizer: Arc<dyn SpeechSynthesizer>,
    mut sentences: mpsc::Receiver<SentenceMsg>,
    clips: mpsc::UnboundedSender<SynthesizedClip>,
) {
    while let Some(msg) = sentences.recv().await {
        let SentenceMsg::Sentence(chunk) = msg else {
            break;
        };
        let Some(text) = chunk.speakable() else {
            continue;
        };

        match synthesizer.synthesize(&text).await {
            Ok(clip) => {
                let item = SynthesizedClip {
                    index: chunk.index,
                    text,
                    clip,
                };
                if clips.send(item).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(index = chunk.index, error = %e, "sentence synthesis failed, skipping");
            }
        }
    }

    tracing::debug!("synthesis worker finished");
}
