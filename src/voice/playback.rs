//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::{AudioClip, ClipPlayer};
use crate::{Error, Result};

/// Poll interval while waiting for a clip to finish
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Plays clips on the default output device
///
/// `stop` raises a flag the output callback checks on every buffer, so a
/// clip halts within one driver period. The flag stays up until `rearm`,
/// which closes the gap between a caller's interrupt check and the start of
/// the next clip.
#[derive(Debug, Default)]
pub struct CpalPlayer {
    stop: Arc<AtomicBool>,
}

impl CpalPlayer {
    /// Create a player
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClipPlayer for CpalPlayer {
    async fn play(&self, clip: AudioClip) -> Result<()> {
        if clip.is_empty() || self.stop.load(Ordering::SeqCst) {
            return Ok(());
        }

        let stop = Arc::clone(&self.stop);

        tokio::task::spawn_blocking(move || play_blocking(clip, &stop))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }

    fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn rearm(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }
}

/// Pick an output config for `rate`, resampling when the device can't do it
fn output_config(device: &cpal::Device, rate: u32) -> Result<(StreamConfig, u32)> {
    let supports = |c: &cpal::SupportedStreamConfigRange| {
        c.channels() <= 2
            && c.min_sample_rate() <= SampleRate(rate)
            && c.max_sample_rate() >= SampleRate(rate)
    };

    if let Some(range) = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| supports(c))
    {
        return Ok((range.with_sample_rate(SampleRate(rate)).config(), rate));
    }

    let default = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?;
    let device_rate = default.sample_rate().0;
    Ok((default.config(), device_rate))
}

fn play_blocking(clip: AudioClip, stop: &Arc<AtomicBool>) -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let (config, device_rate) = output_config(&device, clip.sample_rate)?;
    let samples = if device_rate == clip.sample_rate {
        clip.samples
    } else {
        tracing::debug!(from = clip.sample_rate, to = device_rate, "resampling clip");
        resample(&clip.samples, clip.sample_rate, device_rate)?
    };

    let channels = usize::from(config.channels.max(1));
    let sample_count = samples.len();
    let samples = Arc::new(samples);
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);
        let stop = Arc::clone(stop);

        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let halted = stop.load(Ordering::Relaxed);
                    let mut pos = position.load(Ordering::Relaxed);

                    for frame in data.chunks_mut(channels) {
                        let sample = if halted {
                            0.0
                        } else if let Some(&s) = samples.get(pos) {
                            pos += 1;
                            s
                        } else {
                            0.0
                        };
                        frame.fill(sample);
                    }

                    position.store(pos, Ordering::Relaxed);
                    if halted || pos >= samples.len() {
                        finished.store(true, Ordering::Release);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(device_rate.max(1));
    let timeout = Duration::from_millis(duration_ms + 500);
    let start = Instant::now();

    while !finished.load(Ordering::Acquire) && !stop.load(Ordering::Relaxed) {
        if start.elapsed() > timeout {
            tracing::warn!("playback did not report completion, giving up");
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    drop(stream);
    tracing::debug!(
        samples = sample_count,
        interrupted = stop.load(Ordering::Relaxed),
        "playback complete"
    );

    Ok(())
}

/// Decode MP3 bytes to a mono clip
///
/// # Errors
///
/// Returns error if the data is not valid MP3
#[allow(clippy::cast_precision_loss)]
pub fn decode_mp3(mp3: &[u8]) -> Result<AudioClip> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3));
    let mut clip: Option<AudioClip> = None;

    while let Some(minimp3::Frame {
        data,
        sample_rate,
        channels,
        ..
    }) = next_frame(&mut decoder)?
    {
        let current = clip.get_or_insert_with(|| {
            AudioClip::new(Vec::new(), u32::try_from(sample_rate).unwrap_or_default())
        });
        // Downmix interleaved channels to mono
        let width = channels.max(1);
        current.samples.extend(data.chunks(width).map(|interleaved| {
            interleaved.iter().map(|&s| pcm_to_f32(s)).sum::<f32>() / interleaved.len() as f32
        }));
    }

    clip.filter(|c| c.sample_rate > 0)
        .ok_or_else(|| Error::Audio("MP3 stream contained no frames".to_string()))
}

fn next_frame<R: std::io::Read>(
    decoder: &mut minimp3::Decoder<R>,
) -> Result<Option<minimp3::Frame>> {
    match decoder.next_frame() {
        Ok(frame) => Ok(Some(frame)),
        Err(minimp3::Error::Eof) => Ok(None),
        Err(e) => Err(Error::Audio(format!("MP3 decode error: {e}"))),
    }
}

fn resample_error(e: impl std::fmt::Display) -> Error {
    Error::Audio(format!("resampling failed: {e}"))
}

fn pcm_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Resample mono audio using rubato
///
/// The final partial chunk is zero-padded and the output trimmed to the
/// length implied by the rate ratio.
///
/// # Errors
///
/// Returns error if the resampler cannot be built for these rates
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, 1024, 2, 1)
        .map_err(resample_error)?;
    // May differ from the requested 1024
    let block_len = resampler.input_frames_next();

    let target_len =
        (samples.len() as f64 * f64::from(to_rate) / f64::from(from_rate)).round() as usize;
    let mut resampled = Vec::with_capacity(target_len + block_len);

    for block in samples.chunks(block_len) {
        let mut padded: Vec<f64> = block.iter().copied().map(f64::from).collect();
        padded.resize(block_len, 0.0);
        let channels = resampler
            .process(&[padded], None)
            .map_err(resample_error)?;
        resampled.extend(channels[0].iter().map(|&s| s as f32));
    }

    resampled.truncate(target_len);
    Ok(resampled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_keeps_duration() {
        let samples = vec![0.25f32; 24_000];
        let out = resample(&samples, 24_000, 16_000).unwrap();
        // FFT resampling has a start-up delay, so only the length is exact
        assert!(out.len() <= 16_000);
        assert!(out.len() > 15_000);
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 16_000, 16_000).unwrap(), samples);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_mp3(b"definitely not an mp3").is_err());
    }
}
