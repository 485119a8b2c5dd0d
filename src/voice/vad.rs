//! Voice activity models
//!
//! A model scores one fixed-size window of samples with a speech
//! probability in `[0, 1]`.

use crate::{Error, Result};

/// Window length expected by the models (32 ms at 16 kHz)
pub const VAD_WINDOW_SAMPLES: usize = 512;

/// Scores fixed-size audio windows for speech
pub trait VoiceActivityModel: Send {
    /// Number of samples the model needs per call
    fn window_size(&self) -> usize;

    /// Probability that `window` contains speech
    ///
    /// # Errors
    ///
    /// Returns error if the window has the wrong size or inference fails
    fn speech_probability(&mut self, window: &[f32], sample_rate: u32) -> Result<f32>;
}

/// Energy-based voice activity model
///
/// Maps the RMS energy of a window onto a probability with a linear ramp
/// between a noise floor and a speech level.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    window_size: usize,
    noise_floor: f32,
    speech_level: f32,
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self {
            window_size: VAD_WINDOW_SAMPLES,
            noise_floor: 0.01,
            speech_level: 0.05,
        }
    }
}

impl EnergyVad {
    /// Create an energy model
    ///
    /// # Errors
    ///
    /// Returns error if the levels are not ordered or the window is empty
    pub fn new(window_size: usize, noise_floor: f32, speech_level: f32) -> Result<Self> {
        if window_size == 0 {
            return Err(Error::Vad("window size must be positive".to_string()));
        }
        if !(0.0..speech_level).contains(&noise_floor) {
            return Err(Error::Vad(format!(
                "noise floor {noise_floor} must be below speech level {speech_level}"
            )));
        }

        tracing::debug!(window_size, noise_floor, speech_level, "energy VAD initialized");

        Ok(Self {
            window_size,
            noise_floor,
            speech_level,
        })
    }
}

impl VoiceActivityModel for EnergyVad {
    fn window_size(&self) -> usize {
        self.window_size
    }

    fn speech_probability(&mut self, window: &[f32], sample_rate: u32) -> Result<f32> {
        if window.len() != self.window_size {
            return Err(Error::Vad(format!(
                "expected {} samples, got {}",
                self.window_size,
                window.len()
            )));
        }
        if sample_rate == 0 {
            return Err(Error::Vad("sample rate must be positive".to_string()));
        }

        let energy = calculate_energy(window);
        let probability =
            (energy - self.noise_floor) / (self.speech_level - self.noise_floor);
        Ok(probability.clamp(0.0, 1.0))
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0.0f32; 100];
        assert!(calculate_energy(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(calculate_energy(&loud) > 0.4);
    }

    #[test]
    fn probability_is_clamped() {
        let mut vad = EnergyVad::default();
        let quiet = vec![0.0f32; VAD_WINDOW_SAMPLES];
        let loud = vec![0.8f32; VAD_WINDOW_SAMPLES];

        assert!(vad.speech_probability(&quiet, 16000).unwrap().abs() < f32::EPSILON);
        assert!((vad.speech_probability(&loud, 16000).unwrap() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn rejects_wrong_window() {
        let mut vad = EnergyVad::default();
        assert!(vad.speech_probability(&[0.0; 100], 16000).is_err());
    }

    #[test]
    fn rejects_bad_levels() {
        assert!(EnergyVad::new(512, 0.2, 0.1).is_err());
        assert!(EnergyVad::new(0, 0.01, 0.05).is_err());
    }
}
