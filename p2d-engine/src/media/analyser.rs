use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Number of magnitude bins the analyser reports.
pub const SPECTRUM_BINS: usize = 256;

const FFT_SIZE: usize = SPECTRUM_BINS * 2;

// Byte scaling follows the usual analyser convention: −100 dBFS maps to
// 0 and −30 dBFS to 255, clamped at both ends.
const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;

/// Short-term spectrum analyser over the most recent capture window.
pub struct SpectrumAnalyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl SpectrumAnalyser {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        // Hamming window.
        let window = (0..FFT_SIZE)
            .map(|i| {
                0.54 - 0.46
                    * (2.0 * std::f32::consts::PI * i as f32 / (FFT_SIZE - 1) as f32).cos()
            })
            .collect();

        Self {
            fft,
            window,
            scratch: vec![Complex::new(0.0, 0.0); FFT_SIZE],
        }
    }

    /// Byte-scaled magnitudes of the latest window. Shorter input is
    /// zero-padded at the front; longer input keeps its tail.
    pub fn byte_spectrum(&mut self, samples: &[f32]) -> [u8; SPECTRUM_BINS] {
        let tail = if samples.len() > FFT_SIZE {
            &samples[samples.len() - FFT_SIZE..]
        } else {
            samples
        };
        let pad = FFT_SIZE - tail.len();

        for slot in self.scratch[..pad].iter_mut() {
            *slot = Complex::new(0.0, 0.0);
        }
        for (i, &sample) in tail.iter().enumerate() {
            self.scratch[pad + i] = Complex::new(sample * self.window[pad + i], 0.0);
        }

        self.fft.process(&mut self.scratch);

        let mut bins = [0u8; SPECTRUM_BINS];
        for (bin, value) in bins.iter_mut().zip(self.scratch.iter()) {
            let magnitude = value.norm() / FFT_SIZE as f32;
            let db = 20.0 * magnitude.max(f32::MIN_POSITIVE).log10();
            let scaled = (db - MIN_DB) / (MAX_DB - MIN_DB) * 255.0;
            *bin = scaled.clamp(0.0, 255.0) as u8;
        }
        bins
    }

    /// Average byte magnitude across all bins.
    pub fn average_magnitude(&mut self, samples: &[f32]) -> u8 {
        let bins = self.byte_spectrum(samples);
        let sum: u32 = bins.iter().map(|&b| b as u32).sum();
        (sum / SPECTRUM_BINS as u32) as u8
    }
}

impl Default for SpectrumAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

/// Threshold detector over the analyser output. A muted source reads as
/// silent no matter what the device delivers.
pub struct VoiceDetector {
    analyser: SpectrumAnalyser,
    threshold: u8,
    speaking: bool,
}

impl VoiceDetector {
    pub fn new(threshold: u8) -> Self {
        Self {
            analyser: SpectrumAnalyser::new(),
            threshold,
            speaking: false,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Feed one analysis window; returns the new value when the
    /// speaking state flips.
    pub fn tick(&mut self, samples: &[f32], muted: bool) -> Option<bool> {
        let speaking = if muted {
            false
        } else {
            self.analyser.average_magnitude(samples) > self.threshold
        };

        if speaking != self.speaking {
            self.speaking = speaking;
            Some(speaking)
        } else {
            None
        }
    }
}
