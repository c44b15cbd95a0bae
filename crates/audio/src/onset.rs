use std::collections::VecDeque;
use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OnsetConfig {
    pub frame_size: usize,
    pub hop_size: usize,
    /// Number of past flux values the adaptive threshold averages over.
    pub history: usize,
    pub threshold_ratio: f32,
    /// Absolute flux floor; keeps silence and hiss from producing onsets.
    pub min_flux: f32,
    pub min_gap_secs: f64,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        Self {
            frame_size: 2048,
            hop_size: 512,
            history: 16,
            threshold_ratio: 1.5,
            min_flux: 0.1,
            min_gap_secs: 0.05,
        }
    }
}

/// Turns a stream of mono samples into onset times (seconds, increasing).
pub trait OnsetDetector: Send {
    fn push(&mut self, samples: &[f32]);
    /// Flushes buffered frames and returns every onset found.
    fn finish(&mut self) -> Vec<f64>;
}

/// Half-wave rectified spectral flux with an adaptive mean threshold.
pub struct SpectralFluxDetector {
    config: OnsetConfig,
    sample_rate: u32,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    pending: Vec<f32>,
    frame_index: u64,
    recent: VecDeque<f32>,
    flux_before: f32,
    flux_last: f32,
    onsets: Vec<f64>,
}

impl SpectralFluxDetector {
    pub fn new(sample_rate: u32, config: OnsetConfig) -> Self {
        let frame_size = config.frame_size.max(2);
        let config = OnsetConfig {
            frame_size,
            hop_size: config.hop_size.clamp(1, frame_size),
            history: config.history.max(1),
            ..config
        };
        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(frame_size);
        let window = (0..frame_size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / frame_size as f32;
                0.5 - 0.5 * phase.cos()
            })
            .collect();
        let input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        let magnitudes = vec![0.0; spectrum.len()];
        Self {
            config,
            sample_rate: sample_rate.max(1),
            fft,
            window,
            input,
            spectrum,
            magnitudes,
            pending: Vec::with_capacity(frame_size * 2),
            frame_index: 0,
            recent: VecDeque::with_capacity(config.history + 1),
            flux_before: 0.0,
            flux_last: 0.0,
            onsets: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_time(&self, frame: u64) -> f64 {
        frame as f64 * self.config.hop_size as f64 / f64::from(self.sample_rate)
    }

    fn analyze_frame(&mut self) -> f32 {
        for ((dst, &src), &w) in self
            .input
            .iter_mut()
            .zip(&self.pending[..self.config.frame_size])
            .zip(&self.window)
        {
            *dst = src * w;
        }
        if let Err(err) = self.fft.process(&mut self.input, &mut self.spectrum) {
            warn!(%err, "fft failed, treating frame as silent");
            return 0.0;
        }
        let mut flux = 0.0;
        for (previous, bin) in self.magnitudes.iter_mut().zip(&self.spectrum) {
            let magnitude = bin.norm();
            flux += (magnitude - *previous).max(0.0);
            *previous = magnitude;
        }
        flux
    }

    /// Decides whether the previous frame was a peak now that its successor
    /// is known.
    fn observe(&mut self, flux: f32) {
        let frame = self.frame_index;
        if frame > 0 {
            let candidate = self.flux_last;
            let mean = if self.recent.is_empty() {
                0.0
            } else {
                self.recent.iter().sum::<f32>() / self.recent.len() as f32
            };
            let threshold = (mean * self.config.threshold_ratio).max(self.config.min_flux);
            if candidate > threshold && candidate > self.flux_before && candidate >= flux {
                let time = self.frame_time(frame - 1);
                let spaced = self
                    .onsets
                    .last()
                    .map_or(true, |&last| time - last >= self.config.min_gap_secs);
                if spaced {
                    self.onsets.push(time);
                }
            }
            self.recent.push_back(candidate);
            if self.recent.len() > self.config.history {
                self.recent.pop_front();
            }
        }
        self.flux_before = self.flux_last;
        self.flux_last = flux;
        self.frame_index += 1;
    }
}

impl OnsetDetector for SpectralFluxDetector {
    fn push(&mut self, samples: &[f32]) {
        self.pending.extend_from_slice(samples);
        let mut consumed = 0;
        while self.pending.len() - consumed >= self.config.frame_size {
            if consumed > 0 {
                self.pending.drain(..consumed);
                consumed = 0;
            }
            let flux = self.analyze_frame();
            self.observe(flux);
            consumed = self.config.hop_size;
        }
        if consumed > 0 {
            self.pending.drain(..consumed);
        }
    }

    fn finish(&mut self) -> Vec<f64> {
        if self.frame_index > 0 {
            self.observe(0.0);
        }
        self.pending.clear();
        debug!(
            frames = self.frame_index,
            onsets = self.onsets.len(),
            "onset detection finished"
        );
        std::mem::take(&mut self.onsets)
    }
}
