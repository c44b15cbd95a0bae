use std::io::Read;

use pulse_audio::io::PCM_CHUNK_BYTES;
use pulse_audio::{chunk_rms, RawPcmReader};
use pulse_domain::BpmResult;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::error::AnalysisError;
use crate::estimator::DETECTABLE_BPM;

pub const PEAK_THRESHOLD_RATIO: f64 = 1.5;
pub const FALLBACK_CONFIDENCE: f32 = 0.6;
/// Duration credited to one chunk.
///
/// Treats the chunk's byte count as a sample count at 44.1 kHz, so it is
/// twice the real duration of 16-bit audio. Kept for compatibility with
/// tempi reported by earlier releases.
pub const MS_PER_CHUNK: f64 = PCM_CHUNK_BYTES as f64 / 44_100.0 * 1000.0;

/// Fallback estimator over per-chunk RMS energy of raw 16-bit PCM.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnergyPeakEstimator;

impl EnergyPeakEstimator {
    pub fn estimate_levels(&self, levels: &[f32]) -> BpmResult {
        if levels.len() < 3 {
            return BpmResult::fallback_default();
        }
        let total: f64 = levels.iter().map(|&level| f64::from(level)).sum();
        let mean = total / levels.len() as f64;
        let threshold = mean * PEAK_THRESHOLD_RATIO;

        let peaks: Vec<usize> = levels
            .windows(3)
            .enumerate()
            .filter(|(_, w)| f64::from(w[1]) > threshold && w[1] > w[0] && w[1] > w[2])
            .map(|(i, _)| i + 1)
            .collect();
        if peaks.len() < 2 {
            debug!(chunks = levels.len(), "fewer than two energy peaks");
            return BpmResult::fallback_default();
        }

        // Mean of consecutive peak gaps.
        let span = peaks[peaks.len() - 1] - peaks[0];
        let average_chunks = span as f64 / (peaks.len() - 1) as f64;
        let raw = (60_000.0 / (average_chunks * MS_PER_CHUNK)) as u32;
        let bpm = raw.clamp(*DETECTABLE_BPM.start(), *DETECTABLE_BPM.end());
        debug!(peaks = peaks.len(), average_chunks, bpm, "energy peak estimate");
        BpmResult::single(bpm, FALLBACK_CONFIDENCE)
    }

    /// Reads every chunk of `reader`, checking `cancel` before each one.
    ///
    /// A read failure part way through is not an error: the estimate
    /// degrades to [`BpmResult::fallback_default`].
    pub fn estimate_source<R: Read>(
        &self,
        reader: &mut RawPcmReader<R>,
        cancel: &CancellationToken,
    ) -> Result<BpmResult, AnalysisError> {
        let mut levels = Vec::new();
        loop {
            cancel.check()?;
            match reader.next_chunk() {
                Ok(Some(chunk)) => levels.push(chunk_rms(chunk)),
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, chunks = levels.len(), "raw read failed");
                    return Ok(BpmResult::fallback_default());
                }
            }
        }
        Ok(self.estimate_levels(&levels))
    }
}
