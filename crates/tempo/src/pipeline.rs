use std::fs;
use std::io::ErrorKind;
use std::ops::ControlFlow;
use std::path::Path;

use pulse_audio::{
    AudioDecoder, DecodeError, OnsetConfig, OnsetDetector, RawPcmReader, SpectralFluxDetector,
};
use pulse_domain::BpmResult;
use tracing::{info, instrument, warn};

use crate::cancel::CancellationToken;
use crate::energy::EnergyPeakEstimator;
use crate::error::AnalysisError;
use crate::estimator::TempoEstimator;

/// File to tempo: decode, detect onsets, estimate; fall back to raw energy
/// peaks when the file cannot be decoded.
#[derive(Debug, Clone, Default)]
pub struct AnalysisPipeline {
    estimator: TempoEstimator,
    fallback: EnergyPeakEstimator,
    onset: OnsetConfig,
}

impl AnalysisPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_onset_config(onset: OnsetConfig) -> Self {
        Self {
            onset,
            ..Self::default()
        }
    }

    /// Runs the analysis on the calling thread.
    ///
    /// `progress` receives `processed samples / (file size / 2)`, which is
    /// non-decreasing but may pass 1.0 for anything other than 16-bit mono.
    /// Cancellation is checked once per decoded block.
    #[instrument(skip(self, cancel, progress))]
    pub fn analyze(
        &self,
        path: &Path,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(f32),
    ) -> Result<BpmResult, AnalysisError> {
        let file_size = match fs::metadata(path) {
            Ok(metadata) => metadata.len(),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(AnalysisError::NotFound(path.to_path_buf()))
            }
            Err(err) => return Err(err.into()),
        };
        cancel.check()?;

        let estimated_samples = (file_size / 2).max(1) as f64;
        let mut detector: Option<SpectralFluxDetector> = None;
        let mut processed = 0u64;
        let mut cancelled = false;
        let streamed = AudioDecoder::stream(path, |block, sample_rate| {
            if cancel.is_cancelled() {
                cancelled = true;
                return ControlFlow::Break(());
            }
            detector
                .get_or_insert_with(|| SpectralFluxDetector::new(sample_rate, self.onset))
                .push(block);
            processed += block.len() as u64;
            progress((processed as f64 / estimated_samples) as f32);
            ControlFlow::Continue(())
        });
        if cancelled {
            return Err(AnalysisError::Cancelled);
        }

        match streamed {
            Ok(stream) => {
                let onsets = detector.map(|mut d| d.finish()).unwrap_or_default();
                let result = self.estimator.estimate(&onsets);
                info!(
                    bpm = result.bpm,
                    confidence = result.confidence,
                    onsets = onsets.len(),
                    frames = stream.frames,
                    "tempo analysis finished"
                );
                Ok(result)
            }
            Err(DecodeError::NotFound(missing)) => Err(AnalysisError::NotFound(missing)),
            Err(err) => {
                warn!(%err, "decoding failed, estimating from raw energy peaks");
                self.analyze_raw(path, cancel)
            }
        }
    }

    fn analyze_raw(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<BpmResult, AnalysisError> {
        let mut reader = match RawPcmReader::open(path) {
            Ok(reader) => reader,
            Err(DecodeError::NotFound(missing)) => return Err(AnalysisError::NotFound(missing)),
            Err(err) => {
                warn!(%err, "raw read failed");
                return Ok(BpmResult::fallback_default());
            }
        };
        let result = self.fallback.estimate_source(&mut reader, cancel)?;
        info!(
            bpm = result.bpm,
            confidence = result.confidence,
            "fallback tempo analysis finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_found() {
        let pipeline = AnalysisPipeline::new();
        let result = pipeline.analyze(
            Path::new("missing.wav"),
            &CancellationToken::new(),
            &mut |_| {},
        );
        assert!(matches!(result, Err(AnalysisError::NotFound(_))));
    }

    #[test]
    fn cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        std::fs::write(&path, [0u8; 128]).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let result = AnalysisPipeline::new().analyze(&path, &token, &mut |_| {});
        assert!(matches!(result, Err(AnalysisError::Cancelled)));
    }

    fn write_silence(path: &Path, seconds: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..44_100 * seconds {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn cancel_mid_stream_stops_at_next_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.wav");
        write_silence(&path, 20);

        let token = CancellationToken::new();
        let canceller = token.clone();
        let mut calls = 0;
        let mut last = 0.0;
        let result = AnalysisPipeline::new().analyze(&path, &token, &mut |p| {
            calls += 1;
            last = p;
            if calls == 3 {
                canceller.cancel();
            }
        });

        assert!(matches!(result, Err(AnalysisError::Cancelled)));
        assert_eq!(calls, 3);
        assert!(last < 0.5, "progress {last}");
    }

    #[test]
    fn silent_wav_has_no_onsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.wav");
        write_silence(&path, 1);

        let mut reports = Vec::new();
        let result = AnalysisPipeline::new()
            .analyze(&path, &CancellationToken::new(), &mut |p| reports.push(p))
            .unwrap();
        assert_eq!(result, BpmResult::insufficient_data());
        assert!(!reports.is_empty());
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
    }
}
