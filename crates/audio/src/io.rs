use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tracing::{debug, trace};

/// Bytes per chunk read by [`RawPcmReader`].
pub const PCM_CHUNK_BYTES: usize = 4096;
/// Size of the canonical RIFF/WAVE header skipped before raw reads.
pub const WAV_HEADER_BYTES: u64 = 44;

const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Why an audio source could not be turned into samples.
///
/// `NotFound` is the only kind callers are expected to surface; the others
/// mean "this decoder cannot read it" and justify a cruder fallback.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("audio source not found: {0:?}")]
    NotFound(PathBuf),
    #[error("unsupported audio format: {0}")]
    Unsupported(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<SymphError> for DecodeError {
    fn from(err: SymphError) -> Self {
        match err {
            SymphError::Unsupported(what) => DecodeError::Unsupported(what.to_string()),
            SymphError::IoError(err) => DecodeError::Io(err),
            other => DecodeError::Decode(other.to_string()),
        }
    }
}

fn open_file(path: &Path) -> Result<File, DecodeError> {
    File::open(path).map_err(|err| {
        if err.kind() == ErrorKind::NotFound {
            DecodeError::NotFound(path.to_path_buf())
        } else {
            DecodeError::Io(err)
        }
    })
}

/// Fully decoded mono audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioReader {
    pub sample_rate: u32,
    /// Channel count of the source before downmixing.
    pub channels: u16,
    pub samples: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// Mono frames handed to the callback.
    pub frames: u64,
    pub stopped_early: bool,
}

pub struct AudioDecoder;

impl AudioDecoder {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<AudioReader, DecodeError> {
        let mut samples = Vec::new();
        let info = Self::stream(path, |block, _sample_rate| {
            samples.extend_from_slice(block);
            ControlFlow::Continue(())
        })?;
        Ok(AudioReader {
            sample_rate: info.sample_rate,
            channels: info.channels,
            samples,
        })
    }

    /// Decodes `path` packet by packet and hands mono blocks, with the
    /// source sample rate, to `on_block`.
    ///
    /// Returning `ControlFlow::Break` stops decoding after the current block.
    /// Undecodable packets are skipped; a source the probe cannot read is
    /// `DecodeError::Unsupported`.
    pub fn stream<P, F>(path: P, mut on_block: F) -> Result<StreamInfo, DecodeError>
    where
        P: AsRef<Path>,
        F: FnMut(&[f32], u32) -> ControlFlow<()>,
    {
        let path_ref = path.as_ref();
        let file = open_file(path_ref)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = path_ref.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| DecodeError::Unsupported("no default track found".into()))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let mut decoder =
            symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

        let mut info = StreamInfo {
            sample_rate: codec_params.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
            channels: codec_params
                .channels
                .map(|c| c.count() as u16)
                .unwrap_or(1),
            frames: 0,
            stopped_early: false,
        };
        debug!(
            path = ?path_ref,
            sample_rate = info.sample_rate,
            channels = info.channels,
            "decoding audio"
        );

        let mut mono = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphError::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => break,
                Err(SymphError::ResetRequired) => break,
                Err(err) => return Err(err.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }
            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphError::DecodeError(reason)) => {
                    trace!(reason, "skipping undecodable packet");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count().max(1);
            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);

            mono.clear();
            mono.extend(
                buffer
                    .samples()
                    .chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
            info.frames += mono.len() as u64;
            if on_block(&mono, info.sample_rate).is_break() {
                info.stopped_early = true;
                break;
            }
        }

        Ok(info)
    }
}

/// Reads a file as raw 16-bit PCM in fixed-size chunks, no decoding at all.
///
/// For `.wav` paths the first 44 bytes are assumed to be a canonical header
/// and skipped.
pub struct RawPcmReader<R> {
    inner: R,
    buffer: Vec<u8>,
}

impl RawPcmReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let mut reader = Self::new(BufReader::new(open_file(path)?));
        if is_wav(path) {
            reader.skip(WAV_HEADER_BYTES)?;
        }
        Ok(reader)
    }
}

impl<R: Read> RawPcmReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: vec![0; PCM_CHUNK_BYTES],
        }
    }

    pub fn skip(&mut self, bytes: u64) -> io::Result<u64> {
        io::copy(&mut (&mut self.inner).take(bytes), &mut io::sink())
    }

    /// Next chunk of up to [`PCM_CHUNK_BYTES`]; only the last one is short.
    pub fn next_chunk(&mut self) -> io::Result<Option<&[u8]>> {
        let mut filled = 0;
        while filled < self.buffer.len() {
            match self.inner.read(&mut self.buffer[filled..]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        if filled == 0 {
            Ok(None)
        } else {
            Ok(Some(&self.buffer[..filled]))
        }
    }
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
}
