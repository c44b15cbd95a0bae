pub mod backend;
pub mod click;
pub mod dsp;
pub mod io;
pub mod onset;

pub use backend::{ClickOutput, NullOutput};
pub use click::{ClickBank, ClickSource, ClickVoice, RenderedClick};
pub use dsp::{chunk_rms, resample_linear, synthesize_click, CLICK_SAMPLE_RATE};
pub use io::{AudioDecoder, AudioReader, DecodeError, RawPcmReader, StreamInfo};
pub use onset::{OnsetConfig, OnsetDetector, SpectralFluxDetector};
