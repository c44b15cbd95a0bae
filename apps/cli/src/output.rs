use std::time::Duration;

use anyhow::{bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, SampleRate, Stream, SupportedStreamConfig};
use parking_lot::Mutex;
use pulse_audio::dsp::i16_to_f32;
use pulse_audio::{resample_linear, ClickBank, ClickOutput, CLICK_SAMPLE_RATE};
use pulse_domain::ClickEvent;
use ringbuf::{HeapProducer, HeapRb};
use tracing::{debug, info, warn};

/// Seconds of mono audio the queue between scheduler and device can hold.
const QUEUE_SECONDS: usize = 2;

/// Plays rendered clicks on the default output device.
///
/// The scheduler thread pushes samples into a ring buffer that the device
/// callback drains; an empty ring plays silence.
pub struct CpalOutput {
    bank: ClickBank,
    producer: Mutex<HeapProducer<f32>>,
    device_rate: u32,
    buffer_frames: Option<u32>,
}

impl CpalOutput {
    /// Opens the default device, at `preferred_rate` when the device
    /// supports it. The returned stream must stay alive (and on this thread)
    /// for as long as clicks should be heard.
    pub fn open(bank: ClickBank, preferred_rate: u32) -> Result<(Self, Stream)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .context("no default output device")?;
        let supported = output_config(&device, preferred_rate)?;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let device_rate = config.sample_rate.0;
        let channels = usize::from(config.channels.max(1));
        let buffer_frames = match config.buffer_size {
            BufferSize::Fixed(frames) => Some(frames),
            BufferSize::Default => None,
        };

        let ring = HeapRb::<f32>::new(device_rate as usize * QUEUE_SECONDS);
        let (producer, mut consumer) = ring.split();
        let on_error = |err: cpal::StreamError| warn!(%err, "output stream error");

        let stream = match format {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _| {
                    for frame in data.chunks_mut(channels) {
                        frame.fill(consumer.pop().unwrap_or(0.0));
                    }
                },
                on_error,
                None,
            )?,
            SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _| {
                    for frame in data.chunks_mut(channels) {
                        let sample = consumer.pop().unwrap_or(0.0);
                        frame.fill((sample * i16::MAX as f32) as i16);
                    }
                },
                on_error,
                None,
            )?,
            SampleFormat::U16 => device.build_output_stream(
                &config,
                move |data: &mut [u16], _| {
                    let center = (u16::MAX / 2) as f32;
                    for frame in data.chunks_mut(channels) {
                        let sample = consumer.pop().unwrap_or(0.0);
                        let value = (sample * center + center).clamp(0.0, u16::MAX as f32);
                        frame.fill(value as u16);
                    }
                },
                on_error,
                None,
            )?,
            other => bail!("unsupported output sample format {other:?}"),
        };
        stream.play().context("starting output stream")?;
        info!(
            device = %device.name().unwrap_or_default(),
            sample_rate = device_rate,
            channels,
            style = bank.style().display_name(),
            synthesized = bank.is_synthesized(),
            "audio output ready"
        );

        Ok((
            Self {
                bank,
                producer: Mutex::new(producer),
                device_rate,
                buffer_frames,
            },
            stream,
        ))
    }
}

fn output_config(device: &Device, preferred_rate: u32) -> Result<SupportedStreamConfig> {
    let preferred = device.supported_output_configs().ok().and_then(|mut ranges| {
        ranges.find(|range| {
            playable(range.sample_format())
                && rate_in_range(
                    preferred_rate,
                    range.min_sample_rate().0,
                    range.max_sample_rate().0,
                )
        })
    });
    match preferred {
        Some(range) => Ok(range.with_sample_rate(SampleRate(preferred_rate))),
        None => {
            debug!(preferred_rate, "preferred rate unsupported, using device default");
            device
                .default_output_config()
                .context("querying output config")
        }
    }
}

fn playable(format: SampleFormat) -> bool {
    matches!(
        format,
        SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
    )
}

fn rate_in_range(rate: u32, min: u32, max: u32) -> bool {
    rate > 0 && min <= rate && rate <= max
}

impl ClickOutput for CpalOutput {
    fn play(&self, event: &ClickEvent) -> Result<()> {
        let click = self.bank.render(event);
        let samples = resample_linear(
            &i16_to_f32(&click.samples),
            CLICK_SAMPLE_RATE,
            self.device_rate,
        );
        let pushed = self.producer.lock().push_slice(&samples);
        if pushed < samples.len() {
            bail!(
                "output queue full, dropped {} of {} samples",
                samples.len() - pushed,
                samples.len()
            );
        }
        Ok(())
    }

    fn measure_latency(&self) -> Result<Duration> {
        match self.buffer_frames {
            Some(frames) => Ok(Duration::from_secs_f64(
                f64::from(frames) / f64::from(self.device_rate),
            )),
            None => Ok(Duration::from_millis(5)),
        }
    }
}
