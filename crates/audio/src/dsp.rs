use std::f64::consts::PI;

/// Rate of every synthesized click buffer (16-bit mono).
pub const CLICK_SAMPLE_RATE: u32 = 44_100;

/// Decay constant of the click envelope `exp(-50 t)`.
const CLICK_DECAY: f64 = 50.0;

/// Renders a decaying sine burst.
///
/// Pure arithmetic on the three inputs; the same call always produces the
/// same samples.
pub fn synthesize_click(frequency_hz: f32, duration_ms: u32, volume: f32) -> Vec<i16> {
    let sample_rate = f64::from(CLICK_SAMPLE_RATE);
    let len = (CLICK_SAMPLE_RATE as usize * duration_ms as usize) / 1000;
    let frequency = f64::from(frequency_hz);
    let volume = f64::from(volume);
    (0..len)
        .map(|i| {
            let t = i as f64 / sample_rate;
            let envelope = (-CLICK_DECAY * t).exp();
            let value = (2.0 * PI * frequency * t).sin() * envelope * volume * f64::from(i16::MAX);
            (value as i32).clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
        })
        .collect()
}

/// RMS of a chunk of 16-bit little-endian samples.
///
/// A trailing odd byte is ignored.
pub fn chunk_rms(bytes: &[u8]) -> f32 {
    let count = bytes.len() / 2;
    if count == 0 {
        return 0.0;
    }
    let sum: i64 = bytes
        .chunks_exact(2)
        .map(|pair| {
            let sample = i64::from(i16::from_le_bytes([pair[0], pair[1]]));
            sample * sample
        })
        .sum();
    (sum as f64 / count as f64).sqrt() as f32
}

pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples
        .iter()
        .map(|&s| f32::from(s) / f32::from(i16::MAX))
        .collect()
}

pub fn f32_to_i16(samples: &[f32], gain: f32) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * gain).clamp(-1.0, 1.0))
        .map(|s| (s * f32::from(i16::MAX)) as i16)
        .collect()
}

/// Linear-interpolation resampler; good enough for clicks, not for music.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }
    let step = f64::from(from_rate) / f64::from(to_rate);
    let out_len = (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    let last = samples.len() - 1;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let index = pos.floor() as usize;
            let frac = (pos - index as f64) as f32;
            let a = samples[index.min(last)];
            let b = samples[(index + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}
