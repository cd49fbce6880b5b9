//! Audio and image input conversion for the pipeline helpers.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;

/// Sample rate the speech models expect.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Decoded PCM audio: interleaved `f32` samples.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioInput {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

/// Mono audio at [`TARGET_SAMPLE_RATE`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PreparedAudio {
    pub samples: Vec<f32>,
    pub sampling_rate: u32,
}

impl AudioInput {
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, channels: 1, sample_rate }
    }

    pub fn prepare(&self) -> PreparedAudio {
        let mono = downmix(&self.samples, self.channels);
        PreparedAudio {
            samples: resample_linear(&mono, self.sample_rate, TARGET_SAMPLE_RATE),
            sampling_rate: TARGET_SAMPLE_RATE,
        }
    }
}

/// Averages interleaved channels into one.
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear interpolation: `out[i] = s[j] + (s[j+1] - s[j]) * (p - j)` where
/// `p = i * from / to` and `j = floor(p)`.
pub fn resample_linear(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() || from == 0 || to == 0 {
        return samples.to_vec();
    }
    let out_len = (samples.len() as u64 * to as u64).div_ceil(from as u64) as usize;
    let ratio = from as f64 / to as f64;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let j = (pos.floor() as usize).min(last);
            let next = (j + 1).min(last);
            let frac = (pos - j as f64) as f32;
            samples[j] + (samples[next] - samples[j]) * frac
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
pub enum ImageInput {
    Url(String),
    /// Encoded image bytes (PNG, JPEG, ...).
    Bytes(Vec<u8>),
}

impl ImageInput {
    /// URL form the runtime accepts; bytes become a `data:` URL.
    pub fn to_source(&self) -> String {
        match self {
            ImageInput::Url(url) => url.clone(),
            ImageInput::Bytes(bytes) => {
                format!("data:{};base64,{}", sniff_mime(bytes), STANDARD.encode(bytes))
            }
        }
    }
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [b'B', b'M', ..] => "image/bmp",
        _ => "application/octet-stream",
    }
}
