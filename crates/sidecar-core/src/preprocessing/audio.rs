//! Audio preprocessing: validation, down-mix, resampling, amplitude
//! normalization and pre-emphasis.

use crate::error::{EncoderError, EncoderResult};
use serde::{Deserialize, Serialize};

/// Default pre-emphasis coefficient.
pub const DEFAULT_PRE_EMPHASIS: f32 = 0.97;

/// How sample amplitudes are normalized before encode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum NormalizationMode {
    /// Scale so the absolute peak is 1.0
    #[default]
    Peak,
    /// Scale to a target RMS, then clamp to [-1, 1]
    Rms { target: f32 },
    /// Leave amplitudes untouched
    None,
}

/// Options for [`prepare_audio`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioOptions {
    pub normalization: NormalizationMode,
    /// Pre-emphasis coefficient; `None` disables the filter
    pub pre_emphasis: Option<f32>,
}

impl Default for AudioOptions {
    fn default() -> Self {
        Self {
            normalization: NormalizationMode::Peak,
            pre_emphasis: None,
        }
    }
}

impl AudioOptions {
    /// Reject coefficients that would push non-finite or unbounded samples
    /// to the encoder. NaN fails both checks.
    pub fn validate(&self) -> EncoderResult<()> {
        if let Some(f) = self.pre_emphasis {
            if !(0.0..1.0).contains(&f) {
                return Err(EncoderError::validation(format!(
                    "pre_emphasis must be in [0, 1), got {}",
                    f
                )));
            }
        }
        if let NormalizationMode::Rms { target } = self.normalization {
            if !(target > 0.0 && target <= 1.0) {
                return Err(EncoderError::validation(format!(
                    "RMS target must be in (0, 1], got {}",
                    target
                )));
            }
        }
        Ok(())
    }
}

/// Reject empty buffers, non-finite samples and a zero sample rate.
pub fn validate_samples(samples: &[f32], sample_rate: u32) -> EncoderResult<()> {
    if samples.is_empty() {
        return Err(EncoderError::validation("audio buffer is empty"));
    }
    if sample_rate == 0 {
        return Err(EncoderError::validation("sample rate must be > 0"));
    }
    if let Some(pos) = samples.iter().position(|s| !s.is_finite()) {
        return Err(EncoderError::validation(format!(
            "non-finite sample at index {}",
            pos
        )));
    }
    Ok(())
}

/// Average interleaved channels into one.
///
/// A trailing partial frame is dropped.
pub fn downmix_to_mono(samples: &[f32], channels: u32) -> EncoderResult<Vec<f32>> {
    match channels {
        0 => Err(EncoderError::validation("audio channel count must be > 0")),
        1 => Ok(samples.to_vec()),
        n => {
            let n = n as usize;
            if samples.len() < n {
                return Err(EncoderError::validation(format!(
                    "audio buffer of {} samples is shorter than one {}-channel frame",
                    samples.len(),
                    n
                )));
            }
            Ok(samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect())
        }
    }
}

/// Linear-interpolation resample.
///
/// Output length is `ceil(len · to / from)`.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> EncoderResult<Vec<f32>> {
    if from_rate == 0 || to_rate == 0 {
        return Err(EncoderError::validation("sample rate must be > 0"));
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let last = samples.len() - 1;

    let output = (0..output_len)
        .map(|i| {
            let src_pos = i as f64 / ratio;
            let idx = (src_pos.floor() as usize).min(last);
            let frac = (src_pos - idx as f64) as f32;
            if idx < last {
                samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
            } else {
                samples[last]
            }
        })
        .collect();
    Ok(output)
}

/// Normalize amplitudes in place. Silent input is left unchanged.
pub fn normalize_amplitude(samples: &mut [f32], mode: NormalizationMode) {
    match mode {
        NormalizationMode::None => {}
        NormalizationMode::Peak => {
            let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            if peak > 0.0 {
                samples.iter_mut().for_each(|s| *s /= peak);
            }
        }
        NormalizationMode::Rms { target } => {
            if samples.is_empty() {
                return;
            }
            // f64 accumulation: squares of large finite f32 samples overflow f32.
            let mean_sq = samples
                .iter()
                .map(|&s| f64::from(s) * f64::from(s))
                .sum::<f64>()
                / samples.len() as f64;
            let rms = mean_sq.sqrt();
            if rms > 0.0 {
                let gain = f64::from(target) / rms;
                samples
                    .iter_mut()
                    .for_each(|s| *s = (f64::from(*s) * gain).clamp(-1.0, 1.0) as f32);
            }
        }
    }
}

/// `y[n] = x[n] - factor · x[n-1]`, with `y[0] = x[0]`.
pub fn apply_pre_emphasis(samples: &mut [f32], factor: f32) {
    for i in (1..samples.len()).rev() {
        samples[i] -= factor * samples[i - 1];
    }
}

/// Full waveform path: validate, down-mix, resample to `target_rate`,
/// normalize, optional pre-emphasis.
pub fn prepare_audio(
    samples: &[f32],
    source_rate: u32,
    channels: u32,
    target_rate: u32,
    options: &AudioOptions,
) -> EncoderResult<Vec<f32>> {
    validate_samples(samples, source_rate)?;
    if target_rate == 0 {
        return Err(EncoderError::validation("target sample rate must be > 0"));
    }

    let mono = downmix_to_mono(samples, channels)?;
    let mut out = resample_linear(&mono, source_rate, target_rate)?;
    normalize_amplitude(&mut out, options.normalization);
    if let Some(factor) = options.pre_emphasis {
        apply_pre_emphasis(&mut out, factor);
    }

    log::debug!(
        target: "sidecar_core",
        "audio prepared: {} samples x{} @ {} Hz -> {} samples @ {} Hz",
        samples.len(),
        channels,
        source_rate,
        out.len(),
        target_rate
    );
    Ok(out)
}
