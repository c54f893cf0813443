//! Log-mel spectrogram features for audio encoders that want spectral input.
//!
//! ```text
//! samples ──pad──► STFT power (Hann, rustfft) ──► mel filter bank ──► log10 / clamp / scale
//! ```
//!
//! Two mel scales are supported. Whisper-family encoders use Slaney; older
//! toolchains use HTK. Mixing them up produces a plausible-looking but wrong
//! spectrogram, so the scale is part of the config the backend reports.

use crate::error::{EncoderError, EncoderResult};
use ndarray::Array3;
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};

/// Mel frequency scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MelScale {
    /// Linear below 1 kHz, logarithmic above.
    #[default]
    Slaney,
    /// `2595 · log10(1 + f / 700)`
    Htk,
}

/// Edge padding applied before framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaddingMode {
    #[default]
    Reflect,
    Zero,
    None,
}

/// Mel spectrogram parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MelConfig {
    pub n_mels: usize,
    pub n_fft: usize,
    pub hop_length: usize,
    pub sample_rate: u32,
    #[serde(default)]
    pub scale: MelScale,
    #[serde(default)]
    pub f_min: f64,
    /// 0.0 means Nyquist
    #[serde(default)]
    pub f_max: f64,
    #[serde(default)]
    pub padding: PaddingMode,
    /// Pad or truncate output to this many frames
    #[serde(default)]
    pub max_frames: Option<usize>,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self::whisper()
    }
}

impl MelConfig {
    /// 80 bins, 25 ms window, 10 ms hop at 16 kHz, 30 s of frames.
    pub fn whisper() -> Self {
        Self {
            n_mels: 80,
            n_fft: 400,
            hop_length: 160,
            sample_rate: 16000,
            scale: MelScale::Slaney,
            f_min: 0.0,
            f_max: 8000.0,
            padding: PaddingMode::Reflect,
            max_frames: Some(3000),
        }
    }

    pub fn effective_f_max(&self) -> f64 {
        if self.f_max <= 0.0 {
            self.sample_rate as f64 / 2.0
        } else {
            self.f_max
        }
    }

    fn pad_size(&self) -> usize {
        match self.padding {
            PaddingMode::Reflect | PaddingMode::Zero => self.n_fft / 2,
            PaddingMode::None => 0,
        }
    }

    fn validate(&self) -> EncoderResult<()> {
        if self.n_mels == 0 || self.n_fft < 2 || self.hop_length == 0 || self.sample_rate == 0 {
            return Err(EncoderError::validation(format!(
                "invalid mel config: n_mels={}, n_fft={}, hop={}, rate={}",
                self.n_mels, self.n_fft, self.hop_length, self.sample_rate
            )));
        }
        if self.f_min < 0.0 || self.f_min >= self.effective_f_max() {
            return Err(EncoderError::validation(format!(
                "invalid mel frequency range [{}, {}]",
                self.f_min,
                self.effective_f_max()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Mel scale conversion
// ============================================================================

const SLANEY_F_SP: f64 = 200.0 / 3.0;
const SLANEY_MIN_LOG_HZ: f64 = 1000.0;
const SLANEY_MIN_LOG_MEL: f64 = SLANEY_MIN_LOG_HZ / SLANEY_F_SP;

fn slaney_logstep() -> f64 {
    6.4f64.ln() / 27.0
}

pub fn hz_to_mel(freq: f64, scale: MelScale) -> f64 {
    match scale {
        MelScale::Htk => 2595.0 * (1.0 + freq / 700.0).log10(),
        MelScale::Slaney => {
            if freq < SLANEY_MIN_LOG_HZ {
                freq / SLANEY_F_SP
            } else {
                SLANEY_MIN_LOG_MEL + (freq / SLANEY_MIN_LOG_HZ).ln() / slaney_logstep()
            }
        }
    }
}

pub fn mel_to_hz(mel: f64, scale: MelScale) -> f64 {
    match scale {
        MelScale::Htk => 700.0 * (10.0_f64.powf(mel / 2595.0) - 1.0),
        MelScale::Slaney => {
            if mel < SLANEY_MIN_LOG_MEL {
                mel * SLANEY_F_SP
            } else {
                SLANEY_MIN_LOG_HZ * (slaney_logstep() * (mel - SLANEY_MIN_LOG_MEL)).exp()
            }
        }
    }
}

/// Triangular filters, `n_mels × (n_fft / 2 + 1)`.
///
/// Slaney filters are area-normalized; HTK filters peak at 1.0.
pub fn filter_bank(config: &MelConfig) -> Vec<Vec<f64>> {
    let n_freqs = config.n_fft / 2 + 1;
    let fft_freqs: Vec<f64> = (0..n_freqs)
        .map(|i| i as f64 * config.sample_rate as f64 / config.n_fft as f64)
        .collect();

    let mel_min = hz_to_mel(config.f_min, config.scale);
    let mel_max = hz_to_mel(config.effective_f_max(), config.scale);
    let points = config.n_mels + 2;
    let hz_points: Vec<f64> = (0..points)
        .map(|i| {
            let mel = mel_min + (mel_max - mel_min) * i as f64 / (points - 1) as f64;
            mel_to_hz(mel, config.scale)
        })
        .collect();

    let mut bank = vec![vec![0.0; n_freqs]; config.n_mels];
    for (m, row) in bank.iter_mut().enumerate() {
        let (lower, center, upper) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
        let norm = match config.scale {
            MelScale::Slaney => 2.0 / (upper - lower),
            MelScale::Htk => 1.0,
        };
        for (k, &freq) in fft_freqs.iter().enumerate() {
            let weight = if freq >= lower && freq <= center {
                (freq - lower) / (center - lower)
            } else if freq > center && freq <= upper {
                (upper - freq) / (upper - center)
            } else {
                0.0
            };
            row[k] = weight * norm;
        }
    }
    bank
}

// ============================================================================
// Framing and STFT
// ============================================================================

fn pad(samples: &[f32], size: usize, mode: PaddingMode) -> Vec<f32> {
    let n = samples.len();
    let mut out = Vec::with_capacity(n + 2 * size);
    match mode {
        PaddingMode::None => return samples.to_vec(),
        PaddingMode::Zero => {
            out.resize(size, 0.0);
            out.extend_from_slice(samples);
            out.resize(n + 2 * size, 0.0);
        }
        PaddingMode::Reflect => {
            // Index reflection without repeating the edge sample.
            let reflect = |i: isize| -> f32 {
                if n == 1 {
                    return samples[0];
                }
                let period = 2 * (n as isize - 1);
                let mut j = i.rem_euclid(period);
                if j >= n as isize {
                    j = period - j;
                }
                samples[j as usize]
            };
            for i in 0..(n + 2 * size) {
                out.push(reflect(i as isize - size as isize));
            }
        }
    }
    out
}

fn hann_window(size: usize) -> Vec<f64> {
    let factor = 2.0 * std::f64::consts::PI / size as f64;
    (0..size).map(|i| 0.5 - 0.5 * (i as f64 * factor).cos()).collect()
}

/// Power spectrum per frame, `frames × (n_fft / 2 + 1)`.
fn stft_power(samples: &[f32], n_fft: usize, hop: usize) -> Vec<Vec<f64>> {
    if samples.len() < n_fft {
        return Vec::new();
    }
    let window = hann_window(n_fft);
    let n_freqs = n_fft / 2 + 1;
    let n_frames = (samples.len() - n_fft) / hop + 1;

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n_fft);
    let mut buffer = vec![Complex::new(0.0, 0.0); n_fft];

    let mut frames = Vec::with_capacity(n_frames);
    for f in 0..n_frames {
        let start = f * hop;
        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = Complex::new(samples[start + i] as f64 * window[i], 0.0);
        }
        fft.process(&mut buffer);
        frames.push(buffer[..n_freqs].iter().map(|c| c.norm_sqr()).collect());
    }
    frames
}

/// Compute a log-mel spectrogram shaped `(1, n_mels, frames)`.
///
/// Values follow Whisper's normalization: `log10` with a 1e-10 floor, clamped
/// to 8 decades below the maximum, then `(x + 4) / 4`.
pub fn log_mel_spectrogram(samples: &[f32], config: &MelConfig) -> EncoderResult<Array3<f32>> {
    config.validate()?;
    if samples.is_empty() {
        return Err(EncoderError::validation(
            "cannot compute mel spectrogram from empty audio",
        ));
    }

    let padded = pad(samples, config.pad_size(), config.padding);
    let power = stft_power(&padded, config.n_fft, config.hop_length);
    if power.is_empty() {
        return Err(EncoderError::validation(format!(
            "audio too short for a {}-point STFT ({} samples)",
            config.n_fft,
            samples.len()
        )));
    }

    let bank = filter_bank(config);
    let n_frames = power.len();
    let out_frames = config.max_frames.unwrap_or(n_frames);

    let mut log_mel = vec![vec![0.0f64; n_frames]; config.n_mels];
    let mut max_val = f64::NEG_INFINITY;
    for (t, frame) in power.iter().enumerate() {
        for (m, filter) in bank.iter().enumerate() {
            let energy: f64 = filter.iter().zip(frame).map(|(w, p)| w * p).sum();
            let v = energy.max(1e-10).log10();
            max_val = max_val.max(v);
            log_mel[m][t] = v;
        }
    }
    let floor = max_val - 8.0;

    let mut out = Array3::<f32>::zeros((1, config.n_mels, out_frames));
    for m in 0..config.n_mels {
        for t in 0..out_frames {
            let v = if t < n_frames { log_mel[m][t].max(floor) } else { floor };
            out[[0, m, t]] = ((v + 4.0) / 4.0) as f32;
        }
    }

    log::debug!(
        target: "sidecar_core",
        "mel spectrogram: {} samples -> {} frames ({} emitted), {} bins",
        samples.len(),
        n_frames,
        out_frames,
        config.n_mels
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, secs: f32) -> Vec<f32> {
        let n = (rate as f32 * secs) as usize;
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_mel_scale_roundtrip() {
        for scale in [MelScale::Slaney, MelScale::Htk] {
            for freq in [50.0, 999.0, 1000.0, 4000.0, 7999.0] {
                let back = mel_to_hz(hz_to_mel(freq, scale), scale);
                assert!((freq - back).abs() < 1e-6, "{:?} at {}", scale, freq);
            }
        }
    }

    #[test]
    fn test_slaney_linear_region() {
        assert!((hz_to_mel(600.0, MelScale::Slaney) - 9.0).abs() < 1e-9);
        assert!((hz_to_mel(1000.0, MelScale::Slaney) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_filter_bank_shape() {
        let bank = filter_bank(&MelConfig::whisper());
        assert_eq!(bank.len(), 80);
        assert_eq!(bank[0].len(), 201);
        assert!(bank.iter().all(|row| row.iter().any(|w| *w > 0.0)));
    }

    #[test]
    fn test_reflect_padding() {
        let padded = pad(&[1.0, 2.0, 3.0, 4.0, 5.0], 2, PaddingMode::Reflect);
        assert_eq!(padded, vec![3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 5.0, 4.0, 3.0]);

        let padded = pad(&[1.0, 2.0], 1, PaddingMode::Zero);
        assert_eq!(padded, vec![0.0, 1.0, 2.0, 0.0]);
    }

    #[test]
    fn test_whisper_shape_is_fixed() {
        let mel = log_mel_spectrogram(&vec![0.0; 16000], &MelConfig::whisper()).unwrap();
        assert_eq!(mel.shape(), &[1, 80, 3000]);
    }

    #[test]
    fn test_unbounded_frames_follow_input_length() {
        let config = MelConfig {
            max_frames: None,
            ..MelConfig::whisper()
        };
        let mel = log_mel_spectrogram(&sine(440.0, 16000, 1.0), &config).unwrap();
        // reflect padding by n_fft/2 on each side -> 1 + 16000 / 160 frames
        assert_eq!(mel.shape(), &[1, 80, 101]);
        assert!(mel.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_scales_differ() {
        let samples = sine(440.0, 16000, 0.5);
        let slaney = MelConfig {
            max_frames: Some(20),
            ..MelConfig::whisper()
        };
        let htk = MelConfig {
            scale: MelScale::Htk,
            ..slaney.clone()
        };
        let a: f32 = log_mel_spectrogram(&samples, &slaney).unwrap().iter().sum();
        let b: f32 = log_mel_spectrogram(&samples, &htk).unwrap().iter().sum();
        assert!((a - b).abs() > 0.1);
    }

    #[test]
    fn test_rejects_empty_and_short_input() {
        assert!(log_mel_spectrogram(&[], &MelConfig::whisper()).is_err());

        let no_pad = MelConfig {
            padding: PaddingMode::None,
            ..MelConfig::whisper()
        };
        assert!(log_mel_spectrogram(&[0.1; 100], &no_pad).is_err());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = MelConfig {
            hop_length: 0,
            ..MelConfig::whisper()
        };
        assert!(matches!(
            log_mel_spectrogram(&[0.0; 1000], &config),
            Err(EncoderError::Validation(_))
        ));
    }
}
