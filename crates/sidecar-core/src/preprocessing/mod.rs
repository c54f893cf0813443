//! Preprocessing pipeline.
//!
//! Pure functions that turn a [`RawMediaBuffer`] into the
//! [`NormalizedTensorBatch`] a backend context expects. Nothing here touches
//! lifecycle state or the backend.
//!
//! ```text
//! Image ─► validate ─► channel conversion ─► ImageBatch (1, 3, h, w)
//! Audio ─► validate ─► mono ─► resample ─► normalize ─► [pre-emphasis] ─► waveform | mel
//! ```

pub mod audio;
pub mod image;
pub mod mel;

pub use audio::{
    apply_pre_emphasis, downmix_to_mono, normalize_amplitude, prepare_audio, resample_linear,
    validate_samples, AudioOptions, NormalizationMode, DEFAULT_PRE_EMPHASIS,
};
pub use image::{convert_to_rgb, normalize_image};
pub use mel::{log_mel_spectrogram, MelConfig, MelScale, PaddingMode};

use crate::capabilities::{AudioInput, Capabilities};
use crate::error::{EncoderError, EncoderResult};
use crate::types::{AudioBatch, AudioFeatures, NormalizedTensorBatch, RawMediaBuffer};
use ndarray::Array2;

/// Audio settings that travel with a model handle.
#[derive(Debug, Clone, Copy)]
pub struct AudioSettings<'a> {
    /// Rate assumed when the buffer does not carry one
    pub sample_rate: u32,
    pub language: &'a str,
    pub options: &'a AudioOptions,
}

/// Build the backend input for `raw` under the given capabilities.
pub fn normalize(
    raw: &RawMediaBuffer<'_>,
    caps: &Capabilities,
    audio: &AudioSettings<'_>,
) -> EncoderResult<NormalizedTensorBatch> {
    if raw.kind() != caps.kind {
        return Err(EncoderError::validation(format!(
            "{} input given to a {} encoder",
            raw.kind(),
            caps.kind
        )));
    }

    match *raw {
        RawMediaBuffer::Image {
            pixels,
            width,
            height,
            channels,
        } => {
            if let Some((max_w, max_h)) = caps.max_resolution() {
                if width > max_w || height > max_h {
                    log::debug!(
                        target: "sidecar_core",
                        "image {}x{} exceeds {}x{}; encoder will downscale",
                        width,
                        height,
                        max_w,
                        max_h
                    );
                }
            }
            normalize_image(pixels, width, height, channels).map(NormalizedTensorBatch::Vision)
        }
        RawMediaBuffer::Audio {
            samples,
            sample_rate,
            channels,
        } => {
            let source_rate = sample_rate.unwrap_or(audio.sample_rate);
            normalize_audio(samples, source_rate, channels, caps, audio)
                .map(NormalizedTensorBatch::Audio)
        }
    }
}

fn normalize_audio(
    samples: &[f32],
    source_rate: u32,
    channels: u32,
    caps: &Capabilities,
    audio: &AudioSettings<'_>,
) -> EncoderResult<AudioBatch> {
    validate_samples(samples, source_rate)?;

    if let Some(max_secs) = caps.max_duration_secs() {
        let frames = samples.len() / channels.max(1) as usize;
        let secs = frames as f64 / source_rate as f64;
        if secs > max_secs as f64 {
            return Err(EncoderError::validation(format!(
                "audio is {:.1}s, limit is {}s",
                secs, max_secs
            )));
        }
    }

    let target_rate = match &caps.audio_input {
        AudioInput::Mel(config) => config.sample_rate,
        AudioInput::Waveform => caps.target_sample_rate,
    };
    let prepared = prepare_audio(samples, source_rate, channels, target_rate, audio.options)?;

    let features = match &caps.audio_input {
        AudioInput::Waveform => {
            let len = prepared.len();
            let waveform = Array2::from_shape_vec((1, len), prepared)
                .map_err(|e| EncoderError::validation(e.to_string()))?;
            AudioFeatures::Waveform(waveform)
        }
        AudioInput::Mel(config) => AudioFeatures::Mel(log_mel_spectrogram(&prepared, config)?),
    };

    Ok(AudioBatch {
        sample_rate: target_rate,
        language: audio.language.to_string(),
        features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EncoderKind;

    fn settings(options: &AudioOptions) -> AudioSettings<'_> {
        AudioSettings {
            sample_rate: 16000,
            language: "auto",
            options,
        }
    }

    #[test]
    fn test_normalize_image() {
        let opts = AudioOptions::default();
        let raw = RawMediaBuffer::Image {
            pixels: &[200; 4],
            width: 2,
            height: 2,
            channels: 1,
        };
        let batch = normalize(&raw, &Capabilities::vision_defaults(), &settings(&opts)).unwrap();
        assert_eq!(batch.kind(), EncoderKind::Vision);
        assert_eq!(batch.shape(), vec![1, 3, 2, 2]);
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let opts = AudioOptions::default();
        let raw = RawMediaBuffer::Audio {
            samples: &[0.1; 10],
            sample_rate: Some(16000),
            channels: 1,
        };
        assert!(matches!(
            normalize(&raw, &Capabilities::vision_defaults(), &settings(&opts)),
            Err(EncoderError::Validation(_))
        ));
    }

    #[test]
    fn test_audio_uses_configured_rate_when_missing() {
        let opts = AudioOptions::default();
        let samples = vec![0.5; 8000];
        let raw = RawMediaBuffer::Audio {
            samples: &samples,
            sample_rate: None,
            channels: 1,
        };
        let mut audio = settings(&opts);
        audio.sample_rate = 8000;
        let batch = normalize(&raw, &Capabilities::audio_defaults(), &audio).unwrap();
        match batch {
            NormalizedTensorBatch::Audio(b) => {
                assert_eq!(b.sample_rate, 16000);
                assert_eq!(b.shape(), vec![1, 16000]);
                assert_eq!(b.language, "auto");
            }
            other => panic!("unexpected batch {:?}", other.kind()),
        }
    }

    #[test]
    fn test_audio_duration_limit() {
        let opts = AudioOptions::default();
        let mut caps = Capabilities::audio_defaults();
        caps.limit = crate::capabilities::MediaLimit::Duration { seconds: 1 };
        let samples = vec![0.1; 32000];
        let raw = RawMediaBuffer::Audio {
            samples: &samples,
            sample_rate: Some(16000),
            channels: 1,
        };
        assert!(normalize(&raw, &caps, &settings(&opts)).is_err());
    }

    #[test]
    fn test_audio_mel_features() {
        let opts = AudioOptions::default();
        let mut caps = Capabilities::audio_defaults();
        caps.audio_input = AudioInput::Mel(MelConfig {
            max_frames: Some(50),
            ..MelConfig::whisper()
        });
        let samples: Vec<f32> = (0..16000).map(|i| (i as f32 * 0.05).sin()).collect();
        let raw = RawMediaBuffer::Audio {
            samples: &samples,
            sample_rate: Some(16000),
            channels: 1,
        };
        let batch = normalize(&raw, &caps, &settings(&opts)).unwrap();
        assert_eq!(batch.shape(), vec![1, 80, 50]);
    }
}
