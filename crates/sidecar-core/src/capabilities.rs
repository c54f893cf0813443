//! Capability descriptors and the per-model registry.
//!
//! A [`CapabilityRegistry`] starts out holding the default descriptor for its
//! encoder kind and is overwritten once from backend introspection after a
//! successful load. Everything else only reads snapshots.

use crate::backend::BackendLimits;
use crate::preprocessing::mel::MelConfig;
use crate::types::EncoderKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::RwLock;

/// Sample rate most speech encoders are trained at.
pub const DEFAULT_TARGET_SAMPLE_RATE: u32 = 16000;

/// Default maximum edge length for vision input.
pub const DEFAULT_MAX_RESOLUTION: u32 = 1344;

/// Default maximum audio clip duration in seconds.
pub const DEFAULT_MAX_DURATION_SECS: u32 = 300;

/// Language value that asks the backend to detect the language itself.
pub const AUTO_LANGUAGE: &str = "auto";

/// Size or length limit on a single input item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MediaLimit {
    Resolution { width: u32, height: u32 },
    Duration { seconds: u32 },
}

/// What an audio encoder wants to receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AudioInput {
    /// Mono waveform at the target sample rate
    #[default]
    Waveform,
    /// Log-mel spectrogram computed on the host
    Mel(MelConfig),
}

/// Accepted inputs for a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub kind: EncoderKind,
    pub max_items: u32,
    pub supported_formats: BTreeSet<String>,
    pub limit: MediaLimit,
    pub supported_sample_rates: BTreeSet<u32>,
    pub supported_languages: BTreeSet<String>,
    pub supports_generation: bool,
    pub supports_transcription: bool,
    /// Backend-reported embedding width, unknown before load
    pub embedding_dims: Option<usize>,
    /// Rate audio is resampled to before encode
    pub target_sample_rate: u32,
    pub audio_input: AudioInput,
}

fn strings(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Capabilities {
    /// Default descriptor for `kind` before any model is loaded.
    pub fn defaults(kind: EncoderKind) -> Self {
        match kind {
            EncoderKind::Vision => Self::vision_defaults(),
            EncoderKind::Audio => Self::audio_defaults(),
        }
    }

    pub fn vision_defaults() -> Self {
        Self {
            kind: EncoderKind::Vision,
            max_items: 4,
            supported_formats: strings(&["image/jpeg", "image/png", "image/webp", "image/bmp"]),
            limit: MediaLimit::Resolution {
                width: DEFAULT_MAX_RESOLUTION,
                height: DEFAULT_MAX_RESOLUTION,
            },
            supported_sample_rates: BTreeSet::new(),
            supported_languages: BTreeSet::new(),
            supports_generation: false,
            supports_transcription: false,
            embedding_dims: None,
            target_sample_rate: 0,
            audio_input: AudioInput::Waveform,
        }
    }

    pub fn audio_defaults() -> Self {
        Self {
            kind: EncoderKind::Audio,
            max_items: 1,
            supported_formats: strings(&["audio/wav", "audio/mp3", "audio/flac", "audio/ogg"]),
            limit: MediaLimit::Duration {
                seconds: DEFAULT_MAX_DURATION_SECS,
            },
            supported_sample_rates: [16000, 22050, 44100, 48000].into_iter().collect(),
            supported_languages: strings(&[
                "en", "es", "fr", "de", "it", "pt", "ru", "ja", "ko", "zh",
            ]),
            supports_generation: false,
            supports_transcription: true,
            embedding_dims: None,
            target_sample_rate: DEFAULT_TARGET_SAMPLE_RATE,
            audio_input: AudioInput::Waveform,
        }
    }

    pub fn supports_format(&self, mime: &str) -> bool {
        self.supported_formats.contains(&mime.to_ascii_lowercase())
    }

    pub fn supports_sample_rate(&self, rate: u32) -> bool {
        self.supported_sample_rates.contains(&rate)
    }

    /// `"auto"` is accepted by every audio model.
    pub fn supports_language(&self, code: &str) -> bool {
        code == AUTO_LANGUAGE || self.supported_languages.contains(code)
    }

    pub fn max_resolution(&self) -> Option<(u32, u32)> {
        match self.limit {
            MediaLimit::Resolution { width, height } => Some((width, height)),
            MediaLimit::Duration { .. } => None,
        }
    }

    pub fn max_duration_secs(&self) -> Option<u32> {
        match self.limit {
            MediaLimit::Duration { seconds } => Some(seconds),
            MediaLimit::Resolution { .. } => None,
        }
    }

    /// Apply backend-reported limits on top of this descriptor.
    fn apply(&mut self, limits: &BackendLimits) {
        if let Some(size) = limits.image_size.filter(|s| *s > 0) {
            if self.kind == EncoderKind::Vision {
                self.limit = MediaLimit::Resolution {
                    width: size,
                    height: size,
                };
            }
        }
        if let Some(seconds) = limits.max_duration_secs.filter(|s| *s > 0) {
            if self.kind == EncoderKind::Audio {
                self.limit = MediaLimit::Duration { seconds };
            }
        }
        if let Some(dims) = limits.embedding_dims.filter(|d| *d > 0) {
            self.embedding_dims = Some(dims);
        }
        if let Some(max_items) = limits.max_items.filter(|n| *n > 0) {
            self.max_items = max_items;
        }
        if self.kind == EncoderKind::Audio {
            if let Some(rate) = limits.sample_rate.filter(|r| *r > 0) {
                self.target_sample_rate = rate;
            }
            if let Some(langs) = limits.languages.as_ref().filter(|l| !l.is_empty()) {
                self.supported_languages = langs.iter().cloned().collect();
            }
            self.audio_input = limits.audio_input.clone();
        }
    }
}

/// Holds the current [`Capabilities`] for one model.
#[derive(Debug)]
pub struct CapabilityRegistry {
    kind: EncoderKind,
    current: RwLock<Capabilities>,
}

impl CapabilityRegistry {
    pub fn new(kind: EncoderKind) -> Self {
        Self {
            kind,
            current: RwLock::new(Capabilities::defaults(kind)),
        }
    }

    /// Snapshot of the current descriptor.
    pub fn get(&self) -> Capabilities {
        // Recover from poisoned lock; the descriptor is plain data.
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Overwrite with defaults plus backend-reported limits.
    pub(crate) fn refresh(&self, limits: &BackendLimits) {
        let mut caps = Capabilities::defaults(self.kind);
        caps.apply(limits);
        log::debug!(
            target: "sidecar_core",
            "{} capabilities refreshed: limit={:?}, dims={:?}, rate={}",
            self.kind,
            caps.limit,
            caps.embedding_dims,
            caps.target_sample_rate
        );
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = caps;
    }
}
