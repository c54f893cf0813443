//! Shared data types: encoder kinds, media buffers, tensor batches and results.

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// =============================================================================
// Encoder kind and model paths
// =============================================================================

/// Which modality an encoder model handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    Vision,
    Audio,
}

impl EncoderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncoderKind::Vision => "vision",
            EncoderKind::Audio => "audio",
        }
    }
}

impl fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Files backing an encoder model.
///
/// Vision encoders need the multimodal projector (`mmproj`) next to the language
/// model; audio encoders are self-contained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPaths {
    /// Primary model file
    pub model: PathBuf,
    /// Multimodal projector file (vision)
    #[serde(default)]
    pub mmproj: Option<PathBuf>,
}

impl ModelPaths {
    pub fn new(model: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            mmproj: None,
        }
    }

    pub fn with_mmproj(mut self, mmproj: impl Into<PathBuf>) -> Self {
        self.mmproj = Some(mmproj.into());
        self
    }

    /// The file the encoder context is created from: the projector when present.
    pub fn encoder_file(&self) -> &PathBuf {
        self.mmproj.as_ref().unwrap_or(&self.model)
    }
}

// =============================================================================
// Lifecycle state
// =============================================================================

/// State of a model handle.
///
/// `Disposed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelState {
    Uninitialized,
    Loading,
    Loaded,
    Disposed,
}

impl ModelState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ModelState::Disposed)
    }
}

// =============================================================================
// Raw input
// =============================================================================

/// Decoded media supplied for a single call.
#[derive(Debug, Clone, Copy)]
pub enum RawMediaBuffer<'a> {
    /// Interleaved 8-bit pixels
    Image {
        pixels: &'a [u8],
        width: u32,
        height: u32,
        channels: u32,
    },
    /// Interleaved f32 samples; `sample_rate` of `None` means "use the configured rate"
    Audio {
        samples: &'a [f32],
        sample_rate: Option<u32>,
        channels: u32,
    },
}

impl RawMediaBuffer<'_> {
    pub fn kind(&self) -> EncoderKind {
        match self {
            RawMediaBuffer::Image { .. } => EncoderKind::Vision,
            RawMediaBuffer::Audio { .. } => EncoderKind::Audio,
        }
    }
}

/// Owned counterpart of [`RawMediaBuffer`], produced by decoders.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMedia {
    Image {
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        channels: u32,
    },
    Audio {
        samples: Vec<f32>,
        sample_rate: u32,
        channels: u32,
    },
}

impl DecodedMedia {
    pub fn as_raw(&self) -> RawMediaBuffer<'_> {
        match self {
            DecodedMedia::Image {
                pixels,
                width,
                height,
                channels,
            } => RawMediaBuffer::Image {
                pixels,
                width: *width,
                height: *height,
                channels: *channels,
            },
            DecodedMedia::Audio {
                samples,
                sample_rate,
                channels,
            } => RawMediaBuffer::Audio {
                samples,
                sample_rate: Some(*sample_rate),
                channels: *channels,
            },
        }
    }
}

// =============================================================================
// Normalized batches
// =============================================================================

/// RGB images in interleaved layout, all sharing one size.
///
/// The logical shape is `(batch, 3, height, width)`; resizing to the encoder's
/// native resolution is left to the encoder's own preprocessor.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBatch {
    pub width: u32,
    pub height: u32,
    pub images: Vec<Vec<u8>>,
}

impl ImageBatch {
    pub const CHANNELS: usize = 3;

    pub fn single(width: u32, height: u32, rgb: Vec<u8>) -> Self {
        Self {
            width,
            height,
            images: vec![rgb],
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn shape(&self) -> [usize; 4] {
        [
            self.images.len(),
            Self::CHANNELS,
            self.height as usize,
            self.width as usize,
        ]
    }
}

/// Audio features at the backend-mandated sample rate.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioFeatures {
    /// `(batch, samples)`
    Waveform(Array2<f32>),
    /// `(batch, n_mels, frames)`
    Mel(Array3<f32>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioBatch {
    pub sample_rate: u32,
    /// Language hint forwarded to transcribing backends ("auto" for detection)
    pub language: String,
    pub features: AudioFeatures,
}

impl AudioBatch {
    pub fn len(&self) -> usize {
        self.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape(&self) -> Vec<usize> {
        match &self.features {
            AudioFeatures::Waveform(w) => w.shape().to_vec(),
            AudioFeatures::Mel(m) => m.shape().to_vec(),
        }
    }

    /// Waveform samples of the first batch entry, if this batch carries raw audio.
    pub fn waveform(&self) -> Option<&[f32]> {
        match &self.features {
            AudioFeatures::Waveform(w) => w.as_slice(),
            AudioFeatures::Mel(_) => None,
        }
    }
}

/// Input handed to an [`EncoderContext`](crate::backend::EncoderContext).
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedTensorBatch {
    Vision(ImageBatch),
    Audio(AudioBatch),
}

impl NormalizedTensorBatch {
    pub fn kind(&self) -> EncoderKind {
        match self {
            NormalizedTensorBatch::Vision(_) => EncoderKind::Vision,
            NormalizedTensorBatch::Audio(_) => EncoderKind::Audio,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            NormalizedTensorBatch::Vision(b) => b.len(),
            NormalizedTensorBatch::Audio(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape(&self) -> Vec<usize> {
        match self {
            NormalizedTensorBatch::Vision(b) => b.shape().to_vec(),
            NormalizedTensorBatch::Audio(b) => b.shape(),
        }
    }
}

// =============================================================================
// Output
// =============================================================================

/// Raw output of a backend encode call, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedOutput {
    pub embedding: Vec<f32>,
    pub transcript: Option<String>,
    pub confidence: Option<f32>,
}

/// Validated embedding returned to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub embedding: Vec<f32>,
    pub dims: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    /// In `[0, 1]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_paths_encoder_file() {
        let paths = ModelPaths::new("llava.gguf");
        assert_eq!(paths.encoder_file(), &PathBuf::from("llava.gguf"));

        let paths = paths.with_mmproj("mmproj.gguf");
        assert_eq!(paths.encoder_file(), &PathBuf::from("mmproj.gguf"));
    }

    #[test]
    fn test_image_batch_shape() {
        let batch = ImageBatch::single(2, 3, vec![0u8; 18]);
        assert_eq!(batch.shape(), [1, 3, 3, 2]);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_audio_batch_shape() {
        let batch = AudioBatch {
            sample_rate: 16000,
            language: "auto".to_string(),
            features: AudioFeatures::Waveform(Array2::zeros((1, 160))),
        };
        assert_eq!(batch.shape(), vec![1, 160]);
        assert_eq!(batch.waveform().map(|w| w.len()), Some(160));

        let mel = AudioBatch {
            sample_rate: 16000,
            language: "en".to_string(),
            features: AudioFeatures::Mel(Array3::zeros((1, 80, 10))),
        };
        assert_eq!(mel.shape(), vec![1, 80, 10]);
        assert!(mel.waveform().is_none());
    }

    #[test]
    fn test_decoded_media_as_raw() {
        let media = DecodedMedia::Audio {
            samples: vec![0.0; 4],
            sample_rate: 8000,
            channels: 1,
        };
        match media.as_raw() {
            RawMediaBuffer::Audio { sample_rate, .. } => assert_eq!(sample_rate, Some(8000)),
            _ => panic!("expected audio"),
        }
        assert_eq!(media.as_raw().kind(), EncoderKind::Audio);
    }
}
