//! Native encoder strategy (clip vision projector, whisper audio encoder).
//!
//! Compiled in every build so the type is always nameable; without the
//! `native` feature [`NativeBackend::is_available`] is false and every load
//! fails with `UnsupportedFormat` from the `sys` stubs.

pub mod sys;

use super::{BackendLimits, BackendOptions, EncoderBackend, EncoderContext, GlobalBackend};
use crate::capabilities::{AudioInput, DEFAULT_TARGET_SAMPLE_RATE};
use crate::error::{EncoderError, EncoderResult};
use crate::types::{EncodedOutput, EncoderKind, ModelPaths, NormalizedTensorBatch};

/// Set native library log verbosity (0 = silent ... 4 = debug).
pub fn set_native_log_verbosity(level: i32) {
    log::debug!(target: "sidecar_core", "native log verbosity set to {}", level);
    sys::log_set_verbosity(level.clamp(0, 4));
}

// =============================================================================
// Backend
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct NativeBackend {
    options: BackendOptions,
}

impl NativeBackend {
    pub fn new(options: BackendOptions) -> Self {
        Self { options }
    }
}

impl EncoderBackend for NativeBackend {
    fn name(&self) -> &str {
        "native"
    }

    fn is_available(&self) -> bool {
        cfg!(feature = "native")
    }

    fn create_context(
        &self,
        paths: &ModelPaths,
        kind: EncoderKind,
    ) -> EncoderResult<Box<dyn EncoderContext>> {
        let file = paths.encoder_file();
        log::info!(
            target: "sidecar_core",
            "loading {} encoder from {} (gpu={}, threads={})",
            kind,
            file.display(),
            self.options.use_gpu,
            self.options.n_threads
        );

        let handle = match kind {
            EncoderKind::Vision => {
                NativeHandle::Vision(sys::clip_init(file, self.options.use_gpu, self.options.n_threads)?)
            }
            EncoderKind::Audio => NativeHandle::Audio(sys::whisper_init(file, self.options.use_gpu)?),
        };

        Ok(Box::new(NativeContext {
            handle: Some(handle),
            n_threads: self.options.n_threads,
        }))
    }
}

// =============================================================================
// Context
// =============================================================================

enum NativeHandle {
    Vision(sys::ClipContext),
    Audio(sys::WhisperContext),
}

/// A loaded native encoder. The handle is freed once, on drop.
pub struct NativeContext {
    handle: Option<NativeHandle>,
    n_threads: u32,
}

impl NativeContext {
    fn handle_mut(&mut self) -> EncoderResult<&mut NativeHandle> {
        self.handle
            .as_mut()
            .ok_or_else(|| EncoderError::disposed("native context already freed"))
    }
}

impl EncoderContext for NativeContext {
    fn introspect(&self) -> BackendLimits {
        match &self.handle {
            Some(NativeHandle::Vision(ctx)) => BackendLimits {
                image_size: Some(sys::clip_image_size(ctx)),
                embedding_dims: Some(sys::clip_n_mmproj_embd(ctx)),
                ..Default::default()
            },
            Some(NativeHandle::Audio(ctx)) => BackendLimits {
                embedding_dims: Some(sys::whisper_n_audio_state(ctx)),
                sample_rate: Some(DEFAULT_TARGET_SAMPLE_RATE),
                languages: (!sys::whisper_is_multilingual(ctx)).then(|| vec!["en".to_string()]),
                audio_input: AudioInput::Waveform,
                ..Default::default()
            },
            None => BackendLimits::default(),
        }
    }

    fn encode(&mut self, batch: &NormalizedTensorBatch) -> EncoderResult<EncodedOutput> {
        let n_threads = self.n_threads;
        match (self.handle_mut()?, batch) {
            (NativeHandle::Vision(ctx), NormalizedTensorBatch::Vision(images)) => {
                let rgb = images
                    .images
                    .first()
                    .ok_or_else(|| EncoderError::encode("zero preprocessed images"))?;
                let embedding =
                    sys::clip_encode_rgb(ctx, rgb, images.width, images.height, n_threads)?;
                Ok(EncodedOutput {
                    embedding,
                    ..Default::default()
                })
            }
            (NativeHandle::Audio(ctx), NormalizedTensorBatch::Audio(audio)) => {
                let samples = audio.waveform().ok_or_else(|| {
                    EncoderError::unsupported("native audio encoder takes waveform input")
                })?;
                if audio.sample_rate != DEFAULT_TARGET_SAMPLE_RATE {
                    return Err(EncoderError::validation(format!(
                        "native audio encoder needs {} Hz, got {}",
                        DEFAULT_TARGET_SAMPLE_RATE, audio.sample_rate
                    )));
                }
                let (embedding, transcript, confidence) =
                    sys::whisper_encode_pcm(ctx, samples, &audio.language, n_threads)?;
                Ok(EncodedOutput {
                    embedding,
                    transcript: Some(transcript),
                    confidence: Some(confidence),
                })
            }
            (_, other) => Err(EncoderError::validation(format!(
                "{} batch given to a context of another kind",
                other.kind()
            ))),
        }
    }
}

impl Drop for NativeContext {
    fn drop(&mut self) {
        match self.handle.take() {
            Some(NativeHandle::Vision(ctx)) => sys::clip_free(ctx),
            Some(NativeHandle::Audio(ctx)) => sys::whisper_free(ctx),
            None => {}
        }
    }
}

// =============================================================================
// Global backend
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct NativeGlobalBackend;

impl GlobalBackend for NativeGlobalBackend {
    fn name(&self) -> &str {
        "native"
    }

    fn init(&self) -> EncoderResult<()> {
        sys::backend_init();
        Ok(())
    }

    fn free(&self) -> EncoderResult<()> {
        sys::backend_free();
        Ok(())
    }
}
