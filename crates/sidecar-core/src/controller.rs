//! Model lifecycle controller.
//!
//! One [`EncoderController`] per encoder kind. It is the only component that
//! creates or frees an [`EncoderContext`], and it serializes every use of that
//! context behind its own mutex.
//!
//! ```text
//! Uninitialized ──load()──► Loading ──ok──► Loaded
//!       ▲                      │
//!       └────────fail──────────┘
//!
//! (any) ──dispose()──► Disposed   (terminal)
//! ```
//!
//! `dispose()` issued while an encode runs waits for it, then invalidates the
//! handle. `dispose()` issued while a load runs wins: the freshly created
//! context is freed as soon as the load returns.

use crate::backend::{default_backend, native, EncoderBackend, EncoderContext};
use crate::capabilities::{Capabilities, CapabilityRegistry, AUTO_LANGUAGE, DEFAULT_TARGET_SAMPLE_RATE};
use crate::config::SidecarConfig;
use crate::decode::{DefaultMediaDecoder, MediaDecoder};
use crate::error::{EncoderError, EncoderResult};
use crate::preprocessing::{self, AudioOptions, AudioSettings};
use crate::types::{EmbeddingResult, EncodedOutput, EncoderKind, ModelPaths, ModelState, RawMediaBuffer};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Everything guarded by the controller mutex.
///
/// `context.is_some()` exactly when `state == Loaded`.
struct ModelHandle {
    paths: ModelPaths,
    context: Option<Box<dyn EncoderContext>>,
    state: ModelState,
    sample_rate: u32,
    language: String,
}

impl ModelHandle {
    fn ensure_usable(&self, kind: EncoderKind) -> EncoderResult<()> {
        match self.state {
            ModelState::Disposed => Err(EncoderError::disposed(format!("{} encoder", kind))),
            ModelState::Loaded => Ok(()),
            _ => Err(EncoderError::not_loaded(format!("{} encoder", kind))),
        }
    }
}

/// Lifecycle owner for one encoder model.
pub struct EncoderController {
    kind: EncoderKind,
    backend: Arc<dyn EncoderBackend>,
    decoder: Arc<dyn MediaDecoder>,
    registry: CapabilityRegistry,
    audio_options: AudioOptions,
    handle: Mutex<ModelHandle>,
    load_done: Condvar,
}

impl EncoderController {
    pub fn new(kind: EncoderKind, paths: ModelPaths, backend: Arc<dyn EncoderBackend>) -> Self {
        Self {
            kind,
            backend,
            decoder: Arc::new(DefaultMediaDecoder),
            registry: CapabilityRegistry::new(kind),
            audio_options: AudioOptions::default(),
            handle: Mutex::new(ModelHandle {
                paths,
                context: None,
                state: ModelState::Uninitialized,
                sample_rate: DEFAULT_TARGET_SAMPLE_RATE,
                language: AUTO_LANGUAGE.to_string(),
            }),
            load_done: Condvar::new(),
        }
    }

    /// Controller for `kind` using the compiled-in backend and `config`.
    pub fn from_config(kind: EncoderKind, config: &SidecarConfig) -> EncoderResult<Self> {
        config.validate()?;
        let paths = config
            .paths(kind)
            .cloned()
            .ok_or_else(|| EncoderError::config(format!("no {} model configured", kind)))?;

        native::set_native_log_verbosity(config.native_log_verbosity);

        let controller = Self::new(kind, paths, default_backend(config.backend))
            .with_audio_options(config.audio_settings.preprocessing)?;
        {
            let mut handle = controller.lock();
            handle.sample_rate = config.audio_settings.sample_rate;
            handle.language = config.audio_settings.language.clone();
        }
        Ok(controller)
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn MediaDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Replace the audio preprocessing options. Out-of-range coefficients
    /// are rejected with `Validation`.
    pub fn with_audio_options(mut self, options: AudioOptions) -> EncoderResult<Self> {
        options.validate()?;
        self.audio_options = options;
        Ok(self)
    }

    fn lock(&self) -> MutexGuard<'_, ModelHandle> {
        // A panicking encode must not wedge dispose.
        self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Load the encoder. Returns `Ok(true)` once loaded, including when it
    /// already was.
    pub fn load(&self) -> EncoderResult<bool> {
        let paths = {
            let mut handle = self.lock();
            loop {
                let state = handle.state;
                match state {
                    ModelState::Disposed => {
                        return Err(EncoderError::already_disposed(format!(
                            "{} encoder",
                            self.kind
                        )))
                    }
                    ModelState::Loaded => return Ok(true),
                    ModelState::Loading => {
                        handle = self
                            .load_done
                            .wait(handle)
                            .unwrap_or_else(|e| e.into_inner());
                    }
                    ModelState::Uninitialized => break,
                }
            }
            validate_paths(self.kind, &handle.paths)?;
            handle.state = ModelState::Loading;
            handle.paths.clone()
        };

        log::info!(
            target: "sidecar_core",
            "{} encoder loading via {} backend",
            self.kind,
            self.backend.name()
        );
        let created = self.backend.create_context(&paths, self.kind);

        let mut handle = self.lock();
        let outcome = match created {
            Ok(context) if handle.state == ModelState::Disposed => {
                drop(context);
                log::info!(target: "sidecar_core", "{} encoder disposed during load", self.kind);
                Err(EncoderError::already_disposed(format!(
                    "{} encoder disposed during load",
                    self.kind
                )))
            }
            Ok(context) => {
                self.registry.refresh(&context.introspect());
                handle.context = Some(context);
                handle.state = ModelState::Loaded;

                let caps = self.registry.get();
                if self.kind == EncoderKind::Audio && !caps.supports_language(&handle.language) {
                    log::warn!(
                        target: "sidecar_core",
                        "language '{}' not supported by loaded model, using auto",
                        handle.language
                    );
                    handle.language = AUTO_LANGUAGE.to_string();
                }
                log::info!(target: "sidecar_core", "{} encoder loaded", self.kind);
                Ok(true)
            }
            Err(e) if handle.state == ModelState::Disposed => {
                log::info!(
                    target: "sidecar_core",
                    "{} encoder disposed during failed load: {}",
                    self.kind,
                    e
                );
                Err(EncoderError::already_disposed(format!(
                    "{} encoder disposed during load",
                    self.kind
                )))
            }
            Err(e) => {
                handle.state = ModelState::Uninitialized;
                log::warn!(target: "sidecar_core", "{} encoder load failed: {}", self.kind, e);
                Err(load_error(e))
            }
        };
        self.load_done.notify_all();
        outcome
    }

    /// Free the encoder. Idempotent; never fails.
    pub fn dispose(&self) {
        let mut handle = self.lock();
        if handle.state == ModelState::Disposed {
            return;
        }
        // Dropping the context is the only place native resources are freed.
        let context = handle.context.take();
        handle.state = ModelState::Disposed;
        drop(context);
        self.load_done.notify_all();
        log::info!(target: "sidecar_core", "{} encoder disposed", self.kind);
    }

    pub fn state(&self) -> ModelState {
        self.lock().state
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == ModelState::Loaded
    }

    pub fn kind(&self) -> EncoderKind {
        self.kind
    }

    /// Snapshot of what this encoder accepts.
    pub fn get_capabilities(&self) -> Capabilities {
        self.registry.get()
    }

    // =========================================================================
    // Audio settings
    // =========================================================================

    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate
    }

    pub fn language(&self) -> String {
        self.lock().language.clone()
    }

    /// Set the rate assumed for audio that does not carry one.
    pub fn set_sample_rate(&self, rate: u32) -> EncoderResult<()> {
        let mut handle = self.lock();
        self.check_audio_setting(&handle)?;
        if !self.registry.get().supports_sample_rate(rate) {
            return Err(EncoderError::validation(format!(
                "unsupported sample rate {}",
                rate
            )));
        }
        handle.sample_rate = rate;
        log::debug!(target: "sidecar_core", "sample rate set to {}", rate);
        Ok(())
    }

    /// Set the transcription language (`"auto"` for detection).
    pub fn set_language(&self, code: &str) -> EncoderResult<()> {
        let mut handle = self.lock();
        self.check_audio_setting(&handle)?;
        if !self.registry.get().supports_language(code) {
            return Err(EncoderError::validation(format!(
                "unsupported language '{}'",
                code
            )));
        }
        handle.language = code.to_string();
        log::debug!(target: "sidecar_core", "language set to {}", code);
        Ok(())
    }

    fn check_audio_setting(&self, handle: &ModelHandle) -> EncoderResult<()> {
        if handle.state == ModelState::Disposed {
            return Err(EncoderError::disposed(format!("{} encoder", self.kind)));
        }
        if self.kind != EncoderKind::Audio {
            return Err(EncoderError::validation(format!(
                "audio settings do not apply to a {} encoder",
                self.kind
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Processing
    // =========================================================================

    /// Encode interleaved 8-bit pixels.
    pub fn process_image(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u32,
    ) -> EncoderResult<EmbeddingResult> {
        self.process_media(&RawMediaBuffer::Image {
            pixels,
            width,
            height,
            channels,
        })
    }

    /// Encode mono samples recorded at `source_rate`.
    pub fn process_audio(&self, samples: &[f32], source_rate: u32) -> EncoderResult<EmbeddingResult> {
        self.process_media(&RawMediaBuffer::Audio {
            samples,
            sample_rate: Some(source_rate),
            channels: 1,
        })
    }

    /// Decode `bytes` as `mime`, then encode.
    pub fn process_encoded(&self, bytes: &[u8], mime: &str) -> EncoderResult<EmbeddingResult> {
        self.lock().ensure_usable(self.kind)?;
        if !self.registry.get().supports_format(mime) {
            return Err(EncoderError::unsupported(format!(
                "{} is not accepted by the {} encoder",
                mime, self.kind
            )));
        }
        let media = self.decoder.decode(bytes, mime)?;
        self.process_media(&media.as_raw())
    }

    /// Run the preprocessing pipeline and encode.
    pub fn process_media(&self, raw: &RawMediaBuffer<'_>) -> EncoderResult<EmbeddingResult> {
        let mut guard = self.lock();
        let handle = &mut *guard;
        handle.ensure_usable(self.kind)?;

        let caps = self.registry.get();
        let batch = preprocessing::normalize(
            raw,
            &caps,
            &AudioSettings {
                sample_rate: handle.sample_rate,
                language: &handle.language,
                options: &self.audio_options,
            },
        )?;
        if batch.is_empty() {
            return Err(EncoderError::encode("zero preprocessed inputs"));
        }
        log::debug!(
            target: "sidecar_core",
            "{} encode: batch shape {:?}",
            self.kind,
            batch.shape()
        );

        let context = handle
            .context
            .as_mut()
            .ok_or_else(|| EncoderError::not_loaded(format!("{} encoder", self.kind)))?;
        let output = context.encode(&batch)?;
        into_result(output)
    }
}

impl Drop for EncoderController {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Vision encoders are created from the projector, so it is mandatory there.
fn validate_paths(kind: EncoderKind, paths: &ModelPaths) -> EncoderResult<()> {
    if paths.model.as_os_str().is_empty() {
        return Err(EncoderError::validation("model path is empty"));
    }
    match (&paths.mmproj, kind) {
        (Some(p), _) if p.as_os_str().is_empty() => {
            Err(EncoderError::validation("mmproj path is empty"))
        }
        (None, EncoderKind::Vision) => Err(EncoderError::validation(
            "vision encoder requires an mmproj path",
        )),
        _ => Ok(()),
    }
}

/// Keep input and availability errors as they are; everything else is an
/// init failure.
fn load_error(e: EncoderError) -> EncoderError {
    match e {
        EncoderError::BackendInit(_)
        | EncoderError::UnsupportedFormat(_)
        | EncoderError::Validation(_) => e,
        other => EncoderError::backend_init(other.to_string()),
    }
}

fn into_result(output: EncodedOutput) -> EncoderResult<EmbeddingResult> {
    if output.embedding.is_empty() {
        return Err(EncoderError::encode("backend returned an empty embedding"));
    }
    if let Some(pos) = output.embedding.iter().position(|v| !v.is_finite()) {
        return Err(EncoderError::encode(format!(
            "non-finite embedding value at index {}",
            pos
        )));
    }
    if let Some(c) = output.confidence {
        if !(0.0..=1.0).contains(&c) {
            return Err(EncoderError::encode(format!(
                "confidence {} outside [0, 1]",
                c
            )));
        }
    }
    Ok(EmbeddingResult {
        dims: output.embedding.len(),
        embedding: output.embedding,
        transcript: output.transcript,
        confidence: output.confidence,
    })
}
