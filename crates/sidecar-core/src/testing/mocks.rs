//! Mock backends for exercising the lifecycle without native libraries.
//!
//! Counters live behind `Arc`s so a test can keep a clone of the mock after
//! handing it to a controller or resource manager.

use crate::backend::{BackendLimits, EncoderBackend, EncoderContext, GlobalBackend};
use crate::error::{EncoderError, EncoderResult};
use crate::types::{EncodedOutput, EncoderKind, ModelPaths, NormalizedTensorBatch};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Default)]
struct Counters {
    loads: AtomicUsize,
    encodes: AtomicUsize,
    frees: AtomicUsize,
}

/// An encoder backend that hands out [`MockContext`]s.
///
/// # Example
///
/// ```rust,ignore
/// use sidecar_core::testing::MockBackend;
///
/// let backend = MockBackend::with_embedding(vec![0.1, 0.2, 0.3]);
/// let controller = EncoderController::new(EncoderKind::Vision, paths, Arc::new(backend.clone()));
/// controller.load()?;
/// assert_eq!(backend.load_count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MockBackend {
    output: EncodedOutput,
    limits: BackendLimits,
    load_error: Option<String>,
    encode_error: Option<String>,
    encode_delay: Option<Duration>,
    load_delay: Option<Duration>,
    counters: Arc<Counters>,
    last_batch: Arc<Mutex<Option<NormalizedTensorBatch>>>,
}

impl MockBackend {
    /// Backend whose contexts return `values` as the embedding.
    pub fn with_embedding(values: Vec<f32>) -> Self {
        Self {
            output: EncodedOutput {
                embedding: values,
                ..Default::default()
            },
            limits: BackendLimits::default(),
            load_error: None,
            encode_error: None,
            encode_delay: None,
            load_delay: None,
            counters: Arc::new(Counters::default()),
            last_batch: Arc::new(Mutex::new(None)),
        }
    }

    /// Backend whose contexts return an embedding plus a transcript.
    pub fn with_transcript(values: Vec<f32>, text: impl Into<String>, confidence: f32) -> Self {
        let mut mock = Self::with_embedding(values);
        mock.output.transcript = Some(text.into());
        mock.output.confidence = Some(confidence);
        mock
    }

    /// Limits reported by `introspect()`.
    pub fn with_limits(mut self, limits: BackendLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Fail `create_context` with `BackendInit`.
    pub fn with_load_error(mut self, message: impl Into<String>) -> Self {
        self.load_error = Some(message.into());
        self
    }

    /// Fail every encode with `Encode`.
    pub fn with_encode_error(mut self, message: impl Into<String>) -> Self {
        self.encode_error = Some(message.into());
        self
    }

    /// Sleep inside every encode.
    pub fn with_encode_delay(mut self, delay: Duration) -> Self {
        self.encode_delay = Some(delay);
        self
    }

    /// Sleep inside `create_context`, before the load error (if any) fires.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    /// Number of `create_context` calls, successful or not.
    pub fn load_count(&self) -> usize {
        self.counters.loads.load(Ordering::SeqCst)
    }

    /// Number of contexts dropped.
    pub fn free_count(&self) -> usize {
        self.counters.frees.load(Ordering::SeqCst)
    }

    pub fn encode_count(&self) -> usize {
        self.counters.encodes.load(Ordering::SeqCst)
    }

    /// The most recent batch handed to a context.
    pub fn last_batch(&self) -> Option<NormalizedTensorBatch> {
        self.last_batch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl EncoderBackend for MockBackend {
    fn name(&self) -> &str {
        "MockBackend"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn create_context(
        &self,
        _paths: &ModelPaths,
        _kind: EncoderKind,
    ) -> EncoderResult<Box<dyn EncoderContext>> {
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.load_delay {
            thread::sleep(delay);
        }
        if let Some(ref error) = self.load_error {
            return Err(EncoderError::backend_init(error.clone()));
        }
        Ok(Box::new(MockContext {
            backend: self.clone(),
        }))
    }
}

/// Context created by [`MockBackend`]; counts itself as freed on drop.
#[derive(Debug)]
pub struct MockContext {
    backend: MockBackend,
}

impl EncoderContext for MockContext {
    fn introspect(&self) -> BackendLimits {
        self.backend.limits.clone()
    }

    fn encode(&mut self, batch: &NormalizedTensorBatch) -> EncoderResult<EncodedOutput> {
        if let Some(delay) = self.backend.encode_delay {
            thread::sleep(delay);
        }
        self.backend.counters.encodes.fetch_add(1, Ordering::SeqCst);
        *self
            .backend
            .last_batch
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(batch.clone());

        if let Some(ref error) = self.backend.encode_error {
            return Err(EncoderError::encode(error.clone()));
        }
        Ok(self.backend.output.clone())
    }
}

impl Drop for MockContext {
    fn drop(&mut self) {
        self.backend.counters.frees.fetch_add(1, Ordering::SeqCst);
    }
}

/// Global backend that counts `init`/`free` calls.
#[derive(Debug, Clone, Default)]
pub struct MockGlobalBackend {
    init_calls: Arc<AtomicUsize>,
    free_calls: Arc<AtomicUsize>,
    init_delay: Option<Duration>,
    free_delay: Option<Duration>,
    init_error: Option<String>,
}

impl MockGlobalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep inside `init`, widening the window for concurrent callers.
    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = Some(delay);
        self
    }

    /// Sleep inside `free`, as a native teardown would.
    pub fn with_free_delay(mut self, delay: Duration) -> Self {
        self.free_delay = Some(delay);
        self
    }

    pub fn with_init_error(mut self, message: impl Into<String>) -> Self {
        self.init_error = Some(message.into());
        self
    }

    pub fn init_count(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn free_count(&self) -> usize {
        self.free_calls.load(Ordering::SeqCst)
    }
}

impl GlobalBackend for MockGlobalBackend {
    fn name(&self) -> &str {
        "MockGlobalBackend"
    }

    fn init(&self) -> EncoderResult<()> {
        if let Some(delay) = self.init_delay {
            thread::sleep(delay);
        }
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        match self.init_error {
            Some(ref error) => Err(EncoderError::backend_init(error.clone())),
            None => Ok(()),
        }
    }

    fn free(&self) -> EncoderResult<()> {
        if let Some(delay) = self.free_delay {
            thread::sleep(delay);
        }
        self.free_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageBatch;

    #[test]
    fn test_mock_backend_counts() {
        let backend = MockBackend::with_embedding(vec![0.5; 4]);
        let mut ctx = backend
            .create_context(&ModelPaths::new("m.gguf"), EncoderKind::Vision)
            .unwrap();
        let out = ctx
            .encode(&NormalizedTensorBatch::Vision(ImageBatch::single(
                1,
                1,
                vec![0; 3],
            )))
            .unwrap();
        assert_eq!(out.embedding, vec![0.5; 4]);
        assert_eq!(backend.load_count(), 1);
        assert_eq!(backend.encode_count(), 1);
        assert!(backend.last_batch().is_some());

        drop(ctx);
        assert_eq!(backend.free_count(), 1);
    }

    #[test]
    fn test_mock_backend_load_error() {
        let backend = MockBackend::with_embedding(vec![]).with_load_error("corrupt file");
        let result = backend.create_context(&ModelPaths::new("m.gguf"), EncoderKind::Audio);
        assert!(matches!(result, Err(EncoderError::BackendInit(_))));
        assert_eq!(backend.free_count(), 0);
    }

    #[test]
    fn test_mock_global_counts() {
        let global = MockGlobalBackend::new();
        global.init().unwrap();
        global.free().unwrap();
        assert_eq!(global.init_count(), 1);
        assert_eq!(global.free_count(), 1);

        let failing = MockGlobalBackend::new().with_init_error("no device");
        assert!(failing.init().is_err());
        assert_eq!(failing.init_count(), 1);
    }
}
