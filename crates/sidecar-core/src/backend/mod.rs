//! Inference bridge: the seam between lifecycle management and the native
//! encoder libraries.
//!
//! Three traits split the work:
//!
//! - [`EncoderBackend`] creates encoder contexts from model files.
//! - [`EncoderContext`] is one loaded encoder. It reports its limits and encodes
//!   normalized batches. Dropping it releases the native resources.
//! - [`GlobalBackend`] is the process-wide library state (`init` once, `free`
//!   once), driven by [`BackendResourceManager`](crate::resources::BackendResourceManager).
//!
//! Two strategies exist. The native one ([`native::NativeBackend`]) is compiled
//! against the encoder libraries when the `native` feature is on. The
//! [`UnavailableBackend`] reports itself unavailable and fails every request
//! with `UnsupportedFormat`; it is never replaced by a mock at runtime.

pub mod native;
pub mod unavailable;

pub use unavailable::{UnavailableBackend, UnavailableGlobalBackend};

use crate::capabilities::AudioInput;
use crate::error::EncoderResult;
use crate::types::{EncodedOutput, EncoderKind, ModelPaths, NormalizedTensorBatch};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Limits reported by a loaded context.
///
/// `None` (or zero) fields keep the default capability values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendLimits {
    /// Native square input edge (vision)
    pub image_size: Option<u32>,
    pub max_duration_secs: Option<u32>,
    pub embedding_dims: Option<usize>,
    pub max_items: Option<u32>,
    /// Required input sample rate (audio)
    pub sample_rate: Option<u32>,
    pub languages: Option<Vec<String>>,
    pub audio_input: AudioInput,
}

/// Runtime options passed to context creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendOptions {
    pub use_gpu: bool,
    /// 0 means let the library decide
    pub n_threads: u32,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            use_gpu: true,
            n_threads: 0,
        }
    }
}

/// Factory for encoder contexts.
pub trait EncoderBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this backend can create contexts at all.
    fn is_available(&self) -> bool;

    /// Load an encoder from `paths`.
    ///
    /// On failure the implementation must release anything it partially
    /// allocated before returning.
    fn create_context(
        &self,
        paths: &ModelPaths,
        kind: EncoderKind,
    ) -> EncoderResult<Box<dyn EncoderContext>>;
}

/// One loaded encoder.
///
/// Contexts are `Send` but not `Sync`; callers serialize access.
pub trait EncoderContext: Send {
    /// Limits of the loaded model.
    fn introspect(&self) -> BackendLimits;

    /// Encode a normalized batch.
    fn encode(&mut self, batch: &NormalizedTensorBatch) -> EncoderResult<EncodedOutput>;
}

/// Process-wide backend library state.
pub trait GlobalBackend: Send + Sync {
    fn name(&self) -> &str;

    fn init(&self) -> EncoderResult<()>;

    fn free(&self) -> EncoderResult<()>;
}

/// The encoder backend this build was compiled with.
pub fn default_backend(options: BackendOptions) -> Arc<dyn EncoderBackend> {
    #[cfg(feature = "native")]
    {
        Arc::new(native::NativeBackend::new(options))
    }
    #[cfg(not(feature = "native"))]
    {
        let _ = options;
        Arc::new(UnavailableBackend::new("built without the `native` feature"))
    }
}

/// The global backend this build was compiled with.
pub fn default_global_backend() -> Arc<dyn GlobalBackend> {
    #[cfg(feature = "native")]
    {
        Arc::new(native::NativeGlobalBackend)
    }
    #[cfg(not(feature = "native"))]
    {
        Arc::new(UnavailableGlobalBackend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_options_defaults() {
        let opts: BackendOptions = serde_json::from_str("{}").unwrap();
        assert!(opts.use_gpu);
        assert_eq!(opts.n_threads, 0);
    }

    #[cfg(not(feature = "native"))]
    #[test]
    fn test_default_backend_without_native() {
        let backend = default_backend(BackendOptions::default());
        assert!(!backend.is_available());
        assert_eq!(default_global_backend().name(), "unavailable");
    }
}
