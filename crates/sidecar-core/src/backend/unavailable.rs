//! Strategy used when no native encoder library is linked.

use super::{EncoderBackend, EncoderContext, GlobalBackend};
use crate::error::{EncoderError, EncoderResult};
use crate::types::{EncoderKind, ModelPaths};

/// Backend that refuses every load.
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl EncoderBackend for UnavailableBackend {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn create_context(
        &self,
        paths: &ModelPaths,
        kind: EncoderKind,
    ) -> EncoderResult<Box<dyn EncoderContext>> {
        log::warn!(
            target: "sidecar_core",
            "no {} encoder backend for {}: {}",
            kind,
            paths.encoder_file().display(),
            self.reason
        );
        Err(EncoderError::unsupported(format!(
            "{} encoder backend unavailable: {}",
            kind, self.reason
        )))
    }
}

/// Global backend with nothing to initialize.
///
/// `init` succeeds so hosts can run the resource lifecycle unconditionally;
/// loads still fail through [`UnavailableBackend`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableGlobalBackend;

impl GlobalBackend for UnavailableGlobalBackend {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn init(&self) -> EncoderResult<()> {
        log::debug!(target: "sidecar_core", "global backend init skipped: no native library");
        Ok(())
    }

    fn free(&self) -> EncoderResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_context_fails_fast() {
        let backend = UnavailableBackend::new("not linked");
        assert!(!backend.is_available());

        let err = backend
            .create_context(&ModelPaths::new("whisper.bin"), EncoderKind::Audio)
            .err()
            .unwrap();
        assert!(matches!(err, EncoderError::UnsupportedFormat(_)));
        assert!(err.to_string().contains("not linked"));
    }

    #[test]
    fn test_global_lifecycle_is_noop() {
        let global = UnavailableGlobalBackend;
        assert!(global.init().is_ok());
        assert!(global.free().is_ok());
    }
}
