//! Error types for sidecar-core.
//!
//! Every public operation returns [`EncoderResult`]. The variants map one to one
//! onto the failure classes a host sees:
//!
//! ```text
//! EncoderError
//! ├── Validation(String)         -- malformed input or unsupported parameter
//! ├── NotLoaded(String)          -- operation before a successful load
//! ├── Disposed(String)           -- operation after dispose
//! ├── AlreadyDisposed(String)    -- load after dispose
//! ├── BackendInit(String)        -- native context / global init failed
//! ├── Encode(String)             -- backend returned empty or invalid output
//! ├── UnsupportedFormat(String)  -- backend or decoder not available for input
//! ├── Config(String)             -- configuration errors
//! └── Io(std::io::Error)         -- I/O errors
//! ```

use thiserror::Error;

/// The canonical error type for sidecar-core.
#[derive(Error, Debug)]
pub enum EncoderError {
    /// Malformed or unsupported input, out-of-range parameter
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation attempted before a successful load
    #[error("Model not loaded: {0}")]
    NotLoaded(String),

    /// Operation attempted after dispose
    #[error("Model disposed: {0}")]
    Disposed(String),

    /// Load attempted after dispose
    #[error("Model already disposed: {0}")]
    AlreadyDisposed(String),

    /// Native context creation or global backend init failed
    #[error("Backend init failed: {0}")]
    BackendInit(String),

    /// Backend produced empty or invalid output
    #[error("Encode failed: {0}")]
    Encode(String),

    /// No backend or decoder available for this input
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for sidecar-core.
pub type EncoderResult<T> = Result<T, EncoderError>;

// ─────────────────────────────────────────────────────────────────────────────
// Conversions from dependency errors
// ─────────────────────────────────────────────────────────────────────────────

impl From<serde_json::Error> for EncoderError {
    fn from(e: serde_json::Error) -> Self {
        EncoderError::Config(e.to_string())
    }
}

impl From<serde_yaml::Error> for EncoderError {
    fn from(e: serde_yaml::Error) -> Self {
        EncoderError::Config(e.to_string())
    }
}

impl From<image::ImageError> for EncoderError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::Unsupported(u) => EncoderError::UnsupportedFormat(u.to_string()),
            other => EncoderError::Validation(format!("image decode failed: {}", other)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Convenience constructors
// ─────────────────────────────────────────────────────────────────────────────

impl EncoderError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        EncoderError::Validation(msg.into())
    }

    /// Create a "not loaded" error.
    pub fn not_loaded(msg: impl Into<String>) -> Self {
        EncoderError::NotLoaded(msg.into())
    }

    /// Create a "disposed" error.
    pub fn disposed(msg: impl Into<String>) -> Self {
        EncoderError::Disposed(msg.into())
    }

    /// Create an "already disposed" error.
    pub fn already_disposed(msg: impl Into<String>) -> Self {
        EncoderError::AlreadyDisposed(msg.into())
    }

    /// Create a backend init error.
    pub fn backend_init(msg: impl Into<String>) -> Self {
        EncoderError::BackendInit(msg.into())
    }

    /// Create an encode error.
    pub fn encode(msg: impl Into<String>) -> Self {
        EncoderError::Encode(msg.into())
    }

    /// Create an unsupported format error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        EncoderError::UnsupportedFormat(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        EncoderError::Config(msg.into())
    }

    /// True for failures caused by the shape of the input rather than the backend.
    ///
    /// Only these are eligible for the single local retry at the pipeline boundary.
    pub fn is_input_shape(&self) -> bool {
        matches!(self, EncoderError::Validation(msg) if msg.starts_with(SHAPE_MISMATCH))
    }
}

/// Prefix used for buffer/shape mismatch validation errors.
pub(crate) const SHAPE_MISMATCH: &str = "shape mismatch";
