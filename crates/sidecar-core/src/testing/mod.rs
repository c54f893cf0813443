//! Testing utilities for sidecar-core.
//!
//! Mock backends that count their calls, plus synthetic media fixtures, so
//! lifecycle tests run without native libraries or model files.
//!
//! ```rust,ignore
//! use sidecar_core::testing::{fixtures, MockBackend, MockGlobalBackend};
//!
//! let backend = MockBackend::with_embedding(vec![0.1, 0.2, 0.3]);
//! let audio = fixtures::sine_wave(440.0, 8000, 1.0);
//! ```

pub mod fixtures;
pub mod mocks;

pub use mocks::*;
