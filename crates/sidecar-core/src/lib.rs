//! Sidecar Core - lifecycle and preprocessing for multimodal encoder models.
//!
//! A language-model host attaches auxiliary encoders (a vision projector, an
//! audio encoder) and feeds them raw media. This crate loads and frees those
//! encoders, negotiates what each accepts, and turns pixels and samples into
//! the exact layout the native backend expects.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sidecar_core::prelude::*;
//!
//! BackendResourceManager::global().init().wait()?;
//!
//! let config = SidecarConfig::from_file("sidecar.yaml")?;
//! let vision = EncoderController::from_config(EncoderKind::Vision, &config)?;
//! vision.load()?;
//! let result = vision.process_image(&pixels, width, height, 4)?;
//! println!("{} dims", result.dims);
//!
//! vision.dispose();
//! BackendResourceManager::global().shutdown();
//! ```
//!
//! ## Module Organization
//!
//! - [`controller`] - Per-model lifecycle state machine
//! - [`resources`] - Process-wide backend init/dispose
//! - [`capabilities`] - Accepted formats, limits, sample rates, languages
//! - [`preprocessing`] - Pixel conversion, audio resampling/normalization, mel features
//! - [`backend`] - Backend traits and strategies (native, unavailable)
//! - [`decode`] - Encoded bytes to raw media
//! - [`config`] - JSON/YAML configuration
//! - [`error`] - Error types

pub mod backend;
pub mod capabilities;
pub mod config;
pub mod controller;
pub mod decode;
pub mod error;
pub mod preprocessing;
pub mod resources;
pub mod types;

#[doc(hidden)]
pub mod testing;

pub use capabilities::{Capabilities, MediaLimit};
pub use config::SidecarConfig;
pub use controller::EncoderController;
pub use error::{EncoderError, EncoderResult};
pub use resources::{BackendResourceManager, BackendState, Completion};
pub use types::{EmbeddingResult, EncoderKind, ModelPaths, ModelState, RawMediaBuffer};

/// Common imports.
pub mod prelude {
    pub use crate::backend::{EncoderBackend, EncoderContext, GlobalBackend};
    pub use crate::capabilities::{Capabilities, MediaLimit};
    pub use crate::config::SidecarConfig;
    pub use crate::controller::EncoderController;
    pub use crate::error::{EncoderError, EncoderResult};
    pub use crate::resources::{BackendResourceManager, BackendState};
    pub use crate::types::{EmbeddingResult, EncoderKind, ModelPaths, ModelState, RawMediaBuffer};
}
