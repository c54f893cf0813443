//! Sidecar configuration.
//!
//! Loaded from JSON or YAML. Every section is optional; an empty document is a
//! valid config with no encoders.
//!
//! ```yaml
//! vision:
//!   model: models/llava-v1.6.gguf
//!   mmproj: models/mmproj-f16.gguf
//! audio:
//!   model: models/whisper-base.bin
//! backend:
//!   use_gpu: false
//!   n_threads: 4
//! audio_settings:
//!   sample_rate: 44100
//!   language: en
//!   preprocessing:
//!     normalization: { mode: rms, target: 0.1 }
//!     pre_emphasis: 0.97
//! native_log_verbosity: 1
//! ```

use crate::backend::BackendOptions;
use crate::capabilities::{Capabilities, AUTO_LANGUAGE, DEFAULT_TARGET_SAMPLE_RATE};
use crate::error::{EncoderError, EncoderResult};
use crate::preprocessing::AudioOptions;
use crate::types::{EncoderKind, ModelPaths};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    pub vision: Option<ModelPaths>,
    pub audio: Option<ModelPaths>,
    pub backend: BackendOptions,
    pub audio_settings: AudioConfig,
    /// 0 (silent) to 4 (debug)
    pub native_log_verbosity: i32,
}

/// Initial audio handle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate assumed for buffers that do not carry one
    pub sample_rate: u32,
    pub language: String,
    pub preprocessing: AudioOptions,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_TARGET_SAMPLE_RATE,
            language: AUTO_LANGUAGE.to_string(),
            preprocessing: AudioOptions::default(),
        }
    }
}

impl SidecarConfig {
    pub fn from_json_str(json: &str) -> EncoderResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_yaml_str(yaml: &str) -> EncoderResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> EncoderResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let config = match ext.as_deref() {
            Some("json") => Self::from_json_str(&content)?,
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content)?,
            _ => {
                return Err(EncoderError::config(format!(
                    "unrecognized config extension: {}",
                    path.display()
                )))
            }
        };
        config.validate()?;
        log::debug!(target: "sidecar_core", "loaded config from {}", path.display());
        Ok(config)
    }

    /// Model paths for `kind`, if configured.
    pub fn paths(&self, kind: EncoderKind) -> Option<&ModelPaths> {
        match kind {
            EncoderKind::Vision => self.vision.as_ref(),
            EncoderKind::Audio => self.audio.as_ref(),
        }
    }

    /// Check values against the default capabilities.
    pub fn validate(&self) -> EncoderResult<()> {
        if let Some(vision) = &self.vision {
            if vision.model.as_os_str().is_empty() {
                return Err(EncoderError::config("vision.model must not be empty"));
            }
            match &vision.mmproj {
                Some(p) if !p.as_os_str().is_empty() => {}
                _ => return Err(EncoderError::config("vision.mmproj is required")),
            }
        }
        if let Some(audio) = &self.audio {
            if audio.model.as_os_str().is_empty() {
                return Err(EncoderError::config("audio.model must not be empty"));
            }
        }

        let caps = Capabilities::audio_defaults();
        let audio = &self.audio_settings;
        if !caps.supports_sample_rate(audio.sample_rate) {
            return Err(EncoderError::config(format!(
                "audio_settings.sample_rate {} is not one of {:?}",
                audio.sample_rate, caps.supported_sample_rates
            )));
        }
        if !caps.supports_language(&audio.language) {
            return Err(EncoderError::config(format!(
                "audio_settings.language '{}' is not supported",
                audio.language
            )));
        }
        audio.preprocessing.validate().map_err(|e| match e {
            EncoderError::Validation(msg) => EncoderError::config(msg),
            other => other,
        })?;
        if !(0..=4).contains(&self.native_log_verbosity) {
            return Err(EncoderError::config(format!(
                "native_log_verbosity must be 0..=4, got {}",
                self.native_log_verbosity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::NormalizationMode;
    use std::io::Write;
    use std::path::PathBuf;

    const YAML: &str = r#"
vision:
  model: models/llava.gguf
  mmproj: models/mmproj.gguf
audio:
  model: models/whisper-base.bin
backend:
  use_gpu: false
  n_threads: 4
audio_settings:
  sample_rate: 44100
  language: en
  preprocessing:
    normalization: { mode: rms, target: 0.1 }
    pre_emphasis: 0.97
native_log_verbosity: 1
"#;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = SidecarConfig::from_json_str("{}").unwrap();
        assert!(config.vision.is_none());
        assert_eq!(config.audio_settings.sample_rate, 16000);
        assert_eq!(config.audio_settings.language, "auto");
        assert!(config.backend.use_gpu);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml() {
        let config = SidecarConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(
            config.paths(EncoderKind::Vision).map(|p| p.encoder_file().clone()),
            Some(PathBuf::from("models/mmproj.gguf"))
        );
        assert!(!config.backend.use_gpu);
        assert_eq!(config.backend.n_threads, 4);
        assert_eq!(config.audio_settings.sample_rate, 44100);
        assert_eq!(
            config.audio_settings.preprocessing.normalization,
            NormalizationMode::Rms { target: 0.1 }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SidecarConfig::from_yaml_str(YAML).unwrap();
        config.audio_settings.sample_rate = 99999;
        assert!(matches!(config.validate(), Err(EncoderError::Config(_))));

        let mut config = SidecarConfig::from_yaml_str(YAML).unwrap();
        config.vision = Some(ModelPaths::new("llava.gguf"));
        assert!(config.validate().is_err());

        let mut config = SidecarConfig::default();
        config.native_log_verbosity = 7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("sidecar.yaml");
        std::fs::File::create(&yaml_path)
            .unwrap()
            .write_all(YAML.as_bytes())
            .unwrap();
        assert!(SidecarConfig::from_file(&yaml_path).is_ok());

        let json_path = dir.path().join("sidecar.json");
        std::fs::write(&json_path, r#"{"audio": {"model": "whisper.bin"}}"#).unwrap();
        let config = SidecarConfig::from_file(&json_path).unwrap();
        assert!(config.audio.is_some());

        let toml_path = dir.path().join("sidecar.toml");
        std::fs::write(&toml_path, "").unwrap();
        assert!(matches!(
            SidecarConfig::from_file(&toml_path),
            Err(EncoderError::Config(_))
        ));

        assert!(matches!(
            SidecarConfig::from_file(dir.path().join("missing.json")),
            Err(EncoderError::Io(_))
        ));
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        assert!(matches!(
            SidecarConfig::from_json_str("{ not json"),
            Err(EncoderError::Config(_))
        ));
    }
}
