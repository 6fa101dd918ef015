//! Configuration for the turn pipeline
//!
//! Every field has a default, so an empty TOML file (or none at all) gives a
//! working layout relative to the current directory.

use crate::audio::SYNTHESIS_SAMPLE_RATE;
use crate::llm::DEFAULT_MAX_LENGTH;
use crate::models::ModelCatalog;
use crate::speech::stt::DEFAULT_TRANSCRIPTION_MODEL;
use crate::speech::tts::DEFAULT_SYNTHESIS_MODEL;
use crate::{NeuroChatError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// One subdirectory per text model
    pub llm_models_dir: PathBuf,

    /// One subdirectory per transcription or synthesis model
    pub speech_models_dir: PathBuf,

    pub avatars_dir: PathBuf,

    /// Reference voice clips
    pub voices_dir: PathBuf,

    /// Session directories are created here
    pub outputs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            llm_models_dir: PathBuf::from("inputs/text/llm_models"),
            speech_models_dir: PathBuf::from("inputs/audio/models"),
            avatars_dir: PathBuf::from("inputs/image/avatars"),
            voices_dir: PathBuf::from("inputs/audio/voices"),
            outputs_dir: PathBuf::from("outputs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Total token budget, prompt included
    pub max_length: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub model: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub model: String,

    /// Languages offered by the bundled voice model
    pub languages: Vec<String>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_SYNTHESIS_MODEL.to_string(),
            languages: vec!["en".to_string(), "ru".to_string()],
        }
    }
}

/// Configuration for the complete pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub generation: GenerationConfig,
    pub transcription: TranscriptionConfig,
    pub synthesis: SynthesisConfig,
}

impl AppConfig {
    /// Load a configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            NeuroChatError::ConfigError(format!("Cannot read {}: {}", path.display(), e))
        })?;

        let config: AppConfig = toml::from_str(&content).map_err(|e| {
            NeuroChatError::ConfigError(format!("Cannot parse {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Resolve every relative path against `root`
    pub fn with_root(mut self, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let paths = &mut self.paths;
        for dir in [
            &mut paths.llm_models_dir,
            &mut paths.speech_models_dir,
            &mut paths.avatars_dir,
            &mut paths.voices_dir,
            &mut paths.outputs_dir,
        ] {
            if dir.is_relative() {
                *dir = root.join(&*dir);
            }
        }
        self
    }

    /// Set the token budget
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.generation.max_length = max_length;
        self
    }

    /// Set the transcription model identifier
    pub fn with_transcription_model(mut self, model: impl Into<String>) -> Self {
        self.transcription.model = model.into();
        self
    }

    /// Set the synthesis model identifier
    pub fn with_synthesis_model(mut self, model: impl Into<String>) -> Self {
        self.synthesis.model = model.into();
        self
    }

    /// Output rate of synthesized replies
    pub fn synthesis_sample_rate(&self) -> u32 {
        SYNTHESIS_SAMPLE_RATE
    }

    pub fn catalog(&self) -> ModelCatalog {
        ModelCatalog::new(
            &self.paths.llm_models_dir,
            &self.paths.speech_models_dir,
        )
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.generation.max_length < 2 {
            return Err(NeuroChatError::ConfigError(format!(
                "generation.max_length must leave room for a reply, got {}",
                self.generation.max_length
            )));
        }

        if self.transcription.model.trim().is_empty() {
            return Err(NeuroChatError::ConfigError(
                "transcription.model is required".to_string(),
            ));
        }

        if self.synthesis.model.trim().is_empty() {
            return Err(NeuroChatError::ConfigError(
                "synthesis.model is required".to_string(),
            ));
        }

        if self.synthesis.languages.is_empty() {
            return Err(NeuroChatError::ConfigError(
                "synthesis.languages must list at least one language".to_string(),
            ));
        }

        Ok(())
    }
}
