//! whisper.cpp transcription backend via whisper-rs
//!
//! A catalog entry is a directory holding one ggml model file, e.g.
//! `speech_models/medium/ggml-medium.bin`.

use super::catalog::CatalogEntry;
use super::device::Device;
use super::{Capability, LoadedModel, ModelProvider, SpeechRecognizer};
use crate::audio::TRANSCRIPTION_SAMPLE_RATE;
use crate::{NeuroChatError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

/// Provider for [`Capability::Transcription`] entries
#[derive(Debug, Clone)]
pub struct WhisperProvider {
    n_threads: i32,
    language: Option<String>,
}

impl WhisperProvider {
    pub fn new() -> Self {
        Self {
            n_threads: 4,
            language: None,
        }
    }

    pub fn with_threads(mut self, n_threads: i32) -> Self {
        self.n_threads = n_threads;
        self
    }

    /// Pin the spoken language instead of auto-detecting it
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

impl Default for WhisperProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelProvider for WhisperProvider {
    fn load(&self, entry: &CatalogEntry, device: Device) -> Result<LoadedModel> {
        if entry.capability != Capability::Transcription {
            return Err(NeuroChatError::ModelLoadError(format!(
                "Whisper cannot serve {} entries",
                entry.capability
            )));
        }

        let model_file = find_model_file(&entry.path)?;
        info!("Loading Whisper model from: {:?}", model_file);

        let mut params = WhisperContextParameters::default();
        params.use_gpu(device.is_accelerator());

        let path = model_file
            .to_str()
            .ok_or_else(|| NeuroChatError::ModelLoadError("Invalid model path".to_string()))?;
        let context = WhisperContext::new_with_params(path, params).map_err(|e| {
            NeuroChatError::ModelLoadError(format!("Failed to load Whisper model: {:?}", e))
        })?;

        Ok(LoadedModel::Transcription(Box::new(WhisperRecognizer {
            context,
            n_threads: self.n_threads,
            language: self.language.clone(),
        })))
    }

    fn reclaim(&self, _capability: Capability, device: Device) {
        // whisper.cpp frees its buffers when the context drops
        debug!("Whisper context released on {}", device);
    }
}

fn find_model_file(dir: &Path) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "bin"))
        .collect();
    candidates.sort();

    candidates.into_iter().next().ok_or_else(|| {
        NeuroChatError::ModelLoadError(format!("No ggml .bin model file in {:?}", dir))
    })
}

pub struct WhisperRecognizer {
    context: WhisperContext,
    n_threads: i32,
    language: Option<String>,
}

impl SpeechRecognizer for WhisperRecognizer {
    fn sample_rate(&self) -> u32 {
        TRANSCRIPTION_SAMPLE_RATE
    }

    fn transcribe(&mut self, samples: &[f32]) -> Result<String> {
        if samples.is_empty() {
            return Err(NeuroChatError::TranscriptionError(
                "Empty audio clip".to_string(),
            ));
        }

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_n_threads(self.n_threads);
        params.set_translate(false);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_language(Some(self.language.as_deref().unwrap_or("auto")));

        let mut state = self.context.create_state().map_err(|e| {
            NeuroChatError::TranscriptionError(format!("Failed to create state: {:?}", e))
        })?;

        state.full(params, samples).map_err(|e| {
            NeuroChatError::TranscriptionError(format!("Transcription failed: {:?}", e))
        })?;

        let num_segments = state.full_n_segments().map_err(|e| {
            NeuroChatError::TranscriptionError(format!("Failed to get segments: {:?}", e))
        })?;

        let mut text = String::new();
        for i in 0..num_segments {
            let segment = state.full_get_segment_text(i).map_err(|e| {
                NeuroChatError::TranscriptionError(format!("Failed to get segment text: {:?}", e))
            })?;
            text.push_str(&segment);
        }

        debug!("Transcription result: '{}'", text.trim());
        Ok(text.trim().to_string())
    }
}
