use crate::audio::{downmix_to_mono, read_wav, resample_mono};
use crate::models::{Capability, TurnScope};
use crate::{NeuroChatError, Result};
use std::path::Path;
use tracing::{debug, info};

/// Whisper model identifier used when none is configured
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "medium";

/// Turns a recorded clip into prompt text
#[derive(Debug, Clone)]
pub struct TranscriptionStage {
    model: String,
}

impl TranscriptionStage {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Transcribe `audio_path` with a freshly loaded recognizer.
    ///
    /// The recognizer lease is released before returning, on success and on
    /// failure alike.
    pub fn transcribe(&self, scope: &mut TurnScope, audio_path: &Path) -> Result<String> {
        let (samples, sample_rate, channels) = read_wav(audio_path).map_err(|e| {
            NeuroChatError::TranscriptionError(format!(
                "Cannot decode audio {:?}: {}",
                audio_path, e
            ))
        })?;
        let mono = downmix_to_mono(&samples, channels);

        debug!(
            "Decoded {} mono samples at {} Hz from {:?}",
            mono.len(),
            sample_rate,
            audio_path
        );

        let lease = scope.acquire(Capability::Transcription, &self.model)?;
        let lease_id = lease.id();

        let result = lease.recognizer().and_then(|recognizer| {
            let input = resample_mono(&mono, sample_rate, recognizer.sample_rate())
                .map_err(into_transcription_error)?;
            recognizer.transcribe(&input).map_err(into_transcription_error)
        });

        scope.release(lease_id);

        let text = result?.trim().to_string();
        info!("Transcribed {:?}: '{}'", audio_path, text);
        Ok(text)
    }
}

impl Default for TranscriptionStage {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSCRIPTION_MODEL)
    }
}

fn into_transcription_error(e: NeuroChatError) -> NeuroChatError {
    match e {
        NeuroChatError::TranscriptionError(_) => e,
        other => NeuroChatError::TranscriptionError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::write_wav;
    use crate::models::{CpuOnlyProbe, DemoProvider, ModelCatalog, ModelManager};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> ModelManager {
        let speech = dir.path().join("speech");
        fs::create_dir_all(speech.join("medium")).unwrap();
        let catalog = ModelCatalog::new(dir.path().join("text"), speech);
        ModelManager::new(catalog, Arc::new(DemoProvider::new()), Arc::new(CpuOnlyProbe))
    }

    #[test]
    fn test_transcribes_stereo_clip() {
        let dir = TempDir::new().unwrap();
        let models = manager(&dir);
        let clip = dir.path().join("clip.wav");
        // one second of stereo at 32 kHz
        write_wav(&clip, &vec![0.1; 64000], 32000, 2).unwrap();

        let mut scope = models.begin_turn();
        let text = TranscriptionStage::default()
            .transcribe(&mut scope, &clip)
            .unwrap();

        assert_eq!(text, "Voice message of 1.0 seconds");
        assert_eq!(scope.outstanding(), 0);
        assert_eq!(models.outstanding(), 0);
    }

    #[test]
    fn test_undecodable_clip() {
        let dir = TempDir::new().unwrap();
        let models = manager(&dir);
        let clip = dir.path().join("clip.wav");
        fs::write(&clip, b"not a wave file").unwrap();

        let mut scope = models.begin_turn();
        let err = TranscriptionStage::default()
            .transcribe(&mut scope, &clip)
            .unwrap_err();

        assert!(matches!(err, NeuroChatError::TranscriptionError(_)));
        assert_eq!(models.outstanding(), 0);
        assert_eq!(models.stats().acquired, 0);
    }

    #[test]
    fn test_unknown_model() {
        let dir = TempDir::new().unwrap();
        let models = manager(&dir);
        let clip = dir.path().join("clip.wav");
        write_wav(&clip, &vec![0.1; 16000], 16000, 1).unwrap();

        let mut scope = models.begin_turn();
        let err = TranscriptionStage::new("large-v3")
            .transcribe(&mut scope, &clip)
            .unwrap_err();

        assert!(matches!(err, NeuroChatError::ModelNotFound(_)));
    }
}
