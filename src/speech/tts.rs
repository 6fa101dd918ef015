use crate::audio::{resample_mono, SYNTHESIS_SAMPLE_RATE};
use crate::models::{Capability, TurnScope, Waveform};
use crate::{NeuroChatError, Result};
use std::path::Path;
use tracing::{debug, info};

/// Voice-cloning model identifier used when none is configured
pub const DEFAULT_SYNTHESIS_MODEL: &str = "xtts_v2";

/// Speaks a reply in the voice of a reference clip
#[derive(Debug, Clone)]
pub struct SynthesisStage {
    model: String,
    output_rate: u32,
}

impl SynthesisStage {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            output_rate: SYNTHESIS_SAMPLE_RATE,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Rate of every waveform this stage returns
    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Synthesize `text` in the voice of `reference_voice`.
    ///
    /// The returned waveform is always at [`SYNTHESIS_SAMPLE_RATE`], whatever
    /// the model produced natively.
    pub fn synthesize(
        &self,
        scope: &mut TurnScope,
        text: &str,
        reference_voice: &Path,
        language: &str,
    ) -> Result<Waveform> {
        if !reference_voice.is_file() {
            return Err(NeuroChatError::SynthesisError(format!(
                "Reference voice not found: {:?}",
                reference_voice
            )));
        }

        let lease = scope.acquire(Capability::SpeechSynthesis, &self.model)?;
        let lease_id = lease.id();

        let result = lease.synthesizer().and_then(|synth| {
            if !synth.supports_language(language) {
                return Err(NeuroChatError::SynthesisError(format!(
                    "Language '{}' is not supported by {}",
                    language, self.model
                )));
            }
            synth
                .synthesize(text, reference_voice, language)
                .map_err(into_synthesis_error)
        });

        scope.release(lease_id);

        let native = result?;
        if native.is_empty() {
            return Err(NeuroChatError::SynthesisError(
                "Model produced an empty waveform".to_string(),
            ));
        }

        debug!(
            "Synthesized {:.2}s at {} Hz",
            native.duration_secs(),
            native.sample_rate
        );

        let samples = resample_mono(&native.samples, native.sample_rate, self.output_rate)
            .map_err(into_synthesis_error)?;
        let waveform = Waveform::new(samples, self.output_rate);

        info!(
            "Synthesized {} chars into {:.2}s of audio",
            text.chars().count(),
            waveform.duration_secs()
        );
        Ok(waveform)
    }
}

impl Default for SynthesisStage {
    fn default() -> Self {
        Self::new(DEFAULT_SYNTHESIS_MODEL)
    }
}

fn into_synthesis_error(e: NeuroChatError) -> NeuroChatError {
    match e {
        NeuroChatError::SynthesisError(_) => e,
        other => NeuroChatError::SynthesisError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::write_wav;
    use crate::models::{CpuOnlyProbe, DemoProvider, ModelCatalog, ModelManager};
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (ModelManager, PathBuf) {
        let speech = dir.path().join("speech");
        fs::create_dir_all(speech.join(DEFAULT_SYNTHESIS_MODEL)).unwrap();
        let catalog = ModelCatalog::new(dir.path().join("text"), speech);
        let models =
            ModelManager::new(catalog, Arc::new(DemoProvider::new()), Arc::new(CpuOnlyProbe));

        let voice = dir.path().join("alice.wav");
        write_wav(&voice, &vec![0.2; 8000], 16000, 1).unwrap();
        (models, voice)
    }

    #[test]
    fn test_output_is_at_session_rate() {
        let dir = TempDir::new().unwrap();
        let (models, voice) = setup(&dir);

        let mut scope = models.begin_turn();
        let wave = SynthesisStage::default()
            .synthesize(&mut scope, "Hello there", &voice, "en")
            .unwrap();

        assert_eq!(wave.sample_rate, SYNTHESIS_SAMPLE_RATE);
        assert!(!wave.is_empty());
        assert_eq!(models.outstanding(), 0);
    }

    #[test]
    fn test_missing_reference_voice() {
        let dir = TempDir::new().unwrap();
        let (models, _) = setup(&dir);

        let mut scope = models.begin_turn();
        let err = SynthesisStage::default()
            .synthesize(&mut scope, "Hello", &dir.path().join("nobody.wav"), "en")
            .unwrap_err();

        assert!(matches!(err, NeuroChatError::SynthesisError(_)));
        assert_eq!(models.stats().acquired, 0);
    }

    #[test]
    fn test_unsupported_language_releases_model() {
        let dir = TempDir::new().unwrap();
        let (models, voice) = setup(&dir);

        let mut scope = models.begin_turn();
        let err = SynthesisStage::default()
            .synthesize(&mut scope, "Bonjour", &voice, "fr")
            .unwrap_err();

        assert!(matches!(err, NeuroChatError::SynthesisError(_)));
        assert_eq!(models.stats().acquired, 1);
        assert_eq!(models.outstanding(), 0);
    }
}
