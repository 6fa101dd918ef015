//! Orchestrator for one chat turn
//!
//! START -> TRANSCRIBE? -> GENERATE -> SYNTHESIZE? -> PERSIST -> RELEASE -> DONE
//!
//! Any error moves the turn to FAILED; RELEASE runs either way, so a turn
//! never leaves a model loaded behind it.

use crate::audio::write_wav;
use crate::integration::config::AppConfig;
use crate::llm::GenerationStage;
use crate::models::catalog::is_plain_name;
use crate::models::{
    DemoProvider, DeviceProbe, ModelManager, ModelProvider, SystemProbe, TurnScope, Waveform,
};
use crate::session::{SessionHandle, SessionStore};
use crate::speech::{SynthesisStage, TranscriptionStage};
use crate::utils::perf::{Stopwatch, TurnTimings};
use crate::{NeuroChatError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Stages a turn moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStage {
    Start,
    Transcribe,
    Generate,
    Synthesize,
    Persist,
    Release,
    Done,
    Failed,
}

impl fmt::Display for TurnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnStage::Start => "START",
            TurnStage::Transcribe => "TRANSCRIBE",
            TurnStage::Generate => "GENERATE",
            TurnStage::Synthesize => "SYNTHESIZE",
            TurnStage::Persist => "PERSIST",
            TurnStage::Release => "RELEASE",
            TurnStage::Done => "DONE",
            TurnStage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Spoken reply settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechRequest {
    /// File name of a clip under the voices directory
    pub voice: Option<String>,

    /// Language code understood by the synthesis model
    pub language: String,
}

impl SpeechRequest {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            voice: None,
            language: language.into(),
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }
}

/// Everything the caller supplies for one turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    /// Typed prompt, ignored when `audio` is set
    pub prompt: String,

    /// Recorded clip to transcribe into the prompt
    pub audio: Option<PathBuf>,

    /// Text model identifier
    pub model: String,

    /// Avatar file name under the avatars directory
    pub avatar: Option<String>,

    /// Speak the reply when set
    pub speech: Option<SpeechRequest>,

    /// Session to continue; a new one is created when absent
    pub session: Option<SessionHandle>,
}

impl TurnRequest {
    pub fn text(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn voice(model: impl Into<String>, audio: impl Into<PathBuf>) -> Self {
        Self {
            audio: Some(audio.into()),
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    pub fn with_speech(mut self, speech: SpeechRequest) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn in_session(mut self, session: Option<SessionHandle>) -> Self {
        self.session = session;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.audio.is_none() && self.prompt.trim().is_empty() {
            return Err(NeuroChatError::InvalidRequest(
                "Either a prompt or an audio clip is required".to_string(),
            ));
        }
        if let Some(avatar) = self.avatar.as_deref().filter(|a| !is_plain_name(a)) {
            return Err(NeuroChatError::InvalidRequest(format!(
                "Avatar must be a file name inside the avatars directory, got {:?}",
                avatar
            )));
        }
        Ok(())
    }
}

/// Result of a completed turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Prompt the model answered, typed or transcribed
    pub prompt: String,

    pub reply: String,

    pub avatar_path: Option<PathBuf>,

    /// Synthesized reply inside the session audio directory
    pub audio_path: Option<PathBuf>,

    /// Session the turn was written to; pass it to the next turn
    pub session: SessionHandle,

    /// Why no audio was produced although speech was requested
    pub speech_error: Option<NeuroChatError>,

    /// Stages visited, in order
    pub stages: Vec<TurnStage>,

    pub timings: TurnTimings,
}

#[derive(Debug, Default)]
struct TurnProgress {
    stages: Vec<TurnStage>,
    timings: TurnTimings,
}

impl TurnProgress {
    fn enter(&mut self, stage: TurnStage) {
        debug!("Turn stage -> {}", stage);
        self.stages.push(stage);
    }

    fn current(&self) -> TurnStage {
        self.stages.last().copied().unwrap_or(TurnStage::Start)
    }
}

/// Runs turns against one model manager and one session store
pub struct TurnOrchestrator {
    config: AppConfig,
    models: ModelManager,
    sessions: SessionStore,
    transcription: TranscriptionStage,
    generation: GenerationStage,
    synthesis: SynthesisStage,
    last_session: Mutex<Option<SessionHandle>>,
}

impl TurnOrchestrator {
    pub fn new(
        config: AppConfig,
        provider: Arc<dyn ModelProvider>,
        probe: Arc<dyn DeviceProbe>,
    ) -> Result<Self> {
        config.validate()?;

        let models = ModelManager::new(config.catalog(), provider, probe);
        let sessions = SessionStore::new(&config.paths.outputs_dir);

        Ok(Self {
            transcription: TranscriptionStage::new(&config.transcription.model),
            generation: GenerationStage::new(config.generation.max_length),
            synthesis: SynthesisStage::new(&config.synthesis.model),
            config,
            models,
            sessions,
            last_session: Mutex::new(None),
        })
    }

    /// Build with the default backends and the host's devices
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let provider = default_provider(&config);
        Self::new(config, provider, Arc::new(SystemProbe))
    }

    /// Replace the session store, e.g. to pin its clock
    pub fn with_session_store(mut self, sessions: SessionStore) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn models(&self) -> &ModelManager {
        &self.models
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Session written to by the latest turn that reached PERSIST.
    ///
    /// Set as soon as the session exists, so a turn that fails while writing
    /// still hands back a freshly created session.
    pub fn last_session(&self) -> Option<SessionHandle> {
        self.last_session.lock().clone()
    }

    /// Run one turn to completion.
    ///
    /// Every lease taken during the turn is released before this returns,
    /// whether the turn succeeded or not.
    pub fn run_turn(&self, request: TurnRequest) -> Result<TurnOutcome> {
        let mut stopwatch = Stopwatch::start();
        let mut progress = TurnProgress::default();
        let mut scope = self.models.begin_turn();

        info!("Turn {} started (model {:?})", scope.id(), request.model);
        let result = self.run_stages(&mut scope, request, &mut progress, &mut stopwatch);

        let failed_in = progress.current();
        if result.is_err() {
            progress.enter(TurnStage::Failed);
        }

        progress.enter(TurnStage::Release);
        let swept = scope.close();
        if swept > 0 {
            debug!("Released {} leases at end of turn", swept);
        }

        match result {
            Ok(mut outcome) => {
                progress.enter(TurnStage::Done);
                progress.timings.total_ms = stopwatch.elapsed_ms();
                info!("Turn finished: {}", progress.timings.summary());

                outcome.stages = progress.stages;
                outcome.timings = progress.timings;
                Ok(outcome)
            }
            Err(e) => {
                error!("Turn failed during {}: {}", failed_in, e);
                Err(e)
            }
        }
    }

    fn run_stages(
        &self,
        scope: &mut TurnScope,
        request: TurnRequest,
        progress: &mut TurnProgress,
        stopwatch: &mut Stopwatch,
    ) -> Result<TurnOutcome> {
        progress.enter(TurnStage::Start);
        request.validate()?;
        stopwatch.lap_ms();

        let TurnRequest {
            prompt,
            audio,
            model,
            avatar,
            speech,
            session,
        } = request;

        let prompt = match audio {
            Some(path) => {
                progress.enter(TurnStage::Transcribe);
                let text = self.transcription.transcribe(scope, &path)?;
                progress.timings.transcription_ms = Some(stopwatch.lap_ms());
                if text.is_empty() {
                    return Err(NeuroChatError::TranscriptionError(format!(
                        "No speech recognized in {:?}",
                        path
                    )));
                }
                text
            }
            None => prompt,
        };

        progress.enter(TurnStage::Generate);
        let reply = self.generation.generate(scope, &prompt, &model)?;
        progress.timings.generation_ms = Some(stopwatch.lap_ms());

        let mut speech_error = None;
        let waveform = match speech {
            Some(speech) => {
                progress.enter(TurnStage::Synthesize);
                let result = self.synthesize(scope, &reply, &speech);
                progress.timings.synthesis_ms = Some(stopwatch.lap_ms());
                match result {
                    Ok(waveform) => Some(waveform),
                    Err(e) => {
                        warn!("Speech synthesis failed, keeping the text reply: {}", e);
                        speech_error = Some(e);
                        None
                    }
                }
            }
            None => None,
        };

        progress.enter(TurnStage::Persist);
        let session = self.sessions.ensure_session(session)?;
        *self.last_session.lock() = Some(session.clone());

        self.sessions.append_turn(&session, &prompt, &reply)?;

        let audio_path = match waveform {
            Some(waveform) => match self.save_waveform(&session, &waveform) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("Could not save synthesized reply: {}", e);
                    speech_error = Some(e);
                    None
                }
            },
            None => None,
        };
        progress.timings.persist_ms = Some(stopwatch.lap_ms());

        let avatar_path = avatar.map(|name| self.config.paths.avatars_dir.join(name));
        if let Some(path) = avatar_path.as_ref().filter(|p| !p.is_file()) {
            warn!("Avatar {:?} does not exist", path);
        }

        Ok(TurnOutcome {
            prompt,
            reply,
            avatar_path,
            audio_path,
            session,
            speech_error,
            stages: Vec::new(),
            timings: TurnTimings::default(),
        })
    }

    fn synthesize(
        &self,
        scope: &mut TurnScope,
        reply: &str,
        speech: &SpeechRequest,
    ) -> Result<Waveform> {
        let voice = speech.voice.as_deref().ok_or_else(|| {
            NeuroChatError::SynthesisError("No reference voice selected".to_string())
        })?;
        if !is_plain_name(voice) {
            return Err(NeuroChatError::SynthesisError(format!(
                "Invalid voice name {:?}",
                voice
            )));
        }

        let reference = self.config.paths.voices_dir.join(voice);
        self.synthesis
            .synthesize(scope, reply, &reference, &speech.language)
    }

    fn save_waveform(&self, session: &SessionHandle, waveform: &Waveform) -> Result<PathBuf> {
        let path = self.sessions.next_audio_path(session)?;
        if let Err(e) = write_wav(&path, &waveform.samples, waveform.sample_rate, 1) {
            // drop the empty reservation
            let _ = fs::remove_file(&path);
            return Err(NeuroChatError::SynthesisError(format!(
                "Failed to write {:?}: {}",
                path, e
            )));
        }
        Ok(path)
    }
}

/// Providers used when the caller does not bring its own
#[cfg(not(feature = "whisper"))]
pub fn default_provider(config: &AppConfig) -> Arc<dyn ModelProvider> {
    Arc::new(DemoProvider::with_languages(
        config.synthesis.languages.clone(),
    ))
}

/// Providers used when the caller does not bring its own
#[cfg(feature = "whisper")]
pub fn default_provider(config: &AppConfig) -> Arc<dyn ModelProvider> {
    use crate::models::whisper::WhisperProvider;
    use crate::models::{Capability, RoutingProvider};

    let demo: Arc<dyn ModelProvider> = Arc::new(DemoProvider::with_languages(
        config.synthesis.languages.clone(),
    ));
    Arc::new(
        RoutingProvider::new(demo)
            .route(Capability::Transcription, Arc::new(WhisperProvider::new())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_request_is_rejected() {
        let request = TurnRequest::text("demo-model", "   ");
        assert!(matches!(
            request.validate(),
            Err(NeuroChatError::InvalidRequest(_))
        ));

        let request = TurnRequest::voice("demo-model", "clip.wav");
        assert!(request.validate().is_ok());

        for avatar in ["/etc/passwd", "../x", ""] {
            let request = TurnRequest::text("demo-model", "Hello").with_avatar(avatar);
            assert!(matches!(
                request.validate(),
                Err(NeuroChatError::InvalidRequest(_))
            ));
        }
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(TurnStage::Synthesize.to_string(), "SYNTHESIZE");
        assert_eq!(
            serde_json::to_string(&TurnStage::Persist).unwrap(),
            "\"persist\""
        );
    }

    #[test]
    fn test_request_builder() {
        let request = TurnRequest::text("demo-model", "Hello")
            .with_avatar("bot.png")
            .with_speech(SpeechRequest::new("en").with_voice("alice.wav"));

        assert_eq!(request.avatar.as_deref(), Some("bot.png"));
        let speech = request.speech.unwrap();
        assert_eq!(speech.voice.as_deref(), Some("alice.wav"));
        assert_eq!(speech.language, "en");
    }
}
