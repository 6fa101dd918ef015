//! Single-turn pipeline
//!
//! Connects the stages: (voice clip -> STT) -> LLM -> (TTS) -> session files

pub mod config;
pub mod orchestrator;

pub use config::{AppConfig, GenerationConfig, PathsConfig, SynthesisConfig, TranscriptionConfig};
pub use orchestrator::{
    default_provider, SpeechRequest, TurnOrchestrator, TurnOutcome, TurnRequest, TurnStage,
};
