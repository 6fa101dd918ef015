pub mod audio;
pub mod integration;
pub mod llm;
pub mod models;
pub mod session;
pub mod speech;
pub mod utils;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NeuroChatError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Model load error: {0}")]
    ModelLoadError(String),

    #[error("Transcription error: {0}")]
    TranscriptionError(String),

    #[error("Generation error: {0}")]
    GenerationError(String),

    #[error("Synthesis error: {0}")]
    SynthesisError(String),

    #[error("Session creation error: {0}")]
    SessionCreationError(String),

    #[error("IO error: {0}")]
    IOError(String),

    #[error("Audio processing error: {0}")]
    AudioProcessingError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<std::io::Error> for NeuroChatError {
    fn from(e: std::io::Error) -> Self {
        NeuroChatError::IOError(e.to_string())
    }
}

impl NeuroChatError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Catalog problems need the user to pick another entry
            NeuroChatError::ModelNotFound(_) => false,
            NeuroChatError::ModelLoadError(_) => false,
            // Per-turn failures; the next turn starts from released leases
            NeuroChatError::TranscriptionError(_) => true,
            NeuroChatError::GenerationError(_) => true,
            NeuroChatError::SynthesisError(_) => true,
            NeuroChatError::SessionCreationError(_) => false,
            NeuroChatError::IOError(_) => false,
            NeuroChatError::AudioProcessingError(_) => true,
            NeuroChatError::ConfigError(_) => false,
            NeuroChatError::InvalidRequest(_) => true,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            NeuroChatError::ModelNotFound(_) => {
                "Selected model is not installed. Please pick another one.".to_string()
            }
            NeuroChatError::ModelLoadError(_) => {
                "Failed to load AI model. Please verify model files are present.".to_string()
            }
            NeuroChatError::TranscriptionError(_) => {
                "Speech recognition failed. Please try again.".to_string()
            }
            NeuroChatError::GenerationError(_) => {
                "AI response generation failed. Please try again.".to_string()
            }
            NeuroChatError::SynthesisError(_) => {
                "Text-to-speech failed. Response will be shown as text.".to_string()
            }
            NeuroChatError::SessionCreationError(_) => {
                "Could not create the chat output folder.".to_string()
            }
            NeuroChatError::IOError(_) => "File system error occurred.".to_string(),
            NeuroChatError::AudioProcessingError(_) => {
                "Audio processing failed. Please try again.".to_string()
            }
            NeuroChatError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
            NeuroChatError::InvalidRequest(_) => {
                "Please enter a prompt or record one.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, NeuroChatError>;
