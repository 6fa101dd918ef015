//! Speech stages of a turn
//!
//! - Transcription of a recorded clip into prompt text
//! - Synthesis of the reply in a reference voice

pub mod stt;
pub mod tts;

pub use crate::models::Waveform;
pub use stt::TranscriptionStage;
pub use tts::SynthesisStage;
