pub mod resampler;
pub mod wav;

pub use resampler::{resample_mono, AudioResampler};
pub use wav::{downmix_to_mono, read_wav, write_wav};

/// Output rate of every synthesized reply written to a session.
pub const SYNTHESIS_SAMPLE_RATE: u32 = 22050;

/// Input rate expected by whisper-style recognizers.
pub const TRANSCRIPTION_SAMPLE_RATE: u32 = 16000;
