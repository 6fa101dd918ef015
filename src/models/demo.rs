//! Deterministic stand-in backends
//!
//! These run the whole pipeline without any weights on disk: a byte-level
//! echo model, a recognizer that describes the clip it was given and a
//! tone synthesizer. Catalog presence is still enforced by the manager.

use super::catalog::CatalogEntry;
use super::device::Device;
use super::{
    Capability, CausalLm, GenerationParams, LoadedModel, ModelProvider, SpeechRecognizer,
    VoiceSynthesizer, Waveform,
};
use crate::audio::{read_wav, TRANSCRIPTION_SAMPLE_RATE};
use crate::{NeuroChatError, Result};
use std::f32::consts::PI;
use std::path::Path;
use tracing::debug;

/// End-of-sequence id of the byte-level vocabulary
pub const DEMO_EOS_TOKEN: u32 = 256;

/// Native rate of the tone synthesizer; differs from the session rate on purpose
pub const DEMO_SYNTHESIS_RATE: u32 = 24000;

const REPLY_PREFIX: &str = "You said: ";

/// Provider backing every capability with a demo implementation
#[derive(Debug, Clone)]
pub struct DemoProvider {
    languages: Vec<String>,
}

impl DemoProvider {
    pub fn new() -> Self {
        Self::with_languages(["en", "ru"])
    }

    pub fn with_languages<I, S>(languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            languages: languages.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for DemoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelProvider for DemoProvider {
    fn load(&self, entry: &CatalogEntry, device: Device) -> Result<LoadedModel> {
        debug!(
            "Demo provider loading {} {:?} on {}",
            entry.capability, entry.identifier, device
        );

        Ok(match entry.capability {
            Capability::TextGeneration => LoadedModel::TextGeneration(Box::new(EchoLm)),
            Capability::Transcription => {
                LoadedModel::Transcription(Box::new(DescribingRecognizer))
            }
            Capability::SpeechSynthesis => LoadedModel::SpeechSynthesis(Box::new(ToneSynthesizer {
                languages: self.languages.clone(),
            })),
        })
    }

    fn reclaim(&self, capability: Capability, device: Device) {
        debug!("Demo provider reclaim of {} on {}", capability, device);
    }
}

/// Byte-level model that answers by quoting the prompt back
#[derive(Debug, Default)]
pub struct EchoLm;

impl CausalLm for EchoLm {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn generate(&mut self, input_ids: &[u32], params: &GenerationParams) -> Result<Vec<u32>> {
        let prompt = self.decode(input_ids, true)?;
        let reply = format!("{}{}", REPLY_PREFIX, prompt.trim());

        let mut sequence = input_ids.to_vec();
        for byte in reply.bytes() {
            if sequence.len() + 1 >= params.max_length {
                break;
            }
            sequence.push(u32::from(byte));
        }
        if sequence.len() < params.max_length {
            sequence.push(DEMO_EOS_TOKEN);
        }

        Ok(sequence)
    }

    fn decode(&self, tokens: &[u32], skip_special_tokens: bool) -> Result<String> {
        let mut bytes = Vec::with_capacity(tokens.len());
        for &token in tokens {
            match u8::try_from(token) {
                Ok(byte) => bytes.push(byte),
                Err(_) if token == DEMO_EOS_TOKEN && skip_special_tokens => {}
                Err(_) if token == DEMO_EOS_TOKEN => bytes.extend_from_slice(b"<|endoftext|>"),
                Err(_) => {
                    return Err(NeuroChatError::GenerationError(format!(
                        "Token {} is outside the byte vocabulary",
                        token
                    )))
                }
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn eos_token_id(&self) -> Option<u32> {
        Some(DEMO_EOS_TOKEN)
    }
}

/// Recognizer that reports the length of the clip instead of its words
#[derive(Debug, Default)]
pub struct DescribingRecognizer;

impl SpeechRecognizer for DescribingRecognizer {
    fn sample_rate(&self) -> u32 {
        TRANSCRIPTION_SAMPLE_RATE
    }

    fn transcribe(&mut self, samples: &[f32]) -> Result<String> {
        if samples.is_empty() {
            return Err(NeuroChatError::TranscriptionError(
                "Empty audio clip".to_string(),
            ));
        }
        let seconds = samples.len() as f32 / TRANSCRIPTION_SAMPLE_RATE as f32;
        Ok(format!("Voice message of {:.1} seconds", seconds))
    }
}

/// Synthesizer that renders one short tone per character
#[derive(Debug)]
pub struct ToneSynthesizer {
    languages: Vec<String>,
}

impl VoiceSynthesizer for ToneSynthesizer {
    fn supports_language(&self, language: &str) -> bool {
        self.languages.iter().any(|l| l == language)
    }

    fn synthesize(
        &mut self,
        text: &str,
        reference_voice: &Path,
        language: &str,
    ) -> Result<Waveform> {
        let (reference, _, _) = read_wav(reference_voice).map_err(|e| {
            NeuroChatError::SynthesisError(format!(
                "Unreadable reference voice {:?}: {}",
                reference_voice, e
            ))
        })?;

        // Pitch follows the reference loudness so different voices differ
        let rms = if reference.is_empty() {
            0.0
        } else {
            (reference.iter().map(|s| s * s).sum::<f32>() / reference.len() as f32).sqrt()
        };
        let pitch = 160.0 + 200.0 * rms.min(1.0);

        let chars = text.chars().count().max(4);
        let total = chars * DEMO_SYNTHESIS_RATE as usize / 16;
        let samples = (0..total)
            .map(|i| (2.0 * PI * pitch * i as f32 / DEMO_SYNTHESIS_RATE as f32).sin() * 0.3)
            .collect();

        debug!(
            "Tone synthesizer rendered {} samples for {} chars ({})",
            total, chars, language
        );

        Ok(Waveform::new(samples, DEMO_SYNTHESIS_RATE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_round_trip() {
        let lm = EchoLm;
        let ids = lm.encode("Привет").unwrap();
        assert_eq!(lm.decode(&ids, true).unwrap(), "Привет");
    }

    #[test]
    fn test_echo_generation_keeps_prompt_prefix() {
        let mut lm = EchoLm;
        let ids = lm.encode("Hello").unwrap();
        let params = GenerationParams {
            max_length: 512,
            pad_token_id: lm.eos_token_id(),
        };
        let out = lm.generate(&ids, &params).unwrap();
        assert_eq!(&out[..ids.len()], &ids[..]);
        assert_eq!(*out.last().unwrap(), DEMO_EOS_TOKEN);
        assert_eq!(
            lm.decode(&out[ids.len()..], true).unwrap(),
            "You said: Hello"
        );
        assert!(lm
            .decode(&out[ids.len()..], false)
            .unwrap()
            .ends_with("<|endoftext|>"));
    }

    #[test]
    fn test_echo_respects_budget() {
        let mut lm = EchoLm;
        let ids = lm.encode("Hello").unwrap();
        let params = GenerationParams {
            max_length: 8,
            pad_token_id: None,
        };
        assert_eq!(lm.generate(&ids, &params).unwrap().len(), 8);
    }

    #[test]
    fn test_recognizer_rejects_empty() {
        let mut recognizer = DescribingRecognizer;
        assert!(recognizer.transcribe(&[]).is_err());
        let text = recognizer.transcribe(&vec![0.0; 32000]).unwrap();
        assert_eq!(text, "Voice message of 2.0 seconds");
    }

    #[test]
    fn test_tone_languages() {
        let synth = ToneSynthesizer {
            languages: vec!["en".into()],
        };
        assert!(synth.supports_language("en"));
        assert!(!synth.supports_language("fr"));
    }
}
