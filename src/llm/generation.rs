//! Bounded causal generation over a leased text model

use crate::models::{Capability, CausalLm, GenerationParams, TurnScope};
use crate::{NeuroChatError, Result};
use tracing::{debug, info};

/// Total token budget, prompt included
pub const DEFAULT_MAX_LENGTH: usize = 512;

#[derive(Debug, Clone)]
pub struct GenerationStage {
    max_length: usize,
}

impl GenerationStage {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Load `model_identifier`, answer `prompt`, release the model.
    pub fn generate(
        &self,
        scope: &mut TurnScope,
        prompt: &str,
        model_identifier: &str,
    ) -> Result<String> {
        let lease = scope.acquire(Capability::TextGeneration, model_identifier)?;
        let lease_id = lease.id();

        let result = lease
            .text_model()
            .and_then(|model| self.run(model, prompt));

        scope.release(lease_id);
        result
    }

    /// Generate with an already loaded model.
    ///
    /// The model returns prompt + continuation; only the tokens after the
    /// prompt length recorded at encode time are decoded.
    pub fn run(&self, model: &mut dyn CausalLm, prompt: &str) -> Result<String> {
        let input_ids = model.encode(prompt).map_err(into_generation_error)?;
        let prompt_len = input_ids.len();

        if prompt_len >= self.max_length {
            return Err(NeuroChatError::GenerationError(format!(
                "Prompt is {} tokens, the budget is {}",
                prompt_len, self.max_length
            )));
        }

        let params = GenerationParams {
            max_length: self.max_length,
            pad_token_id: model.eos_token_id(),
        };

        debug!(
            "Generating from {} prompt tokens (budget {})",
            prompt_len, self.max_length
        );

        let output = model
            .generate(&input_ids, &params)
            .map_err(into_generation_error)?;

        if output.len() < prompt_len || output[..prompt_len] != input_ids[..] {
            return Err(NeuroChatError::GenerationError(
                "Model output does not continue the encoded prompt; tokenizer and model disagree"
                    .to_string(),
            ));
        }

        let generated = &output[prompt_len..];
        let reply = model
            .decode(generated, true)
            .map_err(into_generation_error)?;

        info!("Generated {} new tokens", generated.len());
        Ok(reply)
    }
}

impl Default for GenerationStage {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LENGTH)
    }
}

fn into_generation_error(e: NeuroChatError) -> NeuroChatError {
    match e {
        NeuroChatError::GenerationError(_) => e,
        other => NeuroChatError::GenerationError(other.to_string()),
    }
}
