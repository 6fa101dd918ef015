//! Model capabilities and their per-turn lifecycle
//!
//! Every heavyweight model is reached through a [`ModelLease`]: the
//! [`ModelManager`] resolves a device, looks the identifier up in the
//! [`ModelCatalog`], loads it through a [`ModelProvider`] and hands back a
//! guard that releases the weights when dropped.

pub mod catalog;
pub mod demo;
pub mod device;
pub mod lease;
#[cfg(feature = "whisper")]
pub mod whisper;

pub use catalog::{CatalogEntry, ModelCatalog};
pub use demo::DemoProvider;
pub use device::{resolve_device, CpuOnlyProbe, Device, DeviceProbe, SystemProbe};
pub use lease::{LeaseId, LeaseStats, ModelLease, ModelManager, TurnScope};

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Abstract model role, independent of the implementation behind it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    TextGeneration,
    Transcription,
    SpeechSynthesis,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::TextGeneration => "text-generation",
            Capability::Transcription => "transcription",
            Capability::SpeechSynthesis => "speech-synthesis",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounds for a single causal generation call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationParams {
    /// Total sequence budget, prompt tokens included
    pub max_length: usize,

    /// Token used to pad; the end-of-sequence token when the model has one
    pub pad_token_id: Option<u32>,
}

/// Mono PCM produced by a synthesis backend
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Tokenizer plus causal text model loaded from one catalog entry
pub trait CausalLm: Send {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Returns the full sequence: the input ids followed by the continuation.
    fn generate(&mut self, input_ids: &[u32], params: &GenerationParams) -> Result<Vec<u32>>;

    fn decode(&self, tokens: &[u32], skip_special_tokens: bool) -> Result<String>;

    fn eos_token_id(&self) -> Option<u32>;
}

pub trait SpeechRecognizer: Send {
    /// Rate the recognizer wants its mono input at
    fn sample_rate(&self) -> u32;

    /// Best single hypothesis for the clip
    fn transcribe(&mut self, samples: &[f32]) -> Result<String>;
}

pub trait VoiceSynthesizer: Send {
    fn supports_language(&self, language: &str) -> bool;

    /// Speak `text` in the voice of the reference clip
    fn synthesize(&mut self, text: &str, reference_voice: &Path, language: &str)
        -> Result<Waveform>;
}

/// A loaded capability instance, owned by exactly one lease
pub enum LoadedModel {
    TextGeneration(Box<dyn CausalLm>),
    Transcription(Box<dyn SpeechRecognizer>),
    SpeechSynthesis(Box<dyn VoiceSynthesizer>),
}

impl LoadedModel {
    pub fn capability(&self) -> Capability {
        match self {
            LoadedModel::TextGeneration(_) => Capability::TextGeneration,
            LoadedModel::Transcription(_) => Capability::Transcription,
            LoadedModel::SpeechSynthesis(_) => Capability::SpeechSynthesis,
        }
    }
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoadedModel({})", self.capability())
    }
}

/// Loads catalog entries onto a device and reclaims device memory afterwards
pub trait ModelProvider: Send + Sync {
    fn load(&self, entry: &CatalogEntry, device: Device) -> Result<LoadedModel>;

    /// Return cached allocations of a `capability` model on `device` to the
    /// driver.
    ///
    /// Called after every release and after every failed load.
    fn reclaim(&self, capability: Capability, device: Device);
}

/// Sends each capability to its own provider, falling back to a default
pub struct RoutingProvider {
    fallback: Arc<dyn ModelProvider>,
    routes: HashMap<Capability, Arc<dyn ModelProvider>>,
}

impl RoutingProvider {
    pub fn new(fallback: Arc<dyn ModelProvider>) -> Self {
        Self {
            fallback,
            routes: HashMap::new(),
        }
    }

    pub fn route(mut self, capability: Capability, provider: Arc<dyn ModelProvider>) -> Self {
        self.routes.insert(capability, provider);
        self
    }

    fn provider_for(&self, capability: Capability) -> &Arc<dyn ModelProvider> {
        self.routes.get(&capability).unwrap_or(&self.fallback)
    }
}

impl ModelProvider for RoutingProvider {
    fn load(&self, entry: &CatalogEntry, device: Device) -> Result<LoadedModel> {
        self.provider_for(entry.capability).load(entry, device)
    }

    fn reclaim(&self, capability: Capability, device: Device) {
        self.provider_for(capability).reclaim(capability, device);
    }
}
