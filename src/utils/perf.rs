//! Turn timing utilities

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// A simple stopwatch for measuring elapsed time
#[derive(Debug)]
pub struct Stopwatch {
    start: Instant,
    lap_start: Instant,
}

impl Stopwatch {
    /// Start a new stopwatch
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            lap_start: now,
        }
    }

    /// Time since the previous lap, in milliseconds, and start a new lap
    pub fn lap_ms(&mut self) -> u64 {
        let now = Instant::now();
        let lap = now.duration_since(self.lap_start);
        self.lap_start = now;
        lap.as_millis() as u64
    }

    /// Get the elapsed time since start
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }
}

/// Wall-clock time spent in each stage of one turn
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnTimings {
    /// Transcription time (ms), absent for typed prompts
    pub transcription_ms: Option<u64>,

    /// Generation time (ms)
    pub generation_ms: Option<u64>,

    /// Synthesis time (ms), absent when speech is off
    pub synthesis_ms: Option<u64>,

    /// Session and file writes (ms)
    pub persist_ms: Option<u64>,

    /// Whole turn (ms)
    pub total_ms: u64,
}

impl TurnTimings {
    /// Sum of the model stages, leaving out persistence
    pub fn model_ms(&self) -> u64 {
        [self.transcription_ms, self.generation_ms, self.synthesis_ms]
            .iter()
            .flatten()
            .sum()
    }

    /// Generate a timing summary string
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if let Some(stt) = self.transcription_ms {
            parts.push(format!("STT: {}ms", stt));
        }
        if let Some(llm) = self.generation_ms {
            parts.push(format!("LLM: {}ms", llm));
        }
        if let Some(tts) = self.synthesis_ms {
            parts.push(format!("TTS: {}ms", tts));
        }
        if let Some(persist) = self.persist_ms {
            parts.push(format!("Save: {}ms", persist));
        }
        parts.push(format!("Total: {}ms", self.total_ms));

        parts.join(" | ")
    }
}
