pub mod generation;

pub use crate::models::GenerationParams;
pub use generation::{GenerationStage, DEFAULT_MAX_LENGTH};
