pub mod config;
pub mod error;
pub mod loaders;
pub mod models;
pub mod pipelines;
pub mod provision;
pub mod server;
pub mod speech;

// Re-export the types most callers need
pub use error::{FlowSpeakError, Result};
pub use pipelines::fill_mask::{FillMaskPipeline, FillMaskPipelineBuilder, FillMaskPrediction};
pub use speech::{suggest, MaskFiller, SpeechRequest, SpeechSuggestions};
