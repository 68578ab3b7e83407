//! Fill-mask pipeline for predicting masked tokens in text.
//!
//! This module provides ranked predictions for a single masked token
//! (`[MASK]`) in a text sequence using a pre-trained masked language model.
//! The speech suggestion service calls it once for the next word and once
//! more per candidate to build two-word combinations.
//!
//! ## Main Types
//!
//! - [`FillMaskPipeline`] - High-level interface for mask filling
//! - [`FillMaskPipelineBuilder`] - Builder pattern for pipeline configuration
//! - [`FillMaskModel`] - Trait for fill-mask model implementations
//! - [`FillMaskPrediction`] - A candidate token with its probability
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use flowspeak::pipelines::fill_mask::*;
//!
//! fn main() -> flowspeak::error::Result<()> {
//!     let pipeline = FillMaskPipelineBuilder::bert("./local_bert").cpu().build()?;
//!
//!     let top = pipeline.predict("I went to the [MASK].")?;
//!     println!("Token: {} (score: {:.3})", top.word, top.score);
//!
//!     let top5 = pipeline.predict_top_k("I went to the [MASK].", 5)?;
//!     println!("Got {} candidates", top5.len());
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod model;
pub mod pipeline;

pub use builder::FillMaskPipelineBuilder;
pub use model::FillMaskModel;
pub use pipeline::{FillMaskPipeline, FillMaskPrediction};

pub use crate::models::implementations::bert::{BertOptions, FillMaskBertModel};

/// Placeholder the tokenizer recognizes as the position to predict.
pub const MASK_TOKEN: &str = "[MASK]";
