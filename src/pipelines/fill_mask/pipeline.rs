use super::model::FillMaskModel;
use crate::error::{FlowSpeakError, Result};
use serde::Serialize;
use tokenizers::Tokenizer;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FillMaskPrediction {
    pub word: String,
    pub score: f32,
}

pub struct FillMaskPipeline<M: FillMaskModel> {
    pub(crate) model: M,
    pub(crate) tokenizer: Tokenizer,
}

impl<M: FillMaskModel> FillMaskPipeline<M> {
    pub fn new(model: M, tokenizer: Tokenizer) -> Self {
        Self { model, tokenizer }
    }

    /// Return the top prediction for the masked token
    pub fn predict(&self, text: &str) -> Result<FillMaskPrediction> {
        let predictions = self.predict_top_k(text, 1)?;
        predictions
            .into_iter()
            .next()
            .ok_or_else(|| FlowSpeakError::Inference("No predictions returned".to_string()))
    }

    /// Return top-k predictions with scores for ranking/choice
    pub fn predict_top_k(&self, text: &str, k: usize) -> Result<Vec<FillMaskPrediction>> {
        self.model.predict_top_k(&self.tokenizer, text, k)
    }

    pub fn device(&self) -> &candle_core::Device {
        self.model.device()
    }
}
