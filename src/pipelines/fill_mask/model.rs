use candle_core::Device;
use tokenizers::Tokenizer;

use super::pipeline::FillMaskPrediction;
use crate::error::Result;

pub trait FillMaskModel {
    type Options: std::fmt::Debug + Clone;

    fn new(options: Self::Options, device: Device) -> Result<Self>
    where
        Self: Sized;

    /// Return the top-k token predictions for the single `[MASK]` in `text`,
    /// ordered by descending probability.
    fn predict_top_k(
        &self,
        tokenizer: &Tokenizer,
        text: &str,
        k: usize,
    ) -> Result<Vec<FillMaskPrediction>>;

    fn get_tokenizer(options: Self::Options) -> Result<Tokenizer>;

    fn device(&self) -> &Device;
}
