/*
Pipeline Implementations
*/

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use std::path::PathBuf;
use tokenizers::Tokenizer;

use crate::error::{FlowSpeakError, Result};
use crate::loaders::{ModelFiles, TokenizerLoader};
use crate::models::bert::{BertForMaskedLM, Config};
use crate::pipelines::fill_mask::{FillMaskModel, FillMaskPrediction, MASK_TOKEN};

/// Where a provisioned BERT checkpoint lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BertOptions {
    pub model_dir: PathBuf,
}

impl BertOptions {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }
}

impl std::fmt::Display for BertOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bert@{}", self.model_dir.display())
    }
}

/// Fill-mask model using BERT.
#[derive(Clone)]
pub struct FillMaskBertModel {
    model: BertForMaskedLM,
    device: Device,
}

impl FillMaskBertModel {
    pub fn new(options: BertOptions, device: Device) -> Result<Self> {
        let files = ModelFiles::from_dir(&options.model_dir)?;

        let config_content = std::fs::read_to_string(&files.config).map_err(|e| {
            FlowSpeakError::ModelUnavailable(format!(
                "Failed to read config file {:?}: {e}",
                files.config
            ))
        })?;
        let config: Config = serde_json::from_str(&config_content)
            .map_err(|e| FlowSpeakError::ModelConfig(format!("Failed to parse model config: {e}")))?;

        let dtype = DType::F32;
        let vb = if files.is_safetensors() {
            unsafe { VarBuilder::from_mmaped_safetensors(&[&files.weights], dtype, &device) }
        } else {
            VarBuilder::from_pth(&files.weights, dtype, &device)
        }
        .map_err(|e| {
            FlowSpeakError::ModelUnavailable(format!(
                "Failed to read weights {:?}: {e}",
                files.weights
            ))
        })?;

        let model = Self::from_var_builder(vb, &config).map_err(|e| {
            FlowSpeakError::ModelUnavailable(format!(
                "Failed to load weights from {:?}: {e}",
                files.weights
            ))
        })?;

        let info = model.model.info();
        tracing::info!(
            model = %options,
            layers = info.num_layers,
            device = ?info.device,
            dtype = ?info.dtype,
            vocab = config.vocab_size,
            "loaded BERT masked language model"
        );
        Ok(model)
    }

    pub fn from_var_builder(vb: VarBuilder, config: &Config) -> Result<Self> {
        let device = vb.device().clone();
        let model = BertForMaskedLM::load(vb, config)?;
        Ok(Self { model, device })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Locates the single mask position in the encoded ids.
    fn mask_position(ids: &[u32], mask_id: u32) -> Result<usize> {
        let mut positions = ids
            .iter()
            .enumerate()
            .filter(|&(_, &id)| id == mask_id)
            .map(|(i, _)| i);

        match (positions.next(), positions.next()) {
            (Some(index), None) => Ok(index),
            (None, _) => Err(FlowSpeakError::InvalidInput(format!(
                "No {MASK_TOKEN} token found in input"
            ))),
            (Some(_), Some(_)) => Err(FlowSpeakError::InvalidInput(format!(
                "Expected exactly one {MASK_TOKEN} token in input"
            ))),
        }
    }

    pub fn predict_top_k(
        &self,
        tokenizer: &Tokenizer,
        text: &str,
        k: usize,
    ) -> Result<Vec<FillMaskPrediction>> {
        if k == 0 {
            return Ok(vec![]);
        }

        let encoding = tokenizer.encode(text, true)?;
        let mask_id = tokenizer.token_to_id(MASK_TOKEN).ok_or_else(|| {
            FlowSpeakError::Tokenization(format!("Tokenizer has no {MASK_TOKEN} token"))
        })?;
        let ids = encoding.get_ids();
        let mask_index = Self::mask_position(ids, mask_id)?;

        let max_len = self.model.max_position_embeddings();
        if ids.len() > max_len {
            return Err(FlowSpeakError::InvalidInput(format!(
                "Input is {} tokens long, the model accepts at most {max_len}",
                ids.len()
            )));
        }

        let probs = Tensor::new(ids, &self.device)
            .and_then(|t| t.unsqueeze(0))
            .and_then(|input_ids| {
                let attention_mask =
                    Tensor::new(encoding.get_attention_mask(), &self.device)?.unsqueeze(0)?;
                self.model
                    .position_probabilities(&input_ids, &attention_mask, mask_index)
            })
            .map_err(|e| FlowSpeakError::Inference(e.to_string()))?;

        if probs.is_empty() {
            return Ok(vec![]);
        }

        // Stable sort keeps lower token ids first on equal probability.
        let mut idxs: Vec<usize> = (0..probs.len()).collect();
        idxs.sort_by(|&i, &j| probs[j].total_cmp(&probs[i]));
        idxs.truncate(k.min(idxs.len()));

        idxs.into_iter()
            .map(|idx| -> Result<FillMaskPrediction> {
                // Special tokens stay visible (e.g. `[SEP]`) so callers can filter them.
                let word = tokenizer.decode(&[idx as u32], false)?.trim().to_string();
                Ok(FillMaskPrediction {
                    word,
                    score: probs[idx],
                })
            })
            .collect()
    }

    pub fn get_tokenizer(options: BertOptions) -> Result<Tokenizer> {
        let files = ModelFiles::from_dir(&options.model_dir)?;
        TokenizerLoader::new(files.tokenizer, MASK_TOKEN).load()
    }
}

impl FillMaskModel for FillMaskBertModel {
    type Options = BertOptions;

    fn new(options: Self::Options, device: Device) -> Result<Self> {
        FillMaskBertModel::new(options, device)
    }

    fn predict_top_k(
        &self,
        tokenizer: &Tokenizer,
        text: &str,
        k: usize,
    ) -> Result<Vec<FillMaskPrediction>> {
        self.predict_top_k(tokenizer, text, k)
    }

    fn get_tokenizer(options: Self::Options) -> Result<Tokenizer> {
        Self::get_tokenizer(options)
    }

    fn device(&self) -> &Device {
        self.device()
    }
}
