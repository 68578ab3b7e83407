//! BERT encoder with a masked language modeling head.
//!
//! Covers the original BERT checkpoints published on the Hugging Face Hub
//! (e.g. `google/bert_uncased_L-12_H-768_A-12`, `bert-base-uncased`):
//! - Learned absolute position and token type embeddings
//! - Post-norm transformer layers with full bidirectional attention
//! - MLM prediction head whose decoder is tied to the word embeddings
//!
//! Older checkpoints name their layer-norm parameters `gamma`/`beta` and some
//! omit the `bert.` prefix; both layouts load.

use candle_core::{DType, Device, IndexOp, Result, Tensor, D};
use candle_nn::{
    embedding, linear, ops::softmax, Embedding, LayerNorm, Linear, Module, VarBuilder,
};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HiddenAct {
    #[default]
    Gelu,
    GeluNew,
    GeluPytorchTanh,
    Relu,
}

impl HiddenAct {
    fn apply(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            HiddenAct::Gelu => xs.gelu_erf(),
            HiddenAct::GeluNew | HiddenAct::GeluPytorchTanh => xs.gelu(),
            HiddenAct::Relu => xs.relu(),
        }
    }
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

fn default_type_vocab_size() -> usize {
    2
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    #[serde(default)]
    pub hidden_act: HiddenAct,
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
}

/// Layer norm that accepts both `weight`/`bias` and the legacy `gamma`/`beta` names.
fn bert_layer_norm(size: usize, eps: f64, vb: VarBuilder) -> Result<LayerNorm> {
    let (weight, bias) = match (vb.get(size, "weight"), vb.get(size, "bias")) {
        (Ok(weight), Ok(bias)) => (weight, bias),
        (Err(err), _) | (_, Err(err)) => {
            if let (Ok(weight), Ok(bias)) = (vb.get(size, "gamma"), vb.get(size, "beta")) {
                (weight, bias)
            } else {
                return Err(err);
            }
        }
    };
    Ok(LayerNorm::new(weight, bias, eps))
}

#[derive(Debug, Clone)]
struct Embeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    token_type_embeddings: Embedding,
    layer_norm: LayerNorm,
    span: tracing::Span,
}

impl Embeddings {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let word_embeddings = embedding(
            config.vocab_size,
            config.hidden_size,
            vb.pp("word_embeddings"),
        )?;
        let position_embeddings = embedding(
            config.max_position_embeddings,
            config.hidden_size,
            vb.pp("position_embeddings"),
        )?;
        let token_type_embeddings = embedding(
            config.type_vocab_size,
            config.hidden_size,
            vb.pp("token_type_embeddings"),
        )?;
        let layer_norm =
            bert_layer_norm(config.hidden_size, config.layer_norm_eps, vb.pp("LayerNorm"))?;

        Ok(Self {
            word_embeddings,
            position_embeddings,
            token_type_embeddings,
            layer_norm,
            span: tracing::span!(tracing::Level::TRACE, "embeddings"),
        })
    }

    fn forward(&self, input_ids: &Tensor, token_type_ids: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();
        let (_batch, seq_len) = input_ids.dims2()?;
        let position_ids =
            Tensor::arange(0u32, seq_len as u32, input_ids.device())?.unsqueeze(0)?;

        let words = self.word_embeddings.forward(input_ids)?;
        let positions = self.position_embeddings.forward(&position_ids)?;
        let token_types = self.token_type_embeddings.forward(token_type_ids)?;

        words
            .broadcast_add(&positions)?
            .add(&token_types)?
            .apply(&self.layer_norm)
    }
}

/// Multi-head self attention followed by the residual output projection.
#[derive(Debug, Clone)]
struct Attention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    output_norm: LayerNorm,
    num_attention_heads: usize,
    attention_head_size: usize,
    span: tracing::Span,
}

impl Attention {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let hidden = config.hidden_size;
        let query = linear(hidden, hidden, vb.pp("self.query"))?;
        let key = linear(hidden, hidden, vb.pp("self.key"))?;
        let value = linear(hidden, hidden, vb.pp("self.value"))?;
        let output = linear(hidden, hidden, vb.pp("output.dense"))?;
        let output_norm =
            bert_layer_norm(hidden, config.layer_norm_eps, vb.pp("output.LayerNorm"))?;

        Ok(Self {
            query,
            key,
            value,
            output,
            output_norm,
            num_attention_heads: config.num_attention_heads,
            attention_head_size: hidden / config.num_attention_heads,
            span: tracing::span!(tracing::Level::TRACE, "attn"),
        })
    }

    fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = xs.dims3()?;
        xs.reshape((
            batch,
            seq_len,
            self.num_attention_heads,
            self.attention_head_size,
        ))?
        .transpose(1, 2)?
        .contiguous()
    }

    fn forward(&self, hidden_states: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();
        let (batch, seq_len, hidden_size) = hidden_states.dims3()?;

        let q = self.split_heads(&hidden_states.apply(&self.query)?)?;
        let k = self.split_heads(&hidden_states.apply(&self.key)?)?;
        let v = self.split_heads(&hidden_states.apply(&self.value)?)?;

        let scale = (self.attention_head_size as f64).powf(-0.5);
        let scores = (q.matmul(&k.t()?)? * scale)?;
        let scores = scores.broadcast_add(attention_mask)?;
        let probs = softmax(&scores, D::Minus1)?;

        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq_len, hidden_size))?;

        let projected = context.apply(&self.output)?;
        (projected + hidden_states)?.apply(&self.output_norm)
    }
}

/// Intermediate expansion and output projection of a BERT layer.
#[derive(Debug, Clone)]
struct FeedForward {
    intermediate: Linear,
    output: Linear,
    output_norm: LayerNorm,
    act: HiddenAct,
    span: tracing::Span,
}

impl FeedForward {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let intermediate = linear(
            config.hidden_size,
            config.intermediate_size,
            vb.pp("intermediate.dense"),
        )?;
        let output = linear(
            config.intermediate_size,
            config.hidden_size,
            vb.pp("output.dense"),
        )?;
        let output_norm = bert_layer_norm(
            config.hidden_size,
            config.layer_norm_eps,
            vb.pp("output.LayerNorm"),
        )?;
        Ok(Self {
            intermediate,
            output,
            output_norm,
            act: config.hidden_act,
            span: tracing::span!(tracing::Level::TRACE, "mlp"),
        })
    }
}

impl Module for FeedForward {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();
        let hidden = self.act.apply(&xs.apply(&self.intermediate)?)?;
        (hidden.apply(&self.output)? + xs)?.apply(&self.output_norm)
    }
}

#[derive(Debug, Clone)]
struct TransformerLayer {
    attention: Attention,
    feed_forward: FeedForward,
}

impl TransformerLayer {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let attention = Attention::load(vb.pp("attention"), config)?;
        let feed_forward = FeedForward::load(vb.clone(), config)?;
        Ok(Self {
            attention,
            feed_forward,
        })
    }

    fn forward(&self, hidden_states: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        self.attention
            .forward(hidden_states, attention_mask)?
            .apply(&self.feed_forward)
    }
}

/// Prediction head mapping hidden states back onto the vocabulary.
#[derive(Debug, Clone)]
struct MaskedLMHead {
    dense: Linear,
    norm: LayerNorm,
    decoder: Linear,
    act: HiddenAct,
}

impl MaskedLMHead {
    fn load(vb: VarBuilder, config: &Config, word_embeddings: &Embedding) -> Result<Self> {
        let transform = vb.pp("transform");
        let dense = linear(config.hidden_size, config.hidden_size, transform.pp("dense"))?;
        let norm = bert_layer_norm(
            config.hidden_size,
            config.layer_norm_eps,
            transform.pp("LayerNorm"),
        )?;

        // Untied checkpoints carry their own decoder matrix.
        let decoder_weights = match vb.get(
            (config.vocab_size, config.hidden_size),
            "decoder.weight",
        ) {
            Ok(weights) => weights,
            Err(_) => word_embeddings.embeddings().clone(),
        };
        let decoder_bias = vb
            .get(config.vocab_size, "bias")
            .or_else(|_| vb.get(config.vocab_size, "decoder.bias"))?;
        let decoder = Linear::new(decoder_weights, Some(decoder_bias));

        Ok(Self {
            dense,
            norm,
            decoder,
            act: config.hidden_act,
        })
    }

    fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        let transformed = self.act.apply(&hidden_states.apply(&self.dense)?)?;
        transformed.apply(&self.norm)?.apply(&self.decoder)
    }
}

/// BERT with the masked language modeling head, producing vocabulary logits
/// for every input position.
#[derive(Debug, Clone)]
pub struct BertForMaskedLM {
    embeddings: Embeddings,
    layers: Vec<TransformerLayer>,
    head: MaskedLMHead,
    max_position_embeddings: usize,
    device: Device,
    dtype: DType,
    span: tracing::Span,
}

impl BertForMaskedLM {
    pub fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let encoder_vb = if vb.contains_tensor("bert.embeddings.word_embeddings.weight") {
            vb.pp("bert")
        } else {
            vb.clone()
        };

        let embeddings = Embeddings::load(encoder_vb.pp("embeddings"), config)?;
        let layers = (0..config.num_hidden_layers)
            .map(|i| TransformerLayer::load(encoder_vb.pp(format!("encoder.layer.{i}")), config))
            .collect::<Result<Vec<_>>>()?;
        let head = MaskedLMHead::load(
            vb.pp("cls.predictions"),
            config,
            &embeddings.word_embeddings,
        )?;

        Ok(Self {
            embeddings,
            layers,
            head,
            max_position_embeddings: config.max_position_embeddings,
            device: vb.device().clone(),
            dtype: vb.dtype(),
            span: tracing::span!(tracing::Level::TRACE, "model"),
        })
    }

    /// Converts a `(batch, seq_len)` 0/1 mask into additive attention biases.
    fn extended_attention_mask(&self, attention_mask: &Tensor) -> Result<Tensor> {
        let (batch, seq_len) = attention_mask.dims2()?;
        attention_mask
            .to_dtype(self.dtype)?
            .affine(-1.0, 1.0)?
            .affine(f32::MIN as f64, 0.0)?
            .reshape((batch, 1, 1, seq_len))
    }

    /// Returns logits of shape `(batch, seq_len, vocab_size)`.
    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();
        let token_type_ids = input_ids.zeros_like()?;
        let mask = self.extended_attention_mask(attention_mask)?;

        let mut hidden_states = self.embeddings.forward(input_ids, &token_type_ids)?;
        for layer in &self.layers {
            hidden_states = layer.forward(&hidden_states, &mask)?;
        }
        self.head.forward(&hidden_states)
    }

    /// Softmax probabilities over the vocabulary at a single position of the
    /// first sequence in the batch.
    pub fn position_probabilities(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        position: usize,
    ) -> Result<Vec<f32>> {
        let logits = self.forward(input_ids, attention_mask)?;
        let logits = logits.i((0, position, ..))?.to_dtype(DType::F32)?;
        softmax(&logits, D::Minus1)?.to_vec1::<f32>()
    }

    pub fn max_position_embeddings(&self) -> usize {
        self.max_position_embeddings
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            num_layers: self.layers.len(),
            device: self.device.clone(),
            dtype: self.dtype,
        }
    }
}

/// Model information structure.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub num_layers: usize,
    pub device: Device,
    pub dtype: DType,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn tiny_config(vocab_size: usize) -> Config {
        Config {
            vocab_size,
            hidden_size: 8,
            num_hidden_layers: 2,
            num_attention_heads: 2,
            intermediate_size: 16,
            hidden_act: HiddenAct::Gelu,
            max_position_embeddings: 16,
            type_vocab_size: 2,
            layer_norm_eps: 1e-12,
        }
    }

    #[test]
    fn config_defaults_fill_optional_fields() {
        let config: Config = serde_json::from_str(
            r#"{
                "vocab_size": 30522,
                "hidden_size": 768,
                "num_hidden_layers": 12,
                "num_attention_heads": 12,
                "intermediate_size": 3072,
                "max_position_embeddings": 512
            }"#,
        )
        .unwrap();
        assert_eq!(config.hidden_act, HiddenAct::Gelu);
        assert_eq!(config.type_vocab_size, 2);
        assert_eq!(config.layer_norm_eps, 1e-12);
    }

    #[test]
    fn config_reads_activation_names() {
        let config: Config = serde_json::from_str(
            r#"{
                "vocab_size": 10,
                "hidden_size": 8,
                "num_hidden_layers": 1,
                "num_attention_heads": 2,
                "intermediate_size": 16,
                "hidden_act": "gelu_new",
                "max_position_embeddings": 16
            }"#,
        )
        .unwrap();
        assert_eq!(config.hidden_act, HiddenAct::GeluNew);
    }

    #[test]
    fn forward_produces_vocab_logits_per_position() -> Result<()> {
        let device = Device::Cpu;
        let config = tiny_config(12);
        let vb = VarBuilder::zeros(DType::F32, &device);
        let model = BertForMaskedLM::load(vb, &config)?;
        let info = model.info();
        assert_eq!(info.num_layers, 2);
        assert!(info.device.is_cpu());
        assert_eq!(info.dtype, DType::F32);

        let input_ids = Tensor::new(&[2u32, 5, 6, 4, 3], &device)?.unsqueeze(0)?;
        let attention_mask = Tensor::new(&[1u32, 1, 1, 1, 1], &device)?.unsqueeze(0)?;
        let logits = model.forward(&input_ids, &attention_mask)?;
        assert_eq!(logits.dims(), &[1, 5, 12]);

        let probs = model.position_probabilities(&input_ids, &attention_mask, 3)?;
        assert_eq!(probs.len(), 12);
        let total: f32 = probs.iter().sum();
        approx::assert_abs_diff_eq!(total, 1.0, epsilon = 1e-4);
        Ok(())
    }
}
