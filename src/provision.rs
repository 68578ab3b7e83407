//! One-time provisioning of a pretrained masked language model.
//!
//! Fetches the config, weights and tokenizer of a BERT checkpoint from the
//! Hugging Face Hub and writes them into a local model directory which the
//! server loads at startup. Repositories that only publish a WordPiece
//! `vocab.txt` get a `tokenizer.json` generated from it.

use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

use crate::error::{FlowSpeakError, Result};
use crate::loaders::{
    missing_as_none, HfLoader, ModelFiles, TokenizerLoader, CONFIG_FILE, TOKENIZER_FILE,
    VOCAB_FILE, WEIGHT_FILES,
};
use crate::pipelines::fill_mask::MASK_TOKEN;

pub const DEFAULT_MODEL_ID: &str = "google/bert_uncased_L-12_H-768_A-12";
pub const DEFAULT_REVISION: &str = "main";
pub const DEFAULT_MODEL_DIR: &str = "./local_bert";

const PAD_TOKEN: &str = "[PAD]";
const UNK_TOKEN: &str = "[UNK]";
const CLS_TOKEN: &str = "[CLS]";
const SEP_TOKEN: &str = "[SEP]";

/// Builder-style description of what to fetch and where to put it.
#[derive(Debug, Clone)]
pub struct Provisioner {
    model_id: String,
    revision: String,
    output_dir: PathBuf,
    lowercase: bool,
}

impl Default for Provisioner {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_ID)
    }
}

impl Provisioner {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            revision: DEFAULT_REVISION.to_string(),
            output_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            lowercase: true,
        }
    }

    /// Sets the git revision (branch, tag, commit hash) to use.
    pub fn revision(mut self, rev: impl Into<String>) -> Self {
        self.revision = rev.into();
        self
    }

    /// Sets the directory the artifacts are written to.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Whether a tokenizer generated from `vocab.txt` lowercases its input.
    pub fn lowercase(mut self, lowercase: bool) -> Self {
        self.lowercase = lowercase;
        self
    }

    fn loader(&self, filename: &str) -> HfLoader {
        HfLoader::new(&self.model_id, &self.revision, filename)
    }

    /// Downloads everything and returns the resolved local files.
    pub async fn run(&self) -> Result<ModelFiles> {
        tracing::info!(
            model = %self.model_id,
            revision = %self.revision,
            dir = %self.output_dir.display(),
            "provisioning model"
        );
        std::fs::create_dir_all(&self.output_dir)?;

        let config = self.loader(CONFIG_FILE).load().await?;
        self.install(&config, CONFIG_FILE)?;

        self.fetch_weights().await?;
        self.fetch_tokenizer().await?;

        let files = ModelFiles::from_dir(&self.output_dir)?;
        // A tokenizer that cannot be loaded back would only fail at server startup.
        TokenizerLoader::new(&files.tokenizer, MASK_TOKEN).load()?;
        tracing::info!(weights = %files.weights.display(), "model provisioned");
        Ok(files)
    }

    /// Takes the first weight format the repository publishes. Only a missing
    /// file moves on to the next format.
    async fn fetch_weights(&self) -> Result<()> {
        for name in WEIGHT_FILES {
            match missing_as_none(self.loader(name).load().await)? {
                Some(path) => return self.install_weights(&path, name),
                None => tracing::debug!(file = name, "weights not published"),
            }
        }
        Err(FlowSpeakError::Download(format!(
            "Model weights not found in repo {}. Expected {}",
            self.model_id,
            WEIGHT_FILES.join(" or ")
        )))
    }

    async fn fetch_tokenizer(&self) -> Result<()> {
        match missing_as_none(self.loader(TOKENIZER_FILE).load().await)? {
            Some(path) => self.install(&path, TOKENIZER_FILE),
            None => {
                tracing::info!(
                    "no {TOKENIZER_FILE} published, building one from {VOCAB_FILE}"
                );
                let vocab_path = self.loader(VOCAB_FILE).load().await?;
                let vocab = std::fs::read_to_string(&vocab_path)?;
                let tokenizer_json = wordpiece_tokenizer_json(&vocab, self.lowercase)?;
                std::fs::write(
                    self.output_dir.join(TOKENIZER_FILE),
                    serde_json::to_string_pretty(&tokenizer_json)?,
                )?;
                Ok(())
            }
        }
    }

    /// Installs one weight file and removes any other format left by an
    /// earlier run, so the directory never mixes checkpoints.
    fn install_weights(&self, cached: &Path, name: &str) -> Result<()> {
        self.install(cached, name)?;
        for stale in WEIGHT_FILES.iter().filter(|&&other| other != name) {
            let path = self.output_dir.join(stale);
            if path.is_file() {
                std::fs::remove_file(&path)?;
                tracing::info!(file = %path.display(), "removed stale weights");
            }
        }
        Ok(())
    }

    fn install(&self, cached: &Path, name: &str) -> Result<()> {
        let target = self.output_dir.join(name);
        std::fs::copy(cached, &target)?;
        tracing::debug!(file = name, target = %target.display(), "installed");
        Ok(())
    }
}

fn special_token(content: &str, id: u32) -> Value {
    json!({
        "id": id,
        "content": content,
        "single_word": false,
        "lstrip": false,
        "rstrip": false,
        "normalized": false,
        "special": true,
    })
}

/// Serialized BERT WordPiece tokenizer built from the lines of a `vocab.txt`.
///
/// Special tokens are registered as non-normalized added tokens so `[MASK]`
/// survives lowercasing and punctuation splitting.
pub fn wordpiece_tokenizer_json(vocab: &str, lowercase: bool) -> Result<Value> {
    let mut tokens = Map::new();
    for (id, line) in vocab.lines().enumerate() {
        let token = line.trim_end_matches('\r');
        if token.is_empty() {
            continue;
        }
        tokens.insert(token.to_string(), json!(id as u32));
    }

    let id_of = |token: &str| -> Result<u32> {
        tokens
            .get(token)
            .and_then(Value::as_u64)
            .map(|id| id as u32)
            .ok_or_else(|| {
                FlowSpeakError::ModelConfig(format!("{VOCAB_FILE} has no `{token}` entry"))
            })
    };

    let specials = [PAD_TOKEN, UNK_TOKEN, CLS_TOKEN, SEP_TOKEN, MASK_TOKEN];
    let added_tokens = specials
        .iter()
        .copied()
        .map(|token| -> Result<Value> { Ok(special_token(token, id_of(token)?)) })
        .collect::<Result<Vec<_>>>()?;
    let cls_id = id_of(CLS_TOKEN)?;
    let sep_id = id_of(SEP_TOKEN)?;

    Ok(json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": added_tokens,
        "normalizer": {
            "type": "BertNormalizer",
            "clean_text": true,
            "handle_chinese_chars": true,
            "strip_accents": null,
            "lowercase": lowercase,
        },
        "pre_tokenizer": { "type": "BertPreTokenizer" },
        "post_processor": {
            "type": "BertProcessing",
            "sep": [SEP_TOKEN, sep_id],
            "cls": [CLS_TOKEN, cls_id],
        },
        "decoder": { "type": "WordPiece", "prefix": "##", "cleanup": true },
        "model": {
            "type": "WordPiece",
            "unk_token": UNK_TOKEN,
            "continuing_subword_prefix": "##",
            "max_input_chars_per_word": 100,
            "vocab": tokens,
        },
    }))
}

/// In-memory tokenizer equivalent to [`wordpiece_tokenizer_json`].
pub fn wordpiece_tokenizer(vocab: &str, lowercase: bool) -> Result<Tokenizer> {
    let tokenizer_json = wordpiece_tokenizer_json(vocab, lowercase)?;
    Ok(Tokenizer::from_bytes(serde_json::to_vec(&tokenizer_json)?)?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::loaders::{PYTORCH_FILE, SAFETENSORS_FILE};

    pub(crate) const TINY_VOCAB: &str =
        "[PAD]\n[UNK]\n[CLS]\n[SEP]\n[MASK]\ni\nwent\nto\nthe\nstore\npark\n##s\n.\n";

    pub(crate) fn tiny_tokenizer() -> Tokenizer {
        wordpiece_tokenizer(TINY_VOCAB, true).unwrap()
    }

    #[test]
    fn encodes_mask_as_single_token() {
        let tokenizer = tiny_tokenizer();
        let encoding = tokenizer.encode("I went to the [MASK]", true).unwrap();
        assert_eq!(encoding.get_ids(), &[2, 5, 6, 7, 8, 4, 3]);
    }

    #[test]
    fn lowercasing_can_be_disabled() {
        let tokenizer = wordpiece_tokenizer(TINY_VOCAB, false).unwrap();
        let encoding = tokenizer.encode("Store", false).unwrap();
        assert_eq!(encoding.get_ids(), &[1]);
    }

    #[test]
    fn decodes_subwords_and_specials_verbatim() {
        let tokenizer = tiny_tokenizer();
        assert_eq!(tokenizer.decode(&[9], false).unwrap(), "store");
        assert_eq!(tokenizer.decode(&[3], false).unwrap(), "[SEP]");
        assert_eq!(tokenizer.decode(&[11], false).unwrap(), "##s");
    }

    #[test]
    fn vocab_without_mask_is_rejected() {
        let err = wordpiece_tokenizer_json("[PAD]\n[UNK]\n[CLS]\n[SEP]\nthe\n", true).unwrap_err();
        assert!(err.to_string().contains(MASK_TOKEN));
    }

    #[test]
    fn windows_line_endings_are_tolerated() {
        let vocab = TINY_VOCAB.replace('\n', "\r\n");
        let tokenizer = wordpiece_tokenizer(&vocab, true).unwrap();
        assert_eq!(tokenizer.token_to_id("[MASK]"), Some(4));
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("flowspeak-provision-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn installing_weights_replaces_the_other_format() {
        let dir = scratch_dir("stale-weights");
        let output = dir.join("local_bert");
        std::fs::create_dir_all(&output).unwrap();
        std::fs::write(output.join(CONFIG_FILE), "{}").unwrap();
        std::fs::write(output.join(TOKENIZER_FILE), "{}").unwrap();
        std::fs::write(output.join(SAFETENSORS_FILE), b"old").unwrap();

        let cached = dir.join("cached.bin");
        std::fs::write(&cached, b"new").unwrap();
        let provisioner = Provisioner::default().output_dir(&output);
        provisioner.install_weights(&cached, PYTORCH_FILE).unwrap();

        assert!(!output.join(SAFETENSORS_FILE).exists());
        let files = ModelFiles::from_dir(&output).unwrap();
        assert_eq!(files.weights, output.join(PYTORCH_FILE));
        assert_eq!(std::fs::read(&files.weights).unwrap(), b"new");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn safetensors_are_tried_before_pickle() {
        assert_eq!(WEIGHT_FILES, [SAFETENSORS_FILE, PYTORCH_FILE]);
    }

    #[test]
    fn defaults_target_local_bert() {
        let provisioner = Provisioner::default();
        assert_eq!(provisioner.model_id, DEFAULT_MODEL_ID);
        assert_eq!(provisioner.output_dir, PathBuf::from(DEFAULT_MODEL_DIR));
        assert!(provisioner.lowercase);
    }
}
