//! Model artifact loading for the local model directory and the Hugging Face Hub.
//!
//! ## Main Types
//!
//! - [`HfLoader`] - Fetches a single file from a Hub repository with retry logic
//! - [`ModelFiles`] - Resolves the config, tokenizer and weights inside a model directory
//! - [`TokenizerLoader`] - Loads a `tokenizer.json` and checks it knows the mask token
//!
//! The provisioner uses [`HfLoader`] to populate a model directory once; the
//! server only ever reads that directory through [`ModelFiles`].

use hf_hub::api::tokio::ApiBuilder;
use hf_hub::{Repo, RepoType};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokenizers::Tokenizer;

use crate::error::{FlowSpeakError, Result};

pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const VOCAB_FILE: &str = "vocab.txt";
pub const SAFETENSORS_FILE: &str = "model.safetensors";
pub const PYTORCH_FILE: &str = "pytorch_model.bin";

/// Weight files in order of preference.
pub const WEIGHT_FILES: [&str; 2] = [SAFETENSORS_FILE, PYTORCH_FILE];

/// Retries after the first attempt when the Hub cache lock is busy.
pub const MAX_DOWNLOAD_RETRIES: u32 = 3;

/// What to do after a failed Hub download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Try again after the delay.
    Retry(Duration),
    /// The repository does not have the file.
    Missing,
    Fail,
}

/// Decides how to handle the `failures`-th failed attempt (1-based).
///
/// Only cache lock contention is retried, with the delay doubling from 200ms.
pub fn classify_download_error(error_msg: &str, failures: u32) -> DownloadOutcome {
    if error_msg.contains("Lock acquisition failed") {
        if failures <= MAX_DOWNLOAD_RETRIES {
            return DownloadOutcome::Retry(Duration::from_millis(100 << failures));
        }
        DownloadOutcome::Fail
    } else if error_msg.contains("404 Not Found") {
        DownloadOutcome::Missing
    } else {
        DownloadOutcome::Fail
    }
}

/// Turns a missing remote file into `None` so callers can fall back.
/// Every other error is kept.
pub fn missing_as_none<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(FlowSpeakError::RemoteFileMissing(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone)]
pub struct HfLoader {
    pub repo: String,
    pub revision: String,
    pub filename: String,
}

impl HfLoader {
    pub fn new(repo: &str, revision: &str, filename: &str) -> Self {
        Self {
            repo: repo.into(),
            revision: revision.into(),
            filename: filename.into(),
        }
    }

    /// Downloads the file into the local Hub cache and returns its path.
    pub async fn load(&self) -> Result<PathBuf> {
        let hf_api = ApiBuilder::new().build()?;
        let hf_repo = hf_api.repo(Repo::with_revision(
            self.repo.clone(),
            RepoType::Model,
            self.revision.clone(),
        ));

        let mut failures = 0;
        loop {
            match hf_repo.get(self.filename.as_str()).await {
                Ok(path) => return Ok(path),
                Err(e) => {
                    let error_msg = e.to_string();
                    failures += 1;
                    let target = format!("{}/{}@{}", self.repo, self.filename, self.revision);
                    match classify_download_error(&error_msg, failures) {
                        DownloadOutcome::Retry(wait_time) => {
                            tracing::warn!(
                                file = %self.filename,
                                attempt = failures,
                                "hub lock busy, retrying in {wait_time:?}"
                            );
                            tokio::time::sleep(wait_time).await;
                        }
                        DownloadOutcome::Missing => {
                            return Err(FlowSpeakError::RemoteFileMissing(target));
                        }
                        DownloadOutcome::Fail => {
                            return Err(FlowSpeakError::Download(format!(
                                "{target}: {error_msg}"
                            )));
                        }
                    }
                }
            }
        }
    }
}

/// Paths of the artifacts making up a provisioned model directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

impl ModelFiles {
    /// Locates the artifacts inside `dir`.
    ///
    /// Safetensors weights are preferred over a PyTorch pickle when both exist.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(FlowSpeakError::ModelUnavailable(format!(
                "model directory {} does not exist; run the provision binary first",
                dir.display()
            )));
        }

        let config = required_file(dir, CONFIG_FILE)?;
        let tokenizer = required_file(dir, TOKENIZER_FILE)?;
        let weights = WEIGHT_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
            .ok_or_else(|| {
                FlowSpeakError::ModelUnavailable(format!(
                    "no model weights in {}. Expected `{SAFETENSORS_FILE}` or `{PYTORCH_FILE}`",
                    dir.display()
                ))
            })?;

        Ok(Self {
            config,
            tokenizer,
            weights,
        })
    }

    pub fn is_safetensors(&self) -> bool {
        self.weights
            .extension()
            .is_some_and(|ext| ext == "safetensors")
    }
}

fn required_file(dir: &Path, name: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    if path.is_file() {
        Ok(path)
    } else {
        Err(FlowSpeakError::ModelUnavailable(format!(
            "missing {name} in {}",
            dir.display()
        )))
    }
}

#[derive(Debug, Clone)]
pub struct TokenizerLoader {
    pub tokenizer_file: PathBuf,
    pub mask_token: String,
}

impl TokenizerLoader {
    pub fn new(tokenizer_file: impl Into<PathBuf>, mask_token: &str) -> Self {
        Self {
            tokenizer_file: tokenizer_file.into(),
            mask_token: mask_token.into(),
        }
    }

    pub fn load(&self) -> Result<Tokenizer> {
        let tokenizer = Tokenizer::from_file(&self.tokenizer_file).map_err(|e| {
            FlowSpeakError::ModelUnavailable(format!(
                "failed to load tokenizer from {:?}: {e}",
                self.tokenizer_file
            ))
        })?;

        if tokenizer.token_to_id(&self.mask_token).is_none() {
            return Err(FlowSpeakError::ModelUnavailable(format!(
                "tokenizer {:?} has no `{}` token",
                self.tokenizer_file, self.mask_token
            )));
        }

        Ok(tokenizer)
    }
}
