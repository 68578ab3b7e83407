//! Command line configuration for the two binaries.
//!
//! Defaults reproduce the fixed deployment: serve on `0.0.0.0:5500` from the
//! model provisioned into `./local_bert`.

use clap::Parser;
use std::path::PathBuf;

use crate::provision::{DEFAULT_MODEL_DIR, DEFAULT_MODEL_ID, DEFAULT_REVISION};
use crate::speech::DEFAULT_TOP_K;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5500;

#[derive(Parser, Debug, Clone)]
#[command(name = "flowspeak-server")]
#[command(about = "Serve next-word suggestions from a local masked language model")]
pub struct ServerConfig {
    /// Interface to bind
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory written by the provision binary
    #[arg(short, long, default_value = DEFAULT_MODEL_DIR)]
    pub model_dir: PathBuf,

    /// Candidates considered per prediction
    #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    /// Force CPU inference even if CUDA is available
    #[arg(long)]
    pub cpu: bool,

    /// HTTP worker threads (defaults to the number of physical cores)
    #[arg(long)]
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            top_k: DEFAULT_TOP_K,
            cpu: false,
            workers: None,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "provision")]
#[command(about = "Download a pretrained masked language model into a local directory")]
pub struct ProvisionConfig {
    /// Hugging Face model repository
    #[arg(long, default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    /// Git revision (branch, tag, commit hash)
    #[arg(long, default_value = DEFAULT_REVISION)]
    pub revision: String,

    /// Output directory for config, weights and tokenizer
    #[arg(short, long, default_value = DEFAULT_MODEL_DIR)]
    pub output: PathBuf,

    /// Keep case when generating a tokenizer from vocab.txt
    #[arg(long)]
    pub cased: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults_match_fixed_deployment() {
        let parsed = ServerConfig::try_parse_from(["flowspeak-server"]).unwrap();
        let default = ServerConfig::default();
        assert_eq!(parsed.host, default.host);
        assert_eq!(parsed.port, 5500);
        assert_eq!(parsed.model_dir, PathBuf::from("./local_bert"));
        assert_eq!(parsed.top_k, 5);
        assert!(!parsed.cpu);
    }

    #[test]
    fn server_flags_override_defaults() {
        let parsed = ServerConfig::try_parse_from([
            "flowspeak-server",
            "--port",
            "8080",
            "--model-dir",
            "/models/bert",
            "-k",
            "3",
            "--cpu",
        ])
        .unwrap();
        assert_eq!(parsed.port, 8080);
        assert_eq!(parsed.model_dir, PathBuf::from("/models/bert"));
        assert_eq!(parsed.top_k, 3);
        assert!(parsed.cpu);
    }

    #[test]
    fn provision_defaults() {
        let parsed = ProvisionConfig::try_parse_from(["provision"]).unwrap();
        assert_eq!(parsed.model_id, DEFAULT_MODEL_ID);
        assert_eq!(parsed.revision, "main");
        assert!(!parsed.cased);
    }
}
