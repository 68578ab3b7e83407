//! Model provisioning binary
//!
//! Downloads a pretrained masked language model and its tokenizer into the
//! directory the server loads from. Run once before starting the server.
//! Usage: cargo run --bin provision -- --model-id google/bert_uncased_L-12_H-768_A-12 --output ./local_bert

use anyhow::Context;
use clap::Parser;
use tracing::info;

use flowspeak::config::ProvisionConfig;
use flowspeak::provision::Provisioner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowspeak=info,provision=info".into()),
        )
        .init();

    let args = ProvisionConfig::parse();
    let files = Provisioner::new(&args.model_id)
        .revision(&args.revision)
        .output_dir(&args.output)
        .lowercase(!args.cased)
        .run()
        .await
        .with_context(|| format!("failed to provision {}", args.model_id))?;

    info!(
        config = %files.config.display(),
        tokenizer = %files.tokenizer.display(),
        weights = %files.weights.display(),
        "done"
    );
    Ok(())
}
