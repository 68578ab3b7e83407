use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowSpeakError {
    // Request input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Model loading
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Invalid model config: {0}")]
    ModelConfig(String),

    // Tokenization
    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    // Forward pass
    #[error("Inference failed: {0}")]
    Inference(String),

    // Network/Download
    #[error("Download failed: {0}")]
    Download(String),

    #[error("File not found on the Hub: {0}")]
    RemoteFileMissing(String),

    // Device
    #[error("Device error: {0}")]
    Device(String),

    // Pass-through from dependencies
    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlowSpeakError>;

impl FlowSpeakError {
    /// Stable machine-readable name used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowSpeakError::InvalidInput(_) => "invalid_input",
            FlowSpeakError::ModelUnavailable(_) | FlowSpeakError::ModelConfig(_) => {
                "model_unavailable"
            }
            FlowSpeakError::Tokenization(_) => "tokenization_failed",
            FlowSpeakError::Inference(_) | FlowSpeakError::Candle(_) => "inference_failed",
            FlowSpeakError::Download(_) | FlowSpeakError::RemoteFileMissing(_) => {
                "download_failed"
            }
            FlowSpeakError::Device(_) => "device_error",
            FlowSpeakError::Io(_) => "io_error",
            FlowSpeakError::SerdeJson(_) => "serialization_error",
        }
    }
}

impl From<hf_hub::api::tokio::ApiError> for FlowSpeakError {
    fn from(value: hf_hub::api::tokio::ApiError) -> Self {
        FlowSpeakError::Download(value.to_string())
    }
}

impl From<tokenizers::Error> for FlowSpeakError {
    fn from(value: tokenizers::Error) -> Self {
        FlowSpeakError::Tokenization(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_group_model_failures() {
        assert_eq!(
            FlowSpeakError::ModelConfig("bad".into()).kind(),
            FlowSpeakError::ModelUnavailable("gone".into()).kind()
        );
        assert_eq!(
            FlowSpeakError::InvalidInput("x".into()).kind(),
            "invalid_input"
        );
        assert_eq!(
            FlowSpeakError::RemoteFileMissing("a/b@main".into()).kind(),
            "download_failed"
        );
    }

    #[test]
    fn tokenizer_errors_become_tokenization() {
        let err: tokenizers::Error = "boom".into();
        let err = FlowSpeakError::from(err);
        assert!(matches!(err, FlowSpeakError::Tokenization(ref m) if m == "boom"));
    }
}
