use std::path::PathBuf;

use super::model::FillMaskModel;
use super::pipeline::FillMaskPipeline;
use crate::error::Result;
use crate::models::implementations::bert::{BertOptions, FillMaskBertModel};
use crate::pipelines::utils::DeviceRequest;

pub struct FillMaskPipelineBuilder<M: FillMaskModel> {
    options: M::Options,
    device_request: DeviceRequest,
}

impl<M: FillMaskModel> FillMaskPipelineBuilder<M> {
    pub fn new(options: M::Options) -> Self {
        Self {
            options,
            device_request: DeviceRequest::Default,
        }
    }

    pub fn cpu(mut self) -> Self {
        self.device_request = DeviceRequest::Cpu;
        self
    }

    pub fn cuda_device(mut self, index: usize) -> Self {
        self.device_request = DeviceRequest::Cuda(index);
        self
    }

    pub fn device(mut self, device: candle_core::Device) -> Self {
        self.device_request = DeviceRequest::Explicit(device);
        self
    }

    /// Loads the model and tokenizer. This is the expensive step; build once
    /// and share the pipeline.
    pub fn build(self) -> Result<FillMaskPipeline<M>> {
        let device = self.device_request.resolve()?;
        tracing::debug!(options = ?self.options, ?device, "building fill-mask pipeline");
        let tokenizer = M::get_tokenizer(self.options.clone())?;
        let model = M::new(self.options, device)?;
        Ok(FillMaskPipeline { model, tokenizer })
    }
}

impl FillMaskPipelineBuilder<FillMaskBertModel> {
    /// Pipeline over a BERT checkpoint provisioned into `model_dir`.
    pub fn bert(model_dir: impl Into<PathBuf>) -> Self {
        Self::new(BertOptions::new(model_dir))
    }
}
