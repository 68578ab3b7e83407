pub mod bert;
pub mod implementations;

pub use bert::{BertForMaskedLM, Config as BertConfig, HiddenAct, ModelInfo};
pub use implementations::{BertOptions, FillMaskBertModel};
