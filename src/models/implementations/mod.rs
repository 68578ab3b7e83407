pub mod bert;

pub use bert::{BertOptions, FillMaskBertModel};
