// Pipeline modules organized by functionality
pub mod fill_mask;
pub mod utils;

pub use fill_mask::*;
