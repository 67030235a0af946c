//! Shared RNTI, numerology and duplex types plus small integer helpers.

pub mod types;
pub mod utils;

// Re-export commonly used items
pub use types::*;
pub use utils::*;
