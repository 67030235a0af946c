//! Protocol Stack Layers Library
//!
//! NR MAC shared channel resource allocation.

pub mod mac;

use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Slot {slot} out of range, frame has {slots_per_frame} slots")]
    InvalidSlot { slot: u32, slots_per_frame: u32 },
}
