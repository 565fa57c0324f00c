//! Radio Source Library
//!
//! This crate owns everything between the SDR driver and the detector
//! stages: the driver contract, the double-mapped ring buffer, and the
//! producer/consumer source adapter that runs the resampling pipeline.

pub mod driver;
pub mod ring_buffer;
pub mod source;

use thiserror::Error;

/// Errors for the radio source and its collaborators
#[derive(Error, Debug)]
pub enum RadioError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("ring buffer mapping failed: {0}")]
    BufferMap(#[from] std::io::Error),

    #[error("source is not open")]
    NotOpen,

    #[error("streaming stopped")]
    Shutdown,
}

pub use driver::{SdrDriver, SimDriver};
pub use ring_buffer::MagicBuffer;
pub use source::SampleSource;
