//! DSP Pipeline Library
//!
//! Implements the arithmetic core of the GSM scanner: the two-stage
//! rational resampler that brings the native SDR rate down to the GSM
//! symbol rate, plus test-signal synthesis and a terminal spectrum
//! analyser for visual debugging.

mod coeffs;
pub mod resampler;
pub mod spectrum;
pub mod synth;

pub use resampler::TwoStageResampler;
pub use synth::{multi_tone, ToneGenerator, ToneSpec};
