//! Common Types for the GSM Scanner
//!
//! Defines the sample types and rate constants used throughout the
//! receive pipeline.

use num_complex::Complex32;
use serde::{Deserialize, Serialize};

/// Complex baseband sample (32-bit float I/Q pair)
pub type IqSample = Complex32;

/// Raw interleaved I/Q sample pair as delivered by the ADC (12-bit values
/// carried in int16)
pub type RawIq = [i16; 2];

/// Native hardware sample rate in Hz (AD936x configured rate)
pub const NATIVE_SAMPLE_RATE: u64 = 2_500_000;

/// Intermediate rate in Hz after the first decimation stage
pub const INTERMEDIATE_RATE: u64 = 500_000;

/// GSM symbol rate in Hz (13 MHz / 48 = 270 833.333... Hz)
pub const GSM_SYMBOL_RATE: f64 = 13_000_000.0 / 48.0;

/// Scale factor normalising a 12-bit ADC word to approximately [-1, 1]
pub const ADC_SCALE: f32 = 1.0 / 2048.0;

/// Receive gain in dB
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gain(pub f32);

impl Gain {
    /// Maximum hardware gain in dB
    pub const MAX_DB: f32 = 70.0;

    /// Create a new gain with validation
    pub fn new(db: f32) -> Option<Self> {
        if (0.0..=Self::MAX_DB).contains(&db) {
            Some(Self(db))
        } else {
            None
        }
    }

    /// Get the gain value in dB
    pub fn db(&self) -> f32 {
        self.0
    }
}

impl Default for Gain {
    fn default() -> Self {
        Self(40.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_validation() {
        assert!(Gain::new(0.0).is_some());
        assert!(Gain::new(70.0).is_some());
        assert!(Gain::new(70.1).is_none());
        assert!(Gain::new(-1.0).is_none());
    }

    #[test]
    fn test_rate_relationships() {
        assert_eq!(NATIVE_SAMPLE_RATE / 5, INTERMEDIATE_RATE);
        // The symbol rate is 13/24 of the intermediate rate
        let expected = INTERMEDIATE_RATE as f64 * 13.0 / 24.0;
        assert!((GSM_SYMBOL_RATE - expected).abs() < 1e-6);
    }
}
