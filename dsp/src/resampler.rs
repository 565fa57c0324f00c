//! Two-Stage Rational Resampler
//!
//! Converts the native 2.5 MS/s stream to the GSM symbol rate:
//!
//! ```text
//!   2,500,000 Hz -> [stage 1: /5] -> 500,000 Hz -> [stage 2: x13/24] -> 270,833.333 Hz
//!                   (61-tap LPF)                   (729-tap polyphase)
//! ```
//!
//! Stage 1 is an integer decimator with a 61-tap anti-aliasing filter.
//! Stage 2 is a polyphase rational resampler with interpolation 13 and
//! decimation 24, so the end-to-end ratio is exactly 13/120.

use common::{GSM_SYMBOL_RATE, NATIVE_SAMPLE_RATE};
use num_complex::Complex32;
use tracing::debug;

use crate::coeffs;

/// Stage 1 decimation factor
pub const S1_DECIMATION: usize = 5;

/// Stage 1 FIR tap count
pub const S1_TAPS: usize = 61;

/// Stage 2 interpolation factor
pub const S2_INTERP: usize = 13;

/// Stage 2 decimation factor
pub const S2_DECIM: usize = 24;

/// Stage 2 total prototype taps
pub const S2_TAPS_TOTAL: usize = 729;

/// Stage 2 polyphase branch count (equals the interpolation factor)
pub const S2_PHASES: usize = 13;

/// Stage 2 taps per polyphase branch
pub const S2_TAPS_PER_PHASE: usize = 57;

/// Cache-line aligned storage so the convolution inner loops can be
/// vectorised with aligned loads.
#[repr(align(64))]
#[derive(Clone)]
struct Align64<T>(T);

/// Two-stage rational resampler (2.5 MS/s in, 270.833 kS/s out).
///
/// History buffers are stored twice back-to-back: each sample is written at
/// `[head]` and `[head + taps]`, so the convolution always reads a
/// contiguous window starting at `head` with no modulo arithmetic in the
/// inner loop. Coefficients are pre-reversed to turn the convolution into a
/// forward-scan dot product.
pub struct TwoStageResampler {
    /// Stage 1 history, double-stored
    s1_history: Align64<[Complex32; 2 * S1_TAPS]>,
    /// Stage 1 taps in reverse order
    s1_coeffs_rev: Align64<[f32; S1_TAPS]>,
    /// Next write slot in the stage 1 history
    s1_head: usize,
    /// Decimation counter (0 to S1_DECIMATION - 1)
    s1_index: usize,
    /// Polyphase filter banks, each branch pre-reversed
    s2_coeffs_poly: Align64<[[f32; S2_TAPS_PER_PHASE]; S2_PHASES]>,
    /// Stage 2 history, double-stored
    s2_history: Align64<[Complex32; 2 * S2_TAPS_PER_PHASE]>,
    /// Next write slot in the stage 2 history
    s2_head: usize,
    /// Polyphase phase accumulator
    s2_phase: usize,
}

impl TwoStageResampler {
    /// Create a resampler with cleared state and precomputed filter banks.
    pub fn new() -> Self {
        // Reversed stage 1 taps: history runs oldest-to-newest from head, so
        // a forward scan against reversed taps computes the convolution.
        let mut s1_rev = [0.0f32; S1_TAPS];
        for (i, &c) in coeffs::S1_COEFFS.iter().rev().enumerate() {
            s1_rev[i] = c;
        }

        // Decompose the prototype into S2_PHASES branches. Branch `p` holds
        // prototype taps {C[p + 13k]}, reversed, with out-of-range entries
        // left at zero (729 = 13 * 57 exactly, so none here are hit, but the
        // guard keeps the decomposition correct for any tap count).
        let mut poly = [[0.0f32; S2_TAPS_PER_PHASE]; S2_PHASES];
        for (phase, branch) in poly.iter_mut().enumerate() {
            for tap in 0..S2_TAPS_PER_PHASE {
                let raw = phase + tap * S2_PHASES;
                if raw < S2_TAPS_TOTAL {
                    branch[S2_TAPS_PER_PHASE - 1 - tap] = coeffs::S2_PROTOTYPE[raw];
                }
            }
        }

        debug!(
            "resampler initialised: {} Hz -> {:.3} Hz (/{} then x{}/{})",
            NATIVE_SAMPLE_RATE, GSM_SYMBOL_RATE, S1_DECIMATION, S2_INTERP, S2_DECIM
        );

        Self {
            s1_history: Align64([Complex32::new(0.0, 0.0); 2 * S1_TAPS]),
            s1_coeffs_rev: Align64(s1_rev),
            s1_head: 0,
            s1_index: 0,
            s2_coeffs_poly: Align64(poly),
            s2_history: Align64([Complex32::new(0.0, 0.0); 2 * S2_TAPS_PER_PHASE]),
            s2_head: 0,
            s2_phase: 0,
        }
    }

    /// Reset the filter state.
    ///
    /// Call this when retuning so transients from the previous frequency do
    /// not contaminate the new stream.
    pub fn reset(&mut self) {
        self.s1_history.0.fill(Complex32::new(0.0, 0.0));
        self.s1_head = 0;
        self.s1_index = 0;
        self.s2_history.0.fill(Complex32::new(0.0, 0.0));
        self.s2_head = 0;
        self.s2_phase = 0;
    }

    /// Process a block of input samples at 2.5 MS/s.
    ///
    /// Writes up to `out.len()` output samples at the GSM symbol rate and
    /// returns the number actually written. If the output buffer fills
    /// before the input is exhausted, the remaining input of this call is
    /// dropped; callers that must not lose data size `out` to at least
    /// `input.len() / 9` samples (the exact ratio is 13/120).
    pub fn process(&mut self, input: &[Complex32], out: &mut [Complex32]) -> usize {
        let mut produced = 0;

        for &sample in input {
            if let Some(filtered) = self.stage1_push(sample) {
                self.stage2_push(filtered, out, &mut produced);
            }
            if produced >= out.len() {
                break;
            }
        }

        produced
    }

    /// Upper bound on the output count for a given input length, including
    /// one sample of phase slack. Useful for sizing output buffers.
    pub fn max_output_len(input_len: usize) -> usize {
        input_len * S2_INTERP / (S1_DECIMATION * S2_DECIM) + 1
    }

    /// Push one sample into stage 1. Every S1_DECIMATION inputs this emits
    /// one filtered sample at the intermediate rate.
    fn stage1_push(&mut self, sample: Complex32) -> Option<Complex32> {
        self.s1_history.0[self.s1_head] = sample;
        self.s1_history.0[self.s1_head + S1_TAPS] = sample;
        self.s1_head += 1;
        if self.s1_head >= S1_TAPS {
            self.s1_head = 0;
        }

        self.s1_index += 1;
        if self.s1_index < S1_DECIMATION {
            return None;
        }
        self.s1_index = 0;

        let window = &self.s1_history.0[self.s1_head..self.s1_head + S1_TAPS];
        let mut acc_re = 0.0f32;
        let mut acc_im = 0.0f32;
        for (h, &c) in window.iter().zip(self.s1_coeffs_rev.0.iter()) {
            acc_re += h.re * c;
            acc_im += h.im * c;
        }

        Some(Complex32::new(acc_re, acc_im))
    }

    /// Push one intermediate-rate sample into the stage 2 polyphase
    /// resampler, appending 0 or more output samples.
    ///
    /// When the output buffer fills, the method returns with the phase
    /// accumulator unwrapped; the pending phases are dropped by the caller
    /// breaking out of its input loop.
    fn stage2_push(&mut self, sample: Complex32, out: &mut [Complex32], produced: &mut usize) {
        self.s2_history.0[self.s2_head] = sample;
        self.s2_history.0[self.s2_head + S2_TAPS_PER_PHASE] = sample;
        self.s2_head += 1;
        if self.s2_head >= S2_TAPS_PER_PHASE {
            self.s2_head = 0;
        }

        while self.s2_phase < S2_INTERP {
            if *produced >= out.len() {
                return;
            }

            let window = &self.s2_history.0[self.s2_head..self.s2_head + S2_TAPS_PER_PHASE];
            let branch = &self.s2_coeffs_poly.0[self.s2_phase];
            let mut acc_re = 0.0f32;
            let mut acc_im = 0.0f32;
            for (h, &c) in window.iter().zip(branch.iter()) {
                acc_re += h.re * c;
                acc_im += h.im * c;
            }

            out[*produced] = Complex32::new(acc_re, acc_im);
            *produced += 1;

            self.s2_phase += S2_DECIM;
        }

        self.s2_phase -= S2_INTERP;
    }
}

impl Default for TwoStageResampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{multi_tone, ToneSpec};
    use rand::{Rng, SeedableRng};

    /// Correlate against a complex exponential and return the tone
    /// magnitude at `freq`. Skips nothing; callers trim transients.
    fn tone_magnitude(samples: &[Complex32], freq: f64, rate: f64) -> f64 {
        let w = 2.0 * std::f64::consts::PI * freq / rate;
        let mut acc_re = 0.0f64;
        let mut acc_im = 0.0f64;
        for (n, s) in samples.iter().enumerate() {
            let (sin, cos) = (w * n as f64).sin_cos();
            acc_re += s.re as f64 * cos + s.im as f64 * sin;
            acc_im += s.im as f64 * cos - s.re as f64 * sin;
        }
        let n = samples.len() as f64;
        (acc_re * acc_re + acc_im * acc_im).sqrt() / n
    }

    #[test]
    fn test_stage1_impulse_response() {
        // A unit impulse followed by zeros walks the impulse through the
        // history window; each decimated output must equal a single tap.
        let mut rs = TwoStageResampler::new();

        let mut outputs = Vec::new();
        if let Some(y) = rs.stage1_push(Complex32::new(1.0, 0.0)) {
            outputs.push(y);
        }
        for _ in 0..120 {
            if let Some(y) = rs.stage1_push(Complex32::new(0.0, 0.0)) {
                outputs.push(y);
            }
        }
        assert_eq!(outputs.len(), 24);

        // After n total inputs the impulse sits n-1 slots deep, so the
        // output is the reversed tap at index S1_TAPS - n (zero once the
        // impulse has left the window).
        for (j, y) in outputs.iter().enumerate() {
            let n = S1_DECIMATION * (j + 1);
            let expected = if n <= S1_TAPS {
                rs.s1_coeffs_rev.0[S1_TAPS - n]
            } else {
                0.0
            };
            assert_eq!(y.re, expected, "output {}", j);
            assert_eq!(y.im, 0.0, "output {}", j);
        }
    }

    #[test]
    fn test_stage1_dc_gain() {
        let mut rs = TwoStageResampler::new();
        let mut last = Complex32::new(0.0, 0.0);
        // Feed enough constant input to flush the 61-tap history.
        for _ in 0..500 {
            if let Some(y) = rs.stage1_push(Complex32::new(1.0, 0.0)) {
                last = y;
            }
        }
        assert!((last.re - 1.0).abs() < 1e-5, "DC gain {}", last.re);
        assert!(last.im.abs() < 1e-6);
    }

    #[test]
    fn test_end_to_end_dc_gain() {
        // The x13 interpolation energy is spread across the 13 phases, so
        // the cascade is unity at DC, not 13.
        let mut rs = TwoStageResampler::new();
        let input = vec![Complex32::new(1.0, 0.0); 12_000];
        let mut out = vec![Complex32::new(0.0, 0.0); 2_000];
        let produced = rs.process(&input, &mut out);
        assert!(produced > 200);

        // Steady-state ripple is bounded by the per-branch DC sums of the
        // polyphase bank, which match unity to a few 1e-5.
        for y in &out[produced / 2..produced] {
            assert!((y.re - 1.0).abs() < 1e-4, "steady state {}", y.re);
            assert!(y.im.abs() < 1e-4);
        }
    }

    #[test]
    fn test_zero_input_output_count() {
        // From cleared state the cascade produces exactly 13 outputs per
        // 120 inputs.
        for &(n, expected) in &[(120usize, 13usize), (1_200, 130), (12_000, 1_300)] {
            let mut rs = TwoStageResampler::new();
            let input = vec![Complex32::new(0.0, 0.0); n];
            let mut out = vec![Complex32::new(1.0, 1.0); expected + 16];
            let produced = rs.process(&input, &mut out);
            assert_eq!(produced, expected, "input length {}", n);
            for y in &out[..produced] {
                assert_eq!(y.re, 0.0);
                assert_eq!(y.im, 0.0);
            }
        }
    }

    #[test]
    fn test_ratio_with_random_input() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
        let input: Vec<Complex32> = (0..120_000)
            .map(|_| Complex32::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
            .collect();

        let mut rs = TwoStageResampler::new();
        let mut out = vec![Complex32::new(0.0, 0.0); 20_000];
        let produced = rs.process(&input, &mut out);
        assert!(
            (12_999..=13_001).contains(&produced),
            "produced {}",
            produced
        );
    }

    #[test]
    fn test_output_capacity_drop() {
        // With an undersized output buffer the tail of the input is
        // discarded and the count saturates at the capacity.
        let mut rs = TwoStageResampler::new();
        let input = vec![Complex32::new(0.5, -0.5); 12_000];
        let mut out = vec![Complex32::new(0.0, 0.0); 100];
        let produced = rs.process(&input, &mut out);
        assert_eq!(produced, 100);
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut rs = TwoStageResampler::new();
        let input = vec![Complex32::new(0.7, 0.2); 997];
        let mut out = vec![Complex32::new(0.0, 0.0); 256];
        rs.process(&input, &mut out);
        rs.reset();

        // After reset a zero block must again produce exact zeros.
        let zeros = vec![Complex32::new(0.0, 0.0); 240];
        let produced = rs.process(&zeros, &mut out);
        assert_eq!(produced, 26);
        for y in &out[..produced] {
            assert_eq!(y.re, 0.0);
            assert_eq!(y.im, 0.0);
        }
    }

    #[test]
    fn test_passband_tone() {
        // A 67 kHz tone is inside the passband and must come through
        // within 1 dB of its input amplitude.
        let rate_in = NATIVE_SAMPLE_RATE as f64;
        let rate_out = GSM_SYMBOL_RATE;
        let input = multi_tone(
            &[ToneSpec {
                freq_hz: 67_000.0,
                amplitude: 0.5,
            }],
            rate_in,
            500_000,
        );

        let mut rs = TwoStageResampler::new();
        let mut out = vec![Complex32::new(0.0, 0.0); TwoStageResampler::max_output_len(input.len())];
        let produced = rs.process(&input, &mut out);
        assert!(produced > 50_000);

        // Drop the filter transient before measuring.
        let steady = &out[2_000..produced];
        let mag = tone_magnitude(steady, 67_000.0, rate_out);
        let db = 20.0 * (mag / 0.5).log10();
        assert!(db > -1.0 && db < 0.5, "passband level {:.2} dB", db);

        // Away from the tone the spectrum must be quiet.
        for probe in [-80_000.0, 20_000.0, 110_000.0] {
            let spur = tone_magnitude(steady, probe, rate_out);
            assert!(spur < 0.5e-3, "spur at {} Hz: {}", probe, spur);
        }
    }

    #[test]
    fn test_stopband_tone() {
        // A 300 kHz tone lies beyond the stage 1 stopband edge; the cascade
        // must attenuate it by at least 40 dB.
        let rate_in = NATIVE_SAMPLE_RATE as f64;
        let input = multi_tone(
            &[ToneSpec {
                freq_hz: 300_000.0,
                amplitude: 0.79,
            }],
            rate_in,
            500_000,
        );

        let mut rs = TwoStageResampler::new();
        let mut out = vec![Complex32::new(0.0, 0.0); TwoStageResampler::max_output_len(input.len())];
        let produced = rs.process(&input, &mut out);

        let steady = &out[2_000..produced];
        let rms = (steady
            .iter()
            .map(|s| (s.re as f64).powi(2) + (s.im as f64).powi(2))
            .sum::<f64>()
            / steady.len() as f64)
            .sqrt();
        let db = 20.0 * (rms / 0.79).log10();
        assert!(db < -40.0, "stopband leakage {:.1} dB", db);
    }
}
