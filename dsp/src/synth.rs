//! Test Signal Synthesis
//!
//! Multi-tone complex generators used by the benchmark, the simulated
//! driver, and the unit tests. Phase is accumulated in 64-bit floats;
//! 32-bit phase arithmetic drifts audibly over multi-second buffers and
//! shows up as spurious spectral peaks.

use num_complex::Complex32;

/// One complex tone: frequency (may be negative) and linear amplitude.
#[derive(Debug, Clone, Copy)]
pub struct ToneSpec {
    pub freq_hz: f64,
    pub amplitude: f64,
}

/// Streaming multi-tone generator.
///
/// Keeps an absolute sample index so successive chunks are phase
/// continuous regardless of chunk size.
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    tones: Vec<ToneSpec>,
    phase_incs: Vec<f64>,
    index: u64,
}

impl ToneGenerator {
    /// Create a generator for the given tones at `sample_rate` Hz.
    pub fn new(tones: &[ToneSpec], sample_rate: f64) -> Self {
        let phase_incs = tones
            .iter()
            .map(|t| 2.0 * std::f64::consts::PI * t.freq_hz / sample_rate)
            .collect();
        Self {
            tones: tones.to_vec(),
            phase_incs,
            index: 0,
        }
    }

    /// Fill `out` with the next block of samples.
    pub fn fill(&mut self, out: &mut [Complex32]) {
        for sample in out.iter_mut() {
            let mut re = 0.0f64;
            let mut im = 0.0f64;
            for (tone, &inc) in self.tones.iter().zip(self.phase_incs.iter()) {
                let phase = self.index as f64 * inc;
                let (sin, cos) = phase.sin_cos();
                re += tone.amplitude * cos;
                im += tone.amplitude * sin;
            }
            *sample = Complex32::new(re as f32, im as f32);
            self.index += 1;
        }
    }

    /// Total samples generated so far.
    pub fn position(&self) -> u64 {
        self.index
    }
}

/// Generate `count` samples of a multi-tone signal in one shot.
pub fn multi_tone(tones: &[ToneSpec], sample_rate: f64, count: usize) -> Vec<Complex32> {
    let mut out = vec![Complex32::new(0.0, 0.0); count];
    ToneGenerator::new(tones, sample_rate).fill(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_amplitude_and_frequency() {
        let rate = 100_000.0;
        let samples = multi_tone(
            &[ToneSpec {
                freq_hz: 10_000.0,
                amplitude: 0.5,
            }],
            rate,
            10_000,
        );

        // A complex exponential has constant modulus.
        for s in &samples {
            let mag = (s.re * s.re + s.im * s.im).sqrt();
            assert!((mag - 0.5).abs() < 1e-5);
        }

        // 10 kHz at 100 kS/s completes a cycle every 10 samples.
        assert!((samples[10].re - samples[0].re).abs() < 1e-5);
        assert!((samples[10].im - samples[0].im).abs() < 1e-5);
    }

    #[test]
    fn test_chunked_generation_is_continuous() {
        let tones = [ToneSpec {
            freq_hz: 1_234.5,
            amplitude: 1.0,
        }];
        let whole = multi_tone(&tones, 48_000.0, 4_096);

        let mut gen = ToneGenerator::new(&tones, 48_000.0);
        let mut chunked = vec![Complex32::new(0.0, 0.0); 4_096];
        for chunk in chunked.chunks_mut(777) {
            gen.fill(chunk);
        }

        assert_eq!(gen.position(), 4_096);
        for (a, b) in whole.iter().zip(chunked.iter()) {
            assert_eq!(a, b);
        }
    }
}
