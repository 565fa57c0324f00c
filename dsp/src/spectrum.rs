//! Terminal Spectrum Analyser
//!
//! Windowed FFT with dBFS calibration, rendered as coloured ASCII bars.
//! Used for visual sanity checks of the receive pipeline; the measurement
//! path never depends on this module.

use num_complex::{Complex32, Complex64};
use rustfft::FftPlanner;

// Blackman-Harris 4-term window coefficients
const A0: f64 = 0.35875;
const A1: f64 = 0.48829;
const A2: f64 = 0.14128;
const A3: f64 = 0.01168;

/// A spectral peak in the analysed block.
#[derive(Debug, Clone, Copy)]
pub struct Peak {
    /// Frequency relative to the centre, in Hz
    pub freq_hz: f64,
    /// Level in dBFS
    pub level_db: f32,
}

/// Compute the power spectrum of `data` in dBFS.
///
/// The block is windowed with a 4-term Blackman-Harris, transformed, and
/// FFT-shifted so index 0 is -Fs/2. Levels are calibrated so a full-scale
/// tone reads 0 dBFS (the window coherent gain is divided out).
pub fn power_spectrum_db(data: &[Complex32]) -> Vec<f32> {
    let len = data.len();
    if len < 2 {
        return vec![];
    }

    let mut buf: Vec<Complex64> = Vec::with_capacity(len);
    for (i, s) in data.iter().enumerate() {
        // Window computed in f64; f32 loses precision for large blocks.
        let ratio = i as f64 / (len - 1) as f64;
        let w = A0 - A1 * (2.0 * std::f64::consts::PI * ratio).cos()
            + A2 * (4.0 * std::f64::consts::PI * ratio).cos()
            - A3 * (6.0 * std::f64::consts::PI * ratio).cos();
        buf.push(Complex64::new(s.re as f64 * w, s.im as f64 * w));
    }

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(len);
    fft.process(&mut buf);

    // Full scale reference: amplitude 1.0 tone scaled by the window
    // coherent gain.
    let db_offset = 20.0 * (len as f64 * A0).log10();

    let mut mag_db = vec![0.0f32; len];
    for i in 0..len {
        let idx = (i + len / 2) % len; // FFT shift
        let pwr = buf[idx].norm_sqr();
        mag_db[i] = (10.0 * (pwr + 1e-12).log10() - db_offset) as f32;
    }
    mag_db
}

/// Find local maxima within 40 dB of the block peak, strongest first.
pub fn find_peaks(mag_db: &[f32], sample_rate: f64, max_peaks: usize) -> Vec<Peak> {
    let len = mag_db.len();
    if len < 3 {
        return vec![];
    }
    let max_db = mag_db.iter().cloned().fold(f32::MIN, f32::max);

    let mut peaks: Vec<Peak> = Vec::new();
    for i in 1..len - 1 {
        if mag_db[i] > mag_db[i - 1]
            && mag_db[i] > mag_db[i + 1]
            && mag_db[i] > max_db - 40.0
            && mag_db[i] > -120.0
        {
            peaks.push(Peak {
                freq_hz: (i as f64 - len as f64 / 2.0) * sample_rate / len as f64,
                level_db: mag_db[i],
            });
        }
    }

    peaks.sort_by(|a, b| b.level_db.total_cmp(&a.level_db));
    peaks.truncate(max_peaks);
    peaks
}

/// Render a spectrum block as a single line of coloured bars plus a peak
/// listing. Returns the complete string including ANSI escapes.
pub fn render_ascii(data: &[Complex32], width: usize, sample_rate: f64) -> String {
    let mag_db = power_spectrum_db(data);
    if mag_db.is_empty() {
        return String::new();
    }

    let plot_width = width.saturating_sub(20).max(10);

    // Max-hold downsampling to the display width
    let len = mag_db.len();
    let mut bins = vec![f32::MIN; plot_width];
    for (w, bin) in bins.iter_mut().enumerate() {
        let start = w * len / plot_width;
        let end = ((w + 1) * len / plot_width).min(len);
        for &db in &mag_db[start..end] {
            if db > *bin {
                *bin = db;
            }
        }
    }

    const BLOCKS: [&str; 9] = [" ", " ", "\u{2582}", "\u{2583}", "\u{2584}", "\u{2585}", "\u{2586}", "\u{2587}", "\u{2588}"];
    const FLOOR_DB: f32 = -115.0;
    const CEIL_DB: f32 = -45.0;

    let max_db = mag_db.iter().cloned().fold(f32::MIN, f32::max);

    let mut out = String::new();
    out.push_str("\x1b[36m[-BW/2] \x1b[0m");
    for &val in &bins {
        let norm = ((val - FLOOR_DB) / (CEIL_DB - FLOOR_DB)).clamp(0.0, 1.0);
        let idx = (norm * (BLOCKS.len() - 1) as f32) as usize;

        let colour = if norm < 0.20 {
            "\x1b[90m" // noise floor
        } else if norm < 0.40 {
            "\x1b[34m"
        } else if norm < 0.60 {
            "\x1b[36m"
        } else if norm < 0.80 {
            "\x1b[32m"
        } else {
            "\x1b[91m" // peak
        };
        out.push_str(colour);
        out.push_str(BLOCKS[idx]);
    }
    out.push_str("\x1b[0m \x1b[36m[+BW/2]\x1b[0m");
    out.push_str(&format!(" Max: {:.1}dBFS\n", max_db));

    let peaks = find_peaks(&mag_db, sample_rate, 6);
    if !peaks.is_empty() {
        out.push_str("   Peak Detection:\n");
        for (n, p) in peaks.iter().enumerate() {
            out.push_str(&format!(
                "    #{}: {:>10.1} Hz  ({:>6.1} dBFS)\n",
                n + 1,
                p.freq_hz,
                p.level_db
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{multi_tone, ToneSpec};

    #[test]
    fn test_full_scale_tone_calibration() {
        let rate = 100_000.0;
        // Pick a bin-centred frequency so there is no scalloping loss.
        let samples = multi_tone(
            &[ToneSpec {
                freq_hz: 10_000.0,
                amplitude: 1.0,
            }],
            rate,
            4_096,
        );
        // 10 kHz is not exactly bin centred at 4096/100k; use the peak bin.
        let mag_db = power_spectrum_db(&samples);
        let max = mag_db.iter().cloned().fold(f32::MIN, f32::max);
        // Within scalloping loss of 0 dBFS
        assert!(max > -1.5 && max < 0.5, "full scale reads {} dBFS", max);
    }

    #[test]
    fn test_peak_frequency() {
        let rate = 250_000.0;
        let samples = multi_tone(
            &[
                ToneSpec {
                    freq_hz: 50_000.0,
                    amplitude: 0.8,
                },
                ToneSpec {
                    freq_hz: -30_000.0,
                    amplitude: 0.3,
                },
            ],
            rate,
            8_192,
        );
        let mag_db = power_spectrum_db(&samples);
        let peaks = find_peaks(&mag_db, rate, 6);
        assert!(!peaks.is_empty());
        assert!((peaks[0].freq_hz - 50_000.0).abs() < rate / 8_192.0 * 2.0);
        // The second tone sits about 8.5 dB below the first.
        let second = peaks
            .iter()
            .find(|p| (p.freq_hz + 30_000.0).abs() < rate / 8_192.0 * 2.0);
        assert!(second.is_some());
    }

    #[test]
    fn test_render_has_peak_listing() {
        let samples = multi_tone(
            &[ToneSpec {
                freq_hz: 1_000.0,
                amplitude: 0.5,
            }],
            48_000.0,
            2_048,
        );
        let rendered = render_ascii(&samples, 80, 48_000.0);
        assert!(rendered.contains("Max:"));
        assert!(rendered.contains("Peak Detection"));
    }
}
