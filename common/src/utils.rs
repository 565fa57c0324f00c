//! Common Utilities
//!
//! Statistics helpers for offset estimation, frequency formatting, and the
//! process-wide shutdown token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Compute the mean of a float slice
pub fn mean(data: &[f32]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().map(|&x| x as f64).sum::<f64>() / data.len() as f64
}

/// Compute mean and standard deviation in one pass
pub fn mean_stddev(data: &[f32]) -> (f64, f64) {
    if data.is_empty() {
        return (0.0, 0.0);
    }
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for &x in data {
        let x = x as f64;
        sum += x;
        sum_sq += x * x;
    }
    let n = data.len() as f64;
    let mean = sum / n;
    let var = (sum_sq / n - mean * mean).max(0.0);
    (mean, var.sqrt())
}

/// Sort a float slice in ascending order (NaN-tolerant total order)
pub fn sort_floats(data: &mut [f32]) {
    data.sort_by(|a, b| a.total_cmp(b));
}

/// Format a frequency in Hz as a human-readable string
pub fn format_freq(f: f64) -> String {
    let abs = f.abs();
    if abs >= 1e6 {
        format!("{:.1}MHz", f / 1e6)
    } else if abs >= 1e3 {
        format!("{:.1}kHz", f / 1e3)
    } else {
        format!("{:.0}Hz", f)
    }
}

/// Process-wide cancellation token.
///
/// Created once at program start and observed by long-running operations.
/// The SIGINT handler stores into it, so `request` must stay
/// async-signal-safe (a single atomic store).
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    /// Create a new, unsignalled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal shutdown. Safe to call from a signal handler.
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Check whether shutdown has been requested
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_stddev() {
        let data = [1.0f32, 2.0, 3.0, 4.0];
        let (m, s) = mean_stddev(&data);
        assert!((m - 2.5).abs() < 1e-9);
        assert!((s - (1.25f64).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_mean_empty() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean_stddev(&[]), (0.0, 0.0));
    }

    #[test]
    fn test_sort_floats() {
        let mut data = [3.0f32, 1.0, 2.0];
        sort_floats(&mut data);
        assert_eq!(data, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_format_freq() {
        assert_eq!(format_freq(935.2e6), "935.2MHz");
        assert_eq!(format_freq(270.833e3), "270.8kHz");
        assert_eq!(format_freq(120.0), "120Hz");
    }

    #[test]
    fn test_shutdown_token() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        assert!(!clone.is_requested());
        token.request();
        assert!(clone.is_requested());
    }
}
