//! GSM Scanner Main Application
//!
//! Tunes an AD936x-class SDR to a GSM carrier, runs the resampling
//! pipeline down to the symbol rate, and hands the stream to the detector
//! stages. Also carries a self-contained DSP benchmark mode driven by a
//! synthetic multi-tone signal.

use anyhow::Result;
use clap::Parser;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::{format_freq, Gain, IqSample, ShutdownToken, NATIVE_SAMPLE_RATE};
use dsp::{multi_tone, spectrum, ToneSpec, TwoStageResampler};
use radio::{driver, RadioError, SampleSource};

mod config;
use config::ScannerConfig;

/// GSM base station scanner / clock offset calibrator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Frequency of a nearby GSM base station in Hz
    #[arg(short, long)]
    frequency: Option<f64>,

    /// Receive gain in dB (0-70)
    #[arg(short, long)]
    gain: Option<f32>,

    /// Device URI (e.g. ip:192.168.2.1, or sim: for the synthetic driver)
    #[arg(short, long)]
    uri: Option<String>,

    /// Path to a YAML profile
    #[arg(short, long)]
    config: Option<String>,

    /// Run the DSP benchmark and exit
    #[arg(short = 'B', long)]
    benchmark: bool,

    /// Render an ASCII spectrum of each capture
    #[arg(short = 'A', long)]
    show_fft: bool,

    /// Verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let profile = match &args.config {
        Some(path) => {
            let config = ScannerConfig::from_yaml_file(path)?;
            info!("loaded profile from {}", path);
            config
        }
        None => ScannerConfig::default(),
    };

    let level = match args.verbose {
        0 => profile.log.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt().with_env_filter(env_filter).with_target(true).init();

    let shutdown = ShutdownToken::new();
    install_sigint(&shutdown);

    if args.benchmark {
        return run_benchmark();
    }

    let gain_db = args.gain.unwrap_or(profile.radio.gain);
    let gain = Gain::new(gain_db)
        .ok_or_else(|| anyhow::anyhow!("gain {} dB out of range (0-{})", gain_db, Gain::MAX_DB))?;
    let uri = args.uri.unwrap_or(profile.radio.uri);
    let frequency = args
        .frequency
        .or(profile.radio.frequency)
        .ok_or_else(|| anyhow::anyhow!("a frequency is required (or run with --benchmark)"))?;

    run_capture(frequency, gain, &uri, args.show_fft, shutdown)
}

/// Continuous capture loop: fill, drain, report.
fn run_capture(
    frequency: f64,
    gain: Gain,
    uri: &str,
    show_fft: bool,
    shutdown: ShutdownToken,
) -> Result<()> {
    info!("opening device {}", uri);
    let driver = driver::from_uri(uri)?;
    let mut source = SampleSource::new(driver, gain, shutdown.clone());
    source.open()?;
    source.tune(frequency)?;

    let rate = source.sample_rate();
    info!(
        "tuned to {}, delivering {:.3} S/s",
        format_freq(frequency),
        rate
    );

    // Roughly a quarter second of symbol-rate samples per capture
    const CAPTURE_LEN: usize = 65_536;
    let mut samples = vec![IqSample::new(0.0, 0.0); CAPTURE_LEN];

    while !shutdown.is_requested() {
        let overruns = match source.fill(CAPTURE_LEN) {
            Ok(overruns) => overruns,
            Err(RadioError::Shutdown) => break,
            Err(e) => return Err(e.into()),
        };
        if overruns > 0 {
            warn!("{} samples dropped since last capture", overruns);
        }

        let Some(ring) = source.buffer() else { break };
        let n = ring.read(&mut samples);

        if show_fft {
            print!("{}", spectrum::render_ascii(&samples[..n], 120, rate));
        } else {
            let mag_db = spectrum::power_spectrum_db(&samples[..n]);
            for peak in spectrum::find_peaks(&mag_db, rate, 3) {
                info!(
                    "peak {} at {:.1} dBFS",
                    format_freq(peak.freq_hz),
                    peak.level_db
                );
            }
        }
    }

    source.close();
    info!("capture finished");
    Ok(())
}

/// Offline benchmark of the resampling pipeline against synthetic data.
fn run_benchmark() -> Result<()> {
    let fs_in = NATIVE_SAMPLE_RATE as f64;
    let duration = 5.0;
    let num_samples = (fs_in * duration) as usize;

    // Two tones beyond the 135 kHz output passband edge that the cascade
    // must suppress, four inside it.
    let tones = [
        ToneSpec { freq_hz: 300_000.0, amplitude: 0.79 },
        ToneSpec { freq_hz: 67_000.0, amplitude: 0.5 },
        ToneSpec { freq_hz: 47_000.0, amplitude: 0.4 },
        ToneSpec { freq_hz: -40_000.0, amplitude: 0.31 },
        ToneSpec { freq_hz: -62_000.0, amplitude: 0.25 },
        ToneSpec { freq_hz: -300_000.0, amplitude: 0.2 },
    ];

    info!(
        "generating {:.1} s of test signal ({} samples)",
        duration, num_samples
    );
    let input = multi_tone(&tones, fs_in, num_samples);

    println!("input spectrum at {} S/s:", NATIVE_SAMPLE_RATE);
    print!("{}", spectrum::render_ascii(&input, 120, fs_in));

    // Feed the resampler in chunks the size of a realistic USB transfer
    const CHUNK_SIZE: usize = 65_536;
    let mut resampler = TwoStageResampler::new();
    let mut output: Vec<IqSample> = Vec::with_capacity(num_samples / 9 + 1);
    let mut out_chunk = vec![IqSample::new(0.0, 0.0); TwoStageResampler::max_output_len(CHUNK_SIZE)];

    let start = Instant::now();
    for chunk in input.chunks(CHUNK_SIZE) {
        let produced = resampler.process(chunk, &mut out_chunk);
        output.extend_from_slice(&out_chunk[..produced]);
    }
    let elapsed = start.elapsed().as_secs_f64();

    info!(
        "processed {} samples in {:.4} s ({:.2}x realtime, {:.2} MS/s)",
        num_samples,
        elapsed,
        duration / elapsed,
        num_samples as f64 / 1e6 / elapsed
    );

    let fs_out = common::GSM_SYMBOL_RATE;
    println!("output spectrum ({} samples at {:.3} S/s):", output.len(), fs_out);
    print!("{}", spectrum::render_ascii(&output, 120, fs_out));

    Ok(())
}

#[cfg(unix)]
static SIGNAL_TOKEN: std::sync::OnceLock<ShutdownToken> = std::sync::OnceLock::new();

/// SIGINT handler: request shutdown, force-exit on the second interrupt.
/// Only async-signal-safe operations happen here (atomic loads and
/// stores, write, _exit).
#[cfg(unix)]
extern "C" fn handle_sigint(_signum: libc::c_int) {
    if let Some(token) = SIGNAL_TOKEN.get() {
        if token.is_requested() {
            let msg = b"\nForcing exit.\n";
            unsafe {
                libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
                libc::_exit(1);
            }
        }
        token.request();
    }
}

#[cfg(unix)]
fn install_sigint(token: &ShutdownToken) {
    let _ = SIGNAL_TOKEN.set(token.clone());
    let handler: extern "C" fn(libc::c_int) = handle_sigint;
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
fn install_sigint(_token: &ShutdownToken) {
    // No signal wiring on this platform; stop with the environment's
    // process termination instead.
}
