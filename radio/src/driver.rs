//! SDR Driver Contract
//!
//! The source adapter consumes a generic SDR driver that, while armed,
//! yields buffers of interleaved int16 I/Q at the native rate. The vendor
//! library lives behind this trait; the crate ships a simulated driver for
//! tests and the benchmark path.

use common::{Gain, RawIq, ADC_SCALE, NATIVE_SAMPLE_RATE};
use dsp::{ToneGenerator, ToneSpec};
use num_complex::Complex32;
use tracing::debug;

use crate::RadioError;

/// Contract between the source adapter and an SDR driver.
///
/// `refill` blocks until the next chunk of interleaved I/Q is available
/// and returns it as int16 pairs (12-bit values, sign-extended). All
/// attribute setters may be called while streaming; implementations apply
/// them to the running hardware.
pub trait SdrDriver: Send {
    /// Connect to the hardware
    fn open(&mut self) -> Result<(), RadioError>;

    /// Release the hardware
    fn close(&mut self);

    /// Set the ADC sampling frequency in Hz
    fn set_sample_rate(&mut self, rate_hz: u64) -> Result<(), RadioError>;

    /// Disable automatic gain control
    fn set_gain_mode_manual(&mut self) -> Result<(), RadioError>;

    /// Set the hardware gain
    fn set_gain(&mut self, gain: Gain) -> Result<(), RadioError>;

    /// Set the centre frequency in Hz
    fn set_frequency(&mut self, freq_hz: f64) -> Result<(), RadioError>;

    /// Arm the receive path with a buffer of `buffer_samples` samples
    fn start_streaming(&mut self, buffer_samples: usize) -> Result<(), RadioError>;

    /// Disarm the receive path
    fn stop_streaming(&mut self);

    /// Block until the next chunk is available and return it.
    ///
    /// An error ends the stream; the worker loop exits and the consumer
    /// observes shutdown.
    fn refill(&mut self) -> Result<&[RawIq], RadioError>;
}

/// Build a driver from a device URI.
///
/// `sim:` URIs select the in-process simulated driver, with tones given as
/// `sim:tones=67000@0.5,-40000@0.31`. Hardware URIs belong to vendor
/// driver crates that implement [`SdrDriver`].
pub fn from_uri(uri: &str) -> Result<Box<dyn SdrDriver>, RadioError> {
    if let Some(args) = uri.strip_prefix("sim:") {
        let driver = SimDriver::from_args(args)?;
        return Ok(Box::new(driver));
    }
    Err(RadioError::InvalidConfig(format!(
        "no driver available for uri '{}'",
        uri
    )))
}

/// Simulated SDR driver producing deterministic multi-tone chunks.
///
/// Each `refill` synthesises the next chunk with phase continuity across
/// chunks. With pacing enabled, `refill` sleeps for the chunk duration to
/// mimic a hardware-driven read loop.
pub struct SimDriver {
    tones: Vec<ToneSpec>,
    generator: Option<ToneGenerator>,
    chunk: Vec<RawIq>,
    scratch: Vec<Complex32>,
    chunk_samples: usize,
    sample_rate: u64,
    opened: bool,
    streaming: bool,
    paced: bool,
    /// Remaining samples before refill reports end of stream; None for an
    /// unbounded stream
    budget: Option<u64>,
}

impl SimDriver {
    /// Create a simulated driver for the given tones.
    pub fn new(tones: &[ToneSpec]) -> Self {
        Self {
            tones: tones.to_vec(),
            generator: None,
            chunk: Vec::new(),
            scratch: Vec::new(),
            chunk_samples: 0,
            sample_rate: NATIVE_SAMPLE_RATE,
            opened: false,
            streaming: false,
            paced: false,
            budget: None,
        }
    }

    /// Sleep for the chunk duration on every refill, approximating the
    /// cadence of real hardware.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Limit the stream to `samples` total; refill errors afterwards.
    pub fn with_budget(mut self, samples: u64) -> Self {
        self.budget = Some(samples);
        self
    }

    /// Parse `key=value` arguments from a `sim:` URI.
    fn from_args(args: &str) -> Result<Self, RadioError> {
        let mut tones = vec![ToneSpec {
            freq_hz: 67_000.0,
            amplitude: 0.5,
        }];
        let mut paced = true;

        for pair in args.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| RadioError::InvalidConfig(format!("bad sim arg '{}'", pair)))?;
            match key {
                "tones" => {
                    tones = value
                        .split('+')
                        .map(parse_tone)
                        .collect::<Result<Vec<_>, _>>()?;
                }
                "paced" => {
                    paced = value
                        .parse()
                        .map_err(|_| RadioError::InvalidConfig("bad paced value".into()))?;
                }
                _ => {
                    return Err(RadioError::InvalidConfig(format!(
                        "unknown sim arg '{}'",
                        key
                    )));
                }
            }
        }

        Ok(Self::new(&tones).paced(paced))
    }
}

/// Parse a `freq@amplitude` tone description.
fn parse_tone(spec: &str) -> Result<ToneSpec, RadioError> {
    let (freq, amp) = spec
        .split_once('@')
        .ok_or_else(|| RadioError::InvalidConfig(format!("bad tone '{}'", spec)))?;
    Ok(ToneSpec {
        freq_hz: freq
            .parse()
            .map_err(|_| RadioError::InvalidConfig(format!("bad tone frequency '{}'", freq)))?,
        amplitude: amp
            .parse()
            .map_err(|_| RadioError::InvalidConfig(format!("bad tone amplitude '{}'", amp)))?,
    })
}

impl SdrDriver for SimDriver {
    fn open(&mut self) -> Result<(), RadioError> {
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) {
        self.stop_streaming();
        self.opened = false;
    }

    fn set_sample_rate(&mut self, rate_hz: u64) -> Result<(), RadioError> {
        if rate_hz == 0 {
            return Err(RadioError::InvalidConfig("zero sample rate".into()));
        }
        self.sample_rate = rate_hz;
        Ok(())
    }

    fn set_gain_mode_manual(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn set_gain(&mut self, gain: Gain) -> Result<(), RadioError> {
        debug!("sim driver gain set to {} dB", gain.db());
        Ok(())
    }

    fn set_frequency(&mut self, freq_hz: f64) -> Result<(), RadioError> {
        if freq_hz <= 0.0 {
            return Err(RadioError::InvalidConfig(format!(
                "invalid centre frequency {} Hz",
                freq_hz
            )));
        }
        debug!("sim driver tuned to {} Hz", freq_hz);
        Ok(())
    }

    fn start_streaming(&mut self, buffer_samples: usize) -> Result<(), RadioError> {
        if !self.opened {
            return Err(RadioError::NotOpen);
        }
        self.chunk_samples = buffer_samples;
        self.chunk = vec![[0i16; 2]; buffer_samples];
        self.scratch = vec![Complex32::new(0.0, 0.0); buffer_samples];
        self.generator = Some(ToneGenerator::new(&self.tones, self.sample_rate as f64));
        self.streaming = true;
        Ok(())
    }

    fn stop_streaming(&mut self) {
        self.streaming = false;
        self.generator = None;
    }

    fn refill(&mut self) -> Result<&[RawIq], RadioError> {
        if !self.streaming {
            return Err(RadioError::Device("driver is not streaming".into()));
        }
        let generator = self
            .generator
            .as_mut()
            .ok_or_else(|| RadioError::Device("driver is not streaming".into()))?;

        if let Some(budget) = self.budget.as_mut() {
            if *budget < self.chunk_samples as u64 {
                return Err(RadioError::Device("end of simulated stream".into()));
            }
            *budget -= self.chunk_samples as u64;
        }

        if self.paced {
            let secs = self.chunk_samples as f64 / self.sample_rate as f64;
            std::thread::sleep(std::time::Duration::from_secs_f64(secs));
        }

        generator.fill(&mut self.scratch);
        // Quantise to the 12-bit ADC range the hardware delivers
        for (raw, s) in self.chunk.iter_mut().zip(self.scratch.iter()) {
            raw[0] = (s.re / ADC_SCALE) as i16;
            raw[1] = (s.im / ADC_SCALE) as i16;
        }
        Ok(&self.chunk)
    }
}
