//! SDR Sample Source
//!
//! Owns the driver handle, the resampler, the ring buffer, and the worker
//! thread that ties them together:
//!
//! ```text
//!  [driver refill] -> [int16 -> complex] -> [resampler] -> [ring buffer]
//!      worker thread                                            |
//!                                                               v
//!                                                    fill() / read() consumer
//! ```
//!
//! The worker never blocks on the consumer. If the handoff lock is
//! contended or the ring is full, the produced batch is dropped and the
//! shortfall accumulated in an overflow counter that `fill` reports and
//! clears. The driver imposes a hard real-time deadline; waiting here
//! would lose the following samples as well.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, TryLockError};
use std::thread::JoinHandle;
use std::time::Duration;

use common::{Gain, IqSample, ShutdownToken, ADC_SCALE, GSM_SYMBOL_RATE, NATIVE_SAMPLE_RATE};
use dsp::TwoStageResampler;
use num_complex::Complex32;
use tracing::{debug, info, warn};

use crate::ring_buffer::MagicBuffer;
use crate::{RadioError, SdrDriver};

/// Maximum resampler outputs per handoff batch
pub const BATCH_SIZE: usize = 32_768;

/// Ring buffer capacity in output samples
const RING_LEN: usize = 256 * 1024;

/// Driver receive buffer in input samples
const DRIVER_BUFFER_SAMPLES: usize = 128 * 1024;

/// Consumer poll period while waiting for data, bounding shutdown latency
const FILL_POLL: Duration = Duration::from_millis(100);

/// State shared between the worker thread and the consumer.
struct Shared {
    ring: MagicBuffer<IqSample>,
    resampler: Mutex<TwoStageResampler>,
    /// Handoff lock paired with `data_ready`. The worker only ever
    /// try-locks it; see the module notes on back-pressure.
    data_lock: Mutex<()>,
    data_ready: Condvar,
    streaming: AtomicBool,
    /// Samples dropped since the consumer last asked
    overflow: AtomicU32,
    shutdown: ShutdownToken,
}

/// Streaming sample source delivering GSM-rate samples from an SDR.
///
/// Construct with a driver, `open`, `tune`, then call [`fill`] and drain
/// the ring via [`buffer`]. One worker thread runs the driver read loop
/// and the resampling pipeline for the lifetime of a `start`/`stop` pair.
///
/// [`fill`]: SampleSource::fill
/// [`buffer`]: SampleSource::buffer
pub struct SampleSource {
    driver: Arc<Mutex<Box<dyn SdrDriver>>>,
    shared: Option<Arc<Shared>>,
    worker: Option<JoinHandle<()>>,
    shutdown: ShutdownToken,
    gain: Gain,
    center_freq: f64,
}

impl SampleSource {
    /// Create a source over `driver`. The shutdown token is observed by
    /// every blocking call on this source.
    pub fn new(driver: Box<dyn SdrDriver>, gain: Gain, shutdown: ShutdownToken) -> Self {
        Self {
            driver: Arc::new(Mutex::new(driver)),
            shared: None,
            worker: None,
            shutdown,
            gain,
            center_freq: 0.0,
        }
    }

    /// Open the device: connect, configure rate and gain, and map the
    /// ring buffer. Fails if the mapping or any attribute write fails.
    pub fn open(&mut self) -> Result<(), RadioError> {
        self.open_with_ring_len(RING_LEN)
    }

    fn open_with_ring_len(&mut self, ring_len: usize) -> Result<(), RadioError> {
        if self.shared.is_some() {
            return Ok(());
        }

        {
            let mut drv = lock(&self.driver);
            drv.open()?;
            drv.set_sample_rate(NATIVE_SAMPLE_RATE)?;
            drv.set_gain_mode_manual()?;
            drv.set_gain(self.gain)?;
        }

        let ring = MagicBuffer::new(ring_len, false)?;
        self.shared = Some(Arc::new(Shared {
            ring,
            resampler: Mutex::new(TwoStageResampler::new()),
            data_lock: Mutex::new(()),
            data_ready: Condvar::new(),
            streaming: AtomicBool::new(false),
            overflow: AtomicU32::new(0),
            shutdown: self.shutdown.clone(),
        }));

        info!("source opened at {} S/s native rate", NATIVE_SAMPLE_RATE);
        Ok(())
    }

    /// Tune the receiver. Resets the resampler so transients from the
    /// previous frequency do not bleed into the new stream.
    pub fn tune(&mut self, freq_hz: f64) -> Result<(), RadioError> {
        lock(&self.driver).set_frequency(freq_hz)?;
        self.center_freq = freq_hz;
        if let Some(shared) = &self.shared {
            lock(&shared.resampler).reset();
        }
        debug!("tuned to {} Hz", freq_hz);
        Ok(())
    }

    /// Set the hardware gain.
    pub fn set_gain(&mut self, gain: Gain) -> Result<(), RadioError> {
        lock(&self.driver).set_gain(gain)?;
        self.gain = gain;
        Ok(())
    }

    /// Start streaming: arm the driver and launch the worker thread.
    pub fn start(&mut self) -> Result<(), RadioError> {
        let shared = self.shared.as_ref().ok_or(RadioError::NotOpen)?;
        if shared.streaming.load(Ordering::Acquire) {
            return Ok(());
        }

        lock(&shared.resampler).reset();
        shared.overflow.store(0, Ordering::Release);
        lock(&self.driver).start_streaming(DRIVER_BUFFER_SAMPLES)?;
        shared.streaming.store(true, Ordering::Release);

        let worker_shared = Arc::clone(shared);
        let worker_driver = Arc::clone(&self.driver);
        self.worker = Some(std::thread::spawn(move || {
            worker_loop(worker_shared, worker_driver)
        }));

        Ok(())
    }

    /// Stop streaming and join the worker. Calling stop twice, or before
    /// start, is a no-op.
    pub fn stop(&mut self) {
        let Some(shared) = self.shared.as_ref() else {
            return;
        };

        let was_streaming = shared.streaming.swap(false, Ordering::AcqRel);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        if was_streaming {
            lock(&self.driver).stop_streaming();
            shared.data_ready.notify_all();
            info!(
                "source stopped; {} samples dropped since start",
                shared.overflow.load(Ordering::Acquire)
            );
        }
    }

    /// Stop and release the device and the ring buffer.
    pub fn close(&mut self) {
        self.stop();
        lock(&self.driver).close();
        self.shared = None;
    }

    /// Block until at least `num_samples` are available in the ring.
    ///
    /// Starts streaming if it is not already running. Returns the overflow
    /// count accumulated since the previous call (reporting clears it).
    /// Returns [`RadioError::Shutdown`] when streaming ends or the
    /// shutdown token fires; the poll period bounds that latency to about
    /// 100 ms. The call does not remove samples; drain via [`buffer`].
    ///
    /// [`buffer`]: SampleSource::buffer
    pub fn fill(&mut self, num_samples: usize) -> Result<u32, RadioError> {
        if self.shared.is_none() {
            return Err(RadioError::NotOpen);
        }
        if !self.is_streaming() {
            self.start()?;
        }
        let shared = self.shared.as_ref().ok_or(RadioError::NotOpen)?;

        let mut guard = lock(&shared.data_lock);
        loop {
            if shared.shutdown.is_requested() {
                return Err(RadioError::Shutdown);
            }
            if shared.ring.data_available() >= num_samples
                || !shared.streaming.load(Ordering::Acquire)
            {
                break;
            }
            let (g, _timeout) = shared
                .data_ready
                .wait_timeout(guard, FILL_POLL)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard = g;
        }
        drop(guard);

        if !shared.streaming.load(Ordering::Acquire) {
            return Err(RadioError::Shutdown);
        }
        Ok(shared.overflow.swap(0, Ordering::AcqRel))
    }

    /// Empty the ring buffer and clear the overflow count.
    pub fn flush(&mut self) {
        if let Some(shared) = &self.shared {
            shared.ring.flush();
            shared.overflow.store(0, Ordering::Release);
        }
    }

    /// The ring buffer holding resampled output, available once open.
    pub fn buffer(&self) -> Option<&MagicBuffer<IqSample>> {
        self.shared.as_deref().map(|s| &s.ring)
    }

    /// Output sample rate in Hz (the GSM symbol rate).
    pub fn sample_rate(&self) -> f64 {
        GSM_SYMBOL_RATE
    }

    /// Currently tuned centre frequency in Hz.
    pub fn center_freq(&self) -> f64 {
        self.center_freq
    }

    /// Whether the worker is currently streaming.
    pub fn is_streaming(&self) -> bool {
        self.shared
            .as_ref()
            .map(|s| s.streaming.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

impl Drop for SampleSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Producer loop: refill, convert, resample, hand off.
fn worker_loop(shared: Arc<Shared>, driver: Arc<Mutex<Box<dyn SdrDriver>>>) {
    let mut conv: Vec<Complex32> = Vec::new();
    let mut out = vec![Complex32::new(0.0, 0.0); BATCH_SIZE];

    while shared.streaming.load(Ordering::Acquire) && !shared.shutdown.is_requested() {
        // Refill and convert under the driver lock; the lock is released
        // before the resampler runs so attribute writes can interleave.
        {
            let mut drv = lock(&driver);
            match drv.refill() {
                Ok(chunk) => {
                    conv.clear();
                    conv.extend(chunk.iter().map(|pair| {
                        Complex32::new(pair[0] as f32 * ADC_SCALE, pair[1] as f32 * ADC_SCALE)
                    }));
                }
                Err(e) => {
                    warn!("driver refill failed, stopping worker: {}", e);
                    break;
                }
            }
        }

        // A driver chunk may be larger than one batch; loop so nothing is
        // dropped on the input side.
        for slice in conv.chunks(BATCH_SIZE) {
            let produced = lock(&shared.resampler).process(slice, &mut out);
            if produced == 0 {
                continue;
            }

            match shared.data_lock.try_lock() {
                Ok(guard) => {
                    let written = shared.ring.write(&out[..produced]);
                    if written < produced {
                        shared
                            .overflow
                            .fetch_add((produced - written) as u32, Ordering::AcqRel);
                    }
                    drop(guard);
                    shared.data_ready.notify_one();
                }
                Err(TryLockError::WouldBlock) | Err(TryLockError::Poisoned(_)) => {
                    // Consumer holds the handoff lock; drop the batch
                    // rather than miss the driver deadline.
                    shared
                        .overflow
                        .fetch_add(produced as u32, Ordering::AcqRel);
                }
            }
        }
    }

    shared.streaming.store(false, Ordering::Release);
    shared.data_ready.notify_all();
    debug!("worker thread exited");
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
