//! Audio output device
//!
//! One output device is shared by the whole process. [`shared_output`]
//! creates it on first use and hands the same instance to every caller
//! until its device thread exits.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SampleRate, SizedSample, StreamConfig};

use super::{AudioUnit, Mixer, OUTPUT_SAMPLE_RATE};
use crate::{Error, Result};

/// Callback run when a unit finishes playing on its own
pub type EndedCallback = Box<dyn FnOnce() + Send>;

/// A unit queued on an output device
pub struct ScheduledUnit {
    pub id: u64,
    pub unit: AudioUnit,
    /// Device time in seconds at which playback begins
    pub start_at: f64,
    pub stopped: Arc<AtomicBool>,
    /// Invoked once on natural completion, never after a stop
    pub on_ended: EndedCallback,
}

impl ScheduledUnit {
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ScheduledUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledUnit")
            .field("id", &self.id)
            .field("start_at", &self.start_at)
            .field("duration", &self.unit.duration())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

/// An output device with a monotonic clock
pub trait OutputDevice: Send + Sync {
    /// Device clock in seconds
    fn current_time(&self) -> f64;

    /// Queue a unit to play at its start time
    ///
    /// # Errors
    ///
    /// Returns error if the device is no longer running
    fn submit(&self, scheduled: ScheduledUnit) -> Result<()>;
}

/// Output device backed by a cpal stream on a dedicated thread
pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    clock: Arc<AtomicU64>,
    sample_rate: u32,
    alive: Arc<AtomicBool>,
    shutdown: mpsc::Sender<()>,
}

impl CpalOutput {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no output device or usable config is available
    pub fn open() -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(u32, u16)>>(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let alive = Arc::new(AtomicBool::new(true));
        let slot: Arc<Mutex<Option<Arc<Mutex<Mixer>>>>> = Arc::new(Mutex::new(None));

        let thread_slot = Arc::clone(&slot);
        let thread_alive = Arc::clone(&alive);
        let error_shutdown = shutdown_tx.clone();

        thread::Builder::new()
            .name("kitchen-voice-output".to_string())
            .spawn(move || {
                let stream = match build_output_stream(&thread_slot, error_shutdown) {
                    Ok((stream, format)) => {
                        let _ = ready_tx.send(Ok(format));
                        stream
                    }
                    Err(e) => {
                        thread_alive.store(false, Ordering::Release);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Park until shutdown or a stream error
                let _ = shutdown_rx.recv();
                drop(stream);
                thread_alive.store(false, Ordering::Release);
                tracing::debug!("audio output stopped");
            })?;

        let (sample_rate, channels) = ready_rx
            .recv()
            .map_err(|_| Error::Audio("output thread exited during setup".to_string()))??;

        let mixer = slot
            .lock()
            .map_err(|_| Error::Audio("output state poisoned".to_string()))?
            .clone()
            .ok_or_else(|| Error::Audio("output mixer missing".to_string()))?;
        let clock = mixer
            .lock()
            .map_err(|_| Error::Audio("output mixer poisoned".to_string()))?
            .clock();

        tracing::debug!(sample_rate, channels, "audio output initialized");

        Ok(Self {
            mixer,
            clock,
            sample_rate,
            alive,
            shutdown: shutdown_tx,
        })
    }

    /// Whether the device thread is still running
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl OutputDevice for CpalOutput {
    #[allow(clippy::cast_precision_loss)]
    fn current_time(&self) -> f64 {
        self.clock.load(Ordering::Acquire) as f64 / f64::from(self.sample_rate)
    }

    fn submit(&self, scheduled: ScheduledUnit) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::Audio("output device is closed".to_string()));
        }
        self.mixer
            .lock()
            .map_err(|_| Error::Audio("output mixer poisoned".to_string()))?
            .push(scheduled);
        Ok(())
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

static SHARED_OUTPUT: Mutex<Option<Arc<CpalOutput>>> = Mutex::new(None);

/// Get the process-wide output device, creating it on first use
///
/// An existing device is reused while its thread is alive.
///
/// # Errors
///
/// Returns error if the device has to be created and cannot be opened
pub fn shared_output() -> Result<Arc<CpalOutput>> {
    let mut slot = SHARED_OUTPUT
        .lock()
        .map_err(|_| Error::Audio("output registry poisoned".to_string()))?;

    if let Some(output) = slot.as_ref().filter(|o| o.is_alive()) {
        return Ok(Arc::clone(output));
    }

    if slot.is_some() {
        tracing::warn!("audio output thread exited, reopening device");
    }

    let output = Arc::new(CpalOutput::open()?);
    *slot = Some(Arc::clone(&output));
    Ok(output)
}

/// Build and start the output stream, publishing its mixer into `slot`
fn build_output_stream(
    slot: &Arc<Mutex<Option<Arc<Mutex<Mixer>>>>>,
    error_shutdown: mpsc::Sender<()>,
) -> Result<(cpal::Stream, (u32, u16))> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let preferred = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() <= 2
                && c.min_sample_rate() <= SampleRate(OUTPUT_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(OUTPUT_SAMPLE_RATE)
        })
        .map(|c| c.with_sample_rate(SampleRate(OUTPUT_SAMPLE_RATE)));

    let supported = match preferred {
        Some(config) => config,
        None => device
            .default_output_config()
            .map_err(|e| Error::Audio(e.to_string()))?,
    };

    let sample_format = supported.sample_format();
    let config = supported.config();
    let mixer = Arc::new(Mutex::new(Mixer::new(config.sample_rate.0, config.channels)));

    *slot
        .lock()
        .map_err(|_| Error::Audio("output state poisoned".to_string()))? = Some(Arc::clone(&mixer));

    let stream = match sample_format {
        SampleFormat::F32 => open_stream::<f32>(&device, &config, mixer, error_shutdown),
        SampleFormat::I16 => open_stream::<i16>(&device, &config, mixer, error_shutdown),
        SampleFormat::U16 => open_stream::<u16>(&device, &config, mixer, error_shutdown),
        other => Err(Error::Audio(format!("unsupported output sample format {other:?}"))),
    }?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        "audio output stream started"
    );

    Ok((stream, (config.sample_rate.0, config.channels)))
}

fn open_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
    error_shutdown: mpsc::Sender<()>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);

                let finished = match mixer.lock() {
                    Ok(mut mixer) => mixer.render(&mut scratch),
                    Err(_) => {
                        scratch.fill(0.0);
                        Vec::new()
                    }
                };

                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(sample);
                }

                // Completion callbacks run outside the mixer lock
                for on_ended in finished {
                    on_ended();
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio output error");
                let _ = error_shutdown.send(());
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}
