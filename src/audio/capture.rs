//! Audio capture from microphone
//!
//! A [`CaptureStream`] turns raw microphone samples into fixed-size PCM16
//! frames and hands each one to a callback as soon as it is complete.

use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SampleRate, SizedSample, StreamConfig};

use super::{CAPTURE_SAMPLE_RATE, float_samples_to_pcm16};
use crate::{Error, Result};

/// Samples per outbound frame by default
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Receives mono samples from a microphone
pub type SampleSink = Box<dyn FnMut(&[f32]) + Send>;

type FrameSink = Box<dyn FnMut(Vec<u8>) + Send>;

/// A source of mono microphone samples at [`CAPTURE_SAMPLE_RATE`]
pub trait Microphone: Send + Sync {
    /// Start delivering samples to `sink`
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if the device is unavailable or access
    /// is refused
    fn open(&self, sink: SampleSink) -> Result<Box<dyn InputStream>>;
}

/// A running microphone stream
pub trait InputStream: Send {
    /// Stop delivery and release the device
    fn stop(&mut self);
}

/// Live microphone capture producing PCM16 frames
pub struct CaptureStream {
    input: Option<Box<dyn InputStream>>,
    gate: Arc<Mutex<Option<FrameSink>>>,
    block_size: usize,
}

impl CaptureStream {
    /// Open the microphone and start producing frames
    ///
    /// `on_frame` receives one block of `block_size` samples as PCM16 bytes
    /// per call, until [`close`](Self::close).
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if the microphone cannot be opened
    pub fn open<F>(microphone: &dyn Microphone, block_size: usize, on_frame: F) -> Result<Self>
    where
        F: FnMut(Vec<u8>) + Send + 'static,
    {
        let block_size = block_size.max(1);
        let gate: Arc<Mutex<Option<FrameSink>>> = Arc::new(Mutex::new(Some(Box::new(on_frame))));

        let sink_gate = Arc::clone(&gate);
        let mut assembler = FrameAssembler::new(block_size);
        let sink: SampleSink = Box::new(move |samples| {
            assembler.push(samples, |frame| {
                if let Ok(mut gate) = sink_gate.lock() {
                    if let Some(on_frame) = gate.as_mut() {
                        on_frame(frame);
                    }
                }
            });
        });

        let input = microphone.open(sink)?;
        tracing::debug!(block_size, "capture stream opened");

        Ok(Self {
            input: Some(input),
            gate,
            block_size,
        })
    }

    /// Stop capture and release the microphone
    ///
    /// No frame callback runs after this returns. Idempotent.
    pub fn close(&mut self) {
        // Waits for an in-flight callback to finish
        match self.gate.lock() {
            Ok(mut gate) => {
                gate.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }

        if let Some(mut input) = self.input.take() {
            input.stop();
            tracing::debug!("capture stream closed");
        }
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.input.is_some()
    }

    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Splits a continuous sample stream into fixed-size PCM16 frames
struct FrameAssembler {
    block_size: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    fn new(block_size: usize) -> Self {
        Self {
            block_size,
            pending: Vec::with_capacity(block_size * 2),
        }
    }

    fn push(&mut self, samples: &[f32], mut emit: impl FnMut(Vec<u8>)) {
        self.pending.extend_from_slice(samples);
        let mut offset = 0;
        while self.pending.len() - offset >= self.block_size {
            emit(float_samples_to_pcm16(
                &self.pending[offset..offset + self.block_size],
            ));
            offset += self.block_size;
        }
        self.pending.drain(..offset);
    }
}

/// Microphone backed by the default cpal input device
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Microphone for CpalMicrophone {
    fn open(&self, sink: SampleSink) -> Result<Box<dyn InputStream>> {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("kitchen-voice-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(sink) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = shutdown_rx.recv();
                drop(stream);
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::PermissionDenied("capture thread exited during setup".to_string()))??;

        Ok(Box::new(CpalInputStream {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        }))
    }
}

struct CpalInputStream {
    shutdown: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl InputStream for CpalInputStream {
    fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("capture thread panicked");
            }
        }
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_input_stream(sink: SampleSink) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::PermissionDenied("no input device available".to_string()))?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| Error::PermissionDenied(e.to_string()))?
        .filter(|c| {
            c.min_sample_rate() <= SampleRate(CAPTURE_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(CAPTURE_SAMPLE_RATE)
        })
        .min_by_key(cpal::SupportedStreamConfigRange::channels)
        .ok_or_else(|| Error::Audio("no 16kHz input config found".to_string()))?
        .with_sample_rate(SampleRate(CAPTURE_SAMPLE_RATE));

    let sample_format = supported.sample_format();
    let config = supported.config();

    let stream = match sample_format {
        SampleFormat::F32 => open_stream::<f32>(&device, &config, sink),
        SampleFormat::I16 => open_stream::<i16>(&device, &config, sink),
        SampleFormat::U16 => open_stream::<u16>(&device, &config, sink),
        other => Err(Error::Audio(format!("unsupported input sample format {other:?}"))),
    }?;

    stream
        .play()
        .map_err(|e| Error::PermissionDenied(e.to_string()))?;

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate = CAPTURE_SAMPLE_RATE,
        channels = config.channels,
        "audio capture started"
    );

    Ok(stream)
}

fn open_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut sink: SampleSink,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    let mut mono: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                mono.clear();
                #[allow(clippy::cast_precision_loss)]
                mono.extend(data.chunks(channels).map(|frame| {
                    frame.iter().map(|&s| f32::from_sample(s)).sum::<f32>() / frame.len() as f32
                }));
                sink(&mono);
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::PermissionDenied(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_emits_whole_blocks() {
        let mut assembler = FrameAssembler::new(4);
        let mut frames = Vec::new();

        assembler.push(&[0.0; 3], |f| frames.push(f));
        assert!(frames.is_empty());

        assembler.push(&[0.0; 6], |f| frames.push(f));
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 8));
        assert_eq!(assembler.pending.len(), 1);
    }

    #[test]
    fn test_assembler_preserves_sample_order() {
        let mut assembler = FrameAssembler::new(2);
        let mut frames = Vec::new();
        assembler.push(&[0.5], |f| frames.push(f));
        assembler.push(&[-0.5, 0.25], |f| frames.push(f));

        assert_eq!(frames, vec![float_samples_to_pcm16(&[0.5, -0.5])]);
        assert_eq!(assembler.pending, vec![0.25]);
    }
}
