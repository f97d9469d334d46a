//! Shared test utilities
//!
//! In-memory stand-ins for the audio devices and the remote service so the
//! voice engine can be driven without hardware or network.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use kitchen_voice::audio::{
    InputStream, Microphone, OutputDevice, SampleSink, ScheduledUnit, encode_bytes_to_transport,
    float_samples_to_pcm16,
};
use kitchen_voice::live::{InboundEvent, LinkEvent, LiveConnector, LiveLink, OutboundFrame};
use kitchen_voice::{Error, Result, SessionObserver, SpeechSynthesizer, SynthesizedAudio};

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// PCM16 bytes for `frames` mono samples of a constant level
pub fn pcm_frames(frames: usize, level: f32) -> Vec<u8> {
    float_samples_to_pcm16(&vec![level; frames])
}

/// Inbound audio chunk of `frames` mono samples at 24 kHz
pub fn audio_chunk(frames: usize) -> InboundEvent {
    InboundEvent::audio(&pcm_frames(frames, 0.25))
}

/// Background task counting 10 ms ticks while the runtime stays responsive
pub struct Ticker {
    ticks: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl Ticker {
    pub fn start() -> Self {
        let ticks = Arc::new(AtomicUsize::new(0));
        let task = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        Self { ticks, task }
    }

    pub fn count(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// Output

/// A unit as it was handed to the device
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: u64,
    pub start_at: f64,
    pub duration: f64,
    pub samples: Vec<f32>,
    stopped: Arc<AtomicBool>,
}

impl Submission {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct ManualState {
    now: f64,
    pending: Vec<ScheduledUnit>,
    submissions: Vec<Submission>,
    fail_submit: bool,
}

/// Output device whose clock only moves when the test says so
#[derive(Default)]
pub struct ManualOutput {
    state: Mutex<ManualState>,
}

impl ManualOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Move the clock forward and finish every unit that has played out
    pub fn advance(&self, seconds: f64) {
        let finished = {
            let mut state = self.state.lock().unwrap();
            state.now += seconds;
            let now = state.now;
            let (done, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition(|s| s.is_stopped() || s.start_at + s.unit.duration() <= now + 1e-9);
            state.pending = pending;
            done
        };

        for scheduled in finished {
            if !scheduled.is_stopped() {
                (scheduled.on_ended)();
            }
        }
    }

    pub fn set_fail_submit(&self, fail: bool) {
        self.state.lock().unwrap().fail_submit = fail;
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().unwrap().submissions.clone()
    }

    /// Units neither stopped nor finished
    pub fn audible(&self) -> Vec<Submission> {
        let state = self.state.lock().unwrap();
        state
            .pending
            .iter()
            .filter(|s| !s.is_stopped())
            .filter_map(|s| state.submissions.iter().find(|sub| sub.id == s.id).cloned())
            .collect()
    }
}

impl OutputDevice for ManualOutput {
    fn current_time(&self) -> f64 {
        self.state.lock().unwrap().now
    }

    fn submit(&self, scheduled: ScheduledUnit) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_submit {
            return Err(Error::Audio("device unavailable".to_string()));
        }
        state.submissions.push(Submission {
            id: scheduled.id,
            start_at: scheduled.start_at,
            duration: scheduled.unit.duration(),
            samples: scheduled.unit.samples().to_vec(),
            stopped: Arc::clone(&scheduled.stopped),
        });
        state.pending.push(scheduled);
        Ok(())
    }
}

// Microphone

/// Microphone fed by the test through [`FakeMicrophone::push`]
#[derive(Default)]
pub struct FakeMicrophone {
    sink: Arc<Mutex<Option<SampleSink>>>,
    deny: bool,
    latency: Duration,
    opens: AtomicUsize,
}

impl FakeMicrophone {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A microphone that refuses access
    pub fn denying() -> Arc<Self> {
        Arc::new(Self {
            deny: true,
            ..Self::default()
        })
    }

    /// A microphone whose open and stop each block the caller for `latency`
    pub fn slow(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::default()
        })
    }

    /// Deliver samples as the device thread would; false if not streaming
    pub fn push(&self, samples: &[f32]) -> bool {
        let mut sink = self.sink.lock().unwrap();
        match sink.as_mut() {
            Some(sink) => {
                sink(samples);
                true
            }
            None => false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl Microphone for FakeMicrophone {
    fn open(&self, sink: SampleSink) -> Result<Box<dyn InputStream>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.latency);
        if self.deny {
            return Err(Error::PermissionDenied("user declined".to_string()));
        }
        *self.sink.lock().unwrap() = Some(sink);
        Ok(Box::new(FakeInputStream {
            sink: Arc::clone(&self.sink),
            latency: self.latency,
        }))
    }
}

struct FakeInputStream {
    sink: Arc<Mutex<Option<SampleSink>>>,
    latency: Duration,
}

impl InputStream for FakeInputStream {
    fn stop(&mut self) {
        std::thread::sleep(self.latency);
        self.sink.lock().unwrap().take();
    }
}

// Remote service

#[derive(Default)]
struct LinkShared {
    inbound: Mutex<Option<mpsc::Sender<LinkEvent>>>,
    sent: Mutex<Vec<OutboundFrame>>,
    fail_send: AtomicBool,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

/// Connector whose remote side is scripted by the test
#[derive(Default)]
pub struct ScriptedConnector {
    shared: Arc<LinkShared>,
    fail_connect: bool,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A connector whose handshake always fails
    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            fail_connect: true,
            ..Self::default()
        })
    }

    async fn deliver(&self, event: LinkEvent) -> bool {
        let sender = self.shared.inbound.lock().unwrap().clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Push an event from the remote party
    pub async fn emit(&self, event: InboundEvent) -> bool {
        self.deliver(LinkEvent::Inbound(event)).await
    }

    pub async fn remote_close(&self) -> bool {
        self.deliver(LinkEvent::Closed(Some("bye".to_string()))).await
    }

    pub async fn fail_transport(&self, message: &str) -> bool {
        self.deliver(LinkEvent::Failed(message.to_string())).await
    }

    pub fn sent(&self) -> Vec<OutboundFrame> {
        self.shared.sent.lock().unwrap().clone()
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.shared.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiveConnector for ScriptedConnector {
    async fn connect(&self) -> Result<(Box<dyn LiveLink>, mpsc::Receiver<LinkEvent>)> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(Error::ConnectionFailed("handshake rejected".to_string()));
        }

        let (tx, rx) = mpsc::channel(64);
        *self.shared.inbound.lock().unwrap() = Some(tx);
        Ok((
            Box::new(ScriptedLink {
                shared: Arc::clone(&self.shared),
            }),
            rx,
        ))
    }
}

struct ScriptedLink {
    shared: Arc<LinkShared>,
}

#[async_trait]
impl LiveLink for ScriptedLink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<()> {
        if self.shared.fail_send.load(Ordering::SeqCst) {
            return Err(Error::TransportSendFailure("socket closed".to_string()));
        }
        self.shared.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// Synthesis

/// Synthesizer returning prepared responses in order
#[derive(Default)]
pub struct CannedSynthesizer {
    responses: Mutex<VecDeque<Result<Option<SynthesizedAudio>>>>,
    delay: Option<Duration>,
    requests: Mutex<Vec<String>>,
}

impl CannedSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a PCM16 response at 24 kHz
    pub fn with_pcm(self, pcm: &[u8]) -> Self {
        self.with_response(Ok(Some(SynthesizedAudio {
            data: encode_bytes_to_transport(pcm),
            mime_type: Some("audio/L16;codec=pcm;rate=24000".to_string()),
        })))
    }

    pub fn with_response(self, response: Result<Option<SynthesizedAudio>>) -> Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    /// Hold every request for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for CannedSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Option<SynthesizedAudio>> {
        self.requests.lock().unwrap().push(text.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }
}

// Observer

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Partial { text: String, is_model: bool },
    TurnComplete(String),
    AudioStart,
    Error(String),
    Close,
}

/// Observer that records every callback
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Observed>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Observed> {
        self.events.lock().unwrap().clone()
    }

    pub fn turns(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Observed::TurnComplete(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Observed) -> usize {
        self.events().iter().filter(|e| *e == wanted).count()
    }

    pub fn errors(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Observed::Error(_)))
            .count()
    }

    fn record(&self, event: Observed) {
        self.events.lock().unwrap().push(event);
    }
}

impl SessionObserver for RecordingObserver {
    fn on_partial_text(&self, text: &str, is_model: bool) {
        self.record(Observed::Partial {
            text: text.to_string(),
            is_model,
        });
    }

    fn on_turn_complete(&self, full_text: &str) {
        self.record(Observed::TurnComplete(full_text.to_string()));
    }

    fn on_close(&self) {
        self.record(Observed::Close);
    }

    fn on_audio_start(&self) {
        self.record(Observed::AudioStart);
    }

    fn on_error(&self, error: &Error) {
        self.record(Observed::Error(error.to_string()));
    }
}
