//! Live voice session state machine
//!
//! ```text
//! Idle ──open()──▶ Connecting ──link + mic──▶ Active ──close / remote close──▶ Closing ──▶ Closed
//!                      │                                                          ▲
//!                      └──────────── handshake or microphone failure ─────────────┘
//! ```
//!
//! Once `Active`, a single task owns the session and processes inbound
//! events, microphone frames and close requests strictly one at a time.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::Instrument;
use uuid::Uuid;

use super::{InboundEvent, LinkEvent, LiveConnector, LiveLink, OutboundFrame, SessionObserver, TurnBuffer};
use crate::audio::capture::DEFAULT_BLOCK_SIZE;
use crate::audio::{
    CaptureStream, Microphone, OUTPUT_SAMPLE_RATE, PlaybackScheduler, decode_transport,
    pcm16_to_float_samples,
};
use crate::{Error, Result};

/// Lifecycle of a live session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closing,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Drives one voice conversation from `Idle` to `Closed`
///
/// The controller is consumed by [`open`](Self::open); a closed session
/// cannot be reopened.
pub struct LiveSessionController {
    id: Uuid,
    connector: Arc<dyn LiveConnector>,
    microphone: Arc<dyn Microphone>,
    scheduler: Arc<PlaybackScheduler>,
    block_size: usize,
    state: watch::Sender<SessionState>,
}

impl LiveSessionController {
    #[must_use]
    pub fn new(
        connector: Arc<dyn LiveConnector>,
        microphone: Arc<dyn Microphone>,
        scheduler: Arc<PlaybackScheduler>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            id: Uuid::new_v4(),
            connector,
            microphone,
            scheduler,
            block_size: DEFAULT_BLOCK_SIZE,
            state,
        }
    }

    /// Samples per outbound microphone frame
    #[must_use]
    pub const fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions, including those made during `open`
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Connect, acquire the microphone and start the session
    ///
    /// All playing audio is stopped before connecting.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailed` if the handshake fails, or
    /// `PermissionDenied` if the microphone cannot be opened. The session
    /// is `Closed` in both cases.
    pub async fn open(self, observer: Arc<dyn SessionObserver>) -> Result<LiveSession> {
        let span = tracing::info_span!("live_session", session = %self.id);
        self.open_inner(observer).instrument(span).await
    }

    async fn open_inner(self, observer: Arc<dyn SessionObserver>) -> Result<LiveSession> {
        self.transition(SessionState::Connecting);
        self.scheduler.stop_all();

        let (mut link, inbound) = match self.connector.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(error = %e, "live connection failed");
                self.transition(SessionState::Closed);
                return Err(match e {
                    Error::ConnectionFailed(_) => e,
                    other => Error::ConnectionFailed(other.to_string()),
                });
            }
        };

        if let Err(e) = self.scheduler.prepare().await {
            tracing::warn!(error = %e, "audio output unavailable");
        }

        let (frame_tx, frames) = mpsc::unbounded_channel::<Vec<u8>>();
        let microphone = Arc::clone(&self.microphone);
        let block_size = self.block_size;
        // Device setup waits on the capture thread
        let opened = tokio::task::spawn_blocking(move || {
            CaptureStream::open(microphone.as_ref(), block_size, move |frame| {
                let _ = frame_tx.send(frame);
            })
        })
        .await
        .unwrap_or_else(|e| Err(Error::Audio(format!("capture task failed: {e}"))));

        let capture = match opened {
            Ok(capture) => capture,
            Err(e) => {
                tracing::warn!(error = %e, "microphone unavailable");
                if let Err(close_err) = link.close().await {
                    tracing::debug!(error = %close_err, "failed to close link after microphone error");
                }
                self.transition(SessionState::Closed);
                return Err(match e {
                    Error::PermissionDenied(_) => e,
                    other => Error::PermissionDenied(other.to_string()),
                });
            }
        };

        self.transition(SessionState::Active);
        tracing::info!("live session active");

        let (commands, command_rx) = mpsc::unbounded_channel();
        let state = self.state.subscribe();
        let span = tracing::Span::current();

        let actor = SessionActor {
            scheduler: self.scheduler,
            observer,
            link,
            capture: Some(capture),
            inbound,
            frames,
            commands: command_rx,
            turn: TurnBuffer::new(),
            state: self.state,
            send_failures: 0,
        };
        tokio::spawn(actor.run().instrument(span));

        Ok(LiveSession {
            id: self.id,
            commands,
            state,
        })
    }

    fn transition(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        tracing::debug!(from = %previous, to = %next, "session state");
    }
}

enum Command {
    Close(oneshot::Sender<()>),
}

/// Handle to an open live session
///
/// Dropping the handle closes the session.
#[derive(Debug)]
pub struct LiveSession {
    id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
}

impl LiveSession {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Tear the session down
    ///
    /// Resolves once capture, connection and playback are stopped. Safe to
    /// call repeatedly and from any state; never fails.
    pub async fn close(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Close(ack_tx)).is_err() {
            return;
        }
        // A dropped ack means the session finished closing on another path
        let _ = ack_rx.await;
    }

    /// Wait until the session reaches `Closed`
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Close(_) => f.write_str("Close"),
        }
    }
}

/// Why the session is ending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Local,
    Remote,
    TransportError,
}

struct SessionActor {
    scheduler: Arc<PlaybackScheduler>,
    observer: Arc<dyn SessionObserver>,
    link: Box<dyn LiveLink>,
    capture: Option<CaptureStream>,
    inbound: mpsc::Receiver<LinkEvent>,
    frames: mpsc::UnboundedReceiver<Vec<u8>>,
    commands: mpsc::UnboundedReceiver<Command>,
    turn: TurnBuffer,
    state: watch::Sender<SessionState>,
    send_failures: u64,
}

impl SessionActor {
    async fn run(mut self) {
        let (reason, ack) = loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Close(ack)) => break (CloseReason::Local, Some(ack)),
                    None => break (CloseReason::Local, None),
                },

                event = self.inbound.recv() => match event {
                    Some(LinkEvent::Inbound(event)) => self.handle_event(event).await,
                    Some(LinkEvent::Closed(reason)) => {
                        tracing::info!(reason = reason.as_deref().unwrap_or(""), "remote closed session");
                        break (CloseReason::Remote, None);
                    }
                    Some(LinkEvent::Failed(error)) => {
                        tracing::warn!(%error, "live transport failed");
                        self.observer.on_error(&Error::ConnectionFailed(error));
                        break (CloseReason::TransportError, None);
                    }
                    None => break (CloseReason::Remote, None),
                },

                Some(frame) = self.frames.recv() => self.send_frame(frame).await,
            }
        };

        self.teardown(reason).await;
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    async fn handle_event(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::AudioChunk { data, sample_rate } => {
                self.play_chunk(&data, sample_rate.unwrap_or(OUTPUT_SAMPLE_RATE))
                    .await;
            }
            InboundEvent::ModelTextFragment(text) => {
                self.turn.push(&text);
                self.observer.on_partial_text(&text, true);
            }
            InboundEvent::UserTextFragment(text) => {
                self.observer.on_partial_text(&text, false);
            }
            InboundEvent::TurnComplete => {
                if let Some(text) = self.turn.complete() {
                    self.observer.on_turn_complete(&text);
                }
            }
            InboundEvent::Interrupted => {
                tracing::debug!("interrupted, discarding queued playback");
                self.scheduler.stop_all();
                self.turn.clear();
            }
        }
    }

    /// Decode and schedule one chunk; a bad chunk is dropped
    async fn play_chunk(&mut self, data: &str, sample_rate: u32) {
        let unit = match decode_transport(data)
            .and_then(|pcm| pcm16_to_float_samples(&pcm, 1, sample_rate))
        {
            Ok(unit) => unit,
            Err(e) => {
                if e.is_chunk_local() {
                    tracing::warn!(error = %e, "dropping malformed audio chunk");
                } else {
                    tracing::warn!(error = %e, sample_rate, "dropping undecodable audio chunk");
                }
                self.observer.on_error(&e);
                return;
            }
        };

        if unit.is_empty() {
            return;
        }

        let scheduled = match self.scheduler.prepare().await {
            Ok(()) => self.scheduler.play_sequential(unit),
            Err(e) => Err(e),
        };

        match scheduled {
            Ok(_) => self.observer.on_audio_start(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to schedule audio chunk");
                self.observer.on_error(&e);
            }
        }
    }

    async fn send_frame(&mut self, pcm: Vec<u8>) {
        match self.link.send(OutboundFrame::from_pcm(&pcm)).await {
            Ok(()) => self.send_failures = 0,
            Err(e) => {
                self.send_failures += 1;
                if self.send_failures == 1 || self.send_failures % 50 == 0 {
                    tracing::warn!(error = %e, failures = self.send_failures, "failed to send audio frame");
                }
                let error = match e {
                    Error::TransportSendFailure(_) => e,
                    other => Error::TransportSendFailure(other.to_string()),
                };
                self.observer.on_error(&error);
            }
        }
    }

    /// Capture, then connection, then playback; each step runs regardless
    async fn teardown(&mut self, reason: CloseReason) {
        self.state.send_replace(SessionState::Closing);
        tracing::debug!(?reason, "closing live session");

        if let Some(mut capture) = self.capture.take() {
            // Releasing the device joins the capture thread
            if let Err(e) = tokio::task::spawn_blocking(move || capture.close()).await {
                tracing::warn!(error = %e, "capture shutdown task failed");
            }
        }

        if let Err(e) = self.link.close().await {
            tracing::debug!(error = %e, "error closing live link");
        }

        self.scheduler.stop_all();
        self.turn.clear();

        self.state.send_replace(SessionState::Closed);
        tracing::info!("live session closed");
        self.observer.on_close();
    }
}
