//! Live session integration tests
//!
//! Drives the session state machine through a scripted remote party and a
//! push-driven microphone

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use kitchen_voice::audio::{
    AudioUnit, CaptureStream, OUTPUT_SAMPLE_RATE, decode_transport, encode_bytes_to_transport,
};
use kitchen_voice::live::InboundEvent;
use kitchen_voice::{
    Error, LiveSession, LiveSessionController, PlaybackScheduler, SessionState, VoiceEngine,
};

mod common;

use common::{
    CannedSynthesizer, FakeMicrophone, ManualOutput, Observed, RecordingObserver,
    ScriptedConnector, Ticker, audio_chunk, pcm_frames, wait_until,
};

const EPSILON: f64 = 1e-9;
const BLOCK: usize = 4;

struct Harness {
    output: Arc<ManualOutput>,
    scheduler: Arc<PlaybackScheduler>,
    connector: Arc<ScriptedConnector>,
    microphone: Arc<FakeMicrophone>,
    observer: Arc<RecordingObserver>,
}

impl Harness {
    fn new() -> Self {
        let output = ManualOutput::new();
        Self {
            scheduler: Arc::new(PlaybackScheduler::new(output.clone())),
            output,
            connector: ScriptedConnector::new(),
            microphone: FakeMicrophone::new(),
            observer: RecordingObserver::new(),
        }
    }

    fn controller(&self) -> LiveSessionController {
        LiveSessionController::new(
            self.connector.clone(),
            self.microphone.clone(),
            self.scheduler.clone(),
        )
        .with_block_size(BLOCK)
    }

    async fn open(&self) -> LiveSession {
        self.controller().open(self.observer.clone()).await.unwrap()
    }

    async fn submissions_reach(&self, count: usize) -> bool {
        wait_until(|| self.output.submissions().len() >= count).await
    }
}

#[tokio::test]
async fn test_open_reaches_active() {
    let h = Harness::new();
    let controller = h.controller();
    assert_eq!(controller.state(), SessionState::Idle);

    let session = controller.open(h.observer.clone()).await.unwrap();

    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(h.connector.connect_count(), 1);
    assert!(h.microphone.is_streaming());
}

#[tokio::test]
async fn test_open_stops_playing_audio() {
    let h = Harness::new();
    let unit = AudioUnit::mono(vec![0.0; 24_000], OUTPUT_SAMPLE_RATE).unwrap();
    let earlier = h.scheduler.play_sequential(unit).unwrap();

    let _session = h.open().await;

    assert!(earlier.is_stopped());
    assert!(h.scheduler.is_idle());
}

#[tokio::test]
async fn test_handshake_failure_is_connection_failed() {
    let h = Harness::new();
    let controller = LiveSessionController::new(
        ScriptedConnector::refusing(),
        h.microphone.clone(),
        h.scheduler.clone(),
    );
    let mut states = controller.subscribe();

    let err = controller.open(h.observer.clone()).await.unwrap_err();

    assert!(matches!(err, Error::ConnectionFailed(_)));
    assert_eq!(*states.borrow_and_update(), SessionState::Closed);
    assert_eq!(h.microphone.open_count(), 0);
    assert!(h.observer.events().is_empty());
}

#[tokio::test]
async fn test_microphone_denied_closes_link() {
    let h = Harness::new();
    let controller = LiveSessionController::new(
        h.connector.clone(),
        FakeMicrophone::denying(),
        h.scheduler.clone(),
    );
    let states = controller.subscribe();

    let err = controller.open(h.observer.clone()).await.unwrap_err();

    assert!(matches!(err, Error::PermissionDenied(_)));
    assert_eq!(*states.borrow(), SessionState::Closed);
    assert_eq!(h.connector.close_count(), 1);
}

#[tokio::test]
async fn test_microphone_frames_are_sent() {
    let h = Harness::new();
    let _session = h.open().await;

    assert!(h.microphone.push(&[0.5, -0.5, 0.25]));
    assert!(h.microphone.push(&[0.0, 1.0, -1.0, 0.0, 0.5]));
    assert!(wait_until(|| h.connector.sent().len() == 2).await);

    let sent = h.connector.sent();
    assert!(sent.iter().all(|f| f.mime_type() == "audio/pcm;rate=16000"));

    let first = decode_transport(&sent[0].audio_frame).unwrap();
    assert_eq!(first.len(), BLOCK * 2);
    assert_eq!(&first[..2], &16384_i16.to_le_bytes());
}

#[tokio::test]
async fn test_normal_turn() {
    let h = Harness::new();
    let _session = h.open().await;

    h.connector.emit(audio_chunk(2_400)).await;
    h.connector.emit(InboundEvent::ModelTextFragment("Hello".to_string())).await;
    h.connector.emit(InboundEvent::ModelTextFragment(" there".to_string())).await;
    h.connector.emit(InboundEvent::TurnComplete).await;

    assert!(wait_until(|| h.observer.turns().len() == 1).await);
    assert_eq!(h.observer.turns(), vec!["Hello there".to_string()]);
    assert_eq!(h.observer.count(&Observed::AudioStart), 1);

    // Nothing carries into the next turn
    h.connector.emit(InboundEvent::TurnComplete).await;
    h.connector.emit(audio_chunk(2_400)).await;
    assert!(h.submissions_reach(2).await);
    assert!(wait_until(|| h.observer.count(&Observed::AudioStart) == 2).await);
    assert_eq!(h.observer.turns().len(), 1);
}

#[tokio::test]
async fn test_empty_turn_is_not_reported() {
    let h = Harness::new();
    let _session = h.open().await;

    h.connector.emit(InboundEvent::TurnComplete).await;
    h.connector.emit(InboundEvent::ModelTextFragment("  \n".to_string())).await;
    h.connector.emit(InboundEvent::TurnComplete).await;
    h.connector.emit(audio_chunk(240)).await;

    assert!(h.submissions_reach(1).await);
    assert!(wait_until(|| h.observer.count(&Observed::AudioStart) == 1).await);
    assert!(h.observer.turns().is_empty());
}

#[tokio::test]
async fn test_partial_text_is_tagged_by_speaker() {
    let h = Harness::new();
    let _session = h.open().await;

    h.connector.emit(InboundEvent::UserTextFragment("how long".to_string())).await;
    h.connector.emit(InboundEvent::ModelTextFragment("Ten minutes".to_string())).await;
    h.connector.emit(InboundEvent::TurnComplete).await;

    assert!(wait_until(|| h.observer.turns().len() == 1).await);
    assert_eq!(
        h.observer.events(),
        vec![
            Observed::Partial {
                text: "how long".to_string(),
                is_model: false,
            },
            Observed::Partial {
                text: "Ten minutes".to_string(),
                is_model: true,
            },
            Observed::TurnComplete("Ten minutes".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_chunks_play_back_to_back() {
    let h = Harness::new();
    let _session = h.open().await;

    for _ in 0..3 {
        h.connector.emit(audio_chunk(12_000)).await;
    }
    assert!(h.submissions_reach(3).await);

    let starts: Vec<f64> = h.output.submissions().iter().map(|s| s.start_at).collect();
    assert!((starts[0] - 0.0).abs() < EPSILON);
    assert!((starts[1] - 0.5).abs() < EPSILON);
    assert!((starts[2] - 1.0).abs() < EPSILON);
}

#[tokio::test]
async fn test_chunk_rate_from_payload() {
    let h = Harness::new();
    let _session = h.open().await;

    h.connector
        .emit(InboundEvent::AudioChunk {
            data: encode_bytes_to_transport(&pcm_frames(16_000, 0.1)),
            sample_rate: Some(16_000),
        })
        .await;
    assert!(h.submissions_reach(1).await);
    assert!((h.output.submissions()[0].duration - 1.0).abs() < EPSILON);
}

#[tokio::test]
async fn test_interrupted_discards_queued_playback() {
    let h = Harness::new();
    let _session = h.open().await;

    h.connector.emit(audio_chunk(24_000)).await;
    h.connector.emit(audio_chunk(24_000)).await;
    assert!(h.submissions_reach(2).await);
    assert!((h.scheduler.cursor() - 2.0).abs() < EPSILON);

    h.output.advance(0.5);
    h.connector.emit(InboundEvent::ModelTextFragment("stale".to_string())).await;
    h.connector.emit(InboundEvent::Interrupted).await;
    assert!(wait_until(|| h.scheduler.is_idle()).await);
    assert!(h.output.submissions().iter().all(common::Submission::was_stopped));

    h.connector.emit(InboundEvent::TurnComplete).await;
    h.connector.emit(audio_chunk(2_400)).await;
    assert!(h.submissions_reach(3).await);

    let fresh = &h.output.submissions()[2];
    assert!((fresh.start_at - 0.5).abs() < EPSILON);
    assert!(h.observer.turns().is_empty());
}

#[tokio::test]
async fn test_malformed_chunk_is_dropped() {
    let h = Harness::new();
    let session = h.open().await;

    h.connector.emit(audio_chunk(24_000)).await;
    assert!(h.submissions_reach(1).await);
    let cursor = h.scheduler.cursor();

    // Odd byte count
    h.connector
        .emit(InboundEvent::AudioChunk {
            data: encode_bytes_to_transport(&[1, 2, 3]),
            sample_rate: None,
        })
        .await;
    // Not base64
    h.connector
        .emit(InboundEvent::AudioChunk {
            data: "%%%".to_string(),
            sample_rate: None,
        })
        .await;

    assert!(wait_until(|| h.observer.errors() == 2).await);
    assert!((h.scheduler.cursor() - cursor).abs() < EPSILON);
    assert_eq!(h.output.submissions().len(), 1);

    // Session keeps going
    h.connector.emit(audio_chunk(2_400)).await;
    assert!(h.submissions_reach(2).await);
    assert_eq!(session.state(), SessionState::Active);
}

#[tokio::test]
async fn test_send_failures_do_not_end_session() {
    let h = Harness::new();
    let session = h.open().await;

    h.connector.set_fail_send(true);
    h.microphone.push(&[0.1; BLOCK * 3]);
    assert!(wait_until(|| h.observer.errors() == 3).await);
    assert_eq!(session.state(), SessionState::Active);

    h.connector.set_fail_send(false);
    h.microphone.push(&[0.1; BLOCK]);
    assert!(wait_until(|| h.connector.sent().len() == 1).await);
    assert_eq!(session.state(), SessionState::Active);
}

#[tokio::test]
async fn test_close_tears_everything_down() {
    let h = Harness::new();
    let session = h.open().await;

    h.connector.emit(audio_chunk(24_000)).await;
    h.connector.emit(InboundEvent::ModelTextFragment("half a".to_string())).await;
    assert!(h.submissions_reach(1).await);

    session.close().await;

    assert_eq!(session.state(), SessionState::Closed);
    assert!(!h.microphone.is_streaming());
    assert_eq!(h.connector.close_count(), 1);
    assert!(h.scheduler.is_idle());
    assert_eq!(h.observer.count(&Observed::Close), 1);
    assert!(h.observer.turns().is_empty());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let h = Harness::new();
    let session = h.open().await;

    session.close().await;
    session.close().await;
    session.closed().await;

    assert_eq!(h.connector.close_count(), 1);
    assert_eq!(h.observer.count(&Observed::Close), 1);
}

#[tokio::test]
async fn test_no_frames_after_close() {
    let h = Harness::new();
    let session = h.open().await;

    h.microphone.push(&[0.2; BLOCK * 2]);
    session.close().await;
    let sent = h.connector.sent().len();

    assert!(!h.microphone.push(&[0.2; BLOCK * 4]));
    tokio::task::yield_now().await;
    assert_eq!(h.connector.sent().len(), sent);
}

#[test]
fn test_capture_callback_silent_after_close() {
    let microphone = FakeMicrophone::new();
    let frames = Arc::new(AtomicUsize::new(0));

    let counter = frames.clone();
    let mut capture = CaptureStream::open(&*microphone, BLOCK, move |frame| {
        assert_eq!(frame.len(), BLOCK * 2);
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    microphone.push(&[0.3; BLOCK * 2 + 1]);
    assert_eq!(frames.load(Ordering::SeqCst), 2);

    capture.close();
    capture.close();
    assert!(!capture.is_open());

    microphone.push(&[0.3; BLOCK * 8]);
    assert_eq!(frames.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_remote_close_ends_session() {
    let h = Harness::new();
    let session = h.open().await;

    h.connector.remote_close().await;
    session.closed().await;

    assert_eq!(session.state(), SessionState::Closed);
    assert!(!h.microphone.is_streaming());
    assert_eq!(h.observer.count(&Observed::Close), 1);

    // Closing after the remote already did is harmless
    session.close().await;
    assert_eq!(h.observer.count(&Observed::Close), 1);
}

#[tokio::test]
async fn test_transport_failure_ends_session() {
    let h = Harness::new();
    let session = h.open().await;

    h.connector.fail_transport("connection reset").await;
    session.closed().await;

    assert_eq!(h.observer.errors(), 1);
    assert_eq!(h.observer.count(&Observed::Close), 1);
    assert_eq!(h.connector.close_count(), 1);
}

#[tokio::test]
async fn test_dropping_handle_closes_session() {
    let h = Harness::new();
    let session = h.open().await;

    drop(session);

    assert!(wait_until(|| h.observer.count(&Observed::Close) == 1).await);
    assert!(!h.microphone.is_streaming());
    assert_eq!(h.connector.close_count(), 1);
}

#[tokio::test]
async fn test_speak_once_silences_live_session() {
    let h = Harness::new();
    let synth = Arc::new(CannedSynthesizer::new().with_pcm(&pcm_frames(4_800, 0.5)));
    let engine = VoiceEngine::new(
        h.connector.clone(),
        h.microphone.clone(),
        synth,
        h.scheduler.clone(),
    )
    .with_block_size(BLOCK);

    let session = engine.open_live_session(h.observer.clone()).await.unwrap();
    h.connector.emit(audio_chunk(24_000)).await;
    h.connector.emit(audio_chunk(24_000)).await;
    assert!(h.submissions_reach(2).await);

    assert!(engine.speak_once("Preheat the oven").await);

    let submissions = h.output.submissions();
    assert_eq!(submissions.len(), 3);
    assert!(submissions[..2].iter().all(common::Submission::was_stopped));
    assert!(!submissions[2].was_stopped());
    assert_eq!(engine.scheduler().active_count(), 1);
    assert_eq!(session.state(), SessionState::Active);

    engine.stop_all_audio();
    assert!(engine.scheduler().is_idle());
}

#[tokio::test]
async fn test_new_session_silences_previous_speech() {
    let h = Harness::new();
    let synth = Arc::new(CannedSynthesizer::new().with_pcm(&pcm_frames(24_000, 0.5)));
    let engine = VoiceEngine::new(
        h.connector.clone(),
        h.microphone.clone(),
        synth,
        h.scheduler.clone(),
    );

    let spoken = engine.speak_once_with_handle("Chop the garlic").await.unwrap();
    let _session = engine.open_live_session(h.observer.clone()).await.unwrap();

    assert!(spoken.is_stopped());
    assert!(engine.scheduler().is_idle());
}

#[tokio::test]
async fn test_chunk_with_zero_rate_is_dropped() {
    let h = Harness::new();
    let session = h.open().await;

    h.connector
        .emit(InboundEvent::AudioChunk {
            data: encode_bytes_to_transport(&pcm_frames(480, 0.25)),
            sample_rate: Some(0),
        })
        .await;

    assert!(wait_until(|| h.observer.errors() == 1).await);
    assert!(h.output.submissions().is_empty());
    assert!(h.scheduler.cursor().abs() < EPSILON);

    h.connector.emit(audio_chunk(2_400)).await;
    assert!(h.submissions_reach(1).await);
    assert_eq!(session.state(), SessionState::Active);
}

#[tokio::test]
async fn test_slow_microphone_does_not_stall_runtime() {
    let h = Harness::new();
    let microphone = FakeMicrophone::slow(Duration::from_millis(200));
    let controller =
        LiveSessionController::new(h.connector.clone(), microphone.clone(), h.scheduler.clone())
            .with_block_size(BLOCK);

    let ticker = Ticker::start();
    let session = controller.open(h.observer.clone()).await.unwrap();
    let during_open = ticker.count();
    assert!(during_open >= 5, "runtime stalled while opening: {during_open} ticks");
    assert!(microphone.is_streaming());

    session.close().await;
    let during_close = ticker.count() - during_open;
    assert!(during_close >= 5, "runtime stalled while closing: {during_close} ticks");
    assert!(!microphone.is_streaming());
    assert_eq!(session.state(), SessionState::Closed);
}
