use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kitchen_voice::audio::{
    AudioUnit, CAPTURE_SAMPLE_RATE, CaptureStream, CpalMicrophone, OUTPUT_SAMPLE_RATE,
    PlaybackScheduler, pcm16_to_float_samples, samples_to_wav,
};
use kitchen_voice::audio::capture::DEFAULT_BLOCK_SIZE;
use kitchen_voice::{Config, Error, PlaybackHandle, SessionObserver, VoiceEngine};

/// Kitchen Voice - talk to your cooking assistant
#[derive(Parser)]
#[command(name = "kitchen-voice", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a live spoken conversation (Ctrl+C to stop)
    Live,
    /// Read text aloud once
    Speak {
        /// Text to speak
        text: String,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Write the recording to a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,kitchen_voice=info",
        1 => "info,kitchen_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Live => live().await,
        Command::Speak { text } => speak(&text).await,
        Command::TestMic { duration, output } => test_mic(duration, output).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Prints transcripts to the terminal
struct ConsoleObserver;

impl SessionObserver for ConsoleObserver {
    fn on_partial_text(&self, text: &str, is_model: bool) {
        let mut stdout = std::io::stdout().lock();
        if is_model {
            let _ = write!(stdout, "{text}");
        } else {
            let _ = write!(stdout, "\x1b[2m{text}\x1b[0m");
        }
        let _ = stdout.flush();
    }

    fn on_turn_complete(&self, _full_text: &str) {
        println!();
    }

    fn on_close(&self) {
        println!("\n[session closed]");
    }

    fn on_error(&self, error: &Error) {
        tracing::debug!(error = %error, "session error");
    }
}

async fn live() -> anyhow::Result<()> {
    let config = Config::load()?;
    let engine = VoiceEngine::from_config(&config)?;

    let session = engine.open_live_session(Arc::new(ConsoleObserver)).await?;
    println!("Listening. Speak to your assistant, Ctrl+C to stop.\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, closing session");
            session.close().await;
        }
        () = session.closed() => {}
    }

    Ok(())
}

async fn speak(text: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    let engine = VoiceEngine::from_config(&config)?;

    let handle = engine.speak_once_with_handle(text).await?;
    let limit = Duration::from_secs_f64(handle.duration()) + Duration::from_secs(1);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => engine.stop_all_audio(),
        () = wait_for_playback(&handle, limit) => {}
    }

    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let recorded = Arc::new(Mutex::new(Vec::<u8>::new()));
    let frames = Arc::new(Mutex::new(0_usize));

    let capture = {
        let recorded = Arc::clone(&recorded);
        let frames = Arc::clone(&frames);
        tokio::task::spawn_blocking(move || {
            CaptureStream::open(&CpalMicrophone::new(), DEFAULT_BLOCK_SIZE, move |frame| {
                if let Ok(mut buf) = recorded.lock() {
                    buf.extend_from_slice(&frame);
                }
                if let Ok(mut n) = frames.lock() {
                    *n += 1;
                }
            })
        })
        .await??
    };

    println!("Sample rate: {CAPTURE_SAMPLE_RATE} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let count = frames.lock().map(|n| *n).unwrap_or_default();
        println!("[{:2}s] frames: {count}", i + 1);
    }

    tokio::task::spawn_blocking(move || {
        let mut capture = capture;
        capture.close();
    })
    .await?;

    let pcm = recorded.lock().map(|b| b.clone()).unwrap_or_default();
    let unit = pcm16_to_float_samples(&pcm, 1, CAPTURE_SAMPLE_RATE)?;
    let peak = unit.samples().iter().map(|s| s.abs()).fold(0.0_f32, f32::max);
    let count = frames.lock().map(|n| *n).unwrap_or_default();

    println!("\n---");
    println!(
        "Captured {count} frames ({:.2}s), peak level {peak:.4}",
        unit.duration()
    );

    if let Some(path) = output {
        let wav = samples_to_wav(unit.samples(), CAPTURE_SAMPLE_RATE)?;
        std::fs::write(&path, wav)?;
        println!("Wrote {}", path.display());
    }

    if peak < 0.01 {
        println!("Peak stayed near 0, check:");
        println!("  1. Is your mic plugged in?");
        println!("  2. Run: pactl info | grep 'Default Source'");
        println!("  3. Try: pavucontrol (to check input levels)");
    } else {
        println!("Your mic is working!");
    }

    Ok(())
}

/// Test speaker output
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 1.5 seconds in three gapless parts\n");

    let scheduler = PlaybackScheduler::shared();
    scheduler.prepare().await?;
    let frequency = 440.0_f32;
    let chunk_samples = OUTPUT_SAMPLE_RATE as usize / 2;

    let mut last = None;
    for chunk in 0..3 {
        #[allow(clippy::cast_precision_loss)]
        let samples: Vec<f32> = (0..chunk_samples)
            .map(|i| {
                let t = (chunk * chunk_samples + i) as f32 / OUTPUT_SAMPLE_RATE as f32;
                (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
            })
            .collect();
        last = Some(scheduler.play_sequential(AudioUnit::mono(samples, OUTPUT_SAMPLE_RATE)?)?);
    }

    if let Some(handle) = last {
        wait_for_playback(&handle, Duration::from_secs(3)).await;
    }

    println!("---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Poll until `handle` finishes or `limit` elapses
async fn wait_for_playback(handle: &PlaybackHandle, limit: Duration) {
    let started = tokio::time::Instant::now();
    while !handle.has_ended() && !handle.is_stopped() && started.elapsed() < limit {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
