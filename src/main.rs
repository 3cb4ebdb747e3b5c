use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chime::codec::AudioFrame;
use chime::playback::PlaybackEvent;
use chime::{CallController, CallState, CaptureManager, Config, PlaybackScheduler};

/// Chime - Real-time voice call client for conversational AI backends
#[derive(Parser)]
#[command(name = "chime", version, about)]
struct Cli {
    /// Config file path (defaults to the user config dir)
    #[arg(short, long, env = "CHIME_CONFIG")]
    config: Option<PathBuf>,

    /// Live session endpoint (overrides the config file)
    #[arg(short, long, env = "CHIME_ENDPOINT")]
    endpoint: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,chime=info",
        1 => "info,chime=debug",
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
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
        };
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }

    run_call(config).await
}

/// Run a live call until it ends, with keyboard controls
async fn run_call(config: Config) -> anyhow::Result<()> {
    println!("Chime live call");
    println!("  endpoint: {}", config.endpoint);
    println!("  controls: [m]ute  [c]amera  [q]uit\n");

    let controller = CallController::new(config);
    let mut status = controller.status();

    controller.start_call().await?;

    // Status line printer
    let printer = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            println!("[{}] {}", current.state, current.detail);
        }
    });

    let mut keys = stdin_keys();

    loop {
        tokio::select! {
            () = controller.ended() => break,
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted, ending call");
                controller.end_call();
                break;
            }
            key = keys.recv() => {
                let Some(key) = key else {
                    // stdin closed; end the call rather than idling forever
                    controller.end_call();
                    break;
                };
                match key {
                    'm' => {
                        let muted = controller.toggle_mute();
                        println!("{}", if muted { "Muted" } else { "Unmuted" });
                    }
                    'c' => match controller.toggle_camera() {
                        Ok(true) => println!("Camera on"),
                        Ok(false) => println!("Camera off"),
                        Err(e) => println!("Camera unavailable: {e}"),
                    },
                    'q' => {
                        controller.end_call();
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    controller.ended().await;
    let exit_state = controller.state();
    printer.abort();

    if exit_state == CallState::Error {
        anyhow::bail!("call ended with an error");
    }
    Ok(())
}

/// Read single-character commands from stdin on a blocking thread
fn stdin_keys() -> tokio::sync::mpsc::UnboundedReceiver<char> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            if std::io::BufRead::read_line(&mut stdin.lock(), &mut line).is_err() {
                break;
            }
            let Some(key) = line.trim().chars().next() else {
                continue;
            };
            if tx.send(key.to_ascii_lowercase()).is_err() {
                break;
            }
        }
    });

    rx
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let config = Config::default();
    let muted = Arc::new(AtomicBool::new(false));
    let channel_open = Arc::new(AtomicBool::new(true));

    let mut capture = CaptureManager::new(
        config.capture.sample_rate,
        config.capture.window_samples,
        muted,
    );

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    capture.start(channel_open, tx)?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut samples = Vec::new();
        while let Ok(window) = rx.try_recv() {
            samples.extend_from_slice(&window);
        }

        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let config = Config::default();
    let sample_rate = config.playback.sample_rate;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut playback = PlaybackScheduler::new(sample_rate);
    playback.start(tx)?;

    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {sample_rate} Hz...", samples.len());

    let _ = playback.schedule(AudioFrame {
        samples,
        sample_rate,
    });

    // Wait for the scheduler to drain, with a safety timeout
    let drained = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
    playback.stop();

    println!("\n---");
    if matches!(drained, Ok(Some(PlaybackEvent::Drained))) {
        println!("If you heard the tone, your speakers are working!");
    } else {
        println!("Playback did not finish; check your output device:");
        println!("  1. Run: pactl info | grep 'Default Sink'");
        println!("  2. Try: pavucontrol (to check levels)");
    }

    Ok(())
}
