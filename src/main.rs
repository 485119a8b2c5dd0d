use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use parley::db::{FactRepo, FactStore};
use parley::state::InteractionMode;
use parley::voice::{
    AudioCapture, AudioClip, AudioEndpointer, AutoStop, ClipPlayer, CpalPlayer, EnergyVad,
    OpenAiSpeech, SpeechSynthesizer, calculate_energy,
};
use parley::{Config, Daemon};

/// Parley - a local voice assistant
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Interaction mode to start in
    #[arg(short, long, env = "PARLEY_MODE", default_value = "voice")]
    mode: InteractionMode,

    /// Log more (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Run the assistant (default)
    Run,
    /// Text-only conversation without audio devices
    Chat,
    /// Show microphone levels and endpointing events
    TestMic {
        /// How long to listen
        #[arg(short, long, default_value = "10")]
        seconds: u64,
    },
    /// Play a test tone
    TestSpeaker,
    /// Speak a line with the configured voice
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hi, this is how I sound.")]
        text: String,
    },
    /// List remembered facts
    Facts {
        /// Forget them instead
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "parley=info,warn",
        1 => "parley=debug,info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let config = Config::load()?;
            tracing::debug!(?config, "loaded configuration");
            Daemon::new(config)?.run(cli.mode, true).await?;
        }
        Command::Chat => {
            let config = Config::load()?;
            Daemon::new(config)?.run(InteractionMode::Chat, false).await?;
        }
        Command::TestMic { seconds } => test_mic(seconds).await?,
        Command::TestSpeaker => test_speaker().await?,
        Command::TestTts { text } => test_tts(&text).await?,
        Command::Facts { clear } => facts(clear)?,
    }
    Ok(())
}

/// Width of the level meter in characters
const METER_WIDTH: usize = 50;

/// Print what to check when a device test was silent
fn troubleshooting(outcome: &str, hints: &[&str]) {
    println!("\n{outcome}");
    println!("Nothing? Try:");
    for hint in hints {
        println!("  - {hint}");
    }
}

/// Show input levels and endpointing decisions once per second
#[allow(clippy::future_not_send)]
async fn test_mic(seconds: u64) -> anyhow::Result<()> {
    let config = Config::load()?;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let endpointer = Arc::new(
        AudioEndpointer::new(Box::new(EnergyVad::default()), config.voice.endpoint)
            .with_auto_stop_sender(tx),
    );

    let mut capture = AudioCapture::new()?;
    capture.start(Arc::clone(&endpointer))?;
    println!(
        "Listening on the default microphone at {} Hz for {seconds}s; say something.\n",
        capture.sample_rate()
    );

    endpointer.start();
    for second in 1..=seconds {
        tokio::time::sleep(Duration::from_secs(1)).await;

        // A fresh session per second keeps each reading independent
        let window = endpointer.stop().unwrap_or_default();
        endpointer.start();

        let rms = calculate_energy(&window);
        let peak = window.iter().fold(0.0f32, |max, s| max.max(s.abs()));
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let filled = ((rms * 100.0) as usize).min(METER_WIDTH);

        let events: Vec<&str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|stop| match stop {
                AutoStop::Silence => "end of speech",
                AutoStop::Timeout => "no speech",
            })
            .collect();

        println!(
            "{second:>3}s  rms {rms:.4}  peak {peak:.4}  |{}{}| {}",
            "#".repeat(filled),
            ".".repeat(METER_WIDTH - filled),
            events.join(", ")
        );
    }

    endpointer.stop();
    capture.stop();

    troubleshooting(
        "A moving meter means the microphone works.",
        &[
            "check the input device is connected and not muted",
            "pactl info | grep 'Default Source'",
            "arecord -l",
        ],
    );
    Ok(())
}

/// Play a two second 440 Hz tone
async fn test_speaker() -> anyhow::Result<()> {
    const RATE: u32 = 24_000;
    const TONE_HZ: f32 = 440.0;
    const VOLUME: f32 = 0.3;

    #[allow(clippy::cast_precision_loss)]
    let tone: Vec<f32> = (0..RATE * 2)
        .map(|n| (std::f32::consts::TAU * TONE_HZ * n as f32 / RATE as f32).sin() * VOLUME)
        .collect();

    println!("Playing a {TONE_HZ} Hz tone on the default output device...");
    CpalPlayer::new().play(AudioClip::new(tone, RATE)).await?;

    troubleshooting(
        "A clear tone means the speakers work.",
        &["pactl info | grep 'Default Sink'", "pactl list sinks short"],
    );
    Ok(())
}

/// Synthesize `text` with the configured voice and play it
async fn test_tts(text: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    let speech = OpenAiSpeech::new(
        &config.voice.base_url,
        config.llm.api_key.clone(),
        config.voice.tts_model.clone(),
        config.voice.tts_voice.clone(),
        config.voice.tts_speed,
    )?;

    println!("Synthesizing with voice '{}': {text}", config.voice.tts_voice);
    let clip = speech.synthesize(text).await?;
    println!(
        "Received {:.1}s of audio at {} Hz, playing...",
        clip.duration().as_secs_f32(),
        clip.sample_rate
    );
    CpalPlayer::new().play(clip).await?;

    troubleshooting(
        "Speech was played through the default output device.",
        &[
            "parley test-speaker",
            "confirm the speech server answers at the configured voice base URL",
        ],
    );
    Ok(())
}

/// List or clear remembered facts
fn facts(clear: bool) -> anyhow::Result<()> {
    let config = Config::load()?;
    let pool = parley::db::init(config.data_dir.join(parley::daemon::DB_FILE))?;
    let repo = FactRepo::new(pool);

    if clear {
        repo.clear_facts()?;
        println!("Forgot every remembered fact");
        return Ok(());
    }

    let facts = repo.list_facts()?;
    if facts.is_empty() {
        println!("No facts remembered yet");
    } else {
        print!("{}", FactRepo::format_for_prompt(&facts));
    }
    Ok(())
}
