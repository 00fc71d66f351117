//! # Notecard - note-reading practice in the terminal
//!
//! Shows a note from the chosen instrument's range, listens to the microphone until the
//! player sounds it (or time runs out), and moves on to the next one.
//!
//! ## Architecture
//! - **Main Thread**: runs the `GameSession`, which polls the capture buffer
//! - **Audio Callback**: CPAL's input thread feeds the sliding sample buffer
//! - **Input Thread**: watches stdin for `q` and cancels the session
//! - **Output**: the game talks on stdout, logs go to stderr

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use notecard_core::{
    cancel_pair, Announcer, AudioCapture, Canceller, CaptureConfig, DetectorConfig, GameSession,
    Instrument, Note, RoundOutcome, SessionConfig, SessionSummary,
};
use rand::seq::SliceRandom;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "notecard=info,notecard_core=info";

/// command-line interface for the note-reading game
#[derive(Parser, Debug)]
#[command(name = "notecard")]
#[command(about = "play the note you are shown; the microphone checks your answer")]
struct Cli {
    /// instrument to practise, relative to <assets>/configs (e.g. concertina/30button/jeffries_cg)
    #[arg(short, long)]
    instrument: PathBuf,

    /// root directory holding configs/ and images/
    #[arg(short, long, default_value = ".")]
    assets: PathBuf,

    /// seconds allowed for each note
    #[arg(short, long, default_value_t = 10.0)]
    timeout: f32,

    /// move on after a missed note instead of waiting for it to be played
    #[arg(long)]
    no_replay: bool,

    /// play the range in order instead of shuffling it
    #[arg(long)]
    ordered: bool,

    /// stop after this many notes
    #[arg(short, long)]
    rounds: Option<usize>,

    /// capture sample rate in Hz
    #[arg(long, default_value_t = 48_000)]
    sample_rate: u32,

    /// samples per capture chunk
    #[arg(long, default_value_t = 1024)]
    chunk_size: usize,

    /// analysis window length, in chunks
    #[arg(long, default_value_t = 50)]
    buffer_multiplier: usize,
}

/// Prints the game to stdout.
struct TerminalAnnouncer;

impl Announcer for TerminalAnnouncer {
    fn announce(&mut self, message: &str) {
        println!("{message}");
    }

    fn present_note(&mut self, note: &Note) {
        println!();
        println!("Play: {}", note.name);
        show_asset("staff", &note.transcription);
        show_asset("fingering", &note.fingering);
    }

    fn report(&mut self, note: &Note, outcome: RoundOutcome) {
        match outcome {
            RoundOutcome::Passed => println!("Correct! That was {}.", note.name),
            RoundOutcome::Failed => println!("Time's up! That was {}.", note.name),
        }
    }
}

/// Points the player at a note image. Missing images are logged and skipped.
fn show_asset(label: &str, path: &Path) {
    if path.as_os_str().is_empty() {
        return;
    }
    if path.exists() {
        println!("  {label}: {}", path.display());
    } else {
        warn!("Note asset missing, skipping: {}", path.display());
    }
}

/// Cancels the session when the player types `q` or stdin closes.
fn spawn_quit_watcher(canceller: Canceller) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) if line.trim().eq_ignore_ascii_case("q") => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Could not read stdin: {}", e);
                    break;
                }
            }
        }
        info!("Quit requested");
        canceller.cancel();
    });
}

fn print_summary(summary: &SessionSummary) {
    println!();
    println!(
        "{} of {} notes played in time.",
        summary.passed(),
        summary.rounds.len()
    );
    for round in summary.rounds.iter().filter(|r| r.outcome == RoundOutcome::Failed) {
        println!("  missed {}", round.note.name);
    }
    if summary.cancelled {
        println!("Session ended early.");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    let instrument = Instrument::load(&cli.assets, &cli.instrument)
        .with_context(|| format!("loading instrument {}", cli.instrument.display()))?;

    let mut targets = instrument.notes();
    if !cli.ordered {
        targets.shuffle(&mut rand::thread_rng());
    }
    if let Some(rounds) = cli.rounds {
        targets.truncate(rounds);
    }
    info!("Loaded {} with {} notes", instrument.name(), targets.len());

    let capture_config = CaptureConfig {
        sample_rate: cli.sample_rate,
        chunk_size: cli.chunk_size,
        buffer_multiplier: cli.buffer_multiplier,
    };
    let session_config = SessionConfig {
        guess_timeout_secs: cli.timeout,
        replay_on_timeout: !cli.no_replay,
    };

    let (canceller, token) = cancel_pair();
    spawn_quit_watcher(canceller);

    let mut announcer = TerminalAnnouncer;
    announcer.announce(&format!(
        "Welcome! Let's practise the {}. Play each note you see; type q and Enter to stop.",
        instrument.name()
    ));

    let mut session = GameSession::new(session_config, announcer)
        .with_detector_config(DetectorConfig {
            sample_rate: capture_config.sample_rate,
            ..DetectorConfig::default()
        })
        .with_cancel(token);
    let mut capture = AudioCapture::new(capture_config);

    let summary = session
        .run_with_capture(&mut capture, &targets)
        .context("listening session failed")?;

    print_summary(&summary);
    Ok(())
}
