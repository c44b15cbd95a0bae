mod output;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::{never, select, unbounded, Receiver};
use pulse_audio::{ClickBank, ClickOutput, NullOutput};
use pulse_domain::{
    ClickEvent, ClickStyle, FileSettingsStore, PracticeSettings, SettingsStore, Subdivision,
};
use pulse_metronome::{MetronomeScheduler, TapTempoTracker};
use pulse_tempo::AnalysisService;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::output::CpalOutput;

#[derive(Parser, Debug)]
#[command(author, version, about = "Metronome, tap tempo and tempo detection for practice", long_about = None)]
struct Cli {
    /// Settings file; `.yaml`/`.yml` are read as YAML, anything else as JSON
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the metronome. Enter taps the tempo, `c` clears taps, `q` quits
    Click(ClickArgs),
    /// Derive a tempo from Enter presses
    Tap {
        /// Store the tapped tempo as the default
        #[arg(long)]
        save: bool,
    },
    /// Estimate the tempo of an audio file
    Detect {
        /// Audio file to analyse
        input: PathBuf,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect or reset stored settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    Show,
    Reset,
    Path,
}

#[derive(Args, Debug)]
struct ClickArgs {
    #[arg(short, long)]
    bpm: Option<i64>,
    /// quarter, eighth, eighth-triplet, sixteenth, sixteenth-triplet, thirty-second, swing
    #[arg(short = 'd', long)]
    subdivision: Option<Subdivision>,
    #[arg(long)]
    beats: Option<i64>,
    #[arg(long)]
    style: Option<ClickStyle>,
    /// Play the first beat like every other beat
    #[arg(long)]
    no_accent: bool,
    #[arg(long)]
    volume: Option<f32>,
    #[arg(long)]
    sub_volume: Option<f32>,
    /// Output latency compensation in milliseconds
    #[arg(long, allow_hyphen_values = true)]
    latency: Option<i64>,
    /// Ask the output device for its latency and compensate for it
    #[arg(long, conflicts_with = "latency")]
    auto_latency: bool,
    /// Stop after this many seconds instead of waiting for `q`
    #[arg(long)]
    seconds: Option<u64>,
    /// Count down before the first click
    #[arg(long)]
    countdown: bool,
    /// Directory holding click samples; synthesized clicks are used otherwise
    #[arg(long)]
    clicks_dir: Option<PathBuf>,
    /// Do not open an audio device
    #[arg(long)]
    silent: bool,
    /// Store the final metronome settings as defaults
    #[arg(long)]
    save: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let store = settings_store(cli.settings);
    match cli.command {
        Command::Click(args) => run_click(args, store.as_ref()),
        Command::Tap { save } => run_tap(save, store.as_ref()),
        Command::Detect { input, json } => run_detect(input, json),
        Command::Settings { action } => run_settings(action, store.as_ref()),
    }
}

fn settings_store(explicit: Option<PathBuf>) -> Option<FileSettingsStore> {
    explicit
        .or_else(|| dirs::config_dir().map(|dir| dir.join("pulse").join("settings.json")))
        .map(FileSettingsStore::new)
}

fn load_settings(store: Option<&FileSettingsStore>) -> Result<PracticeSettings> {
    match store {
        Some(store) => store
            .load()
            .with_context(|| format!("loading settings from {}", store.path().display())),
        None => {
            warn!("no config directory, using default settings");
            Ok(PracticeSettings::default())
        }
    }
}

fn save_settings(store: Option<&FileSettingsStore>, settings: &PracticeSettings) -> Result<()> {
    let store = store.context("no settings location; pass --settings")?;
    store
        .save(settings)
        .with_context(|| format!("saving settings to {}", store.path().display()))?;
    println!("saved settings to {}", store.path().display());
    Ok(())
}

fn run_click(args: ClickArgs, store: Option<&FileSettingsStore>) -> Result<()> {
    let mut settings = load_settings(store)?;
    let mut config = settings.metronome_config();
    if let Some(bpm) = args.bpm {
        config.set_bpm(bpm);
    }
    if let Some(subdivision) = args.subdivision {
        config.set_subdivision(subdivision);
    }
    if let Some(beats) = args.beats {
        config.set_beats_per_measure(beats);
    }
    if let Some(style) = args.style {
        config.set_click_style(style);
    }
    if args.no_accent {
        config.set_accent_first_beat(false);
    }
    if let Some(volume) = args.volume {
        config.set_volume(volume);
    }
    if let Some(volume) = args.sub_volume {
        config.set_subdivision_volume(volume);
    }
    if let Some(latency) = args.latency {
        config.set_latency_offset_ms(latency);
    }

    let bank = match &args.clicks_dir {
        Some(dir) => ClickBank::load(dir, config.click_style()),
        None => ClickBank::synthesized(config.click_style()),
    };
    // Keeps the device stream alive until the metronome stops.
    let mut _stream = None;
    let output: Arc<dyn ClickOutput> = if args.silent {
        Arc::new(NullOutput)
    } else {
        match CpalOutput::open(bank, settings.audio_sample_rate) {
            Ok((output, stream)) => {
                _stream = Some(stream);
                Arc::new(output)
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "audio output unavailable, running silently");
                Arc::new(NullOutput)
            }
        }
    };
    if args.auto_latency {
        let latency = output
            .measure_latency()
            .context("measuring output latency")?;
        config.set_latency_offset_ms(latency.as_millis() as i64);
        info!(latency_ms = config.latency_offset_ms(), "latency offset measured");
    }

    if args.countdown {
        for remaining in (1..=settings.countdown_seconds).rev() {
            println!("{remaining}...");
            thread::sleep(Duration::from_secs(1));
        }
    }

    let scheduler = MetronomeScheduler::with_config(config, output);
    let ticks = scheduler.subscribe(64);
    let commands = stdin_lines();
    let mut stdin_open = true;
    let idle = never::<String>();
    let deadline = args
        .seconds
        .map(|seconds| Instant::now() + Duration::from_secs(seconds));

    println!(
        "{} BPM, {} beats, {} (Enter taps, c clears taps, q quits)",
        config.bpm(),
        config.beats_per_measure(),
        config.subdivision()
    );
    scheduler.start();
    loop {
        let timeout = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    break;
                }
                left
            }
            None => Duration::from_secs(60),
        };
        let command_source = if stdin_open { &commands } else { &idle };
        select! {
            recv(ticks) -> event => match event {
                Ok(event) => print_tick(&event)?,
                Err(_) => break,
            },
            recv(command_source) -> line => match line {
                Ok(line) => match line.trim() {
                    "q" | "quit" => break,
                    "c" | "clear" => scheduler.clear_tap_tempo(),
                    _ => {
                        let bpm = scheduler.tap_tempo();
                        println!("\ntap: {bpm} BPM");
                    }
                },
                Err(_) => stdin_open = false,
            },
            default(timeout) => {}
        }
    }
    scheduler.stop();
    println!();

    if args.save {
        settings.remember(&scheduler.config());
        save_settings(store, &settings)?;
    }
    Ok(())
}

fn print_tick(event: &ClickEvent) -> io::Result<()> {
    let mut out = io::stdout().lock();
    if event.is_main_beat && event.beat_index == 0 {
        writeln!(out)?;
    }
    if event.is_accent {
        write!(out, "[{}]", event.beat_index + 1)?;
    } else if event.is_main_beat {
        write!(out, " {} ", event.beat_index + 1)?;
    } else {
        write!(out, ".")?;
    }
    out.flush()
}

/// Forwards stdin lines from a background thread so the metronome loop can
/// wait on them alongside ticks.
fn stdin_lines() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn run_tap(save: bool, store: Option<&FileSettingsStore>) -> Result<()> {
    let mut settings = load_settings(store)?;
    let mut config = settings.metronome_config();
    let mut tracker = TapTempoTracker::new();
    let epoch = Instant::now();

    println!(
        "Press Enter to tap, c + Enter to clear, q + Enter to finish. Tempo: {} BPM",
        config.bpm()
    );
    for line in io::stdin().lock().lines() {
        let line = line.context("reading stdin")?;
        match line.trim() {
            "q" | "quit" => break,
            "c" | "clear" => {
                tracker.clear();
                println!("taps cleared, tempo stays {} BPM", config.bpm());
            }
            _ => {
                let bpm = tracker.tap(epoch.elapsed().as_millis() as u64, &mut config);
                if tracker.len() < 2 {
                    println!("first tap, tempo {bpm} BPM");
                } else {
                    println!("{bpm} BPM from {} taps", tracker.len());
                }
            }
        }
    }

    if save {
        settings.remember(&config);
        save_settings(store, &settings)?;
    }
    Ok(())
}

fn run_detect(input: PathBuf, json: bool) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    let state = runtime.block_on(async {
        let service = AnalysisService::new(tokio::runtime::Handle::current());
        let mut updates = service.subscribe();
        let reporter = tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let state = updates.borrow_and_update().clone();
                if state.is_analyzing {
                    eprint!("\ranalyzing {:>3.0}%", state.progress * 100.0);
                }
            }
        });
        service.submit(&input);
        let state = service.wait_idle().await;
        reporter.abort();
        eprintln!();
        state
    });

    if let Some(error) = state.error {
        bail!(error);
    }
    let result = state.result.context("analysis produced no result")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    println!(
        "{} BPM (confidence {:.0}%)",
        result.bpm,
        result.confidence * 100.0
    );
    if result.candidates.len() > 1 {
        let others: Vec<String> = result.candidates[1..]
            .iter()
            .map(|bpm| bpm.to_string())
            .collect();
        println!("other candidates: {}", others.join(", "));
    }
    if !result.is_reliable() {
        println!("low confidence: treat this as a failed detection");
    }
    Ok(())
}

fn run_settings(action: SettingsAction, store: Option<&FileSettingsStore>) -> Result<()> {
    match action {
        SettingsAction::Show => {
            let settings = load_settings(store)?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        SettingsAction::Reset => save_settings(store, &PracticeSettings::default())?,
        SettingsAction::Path => match store {
            Some(store) => println!("{}", store.path().display()),
            None => bail!("no config directory; pass --settings"),
        },
    }
    Ok(())
}
