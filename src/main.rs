//! napwatch CLI
//!
//! Runs nap sessions against simulated sensors and replays recorded logs.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use napwatch::{
    config::Config,
    core::EngineEvent,
    session::{replay, Collaborators, Monitor, ReplayLog, SessionStats},
    sources::{
        HrvReading, RecordingWakeSignal, ScriptedBiometricSource, SimulatedMotionSource,
        StillnessProfile,
    },
    EngineError, VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "napwatch")]
#[command(version = VERSION)]
#[command(about = "Sleep-onset detection for power naps", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Profile {
    /// Still from the first sample
    Still,
    /// Never still
    Restless,
    /// Restless for a minute, then still
    Settle,
    /// Falls asleep, stirs briefly, falls asleep again
    Stir,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a live session against simulated sensors
    Simulate {
        /// Time compression factor applied to every session cadence
        #[arg(long, default_value = "10")]
        speed: f64,

        /// Simulated wearer movement
        #[arg(long, value_enum, default_value = "settle")]
        profile: Profile,

        /// HRV reported during the nap, in ms
        #[arg(long, default_value = "62")]
        hrv: f64,

        /// Value of the seeded 7-day HRV history, in ms
        #[arg(long, default_value = "50")]
        history: f64,

        /// Simulate a device without an accelerometer
        #[arg(long)]
        no_motion: bool,

        /// Simulate denied biometric authorization
        #[arg(long)]
        deny: bool,

        /// Write the session summary under the export path
        #[arg(long)]
        export: bool,
    },

    /// Replay a recorded JSON log offline
    Replay {
        /// Log file
        file: PathBuf,

        /// Print every event, not just state changes
        #[arg(long, short)]
        verbose: bool,

        /// Write the session summary under the export path
        #[arg(long)]
        export: bool,
    },

    /// Show accumulated session statistics
    Status,

    /// Show configuration
    Config,

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate {
            speed,
            profile,
            hrv,
            history,
            no_motion,
            deny,
            export,
        } => cmd_simulate(SimulateArgs {
            speed,
            profile,
            hrv,
            history,
            no_motion,
            deny,
            export,
        }),
        Commands::Replay {
            file,
            verbose,
            export,
        } => cmd_replay(&file, verbose, export),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
        Commands::InitConfig { force } => cmd_init_config(force),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("napwatch=info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

struct SimulateArgs {
    speed: f64,
    profile: Profile,
    hrv: f64,
    history: f64,
    no_motion: bool,
    deny: bool,
    export: bool,
}

fn stillness_profile(profile: Profile, speed: f64) -> StillnessProfile {
    let scaled = |secs: u64| Duration::from_secs_f64(secs as f64 / speed);
    match profile {
        Profile::Still => StillnessProfile::Still,
        Profile::Restless => StillnessProfile::Restless,
        Profile::Settle => StillnessProfile::SettlesAfter(scaled(60)),
        Profile::Stir => StillnessProfile::Phases(vec![
            (scaled(30), false),
            (scaled(420), true),
            (scaled(45), false),
            (scaled(60), true),
        ]),
    }
}

fn cmd_simulate(args: SimulateArgs) -> anyhow::Result<()> {
    let speed = if args.speed > 0.0 { args.speed } else { 1.0 };
    let base = Config::load().context("loading configuration")?;
    let config = base.time_scaled(speed);
    if let Err(e) = base.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    println!("napwatch v{VERSION}");
    println!();
    println!("Simulating a {} min nap at {speed}x", base.session.nap_duration.as_secs() / 60);
    println!("  HRV during nap: {:.1} ms (history {:.1} ms)", args.hrv, args.history);
    println!(
        "  Motion: {}",
        if args.no_motion { "unavailable" } else { "simulated" }
    );
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let now = Utc::now();
    let biometric = Arc::new(ScriptedBiometricSource::with_steady_history(
        now,
        7,
        chrono::Duration::hours(1),
        args.history,
    ));
    biometric.set_authorized(!args.deny);
    biometric.push_reading(HrvReading::new(now, args.hrv));

    let motion = if args.no_motion {
        Arc::new(SimulatedMotionSource::unavailable())
    } else {
        Arc::new(SimulatedMotionSource::new(stillness_profile(args.profile, speed)))
    };
    let wake = Arc::new(RecordingWakeSignal::new());

    let stats = Arc::new(SessionStats::with_persistence(base.data_path.join("stats.json")));
    let monitor = Monitor::with_stats(
        config.clone(),
        Collaborators {
            biometric: biometric.clone(),
            motion,
            wake: wake.clone(),
        },
        stats.clone(),
    );

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    // Watches report HRV every few minutes.
    let feeder_running = running.clone();
    let feeder_source = biometric.clone();
    let hrv = args.hrv;
    let feed_every = Duration::from_secs_f64(300.0 / speed);
    std::thread::spawn(move || {
        while feeder_running.load(Ordering::SeqCst) {
            std::thread::sleep(feed_every);
            feeder_source.push_reading(HrvReading::new(Utc::now(), hrv));
        }
    });

    let runtime = tokio::runtime::Runtime::new().context("starting runtime")?;
    let summary = runtime.block_on(async {
        match monitor.start().await {
            Ok(id) => println!("Session ID: {id}"),
            Err(EngineError::PermissionDenied) => {
                anyhow::bail!("biometric authorization denied; grant access and retry")
            }
            Err(e) => return Err(e.into()),
        }

        let events = monitor.events();
        let poll = config.state_machine.tick_interval.min(Duration::from_millis(200));
        while running.load(Ordering::SeqCst) && monitor.is_running().await {
            for event in events.try_iter() {
                print_event(&event, false);
            }
            tokio::time::sleep(poll).await;
        }

        let summary = monitor.stop().await?;
        for event in events.try_iter() {
            print_event(&event, false);
        }
        Ok::<_, anyhow::Error>(summary)
    })?;
    running.store(false, Ordering::SeqCst);

    println!();
    println!("Wake signals: {}", wake.trigger_count());
    println!("{}", stats.summary());
    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save statistics: {e}");
    }

    if args.export {
        let path = summary
            .export(&base.export_path)
            .context("writing session summary")?;
        println!("Summary written to {path:?}");
    }
    Ok(())
}

fn cmd_replay(file: &Path, verbose: bool, export: bool) -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;
    let content =
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let log = ReplayLog::from_json(&content).context("parsing replay log")?;

    println!("Replaying {} inputs from {:?}", log.inputs.len(), file);
    let outcome = replay(&config, &log).context("invalid configuration")?;

    for (_, event) in &outcome.events {
        print_event(event, verbose);
    }

    println!();
    println!("Ticks evaluated: {}", outcome.ticks);
    match outcome.summary.sleep_onset {
        Some(onset) => println!("Sleep onset: {onset}"),
        None => println!("Sleep onset: not detected"),
    }

    if export {
        let path = outcome
            .summary
            .export(&config.export_path)
            .context("writing session summary")?;
        println!("Summary written to {path:?}");
    }
    Ok(())
}

fn print_event(event: &EngineEvent, verbose: bool) {
    match event {
        EngineEvent::SessionStarted { session_id, at } => {
            println!("[{}] session {session_id} started", at.format("%H:%M:%S"));
        }
        EngineEvent::StateChanged(transition) => {
            println!(
                "[{}] {} -> {}",
                transition.at.format("%H:%M:%S"),
                transition.from,
                transition.to
            );
        }
        EngineEvent::CountdownRebased { reference, deadline } => {
            println!(
                "[{}] sleep onset confirmed, wake at {}",
                reference.format("%H:%M:%S"),
                deadline.format("%H:%M:%S")
            );
        }
        EngineEvent::WakeTriggered { at, strength, .. } => {
            println!("[{}] wake (strength {strength})", at.format("%H:%M:%S"));
        }
        EngineEvent::SessionStopped { at, reason } => {
            println!("[{}] session stopped ({reason:?})", at.format("%H:%M:%S"));
        }
        EngineEvent::ConditionsChanged(c) if verbose => {
            println!("    conditions hrv={} motion={} combined={}", c.hrv, c.motion, c.combined);
        }
        EngineEvent::ReadingsChanged(r) if verbose => {
            println!(
                "    readings hrv={:?} baseline={:?} motion={:.4} still={} ({:.0}s)",
                r.hrv, r.baseline_hrv, r.motion_level, r.is_still, r.still_duration_secs
            );
        }
        _ => {}
    }
}

fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;
    let path = config.data_path.join("stats.json");

    println!("napwatch v{VERSION}");
    println!();
    if path.exists() {
        let stats = SessionStats::with_persistence(path);
        println!("{}", stats.summary());
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_init_config(force: bool) -> anyhow::Result<()> {
    let path = Config::config_path();
    if path.exists() && !force {
        anyhow::bail!("{path:?} already exists (use --force to overwrite)");
    }
    Config::default().save()?;
    println!("Wrote default configuration to {path:?}");
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}
