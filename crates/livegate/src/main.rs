//! `livegate` — drive liveness-checked registration and login from recordings,
//! and administer the user database.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use clap::{Parser, Subcommand};
use livegate_capture::{CaptureWorker, FrameSlot, ImageSequenceSource};
use livegate_core::{
    FrameReport, ManualClock, SessionMode, SessionOrchestrator, SystemClock, UserStore,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod replay;
mod store;

use config::Config;
use replay::Recording;
use store::JsonUserStore;

#[derive(Parser)]
#[command(name = "livegate", version, about = "Face liveness and landmark-signature recognition")]
struct Cli {
    /// User database path (overrides LIVEGATE_DB_PATH).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a register or login session over a recorded frame sequence.
    Replay {
        /// Recording directory containing recording.json.
        dir: PathBuf,

        /// Register the subject under this name.
        #[arg(long, conflicts_with = "login", required_unless_present = "login")]
        register: Option<String>,

        /// Identify the subject against enrolled users.
        #[arg(long)]
        login: bool,

        /// Play frames through the capture thread at recorded speed instead of
        /// stepping through them on recorded time. The session starts on the
        /// first delivered frame.
        #[arg(long)]
        realtime: bool,

        /// Print per-frame reports as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Manage enrolled users.
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },
    /// Show the effective configuration and database state.
    Status,
}

#[derive(Subcommand)]
enum UsersAction {
    /// List enrolled users.
    List,
    /// Show one user's record.
    Show { name: String },
    /// Delete a user.
    Remove { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    match cli.command {
        Command::Replay {
            dir,
            register,
            login: _,
            realtime,
            json,
        } => {
            // clap guarantees exactly one of --register / --login.
            let mode = match register {
                Some(name) => SessionMode::Register { name },
                None => SessionMode::Login,
            };
            if realtime {
                replay_realtime(&config, dir, mode, json).await
            } else {
                replay_stepped(&config, dir, mode, json)
            }
        }
        Command::Users { action } => users(&config, action),
        Command::Status => status(&config),
    }
}

fn open_store(config: &Config) -> Result<JsonUserStore> {
    JsonUserStore::open(&config.db_path)
        .with_context(|| format!("failed to open user database {}", config.db_path.display()))
}

fn print_report(index: usize, report: &FrameReport, json: bool) {
    if json {
        match serde_json::to_string(report) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "failed to encode frame report"),
        }
    } else {
        let status = format!("{:?}", report.status);
        let challenge = report
            .challenge
            .map_or_else(|| "-".to_string(), |kind| kind.to_string());
        println!(
            "frame {index:>4}  {challenge:<10}  {status:<7}  left {:>4.1}s  passive {:.2} \
             (sharp {:.2}, freq {:.2})  d_pitch {:>6.1}  d_yaw {:>6.1}",
            report.remaining_secs,
            report.passive.score,
            report.passive.sharpness,
            report.passive.frequency_liveness,
            report.deltas.pitch,
            report.deltas.yaw
        );
    }
}

fn replay_stepped(config: &Config, dir: PathBuf, mode: SessionMode, json: bool) -> Result<()> {
    let recording = Recording::load(&dir)?;
    let store = open_store(config)?;
    let clock = Arc::new(ManualClock::new());
    let mut orchestrator = SessionOrchestrator::with_parts(
        config.session_config(),
        store,
        Arc::clone(&clock),
        recording.picker(),
    );

    tracing::info!(
        dir = %dir.display(),
        frames = recording.frames.len(),
        %mode,
        "replaying recording"
    );
    let outcome =
        replay::replay_serial(&recording, &mut orchestrator, &clock, mode, |index, report| {
            print_report(index, report, json)
        })?;

    match outcome {
        Some(outcome) => println!("{outcome}"),
        None => println!("recording ended before the session resolved"),
    }
    Ok(())
}

async fn replay_realtime(
    config: &Config,
    dir: PathBuf,
    mode: SessionMode,
    json: bool,
) -> Result<()> {
    let recording = Recording::load(&dir)?;
    let store = open_store(config)?;
    let provider = recording.landmarks()?;
    let orchestrator = SessionOrchestrator::with_parts(
        config.session_config(),
        store,
        SystemClock::new(),
        recording.picker(),
    );

    let slot = Arc::new(FrameSlot::new());
    let source = ImageSequenceSource::from_paths(recording.image_paths())
        .paced(recording.frame_interval());
    let handle = engine::spawn_engine(
        orchestrator,
        provider,
        Arc::clone(&slot),
        config.result_timeout(),
    )?;
    let worker = CaptureWorker::spawn(source, slot)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<FrameReport>();
    let printer = tokio::spawn(async move {
        let mut index = 0usize;
        while let Some(report) = rx.recv().await {
            print_report(index, &report, json);
            index += 1;
        }
    });

    let result = handle.authenticate(mode, Some(tx)).await;
    let _ = printer.await;
    worker.stop();

    let summary = result?;
    tracing::info!(
        challenge = %summary.challenge,
        frames = summary.frames,
        "realtime replay finished"
    );
    println!("{}", summary.outcome);
    Ok(())
}

fn users(config: &Config, action: UsersAction) -> Result<()> {
    let mut store = open_store(config)?;
    match action {
        UsersAction::List => {
            let users = store.get_all()?;
            if users.is_empty() {
                println!("no users enrolled");
            }
            for (name, record) in &users {
                println!(
                    "{name:<24} {}",
                    record.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
                );
            }
        }
        UsersAction::Show { name } => {
            let record = store
                .find(&name)?
                .with_context(|| format!("no user named {name:?}"))?;
            println!("name:       {name}");
            println!(
                "created_at: {}",
                record.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            );
            println!("signature:  {} values", record.signature.len());
        }
        UsersAction::Remove { name } => {
            if store.remove(&name)? {
                println!("removed {name}");
            } else {
                anyhow::bail!("no user named {name:?}");
            }
        }
    }
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let users = store.get_all()?;
    let session = config.session_config();

    println!("database:          {}", store.path().display());
    println!("enrolled users:    {}", users.len());
    println!("challenge window:  {:.1}s", session.challenge.duration.as_secs_f32());
    println!("blink EAR below:   {}", session.challenge.ear_threshold);
    println!("turn yaw beyond:   {}°", session.challenge.yaw_threshold);
    println!("look pitch beyond: {}°", session.challenge.pitch_threshold);
    println!("min passive score: {}", session.min_passive_score);
    println!("match threshold:   {}", session.match_threshold);
    println!("result timeout:    {}s", config.result_timeout_secs);
    Ok(())
}
