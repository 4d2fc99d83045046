//! `tetra` – command line entry point for the training control plane.
//!
//! ```text
//! tetra [serve [--port N]]                            dashboard + control surface
//! tetra train [--max-timesteps N] [--target-lines N]  headless training
//! ```
//!
//! Both read `~/.tetra/config.toml` (written with defaults on first run).

mod config;
mod observability;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tetra_cockpit::CockpitServer;
use tetra_runtime::{Supervisor, SupervisorConfig};
use tetra_sim::SimBackend;
use tetra_types::{Message, SessionStatus, TrainingConfig};
use tracing::{info, warn};

use crate::config::Config;

const HEADLESS_POLL: Duration = Duration::from_millis(50);

/// Live training control plane for the Tetris learner.
#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Config: $TETRA_CONFIG or ~/.tetra/config.toml")]
struct Cli {
    /// What to run; `serve` when omitted
    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
enum Mode {
    /// Serve the dashboard and the control surface
    Serve(ServeArg),
    /// Train headless, printing telemetry to the terminal
    Train(TrainArg),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Args)]
struct ServeArg {
    /// Listening port (defaults to the configured port)
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Args)]
struct TrainArg {
    /// Stop after this many training steps in total
    #[arg(long)]
    max_timesteps: Option<u64>,
    /// Stop once an episode clears this many lines
    #[arg(long)]
    target_lines: Option<u32>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = observability::init_tracing("tetra");
    print_banner();

    let path = config::config_path();
    let cfg = match config::load_or_init(&path) {
        Ok((cfg, created)) => {
            if created {
                println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    path.display().to_string().bold()
                );
            } else {
                println!("  Config loaded from {}", path.display().to_string().bold());
            }
            cfg
        }
        Err(e) => {
            println!("{}: {e}", "Config error".red());
            println!("  Using default configuration.");
            Config::default()
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: cannot start runtime: {e}", "error".red().bold());
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.mode.unwrap_or(Mode::Serve(ServeArg::default())) {
        Mode::Serve(arg) => runtime.block_on(serve(cfg, &arg)),
        Mode::Train(arg) => runtime.block_on(train(cfg, &arg)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn supervisor(cfg: &Config) -> Arc<Supervisor> {
    Arc::new(Supervisor::new(
        Arc::new(SimBackend::new()),
        SupervisorConfig {
            checkpoint_dir: cfg.checkpoint_dir.clone(),
            default_training: cfg.training.clone(),
            stop_timeout: cfg.stop_timeout(),
        },
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// serve
// ─────────────────────────────────────────────────────────────────────────────

async fn serve(cfg: Config, arg: &ServeArg) -> Result<(), String> {
    let port = arg.port.unwrap_or(cfg.port);
    let sup = supervisor(&cfg);
    println!(
        "  Dashboard on {}  (checkpoints in {})\n",
        format!("http://localhost:{port}").bold().cyan(),
        cfg.checkpoint_dir.display()
    );

    let server = CockpitServer::new(Arc::clone(&sup)).with_port(port);
    tokio::select! {
        result = server.run() => result.map_err(|e| e.to_string()),
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("{}", "⚠  Ctrl-C received – stopping the active session …".yellow().bold());
            sup.stop_training().await.map_err(|e| e.to_string())?;
            println!("{}", "  ✓ Exiting tetra.".green());
            Ok(())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// train (headless)
// ─────────────────────────────────────────────────────────────────────────────

async fn train(cfg: Config, arg: &TrainArg) -> Result<(), String> {
    let training = TrainingConfig {
        max_timesteps: arg.max_timesteps.unwrap_or(cfg.training.max_timesteps),
        target_lines: arg.target_lines.or(cfg.training.target_lines),
        ..cfg.training.clone()
    };

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    if let Err(e) = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; Ctrl-C will not save a final checkpoint");
    }

    let sup = supervisor(&cfg);
    sup.start_training(Some(training)).await.map_err(|e| e.to_string())?;
    info!("headless training started");

    let mut stopping = false;
    loop {
        tokio::time::sleep(HEADLESS_POLL).await;
        sup.check_liveness().await;
        for message in sup.context().drain_telemetry(usize::MAX) {
            print_message(&message);
        }

        if interrupted.load(Ordering::SeqCst) && !stopping {
            stopping = true;
            println!();
            println!("{}", "⚠  Ctrl-C received – saving and stopping …".yellow().bold());
            sup.stop_training().await.map_err(|e| e.to_string())?;
        }
        if sup.status().await.status == SessionStatus::Stopped {
            for message in sup.context().drain_telemetry(usize::MAX) {
                print_message(&message);
            }
            return Ok(());
        }
    }
}

fn print_message(message: &Message) {
    match message {
        Message::Metrics(m) => println!(
            "  {} {:>9}  episodes {:>6}  lines {:>4}  best {:>4}  avg {:>8.2}  ε {:.3}",
            "step".dimmed(),
            m.steps,
            m.episode_count,
            m.objective_metric,
            m.best_objective,
            m.avg_reward,
            m.exploration_rate
        ),
        Message::Status {
            status,
            message: Some(note),
            ..
        } => println!("  [{}] {note}", status.to_string().cyan()),
        Message::Info { message } => println!("  {} {message}", "•".green()),
        Message::Error { error, trace } => {
            println!("  {} {error}", "✗".red().bold());
            if let Some(trace) = trace {
                println!("    {}", trace.dimmed());
            }
        }
        _ => {}
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("  {} {}", "tetra".bold().cyan(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Live training control plane");
    println!();
}
