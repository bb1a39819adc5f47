//! ovsup - supervise an OpenVPN daemon over its management interface
//!
//! # Usage
//!
//! ```bash
//! # Supervise a server, arguments after `--` go to openvpn
//! ovsup run -- --config /etc/openvpn/server.conf
//!
//! # Use a config file and print events as JSON lines
//! ovsup run --config ovsup.toml --json
//!
//! # Validate a config file
//! ovsup check-config ovsup.toml
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use ovsup_core::{DaemonArgs, DaemonEvent, DaemonState, OperatingMode};
use ovsupd::{OutputLine, OutputStream, ProcessSupervisor, SupervisorConfig};

/// OpenVPN daemon supervisor
#[derive(Parser, Debug)]
#[command(name = "ovsup", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon until interrupted
    Run {
        /// Config file (defaults to the per-user config if present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Daemon executable
        #[arg(long)]
        program: Option<PathBuf>,

        /// Operating mode: authority (server) or peer (client)
        #[arg(long)]
        mode: Option<OperatingMode>,

        /// Seconds between client list polls in authority mode
        #[arg(long, value_name = "SECS")]
        poll_interval: Option<u64>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,

        /// Arguments passed to the daemon
        #[arg(last = true)]
        daemon_args: Vec<String>,
    },

    /// Validate a config file and print the daemon command line
    CheckConfig {
        /// Config file to check
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Run {
            config,
            program,
            mode,
            poll_interval,
            json,
            daemon_args,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(program) = program {
                config.program = program;
            }
            if let Some(mode) = mode {
                config.mode = Some(mode);
            }
            if let Some(secs) = poll_interval {
                config.poll_interval_secs = secs;
            }
            if !daemon_args.is_empty() {
                config.args = DaemonArgs::new(daemon_args);
            }
            config.validate().context("invalid configuration")?;

            run_supervisor(config, json)
        }
        Command::CheckConfig { path } => check_config(&path),
    }
}

/// Loads the explicit config file, or the per-user one if it exists.
fn load_config(path: Option<&Path>) -> Result<SupervisorConfig> {
    if let Some(path) = path {
        return SupervisorConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()));
    }

    match SupervisorConfig::default_path() {
        Some(path) if path.exists() => SupervisorConfig::load(&path)
            .with_context(|| format!("failed to load {}", path.display())),
        _ => Ok(SupervisorConfig::default()),
    }
}

fn check_config(path: &Path) -> Result<()> {
    let config = SupervisorConfig::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    config.validate().context("invalid configuration")?;

    let args = config
        .args
        .clone()
        .with_management(Path::new("<management-socket>"));

    println!("mode: {}", config.resolved_mode());
    println!("poll interval: {}s", config.poll_interval_secs);
    println!("command: {} {}", config.program.display(), args.as_slice().join(" "));
    Ok(())
}

/// Runs the supervisor (async entry point).
#[tokio::main]
async fn run_supervisor(config: SupervisorConfig, json: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ovsup=info".parse()?)
                .add_directive("ovsupd=info".parse()?)
                .add_directive("ovsup_core=info".parse()?)
                .add_directive("ovsup_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        program = %config.program.display(),
        mode = %config.resolved_mode(),
        "ovsup starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let mut supervisor = ProcessSupervisor::new(config);

    if let Some(events) = supervisor.take_events() {
        tokio::spawn(print_events(events, json));
    }
    if let Some(output) = supervisor.take_output() {
        tokio::spawn(log_output(output));
    }

    supervisor
        .start()
        .await
        .context("failed to start daemon")?;

    let mut state = supervisor.subscribe_state();
    tokio::select! {
        _ = cancel_token.cancelled() => {}
        result = state.wait_for(|s| *s == DaemonState::Stopped) => {
            if result.is_ok() {
                warn!("Daemon exited on its own");
            }
        }
    }

    supervisor.stop().await;

    info!("ovsup stopped");
    Ok(())
}

async fn print_events(mut events: mpsc::Receiver<DaemonEvent>, json: bool) {
    while let Some(event) = events.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => error!(error = %e, "Failed to serialize event"),
            }
        } else {
            println!("{event}");
        }
    }
    debug!("Event printer stopped");
}

async fn log_output(mut output: mpsc::Receiver<OutputLine>) {
    while let Some(line) = output.recv().await {
        match line.stream {
            OutputStream::Stdout => info!(target: "ovsup::daemon", "{}", line.line),
            OutputStream::Stderr => warn!(target: "ovsup::daemon", "{}", line.line),
        }
    }
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
