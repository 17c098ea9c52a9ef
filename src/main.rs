//! krill-beat - Send heartbeats to the krill daemon from the command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use krill_sdk::{
    run_pulse, AsyncHeartbeatClient, ClientConfig, ClientError, ConfigError, ConfigLoader,
    HeartbeatClient, HeartbeatReceiver, Metadata, PulseError, ReceiverError, Reporter, SendError,
};

#[derive(Parser)]
#[command(
    name = "krill-beat",
    about = "Report service health to the krill daemon",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file to use instead of the default search paths.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Daemon socket path (overrides config and KRILL_SOCKET).
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Service name to report as.
    #[arg(long, global = true)]
    service: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single heartbeat and exit.
    Send {
        /// Report degraded status with this reason.
        #[arg(long, conflicts_with = "meta")]
        degraded: Option<String>,
        /// Metadata entry (repeatable).
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },
    /// Send heartbeats periodically until interrupted.
    Pulse {
        /// Milliseconds between heartbeats.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval_ms: Option<u64>,
        /// Stop after this many heartbeats.
        #[arg(long)]
        count: Option<u64>,
    },
    /// Print heartbeats received on the socket.
    Listen,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Receiver(#[from] ReceiverError),

    #[error(transparent)]
    Pulse(#[from] PulseError),

    #[error("No service name given (use --service or set `service` in the config file)")]
    MissingService,

    #[error("Heartbeat task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Failed to encode heartbeat: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<SendError> for CliError {
    fn from(err: SendError) -> Self {
        Self::Client(err.into())
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{s}`"))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(cli: &Cli) -> Result<ClientConfig, CliError> {
    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path.clone()),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load()?;
    if let Some(socket) = &cli.socket {
        config.socket_path.clone_from(socket);
    }
    if let Some(service) = &cli.service {
        config.service = Some(service.clone());
    }
    Ok(config)
}

/// Returns a receiver that flips to `true` on Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
        }
        let _ = tx.send(true);
    });
    rx
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Send { degraded, meta } => {
            let service = config.service.ok_or(CliError::MissingService)?;
            let socket_path = config.socket_path;
            tokio::task::spawn_blocking(move || -> Result<(), ClientError> {
                let client = HeartbeatClient::connect(service, socket_path)?;
                match degraded {
                    Some(reason) => client.report_degraded(&reason)?,
                    None if meta.is_empty() => client.heartbeat()?,
                    None => client.heartbeat_with_metadata(meta.into_iter().collect::<Metadata>())?,
                }
                client.close();
                Ok(())
            })
            .await??;
        }
        Commands::Pulse { interval_ms, count } => {
            let service = config.service.clone().ok_or(CliError::MissingService)?;
            let interval_ms = interval_ms.unwrap_or(config.interval_ms);
            let interval = Duration::from_millis(interval_ms);

            let mut client = AsyncHeartbeatClient::connect(service, &config.socket_path)
                .await
                .map_err(ClientError::from)?;
            tracing::info!(
                service = %client.service(),
                path = %client.socket_path().display(),
                interval_ms,
                "Starting heartbeat pulse"
            );

            let result = run_pulse(&mut client, interval, count, shutdown_signal()).await;
            client.close().await;
            let outcome = result?;
            tracing::info!(sent = outcome.sent(), "Pulse finished");
        }
        Commands::Listen => {
            let (handle, mut heartbeats) = HeartbeatReceiver::new(&config.socket_path).start()?;
            let mut shutdown = shutdown_signal();

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    message = heartbeats.recv() => {
                        let Some(message) = message else { break };
                        println!("{}", serde_json::to_string(&message)?);
                    }
                }
            }
            handle.shutdown();
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
