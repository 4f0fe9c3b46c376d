use clap::{Parser, Subcommand};
use exn::ResultExt;
use fleetscan::error::{ErrorKind, Result};
use fleetscan::{AppState, Services};
use fleetscan_broadcast::ExportFormat;
use fleetscan_config::Config;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON).
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server until interrupted.
    Serve,
    /// Scan the fleet once and print the summary to stdout.
    Scan {
        #[arg(long, default_value = "json")]
        format: String,
    },
}

/// Logs go to stderr so `scan` output stays clean. `RUST_LOG` overrides the
/// configured filter.
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    tracing_subscriber::registry().with(filter).with(fmt::layer().with_writer(std::io::stderr)).init();
}

async fn serve(config: &Config) -> Result<()> {
    let services = Services::connect(config).await?;
    let shutdown = CancellationToken::new();
    let state = Arc::new(services.app_state(config, shutdown.clone()));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down");
        }
        shutdown.cancel();
    });
    let served = fleetscan::serve(state, config.server.bind).await;
    services.close().await;
    served
}

async fn scan(config: &Config, format: &str) -> Result<()> {
    let format: ExportFormat = format.parse::<ExportFormat>().or_raise(|| ErrorKind::Export)?;
    let services = Services::connect(config).await?;
    let state: AppState = services.app_state(config, CancellationToken::new());
    let scanned = state.refresh().await;
    services.close().await;
    let summary = scanned.or_raise(|| ErrorKind::Scan)?;
    let body = format.render(&summary).or_raise(|| ErrorKind::Export)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&body).or_raise(|| ErrorKind::Export)?;
    stdout.write_all(b"\n").or_raise(|| ErrorKind::Export)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match fleetscan_config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err:?}");
            return ExitCode::FAILURE;
        },
    };
    init_logging(&config);

    let result = match cli.command {
        Command::Serve => serve(&config).await,
        Command::Scan { format } => scan(&config, &format).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = ?err, "{err}");
            ExitCode::FAILURE
        },
    }
}
