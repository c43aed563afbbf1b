//! `stt-server` entry point.
//!
//! Loads the model before accepting connections; a missing GPU or model is
//! fatal with exit code 1. SIGTERM exits 0, SIGINT exits 130.

use std::process::ExitCode;

use clap::Parser;

use stt_core::{Provider, Settings};
use stt_server::runtime::{serve, Shutdown};
use stt_server::worker::TranscriberWorker;

#[derive(Parser, Debug)]
#[command(name = "stt-server", about = "STT WebSocket server", version)]
struct Cli {
    /// Bind address (default: 127.0.0.1, or STT_SERVER_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port (default: 9876, or STT_SERVER_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// ONNX execution provider (cuda, tensorrt)
    #[arg(long)]
    provider: Option<Provider>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::from(1);
        }
    };
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(provider) = cli.provider {
        settings.model.provider = provider;
    }

    let worker = match spawn_worker(&settings) {
        Ok(worker) => worker,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::from(1);
        }
    };

    match run(&settings, worker) {
        Ok(Shutdown::Terminate) => ExitCode::SUCCESS,
        Ok(Shutdown::Interrupt) => ExitCode::from(130),
        Err(e) => {
            tracing::error!(error = %e, "Server error");
            ExitCode::from(1)
        }
    }
}

#[cfg(feature = "sherpa")]
fn spawn_worker(settings: &Settings) -> Result<TranscriberWorker, stt_server::ServerError> {
    tracing::info!("Initializing STT server");
    let transcriber = stt_server::SherpaTranscriber::load(&settings.model)?;
    TranscriberWorker::spawn(Box::new(transcriber), settings.server.max_connections)
}

#[cfg(not(feature = "sherpa"))]
fn spawn_worker(_settings: &Settings) -> Result<TranscriberWorker, stt_server::ServerError> {
    Err(stt_server::ServerError::ModelInit(
        "built without an inference backend (enable the `sherpa` feature)".to_string(),
    ))
}

#[tokio::main]
async fn run(settings: &Settings, worker: TranscriberWorker) -> anyhow::Result<Shutdown> {
    Ok(serve(settings, worker).await?)
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .init();
}
