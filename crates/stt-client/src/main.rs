//! `stt-client` entry point.
//!
//! One-shot by default; `--ptt` enters continuous push-to-talk. In daemon
//! mode a missing display is a silent success (nothing to do in a headless
//! session), and logs go to the rotating file, never stdout.

use std::process::ExitCode;

use clap::Parser;

use stt_client::daemon::{self, DaemonOptions, RunOutcome};
use stt_client::logging;
use stt_client::oneshot::{self, OneshotOptions};
use stt_core::{OutputMode, Settings};

#[derive(Parser, Debug)]
#[command(name = "stt-client", about = "STT push-to-talk client", version)]
struct Cli {
    /// Server URL (default: ws://127.0.0.1:9876, or STT_CLIENT_SERVER_URL)
    #[arg(long)]
    server: Option<String>,

    /// Output mode (stdout, type, clipboard)
    #[arg(short, long)]
    output: Option<OutputMode>,

    /// Continuous PTT mode with global hotkey
    #[arg(long)]
    ptt: bool,

    /// Daemon mode: wait for the server indefinitely, require a display,
    /// suppress timing output
    #[arg(long)]
    daemon: bool,

    /// Show the system tray indicator
    #[arg(long, requires = "ptt")]
    tray: bool,

    /// Test the connection only
    #[arg(long)]
    test: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose) {
        eprintln!("warning: file logging disabled: {e}");
    }

    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(1);
        }
    };

    // A daemon without a display has nothing to type into and no tray to
    // show; exit quietly so a service unit doesn't flap.
    if cli.daemon && !display_available() {
        tracing::info!("Daemon mode: no display available, exiting");
        return ExitCode::SUCCESS;
    }

    match run(cli, settings) {
        Ok(RunOutcome::Completed) => ExitCode::SUCCESS,
        Ok(RunOutcome::Interrupted) => ExitCode::from(130),
        Err(e) => {
            tracing::error!(error = %e, "Client failed");
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn run(cli: Cli, settings: Settings) -> anyhow::Result<RunOutcome> {
    let server_url = cli
        .server
        .unwrap_or_else(|| settings.client.server_url.clone());
    let output_mode = cli.output.unwrap_or(settings.client.output_mode);

    if cli.ptt {
        let opts = DaemonOptions {
            server_url,
            output_mode,
            daemon_mode: cli.daemon,
            tray_enabled: cli.tray,
        };
        Ok(daemon::run_ptt_mode(settings, opts).await?)
    } else {
        let opts = OneshotOptions {
            server_url,
            output_mode,
            test_only: cli.test,
        };
        tokio::select! {
            result = oneshot::run_once(&settings, &opts) => {
                result?;
                Ok(RunOutcome::Completed)
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                Ok(RunOutcome::Interrupted)
            }
        }
    }
}

fn display_available() -> bool {
    let set = |key: &str| std::env::var(key).is_ok_and(|v| !v.is_empty());
    set("DISPLAY") || set("WAYLAND_DISPLAY")
}
