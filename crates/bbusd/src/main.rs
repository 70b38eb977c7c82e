//! The `bbusd` binary: CLI parsing, logging, runtime, and signal wiring
//! around the daemon library.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bbusd::{Config, Daemon, ShutdownHandle};

#[derive(Debug, Parser)]
#[command(name = "bbusd", version, about = "The busybus message bus daemon")]
struct Cli {
    /// Path of the bus socket (overrides BBUS_SOCKPATH and the default).
    #[arg(short = 's', long)]
    socket_path: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "could not build the runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async {
        let daemon = match Daemon::bind(Config {
            socket_path: cli.socket_path,
            auth: None,
        }) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(error = %e, "startup failed");
                return ExitCode::FAILURE;
            }
        };

        tokio::spawn(watch_signals(daemon.shutdown_handle()));

        match daemon.run().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "daemon failed");
                ExitCode::FAILURE
            }
        }
    })
}

/// Flip the run flag on SIGINT or SIGTERM; the router notices between
/// events.
async fn watch_signals(handle: ShutdownHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
    tracing::info!("shutdown signal received");
    handle.shutdown();
}
