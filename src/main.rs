//! `dragtree` - drag-race staging, auto-start and light-tree controller

use clap::Parser;
use tokio_util::sync::CancellationToken;

use dragtree::cli::args::Cli;
use dragtree::cli::commands;
use dragtree::error::ExitCode;
use dragtree::observability::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if !cli.quiet
        && let Err(e) = init_logging(&cli.log_options())
    {
        eprintln!("error: cannot open log file: {e}");
        std::process::exit(ExitCode::IO_ERROR);
    }

    // First signal stops the race in flight, the second exits at once
    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable");
                    return;
                }
            };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }

        eprintln!("\nStopping the race... (press Ctrl+C again to force)");
        stop.cancel();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => std::process::exit(ExitCode::INTERRUPTED),
            _ = sigterm.recv() => std::process::exit(ExitCode::TERMINATED),
        }
    });

    let result = commands::dispatch(cli, cancel).await;

    match result {
        Ok(()) => std::process::exit(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
