//! Writes a network diagnostic report for the POS API host every few minutes.

use anyhow::{Context, Result};
use clap::Parser;
use hht_connect::instance::{InstanceError, InstanceLock};
use hht_connect::logging::init_tool_logging;
use hht_connect::services::net_diagnostics::{
    computer_name, http_client, run_diagnostics, DEFAULT_HOST, DEFAULT_INTERVAL, FIRST_RUN_DELAY,
};
use hht_connect::tray::{ToolCommand, ToolTray, CONNECTED_COLOR, DIAGNOSTICS_MENU};
use hht_connect::utils;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(windows)]
const DEFAULT_LOG_FOLDER: &str = "C:\\Latency\\latency test";
#[cfg(not(windows))]
const DEFAULT_LOG_FOLDER: &str = "latency";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host to trace, resolve and time over HTTPS
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Minutes between reports
    #[arg(short, long, default_value_t = DEFAULT_INTERVAL.as_secs() / 60)]
    interval_mins: u64,

    /// Folder the reports are written to
    #[arg(short, long, default_value = DEFAULT_LOG_FOLDER)]
    log_folder: PathBuf,

    /// Write one report and exit
    #[arg(long)]
    once: bool,
}

async fn report_once(client: &reqwest::Client, host: &str, folder: &Path, computer: &str) {
    let report = run_diagnostics(client, host).await;
    match report.write_to(folder, computer) {
        Ok(path) => tracing::info!("Report written to {}", path.display()),
        Err(e) => tracing::error!("{:#}", e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = init_tool_logging(&args.log_folder, "net_diagnostics.log", true)?;

    let _lock = match InstanceLock::acquire(&InstanceLock::default_path("hht_net_diagnostics")) {
        Ok(lock) => lock,
        Err(InstanceError::AlreadyRunning(pid)) => {
            tracing::warn!("Already running (pid {})", pid);
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to take the single-instance lock"),
    };

    let client = http_client()?;
    let computer = computer_name();

    if args.once {
        report_once(&client, &args.host, &args.log_folder, &computer).await;
        return Ok(());
    }

    let interval = Duration::from_secs(args.interval_mins.max(1) * 60);
    tracing::info!(
        "Monitoring {} every {} min, reports in {}",
        args.host,
        args.interval_mins,
        args.log_folder.display()
    );

    let (tray_tx, mut tray_rx) = tokio::sync::mpsc::unbounded_channel();
    let _tray = match ToolTray::spawn("API Connection Monitor", DIAGNOSTICS_MENU, CONNECTED_COLOR, tray_tx) {
        Ok(tray) => Some(tray),
        Err(e) => {
            tracing::warn!("Running without a tray icon: {:#}", e);
            None
        }
    };

    let mut next = tokio::time::Instant::now() + FIRST_RUN_DELAY;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(next) => {
                report_once(&client, &args.host, &args.log_folder, &computer).await;
                next = tokio::time::Instant::now() + interval;
            }
            Some(command) = tray_rx.recv() => match command {
                ToolCommand::RunNow => {
                    tracing::info!("Manual diagnostic run");
                    report_once(&client, &args.host, &args.log_folder, &computer).await;
                }
                ToolCommand::OpenLog => {
                    if let Err(e) = utils::open_path(&args.log_folder) {
                        tracing::error!("Failed to open {}: {}", args.log_folder.display(), e);
                    }
                }
                ToolCommand::Exit => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("Stopped");
    Ok(())
}
