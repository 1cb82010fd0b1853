//! Watches kiosk processes and logs when they start or die, with the
//! matching Windows event log entry for crashes.

use anyhow::Result;
use clap::Parser;
use hht_connect::logging::init_tool_logging;
use hht_connect::services::process_monitor::{
    log_transition, running_process_names, ProcessWatch, DEFAULT_TARGETS,
};
use hht_connect::tray::{ToolCommand, ToolTray, CONNECTED_COLOR, KIOSK_MENU};
use hht_connect::utils;
use std::path::PathBuf;
use std::time::Duration;
use sysinfo::System;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Process name to watch; repeat for several
    #[arg(short, long = "target", default_values = DEFAULT_TARGETS)]
    targets: Vec<String>,

    /// Seconds between process list checks
    #[arg(short, long, default_value_t = 5)]
    interval_secs: u64,

    /// Folder for kiosk_monitor_log.txt (defaults to the executable's folder)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Echo log lines to the console
    #[arg(long)]
    console: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_dir = args.log_dir.clone().unwrap_or_else(utils::base_dir);
    let _guard = init_tool_logging(&log_dir, "kiosk_monitor_log.txt", args.console)?;

    tracing::info!("--- Monitor Started (Detailed Mode) ---");

    let mut watch = ProcessWatch::new(&args.targets);
    tracing::debug!("Targets: {:?}, every {}s", watch.targets().collect::<Vec<_>>(), args.interval_secs);
    let mut system = System::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_secs.max(1)));

    let (tray_tx, mut tray_rx) = tokio::sync::mpsc::unbounded_channel();
    let _tray = match ToolTray::spawn("Kiosk Monitor Tool", KIOSK_MENU, CONNECTED_COLOR, tray_tx) {
        Ok(tray) => Some(tray),
        Err(e) => {
            tracing::warn!("Running without a tray icon: {:#}", e);
            None
        }
    };
    let log_file = log_dir.join("kiosk_monitor_log.txt");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let names = running_process_names(&mut system);
                for transition in watch.observe(&names) {
                    // Crash lookups shell out to PowerShell
                    if let Err(e) = tokio::task::spawn_blocking(move || log_transition(&transition)).await {
                        tracing::error!("Failed to log transition: {}", e);
                    }
                }
            }
            Some(command) = tray_rx.recv() => match command {
                ToolCommand::OpenLog => {
                    if let Err(e) = utils::open_path(&log_file) {
                        tracing::error!("Failed to open {}: {}", log_file.display(), e);
                    }
                }
                ToolCommand::Exit => break,
                ToolCommand::RunNow => {}
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("--- Monitor Stopped by User ---");
    Ok(())
}
