#![cfg_attr(all(windows, not(debug_assertions)), windows_subsystem = "windows")]

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use clap::Parser;
use eframe::{egui, NativeOptions};
use egui::IconData;
use hht_connect::app::{HhtConnectApp, WINDOW_TITLE};
use hht_connect::bridge::AdbBridge;
use hht_connect::config::AppConfig;
use hht_connect::instance::{self, InstanceError, InstanceLock};
use hht_connect::logging::{describe_host, init_logging};
use hht_connect::services::api_log::ApiLog;
use hht_connect::tray::{android_icon_rgba, CONNECTED_COLOR};
use hht_connect::utils;
use std::path::PathBuf;
use std::sync::Arc;

const LOCK_NAME: &str = "hht_android_connect";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Reset configuration files
    #[arg(short, long)]
    reset_config: bool,

    /// Verbose logging (overridden by RUST_LOG)
    #[arg(short, long)]
    debug: bool,

    /// Do not ask for administrator rights on start
    #[arg(long)]
    no_elevate: bool,

    /// Directory holding configs/, adb/, scrcpy/ and api.exe (defaults to the executable's folder)
    #[arg(long)]
    base_dir: Option<PathBuf>,
}

fn already_running(pid: u32) {
    tracing::warn!("Another instance is running (pid {})", pid);
    rfd::MessageDialog::new()
        .set_title("Running")
        .set_description("App already running.")
        .set_level(rfd::MessageLevel::Info)
        .show();
}

fn adb_missing() {
    rfd::MessageDialog::new()
        .set_title("Error")
        .set_description("Android Debug Bridge (ADB) not found.")
        .set_level(rfd::MessageLevel::Error)
        .show();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let base_dir = args.base_dir.clone().unwrap_or_else(utils::base_dir);

    let _log_guard = init_logging(&base_dir.join("logs"), "hht_connect.log", args.debug, cfg!(debug_assertions))?;
    tracing::info!("HHT Android Connect {} on {}", env!("CARGO_PKG_VERSION"), describe_host());
    tracing::info!("Base directory: {}", base_dir.display());

    if !args.no_elevate && !instance::is_elevated() {
        tracing::info!("Not elevated, relaunching as administrator");
        instance::relaunch_elevated()?;
        return Ok(());
    }

    let lock = match InstanceLock::acquire(&InstanceLock::default_path(LOCK_NAME)) {
        Ok(lock) => lock,
        Err(InstanceError::AlreadyRunning(pid)) => {
            already_running(pid);
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to take the single-instance lock"),
    };

    let config = if args.reset_config {
        let config = AppConfig::default();
        if let Err(e) = config.save() {
            tracing::warn!("Failed to write default config: {}", e);
        }
        config
    } else {
        AppConfig::load().unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            AppConfig::default()
        })
    };

    let adb = AdbBridge::new(config.adb_executable(&base_dir));
    match adb.version() {
        Ok(version) => tracing::info!("{}", version.lines().next().unwrap_or_default()),
        Err(e) => {
            tracing::error!("ADB not available at {}: {}", adb.path().display(), e);
            adb_missing();
            return Err(e).context("Android Debug Bridge (ADB) not found");
        }
    }

    let api_log = ApiLog::open(
        &base_dir.join("log"),
        Local::now().date_naive(),
        config.log_retention_days,
    )
    .context("Failed to open the API log")?;

    let icon = IconData {
        rgba: android_icon_rgba(64, CONNECTED_COLOR),
        width: 64,
        height: 64,
    };
    let viewport = egui::ViewportBuilder::default()
        .with_title(WINDOW_TITLE)
        .with_inner_size([560.0, 360.0])
        .with_min_inner_size([480.0, 300.0])
        .with_icon(Arc::new(icon));

    let native_options = NativeOptions {
        viewport,
        ..Default::default()
    };

    eframe::run_native(
        WINDOW_TITLE,
        native_options,
        Box::new(move |cc| {
            Ok(Box::new(HhtConnectApp::new(
                cc,
                &base_dir,
                config,
                adb,
                api_log,
                Some(lock),
            )))
        }),
    )
    .map_err(|e| anyhow!("UI error: {}", e))?;

    tracing::info!("Exited");
    Ok(())
}
