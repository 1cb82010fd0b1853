use crate::bridge::{AdbBridge, ScrcpyBridge};
use crate::config::{AppConfig, SiteConfig};
use crate::device::{Device, SharedConnection};
use crate::embed::{EmbedState, PixelRect, ScreenEmbed};
use crate::events::{ApiStatus, AppEvent, JobKind};
use crate::instance::InstanceLock;
use crate::services::api_log::ApiLog;
use crate::services::api_supervisor::ApiSupervisor;
use crate::services::apk_installer::{InstallTiming, PackageInstaller};
use crate::services::apk_monitor::ApkMonitor;
use crate::services::device_monitor::{DeviceControl, DeviceMonitor};
use crate::services::file_queue::{FileQueue, JobPool, Readiness};
use crate::services::watcher::FolderWatch;
use crate::services::zip_monitor::{ZipMonitor, ZipMonitorSettings};
use crate::tray::TrayManager;
use crate::ui::{
    show_file_queue, show_screen_panel, ApiLogAction, ApiLogPanel, DeviceAction, DeviceList,
    ScreenAction, SettingsWindow,
};
use crate::utils;
use chrono::Local;
use eframe::egui;
use egui::{Color32, RichText, ViewportCommand};
use notify_rust::{Notification, Timeout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, Mutex};

pub const WINDOW_TITLE: &str = "HHT Android Connect";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    Devices,
    ApiLog,
    Zip,
    Apk,
    Screen,
}

impl Tab {
    const ALL: [Tab; 5] = [Tab::Devices, Tab::ApiLog, Tab::Zip, Tab::Apk, Tab::Screen];

    fn label(self) -> &'static str {
        match self {
            Tab::Devices => "Device Status",
            Tab::ApiLog => "API Log",
            Tab::Zip => "Zip Monitor",
            Tab::Apk => "APK Monitor",
            Tab::Screen => "Screen",
        }
    }
}

/// Long-running workers owned by the window.
pub struct Services {
    adb: AdbBridge,
    device_monitor: Arc<DeviceMonitor>,
    zip_monitor: Option<Arc<ZipMonitor>>,
    apk_monitor: Option<Arc<ApkMonitor>>,
    watches: Vec<FolderWatch>,
    api: ApiSupervisor,
    cancel: watch::Sender<bool>,
}

impl Services {
    /// Start the adb server, the device monitor, the folder monitors and `api.exe`.
    /// `adb` must already be known to work. Must run inside the tokio runtime.
    pub fn start(
        base_dir: &Path,
        config: &AppConfig,
        adb: AdbBridge,
        events: UnboundedSender<AppEvent>,
    ) -> Self {
        let runtime = Handle::current();
        if let Err(e) = adb.start_server() {
            tracing::warn!("adb start-server failed: {}", e);
        }

        let connection = SharedConnection::new();
        let device_monitor = DeviceMonitor::new(
            Arc::new(adb.clone()) as Arc<dyn DeviceControl>,
            connection.clone(),
            config.reverse_port,
            events.clone(),
        );
        let pool = JobPool::new(config.max_parallel_jobs.max(1));

        let mut zip_monitor = None;
        let mut apk_monitor = None;
        let mut watches = Vec::new();

        match SiteConfig::load(&SiteConfig::path_in(base_dir)) {
            Ok(site) => {
                tracing::info!("Zip prefix filter: '{}'", site.zip_filename_prefix);

                if site.price_tag_path.is_dir() {
                    let monitor = ZipMonitor::new(
                        ZipMonitorSettings {
                            folder: site.price_tag_path.clone(),
                            prefix: site.zip_filename_prefix.clone(),
                            tmp_root: base_dir.join("tmp"),
                            readiness: Readiness::ZIP,
                        },
                        pool.clone(),
                        events.clone(),
                    );
                    match monitor.watch() {
                        Ok(watch) => watches.push(watch),
                        Err(e) => tracing::error!("Cannot watch {}: {}", site.price_tag_path.display(), e),
                    }
                    zip_monitor = Some(monitor);
                } else {
                    tracing::warn!("Price tag folder missing: {}", site.price_tag_path.display());
                }

                if site.apk_monitor_path.is_dir() {
                    let monitor = ApkMonitor::new(
                        site.apk_monitor_path.clone(),
                        Arc::new(adb.clone()) as Arc<dyn PackageInstaller>,
                        connection,
                        InstallTiming::default(),
                        pool,
                        events.clone(),
                    );
                    match monitor.watch() {
                        Ok(watch) => watches.push(watch),
                        Err(e) => tracing::error!("Cannot watch {}: {}", site.apk_monitor_path.display(), e),
                    }
                    device_monitor.attach_apk_monitor(Arc::clone(&monitor));
                    apk_monitor = Some(monitor);
                } else {
                    tracing::warn!("APK folder missing: {}", site.apk_monitor_path.display());
                }
            }
            Err(e) => {
                tracing::error!("{}", e);
                let _ = events.send(AppEvent::Notice(e.to_string()));
            }
        }

        let api_exe = config
            .api_exe_path
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| utils::find_api_exe(base_dir));
        let mut api = ApiSupervisor::new(api_exe, config.online_marker.clone(), events, runtime.clone());
        api.start();

        let (cancel, cancel_rx) = watch::channel(false);
        runtime.spawn(
            Arc::clone(&device_monitor).run(Duration::from_secs(config.poll_interval_secs.max(1)), cancel_rx),
        );

        Self {
            adb,
            device_monitor,
            zip_monitor,
            apk_monitor,
            watches,
            api,
            cancel,
        }
    }

    /// Stop every worker and remove the reverse mapping of the active device.
    pub fn shutdown(&mut self) {
        let _ = self.cancel.send(true);
        if let Some(monitor) = &self.apk_monitor {
            monitor.shutdown();
        }
        self.watches.clear();
        self.api.stop();
        self.device_monitor.release_on_exit();
        tracing::info!("Services stopped");
    }
}

pub struct HhtConnectApp {
    config: Arc<Mutex<AppConfig>>,
    runtime: Handle,
    events_tx: UnboundedSender<AppEvent>,
    events_rx: UnboundedReceiver<AppEvent>,
    services: Services,
    tab: Tab,
    devices: Vec<Device>,
    device_list: DeviceList,
    connected: Option<String>,
    api_log: ApiLog,
    api_status: ApiStatus,
    api_panel: ApiLogPanel,
    zip_queue: FileQueue,
    apk_queue: FileQueue,
    settings_window: SettingsWindow,
    tray: Option<TrayManager>,
    embed: ScreenEmbed,
    scrcpy: Option<ScrcpyBridge>,
    status_message: String,
    last_autosave: Instant,
    lock: Option<InstanceLock>,
    shut_down: bool,
    quitting: bool,
}

impl HhtConnectApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        base_dir: &Path,
        config: AppConfig,
        adb: AdbBridge,
        api_log: ApiLog,
        lock: Option<InstanceLock>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let tray = match TrayManager::new(events_tx.clone(), cc.egui_ctx.clone()) {
            Ok(tray) => Some(tray),
            Err(e) => {
                tracing::warn!("Running without tray icon: {}", e);
                None
            }
        };

        let services = Services::start(base_dir, &config, adb, events_tx.clone());
        let scrcpy = config
            .scrcpy_path
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| utils::find_scrcpy(base_dir))
            .map(ScrcpyBridge::new);
        if scrcpy.is_none() {
            tracing::warn!("scrcpy not found; Screen tab disabled");
        }

        apply_theme(&cc.egui_ctx, &config.theme);
        let config = Arc::new(Mutex::new(config));

        Self {
            settings_window: SettingsWindow::new(Arc::clone(&config)),
            config,
            runtime: Handle::current(),
            events_tx,
            events_rx,
            services,
            tab: Tab::Devices,
            devices: Vec::new(),
            device_list: DeviceList::new(),
            connected: None,
            api_log,
            api_status: ApiStatus::Offline,
            api_panel: ApiLogPanel::new(),
            zip_queue: FileQueue::new(),
            apk_queue: FileQueue::new(),
            tray,
            embed: ScreenEmbed::new(WINDOW_TITLE),
            scrcpy,
            status_message: String::new(),
            last_autosave: Instant::now(),
            lock,
            shut_down: false,
            quitting: false,
        }
    }

    fn config_snapshot(&self) -> AppConfig {
        self.config
            .try_lock()
            .map(|config| config.clone())
            .unwrap_or_default()
    }

    fn run_background_task<F>(&self, task: F)
    where
        F: FnOnce() -> Result<String, String> + Send + 'static,
    {
        let sender = self.events_tx.clone();
        self.runtime.spawn_blocking(move || {
            let message = match task() {
                Ok(message) | Err(message) => message,
            };
            if !message.is_empty() {
                let _ = sender.send(AppEvent::Notice(message));
            }
        });
    }

    fn notify(&self, message: String) {
        if !self.config_snapshot().notifications {
            return;
        }
        self.runtime.spawn_blocking(move || {
            if let Err(e) = Notification::new()
                .summary("HHT Connect")
                .body(&message)
                .timeout(Timeout::Milliseconds(3000))
                .show()
            {
                tracing::debug!("Notification failed: {}", e);
            }
        });
    }

    fn queue_mut(&mut self, kind: JobKind) -> &mut FileQueue {
        match kind {
            JobKind::Zip => &mut self.zip_queue,
            JobKind::Apk => &mut self.apk_queue,
        }
    }

    fn set_connected(&mut self, connected: Option<String>) {
        self.connected = connected;
        if let Some(tray) = self.tray.as_mut() {
            tray.set_connected(self.connected.is_some());
        }
        self.device_list.update_devices(&self.devices, self.connected.as_deref());
    }

    fn handle_events(&mut self, ctx: &egui::Context) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                AppEvent::DevicesRefreshed(devices) => {
                    self.devices = devices;
                    self.device_list.update_devices(&self.devices, self.connected.as_deref());
                    self.device_list.set_status(format!("Found {} device(s)", self.devices.len()));
                }
                AppEvent::DeviceListFailed(e) => {
                    self.device_list.set_status(format!("ADB error: {}", e));
                }
                AppEvent::DeviceConnected(serial) => {
                    self.notify(format!("Connected:\n{}", serial));
                    self.status_message = format!("Connected {}", serial);
                    self.set_connected(Some(serial));
                }
                AppEvent::DeviceDisconnected { serial, unplugged } => {
                    self.notify(format!("Disconnected:\n{}", serial));
                    self.status_message = if unplugged {
                        format!("{} was unplugged", serial)
                    } else {
                        format!("Disconnected {}", serial)
                    };
                    self.embed.stop();
                    self.set_connected(None);
                }
                AppEvent::ConnectFailed { serial, reason } => {
                    tracing::error!("Connect to {} failed: {}", serial, reason);
                    self.status_message = format!("Failed to connect {}: {}", serial, reason);
                    rfd::MessageDialog::new()
                        .set_title("Error")
                        .set_description(format!("Failed:\n{}", reason))
                        .set_level(rfd::MessageLevel::Error)
                        .show();
                }
                AppEvent::JobQueued { kind, path } => self.queue_mut(kind).push(path),
                AppEvent::JobUpdated { kind, path, status } => {
                    self.queue_mut(kind).update(&path, status);
                }
                AppEvent::ApkMonitorReset => self.apk_queue.clear(),
                AppEvent::ApiLine(line) => self.api_log.push(line),
                AppEvent::ApiStatus(status) => self.api_status = status,
                AppEvent::Notice(message) => self.status_message = message,
                AppEvent::ShowWindow => {
                    ctx.send_viewport_cmd(ViewportCommand::Visible(true));
                    ctx.send_viewport_cmd(ViewportCommand::Minimized(false));
                    ctx.send_viewport_cmd(ViewportCommand::Focus);
                }
                AppEvent::Quit => self.quit(ctx),
            }
        }
    }

    fn autosave_if_due(&mut self) {
        let interval = Duration::from_secs(self.config_snapshot().autosave_secs.max(1));
        if self.last_autosave.elapsed() < interval {
            return;
        }
        self.last_autosave = Instant::now();
        if let Err(e) = self.api_log.autosave(Local::now().date_naive()) {
            tracing::error!("API log autosave failed: {}", e);
        }
    }

    fn handle_device_action(&mut self, action: DeviceAction) {
        let monitor = Arc::clone(&self.services.device_monitor);
        match action {
            DeviceAction::Refresh => self.run_background_task(move || {
                monitor.refresh().map(|_| String::new()).map_err(|e| e.to_string())
            }),
            DeviceAction::Connect(serial) => self.run_background_task(move || {
                monitor.connect(&serial).map(|_| String::new()).map_err(|e| e.to_string())
            }),
            DeviceAction::Disconnect => self.run_background_task(move || {
                monitor
                    .disconnect()
                    .map(|_| String::new())
                    .map_err(|e| format!("Disconnect failed: {}", e))
            }),
            DeviceAction::RestartAdb => {
                let adb = self.services.adb.clone();
                self.run_background_task(move || {
                    adb.restart_server()
                        .map_err(|e| format!("ADB restart failed: {}", e))?;
                    monitor.refresh().map_err(|e| e.to_string())?;
                    Ok("ADB restarted".to_string())
                });
            }
            DeviceAction::None => {}
        }
    }

    fn handle_api_action(&mut self, action: ApiLogAction) {
        match action {
            ApiLogAction::Search(term) => {
                if self.api_log.search_next(&term).is_some() {
                    self.api_panel.reveal_hit();
                } else if !term.is_empty() {
                    self.status_message = format!("'{}' not found", term);
                }
            }
            ApiLogAction::Restart => {
                tracing::info!("Restarting api.exe");
                self.api_log.clear();
                self.api_status = ApiStatus::Offline;
                self.services.api.restart();
            }
            ApiLogAction::OpenFolder => {
                let dir = self.api_log.dir();
                if let Err(e) = utils::open_path(dir) {
                    tracing::warn!("Failed to open {}: {}", dir.display(), e);
                }
            }
            ApiLogAction::None => {}
        }
    }

    fn handle_screen_action(&mut self, action: ScreenAction) {
        match action {
            ScreenAction::Start => {
                let Some(scrcpy) = self.scrcpy.clone() else {
                    return;
                };
                let settings = self.config_snapshot().scrcpy;
                match self.embed.start(&scrcpy, self.connected.as_deref(), &settings) {
                    Ok(()) => self.status_message = "Screen started".to_string(),
                    Err(e) => {
                        tracing::error!("{}", e);
                        self.status_message = e.to_string();
                    }
                }
            }
            ScreenAction::Stop => {
                self.embed.stop();
                self.status_message = "Screen stopped".to_string();
            }
            ScreenAction::None => {}
        }
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        tracing::info!("Shutting down");

        if let Err(e) = self.api_log.autosave(Local::now().date_naive()) {
            tracing::error!("Final API log save failed: {}", e);
        }
        self.embed.stop();
        self.services.shutdown();
        self.tray = None;
        self.lock = None;
    }

    fn quit(&mut self, ctx: &egui::Context) {
        self.shutdown();
        self.quitting = true;
        ctx.send_viewport_cmd(ViewportCommand::Visible(true));
        ctx.send_viewport_cmd(ViewportCommand::Close);
    }

    fn show_tabs(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            for tab in Tab::ALL {
                ui.selectable_value(&mut self.tab, tab, tab.label());
            }
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.button("⚙").on_hover_text("Settings").clicked() {
                    self.settings_window.open();
                }
            });
        });
    }

    fn show_status_bar(&self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let (text, color) = match &self.connected {
                Some(serial) => (format!("Device: {}", serial), Color32::from_rgb(0x2E, 0xC5, 0x74)),
                None => ("Device: Disconnected".to_string(), Color32::GRAY),
            };
            ui.label(RichText::new(text).color(color));
            ui.separator();
            ui.label(format!("API: {}", self.api_status));
            if !self.status_message.is_empty() {
                ui.separator();
                ui.label(RichText::new(&self.status_message).color(Color32::GRAY));
            }
        });
    }
}

fn apply_theme(ctx: &egui::Context, theme: &str) {
    match theme {
        "dark" => ctx.set_visuals(egui::Visuals::dark()),
        _ => ctx.set_visuals(egui::Visuals::light()),
    }
}

impl eframe::App for HhtConnectApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_events(ctx);
        self.autosave_if_due();

        if self.settings_window.take_just_saved() {
            let config = self.config_snapshot();
            apply_theme(ctx, &config.theme);
            self.status_message = "Settings saved. Paths and intervals apply after restart.".to_string();
        }

        if ctx.input(|i| i.viewport().close_requested()) && !self.quitting {
            if self.tray.is_some() {
                ctx.send_viewport_cmd(ViewportCommand::CancelClose);
                ctx.send_viewport_cmd(ViewportCommand::Visible(false));
            } else {
                self.quit(ctx);
            }
        }

        egui::TopBottomPanel::top("tabs").show(ctx, |ui| self.show_tabs(ui));
        egui::TopBottomPanel::bottom("status").show(ctx, |ui| self.show_status_bar(ui));

        let embed_state = if self.tab == Tab::Screen {
            self.embed.poll()
        } else {
            self.embed.state()
        };
        if let Some(note) = self.embed.take_exit_note() {
            self.status_message = note;
        }

        egui::CentralPanel::default().show(ctx, |ui| match self.tab {
            Tab::Devices => {
                let action = self.device_list.show(ui, self.connected.as_deref());
                self.handle_device_action(action);
            }
            Tab::ApiLog => {
                let action = self.api_panel.show(ui, &self.api_log, self.api_status);
                self.handle_api_action(action);
            }
            Tab::Zip => show_file_queue(
                ui,
                "zip_table",
                "Zip Monitor",
                self.services.zip_monitor.as_ref().map(|m| m.folder()),
                &self.zip_queue,
                "Total Files Processed",
            ),
            Tab::Apk => show_file_queue(
                ui,
                "apk_table",
                "APK Monitor",
                self.services.apk_monitor.as_ref().map(|m| m.folder()),
                &self.apk_queue,
                "Total APKs Processed",
            ),
            Tab::Screen => {
                let (action, area) = show_screen_panel(
                    ui,
                    embed_state,
                    self.connected.as_deref(),
                    self.scrcpy.is_some(),
                );
                self.handle_screen_action(action);
                if embed_state == EmbedState::Embedded {
                    self.embed.place(PixelRect::from_egui(area, ctx.pixels_per_point()));
                }
            }
        });

        if self.tab != Tab::Screen && embed_state == EmbedState::Embedded {
            // Park the stream out of sight while another tab is shown
            self.embed.place(PixelRect { x: -10_000, y: -10_000, width: 1, height: 1 });
        }

        self.settings_window.show(ctx);

        let repaint = if embed_state == EmbedState::Waiting {
            Duration::from_millis(100)
        } else {
            Duration::from_millis(250)
        };
        ctx.request_repaint_after(repaint);
    }
}

impl Drop for HhtConnectApp {
    fn drop(&mut self) {
        self.shutdown();
    }
}
