use crate::config::AppConfig;
use egui::{Ui, Window};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct SettingsWindow {
    visible: bool,
    config: Arc<Mutex<AppConfig>>,
    just_saved: bool,
}

enum SettingsResult {
    Save,
    Close,
    Reset,
    Nothing,
}

impl SettingsWindow {
    pub fn new(config: Arc<Mutex<AppConfig>>) -> Self {
        Self {
            visible: false,
            config,
            just_saved: false,
        }
    }

    pub fn show(&mut self, ctx: &egui::Context) {
        if !self.visible {
            return;
        }

        let mut open = self.visible;
        if let Ok(mut config) = self.config.try_lock() {
            let response = Window::new("Settings")
                .open(&mut open)
                .resizable(true)
                .default_size([420.0, 480.0])
                .show(ctx, |ui| show_settings_content(ui, &mut config));

            if let Some(inner) = response.and_then(|r| r.inner) {
                match inner {
                    SettingsResult::Save => {
                        if let Err(e) = config.save() {
                            tracing::error!("Failed to save settings: {}", e);
                        }
                        self.visible = false;
                        self.just_saved = true;
                    }
                    SettingsResult::Close => {
                        self.visible = false;
                    }
                    SettingsResult::Reset | SettingsResult::Nothing => {}
                }
            }
        }

        if !open {
            self.visible = false;
        }
    }

    pub fn open(&mut self) {
        self.visible = true;
    }

    pub fn take_just_saved(&mut self) -> bool {
        let was = self.just_saved;
        self.just_saved = false;
        was
    }
}

fn path_row(ui: &mut Ui, label: &str, value: &mut Option<String>, filter: (&str, &[&str])) {
    ui.label(label);
    ui.horizontal(|ui| {
        let mut text = value.clone().unwrap_or_default();
        if ui
            .add(egui::TextEdit::singleline(&mut text).hint_text("auto-detect"))
            .changed()
        {
            *value = (!text.trim().is_empty()).then(|| text.trim().to_string());
        }
        if ui.button("Browse").clicked() {
            if let Some(path) = rfd::FileDialog::new()
                .add_filter(filter.0, filter.1)
                .pick_file()
            {
                *value = Some(path.display().to_string());
            }
        }
    });
}

fn show_settings_content(ui: &mut Ui, config: &mut AppConfig) -> SettingsResult {
    let mut result = SettingsResult::Nothing;
    let exe_filter: &[&str] = if cfg!(windows) { &["exe"] } else { &["*"] };

    egui::ScrollArea::vertical().max_height(380.0).show(ui, |ui| {
        ui.group(|ui| {
            ui.heading("Paths");
            path_row(ui, "ADB:", &mut config.adb_path, ("Executable", exe_filter));
            path_row(ui, "scrcpy:", &mut config.scrcpy_path, ("Executable", exe_filter));
            path_row(ui, "API server:", &mut config.api_exe_path, ("Executable", exe_filter));
        });

        ui.group(|ui| {
            ui.heading("Device");
            ui.horizontal(|ui| {
                ui.label("Reverse port:");
                ui.add(egui::DragValue::new(&mut config.reverse_port).range(1..=65535));
            });
            ui.horizontal(|ui| {
                ui.label("Poll interval:");
                ui.add(egui::DragValue::new(&mut config.poll_interval_secs).range(1..=60).suffix(" s"));
            });
            ui.horizontal(|ui| {
                ui.label("Parallel file jobs:");
                ui.add(egui::DragValue::new(&mut config.max_parallel_jobs).range(1..=16));
            });
            ui.checkbox(&mut config.notifications, "Desktop notifications");
        });

        ui.group(|ui| {
            ui.heading("API Log");
            ui.horizontal(|ui| {
                ui.label("Online marker:");
                ui.text_edit_singleline(&mut config.online_marker);
            });
            ui.horizontal(|ui| {
                ui.label("Keep logs for:");
                ui.add(egui::DragValue::new(&mut config.log_retention_days).range(1..=365).suffix(" days"));
            });
            ui.horizontal(|ui| {
                ui.label("Autosave every:");
                ui.add(egui::DragValue::new(&mut config.autosave_secs).range(5..=600).suffix(" s"));
            });
        });

        ui.group(|ui| {
            ui.heading("Screen");
            let scrcpy = &mut config.scrcpy;
            ui.add(egui::Slider::new(&mut scrcpy.bitrate_mbps, 1..=32).text("Bitrate (Mbps)"));
            ui.horizontal(|ui| {
                let mut limit = scrcpy.max_size.is_some();
                if ui.checkbox(&mut limit, "Max size").changed() {
                    scrcpy.max_size = limit.then_some(1024);
                }
                if let Some(size) = scrcpy.max_size.as_mut() {
                    ui.add(egui::DragValue::new(size).range(240..=4096).suffix("px"));
                }
            });
            ui.checkbox(&mut scrcpy.show_touches, "Show touches");
            ui.checkbox(&mut scrcpy.turn_screen_off, "Turn screen off");
            ui.checkbox(&mut scrcpy.stay_awake, "Stay awake");
            ui.checkbox(&mut scrcpy.borderless, "Borderless window");
            ui.label("Extra scrcpy arguments:");
            ui.text_edit_singleline(&mut scrcpy.extra_args);
        });

        ui.group(|ui| {
            ui.heading("Theme");
            ui.horizontal(|ui| {
                ui.radio_value(&mut config.theme, "light".to_string(), "Light");
                ui.radio_value(&mut config.theme, "dark".to_string(), "Dark");
            });
        });
    });

    ui.separator();
    ui.horizontal(|ui| {
        if ui.button("💾 Save").clicked() {
            result = SettingsResult::Save;
        }
        if ui.button("Cancel").clicked() {
            result = SettingsResult::Close;
        }
        if ui.button("Reset to Defaults").clicked() {
            *config = AppConfig::default();
            result = SettingsResult::Reset;
        }
    });

    result
}
