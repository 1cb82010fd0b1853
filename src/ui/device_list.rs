use crate::device::Device;
use egui::{Color32, RichText, Ui};
use egui_extras::{Column, TableBuilder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAction {
    Refresh,
    Connect(String),
    Disconnect,
    RestartAdb,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRow {
    pub serial: String,
    pub connected: bool,
}

impl DeviceRow {
    pub fn status_label(&self) -> &'static str {
        if self.connected { "Connected" } else { "Available" }
    }
}

/// Usable devices plus the connected one, even when adb no longer lists it.
pub fn device_rows(devices: &[Device], connected: Option<&str>) -> Vec<DeviceRow> {
    let mut rows: Vec<DeviceRow> = devices
        .iter()
        .filter(|d| d.is_usable())
        .map(|d| DeviceRow {
            serial: d.identifier.clone(),
            connected: connected == Some(d.identifier.as_str()),
        })
        .collect();

    if let Some(serial) = connected {
        if !rows.iter().any(|row| row.serial == serial) {
            rows.insert(
                0,
                DeviceRow {
                    serial: serial.to_string(),
                    connected: true,
                },
            );
        }
    }
    rows
}

pub struct DeviceList {
    rows: Vec<DeviceRow>,
    selected: Option<String>,
    status_message: String,
}

impl DeviceList {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            selected: None,
            status_message: String::new(),
        }
    }

    pub fn update_devices(&mut self, devices: &[Device], connected: Option<&str>) {
        self.rows = device_rows(devices, connected);

        // Drop a selection that vanished, then fall back to the first row
        if let Some(selected) = &self.selected {
            if !self.rows.iter().any(|row| &row.serial == selected) {
                self.selected = None;
            }
        }
        if self.selected.is_none() {
            self.selected = self.rows.first().map(|row| row.serial.clone());
        }
    }

    pub fn selected_serial(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
    }

    pub fn show(&mut self, ui: &mut Ui, connected: Option<&str>) -> DeviceAction {
        let mut action = DeviceAction::None;

        ui.heading("Device Status");
        ui.horizontal(|ui| {
            ui.label("Connected device:");
            match connected {
                Some(serial) => ui.label(RichText::new(serial).strong().color(Color32::from_rgb(0x2E, 0xC5, 0x74))),
                None => ui.label(RichText::new("None").color(Color32::GRAY)),
            };
        });
        ui.separator();

        if self.rows.is_empty() {
            ui.label(RichText::new("No devices found").color(Color32::GRAY));
        } else {
            TableBuilder::new(ui)
                .striped(true)
                .sense(egui::Sense::click())
                .column(Column::remainder().at_least(160.0))
                .column(Column::auto().at_least(100.0))
                .header(20.0, |mut header| {
                    header.col(|ui| {
                        ui.strong("Serial");
                    });
                    header.col(|ui| {
                        ui.strong("Status");
                    });
                })
                .body(|mut body| {
                    for row in &self.rows {
                        let is_selected = self.selected.as_deref() == Some(row.serial.as_str());
                        body.row(22.0, |mut table_row| {
                            table_row.set_selected(is_selected);
                            table_row.col(|ui| {
                                ui.label(&row.serial);
                            });
                            table_row.col(|ui| {
                                let color = if row.connected { Color32::from_rgb(0x2E, 0xC5, 0x74) } else { Color32::GRAY };
                                ui.label(RichText::new(row.status_label()).color(color));
                            });
                            if table_row.response().clicked() {
                                self.selected = Some(row.serial.clone());
                            }
                        });
                    }
                });
        }

        ui.separator();
        ui.horizontal(|ui| {
            if ui.button("🔄 Refresh").clicked() {
                action = DeviceAction::Refresh;
            }
            let can_connect = connected.is_none() && self.selected.is_some();
            if ui.add_enabled(can_connect, egui::Button::new("Connect")).clicked() {
                if let Some(serial) = &self.selected {
                    action = DeviceAction::Connect(serial.clone());
                }
            }
            if ui.add_enabled(connected.is_some(), egui::Button::new("Disconnect")).clicked() {
                action = DeviceAction::Disconnect;
            }
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.button("Restart ADB").clicked() {
                    action = DeviceAction::RestartAdb;
                }
            });
        });

        if !self.status_message.is_empty() {
            ui.label(RichText::new(&self.status_message).color(Color32::GRAY));
        }

        action
    }
}
