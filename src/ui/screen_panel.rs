use crate::embed::EmbedState;
use egui::{Color32, RichText, Ui};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenAction {
    Start,
    Stop,
    None,
}

fn state_label(state: EmbedState) -> (&'static str, Color32) {
    match state {
        EmbedState::Idle => ("Stopped", Color32::GRAY),
        EmbedState::Waiting => ("Starting...", Color32::from_rgb(0x3B, 0x82, 0xF6)),
        EmbedState::Embedded => ("Streaming", Color32::from_rgb(0x2E, 0xC5, 0x74)),
        EmbedState::Detached => ("Streaming in separate window", Color32::from_rgb(0xE0, 0xA1, 0x00)),
    }
}

/// Controls row plus the area the scrcpy window is fitted into. Returns the
/// clicked action and the embed area in points.
pub fn show_screen_panel(
    ui: &mut Ui,
    state: EmbedState,
    connected: Option<&str>,
    scrcpy_available: bool,
) -> (ScreenAction, egui::Rect) {
    let mut action = ScreenAction::None;

    ui.horizontal(|ui| {
        let running = state != EmbedState::Idle;
        let can_start = !running && connected.is_some() && scrcpy_available;
        if ui.add_enabled(can_start, egui::Button::new("▶ Start Screen")).clicked() {
            action = ScreenAction::Start;
        }
        if ui.add_enabled(running, egui::Button::new("⏹ Stop")).clicked() {
            action = ScreenAction::Stop;
        }
        let (text, color) = state_label(state);
        ui.label(RichText::new(text).color(color));
    });

    if !scrcpy_available {
        ui.label(RichText::new("scrcpy not found. Set its path in Settings.").color(Color32::GRAY));
    } else if connected.is_none() {
        ui.label(RichText::new("Connect a device to view its screen.").color(Color32::GRAY));
    }
    ui.separator();

    let area = ui.available_rect_before_wrap();
    ui.allocate_rect(area, egui::Sense::hover());
    if state != EmbedState::Embedded {
        ui.painter().rect_filled(area, 4.0, ui.visuals().extreme_bg_color);
    }
    (action, area)
}
