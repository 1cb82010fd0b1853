use crate::events::StatusTone;
use crate::services::file_queue::FileQueue;
use egui::{Color32, RichText, Ui};
use egui_extras::{Column, TableBuilder};
use std::path::Path;

pub fn tone_color(tone: StatusTone) -> Color32 {
    match tone {
        StatusTone::Pending => Color32::GRAY,
        StatusTone::Processing => Color32::from_rgb(0x3B, 0x82, 0xF6),
        StatusTone::Done => Color32::from_rgb(0x2E, 0xC5, 0x74),
        StatusTone::Skipped => Color32::from_rgb(0xE0, 0xA1, 0x00),
        StatusTone::Error => Color32::from_rgb(0xE5, 0x48, 0x4D),
    }
}

/// Count line and status table for one monitored folder.
pub fn show_file_queue(
    ui: &mut Ui,
    id: &str,
    title: &str,
    folder: Option<&Path>,
    queue: &FileQueue,
    processed_label: &str,
) {
    ui.heading(title);
    match folder {
        Some(folder) => ui.label(format!("Watching: {}", folder.display())),
        None => ui.label(RichText::new("Not monitoring (check configs/config.ini)").color(Color32::GRAY)),
    };
    ui.label(RichText::new(format!("{}: {}", processed_label, queue.processed())).strong());
    ui.separator();

    ui.push_id(id, |ui| {
        TableBuilder::new(ui)
            .striped(true)
            .stick_to_bottom(true)
            .column(Column::remainder().at_least(200.0).clip(true))
            .column(Column::auto().at_least(120.0))
            .header(20.0, |mut header| {
                header.col(|ui| {
                    ui.strong("File");
                });
                header.col(|ui| {
                    ui.strong("Status");
                });
            })
            .body(|body| {
                let rows = queue.rows();
                body.rows(20.0, rows.len(), |mut row| {
                    let item = &rows[row.index()];
                    row.col(|ui| {
                        ui.label(&item.file_name).on_hover_text(item.path.display().to_string());
                    });
                    row.col(|ui| {
                        ui.label(RichText::new(item.status.to_string()).color(tone_color(item.status.tone())));
                    });
                });
            });
    });
}
