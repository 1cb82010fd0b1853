use crate::events::ApiStatus;
use crate::services::api_log::{ApiLog, SearchHit};
use egui::text::{LayoutJob, TextFormat};
use egui::{Color32, FontId, RichText, Ui};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiLogAction {
    Search(String),
    Restart,
    OpenFolder,
    None,
}

pub fn status_color(status: ApiStatus) -> Color32 {
    match status {
        ApiStatus::Online => Color32::from_rgb(0x2E, 0xC5, 0x74),
        ApiStatus::Offline => Color32::from_rgb(0xE5, 0x48, 0x4D),
    }
}

fn highlighted_line(text: &str, hit: &SearchHit, color: Color32) -> LayoutJob {
    let font = FontId::monospace(12.0);
    let plain = TextFormat::simple(font.clone(), color);
    let mark = TextFormat {
        background: Color32::from_rgb(0xFF, 0xE0, 0x66),
        color: Color32::BLACK,
        ..TextFormat::simple(font, color)
    };

    let mut job = LayoutJob::default();
    job.append(&text[..hit.start], 0.0, plain.clone());
    job.append(&text[hit.start..hit.end], 0.0, mark);
    job.append(&text[hit.end..], 0.0, plain);
    job
}

/// Scroll offset that puts row `line` in the middle of a `viewport` tall view.
fn hit_offset(line: usize, row_stride: f32, viewport: f32) -> f32 {
    (line as f32 * row_stride - (viewport - row_stride) / 2.0).max(0.0)
}

pub struct ApiLogPanel {
    search_term: String,
    scroll_to_hit: bool,
    stick_to_bottom: bool,
}

impl ApiLogPanel {
    pub fn new() -> Self {
        Self {
            search_term: String::new(),
            scroll_to_hit: false,
            stick_to_bottom: true,
        }
    }

    /// Scroll the current search hit into view on the next frame.
    pub fn reveal_hit(&mut self) {
        self.scroll_to_hit = true;
        self.stick_to_bottom = false;
    }

    pub fn show(&mut self, ui: &mut Ui, log: &ApiLog, status: ApiStatus) -> ApiLogAction {
        let mut action = ApiLogAction::None;

        ui.horizontal(|ui| {
            let (rect, _) = ui.allocate_exact_size(egui::vec2(12.0, 12.0), egui::Sense::hover());
            ui.painter().circle_filled(rect.center(), 6.0, status_color(status));
            ui.label(RichText::new(format!("API {}", status)).strong());

            ui.separator();
            let search = ui.add(
                egui::TextEdit::singleline(&mut self.search_term)
                    .hint_text("Search log")
                    .desired_width(200.0),
            );
            let submitted = search.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            if ui.button("🔍 Find next").clicked() || submitted {
                action = ApiLogAction::Search(self.search_term.clone());
                if submitted {
                    search.request_focus();
                }
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.button("🔄 Restart API").clicked() {
                    action = ApiLogAction::Restart;
                }
                if ui.button("📂").on_hover_text("Open log folder").clicked() {
                    action = ApiLogAction::OpenFolder;
                }
                ui.checkbox(&mut self.stick_to_bottom, "Follow");
            });
        });
        ui.separator();

        let hit = log.last_hit();
        let text_color = ui.visuals().text_color();
        let row_height = ui.text_style_height(&egui::TextStyle::Monospace);
        let lines = log.lines();

        let mut area = egui::ScrollArea::both()
            .auto_shrink([false, false])
            .stick_to_bottom(self.stick_to_bottom);
        if let Some(hit) = hit.filter(|_| self.scroll_to_hit) {
            let spacing = ui.spacing().item_spacing.y;
            area = area.vertical_scroll_offset(hit_offset(
                hit.line,
                row_height + spacing,
                ui.available_height(),
            ));
        }

        // only the rows in view are laid out
        area.show_rows(ui, row_height, lines.len(), |ui, rows| {
            for index in rows {
                let line = &lines[index];
                let label = match hit.filter(|h| h.line == index && h.end <= line.len()) {
                    Some(hit) => egui::Label::new(highlighted_line(line, &hit, text_color)),
                    None => egui::Label::new(RichText::new(line).monospace()),
                };
                ui.add(label.wrap_mode(egui::TextWrapMode::Extend));
            }
        });
        self.scroll_to_hit = false;

        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highlight_splits_line() {
        let hit = SearchHit { line: 0, start: 4, end: 9 };
        let job = highlighted_line("GET /price 200", &hit, Color32::WHITE);
        assert_eq!(job.text, "GET /price 200");
        assert_eq!(job.sections.len(), 3);
        assert_eq!(job.sections[1].byte_range, 4..9);
        assert_eq!(job.sections[1].format.background, Color32::from_rgb(0xFF, 0xE0, 0x66));
    }

    #[test]
    fn test_hit_offset_centers_line() {
        assert_eq!(hit_offset(0, 20.0, 400.0), 0.0);
        assert_eq!(hit_offset(3, 20.0, 400.0), 0.0);
        assert_eq!(hit_offset(100, 20.0, 400.0), 2000.0 - 190.0);
    }

    #[test]
    fn test_long_log_lays_out_visible_rows_only() {
        let dir = tempfile::TempDir::new().unwrap();
        let today = chrono::NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        let mut log = ApiLog::open(dir.path(), today, 7).unwrap();
        for i in 0..50_000 {
            log.push(format!("GET /price/{} 200", i));
        }
        log.search_next("/price/49000 ");

        let ctx = egui::Context::default();
        let mut panel = ApiLogPanel::new();
        panel.reveal_hit();
        let input = egui::RawInput {
            screen_rect: Some(egui::Rect::from_min_size(egui::Pos2::ZERO, egui::vec2(800.0, 600.0))),
            ..Default::default()
        };
        let output = ctx.run(input, |ctx| {
            egui::CentralPanel::default().show(ctx, |ui| {
                panel.show(ui, &log, ApiStatus::Online);
            });
        });
        assert!(output.shapes.len() < 1_000, "{} shapes", output.shapes.len());
        assert!(!panel.scroll_to_hit);
    }

    #[test]
    fn test_status_colors_differ() {
        assert_ne!(status_color(ApiStatus::Online), status_color(ApiStatus::Offline));
    }
}
