pub mod api_log_panel;
pub mod device_list;
pub mod file_queue_panel;
pub mod screen_panel;
pub mod settings;

pub use api_log_panel::{ApiLogAction, ApiLogPanel};
pub use device_list::{DeviceAction, DeviceList};
pub use file_queue_panel::show_file_queue;
pub use screen_panel::{show_screen_panel, ScreenAction};
pub use settings::SettingsWindow;
