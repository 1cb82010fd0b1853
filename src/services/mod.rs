//! Background services. Each one reports to the UI through [`crate::events::AppEvent`].

pub mod api_log;
pub mod api_supervisor;
pub mod apk_installer;
pub mod apk_manifest;
pub mod apk_monitor;
pub mod device_monitor;
pub mod file_queue;
pub mod net_diagnostics;
pub mod process_monitor;
pub mod watcher;
pub mod zip_monitor;
pub mod zip_repack;
