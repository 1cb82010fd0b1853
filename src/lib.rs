pub mod app;
pub mod bridge;
pub mod config;
pub mod device;
pub mod embed;
pub mod events;
pub mod instance;
pub mod logging;
pub mod services;
pub mod tray;
pub mod ui;
pub mod utils;

pub use app::HhtConnectApp;
pub use config::AppConfig;
