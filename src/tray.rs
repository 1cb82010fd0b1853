//! Notification-area icons: the main window's Show/Quit menu and the small
//! command menus of the companion tools.

use crate::events::AppEvent;
use anyhow::{anyhow, Result};
use image::imageops::FilterType;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tray_icon::menu::{Menu, MenuEvent, MenuId, MenuItem, PredefinedMenuItem};
use tray_icon::{Icon, MouseButton, MouseButtonState, TrayIcon, TrayIconBuilder, TrayIconEvent};

pub const CONNECTED_COLOR: [u8; 3] = [0x2E, 0xC5, 0x74];
pub const DISCONNECTED_COLOR: [u8; 3] = [0x5A, 0x66, 0x77];
const ICON_SIZE: u32 = 32;

pub fn tooltip(connected: bool) -> &'static str {
    if connected {
        "HHT Connect: Connected"
    } else {
        "HHT Connect: Disconnected"
    }
}

const SUPERSAMPLE: u32 = 4;

/// Square RGBA image of the Android robot in `color` on a transparent background.
/// Drawn at a larger size and scaled down for smooth edges.
pub fn android_icon_rgba(size: u32, color: [u8; 3]) -> Vec<u8> {
    let large = size * SUPERSAMPLE;
    match image::RgbaImage::from_raw(large, large, rasterize_glyph(large, color)) {
        Some(img) => image::imageops::resize(&img, size, size, FilterType::Triangle).into_raw(),
        None => rasterize_glyph(size, color),
    }
}

fn rasterize_glyph(size: u32, color: [u8; 3]) -> Vec<u8> {
    let s = size as f32;
    let mut rgba = vec![0u8; (size * size * 4) as usize];

    let head_center = (0.5 * s, 0.36 * s);
    let head_radius = 0.27 * s;
    let eye_radius = 0.035 * s;
    let eyes = [(0.40 * s, 0.27 * s), (0.60 * s, 0.27 * s)];

    for y in 0..size {
        for x in 0..size {
            let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);

            let in_head = py <= head_center.1 - 0.02 * s
                && py >= head_center.1 - head_radius
                && dist((px, py), head_center) <= head_radius;
            let in_eye = eyes.iter().any(|&eye| dist((px, py), eye) <= eye_radius);
            let in_body = rounded_rect((px, py), (0.23 * s, 0.37 * s), (0.77 * s, 0.78 * s), 0.06 * s);
            let in_arm = rounded_rect((px, py), (0.08 * s, 0.38 * s), (0.19 * s, 0.68 * s), 0.05 * s)
                || rounded_rect((px, py), (0.81 * s, 0.38 * s), (0.92 * s, 0.68 * s), 0.05 * s);
            let in_leg = rounded_rect((px, py), (0.33 * s, 0.70 * s), (0.45 * s, 0.93 * s), 0.05 * s)
                || rounded_rect((px, py), (0.55 * s, 0.70 * s), (0.67 * s, 0.93 * s), 0.05 * s);
            let in_antenna = segment((px, py), (0.36 * s, 0.04 * s), (0.40 * s, 0.13 * s), 0.025 * s)
                || segment((px, py), (0.64 * s, 0.04 * s), (0.60 * s, 0.13 * s), 0.025 * s);

            let filled = ((in_head && !in_eye) || in_body || in_arm || in_leg || in_antenna) as u8;
            let i = ((y * size + x) * 4) as usize;
            rgba[i..i + 4].copy_from_slice(&[color[0], color[1], color[2], 255 * filled]);
        }
    }
    rgba
}

fn dist(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

fn rounded_rect(p: (f32, f32), min: (f32, f32), max: (f32, f32), radius: f32) -> bool {
    let cx = p.0.clamp(min.0 + radius, max.0 - radius);
    let cy = p.1.clamp(min.1 + radius, max.1 - radius);
    p.0 >= min.0 && p.0 <= max.0 && p.1 >= min.1 && p.1 <= max.1 && dist(p, (cx, cy)) <= radius
}

fn segment(p: (f32, f32), a: (f32, f32), b: (f32, f32), half_width: f32) -> bool {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let t = (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / (dx * dx + dy * dy)).clamp(0.0, 1.0);
    dist(p, (a.0 + t * dx, a.1 + t * dy)) <= half_width
}

fn colored_icon(color: [u8; 3]) -> Result<Icon> {
    Icon::from_rgba(android_icon_rgba(ICON_SIZE, color), ICON_SIZE, ICON_SIZE)
        .map_err(|e| anyhow!("Failed to build tray icon: {}", e))
}

fn status_icon(connected: bool) -> Result<Icon> {
    colored_icon(if connected { CONNECTED_COLOR } else { DISCONNECTED_COLOR })
}

pub struct TrayManager {
    tray_icon: TrayIcon,
    connected: bool,
}

impl TrayManager {
    /// Must be created on the UI thread. Menu clicks and left clicks on the icon
    /// are forwarded to `events` and wake the UI through `ctx`.
    pub fn new(events: UnboundedSender<AppEvent>, ctx: egui::Context) -> Result<Self> {
        let menu = Menu::new();
        let show_item = MenuItem::new("Show", true, None);
        let quit_item = MenuItem::new("Quit", true, None);
        menu.append(&show_item)
            .map_err(|e| anyhow!("Failed to add show item: {}", e))?;
        menu.append(&PredefinedMenuItem::separator())
            .map_err(|e| anyhow!("Failed to add separator: {}", e))?;
        menu.append(&quit_item)
            .map_err(|e| anyhow!("Failed to add quit item: {}", e))?;

        let show_id = show_item.id().clone();
        let quit_id = quit_item.id().clone();

        let tray_icon = TrayIconBuilder::new()
            .with_tooltip(tooltip(false))
            .with_icon(status_icon(false)?)
            .with_menu(Box::new(menu))
            .build()
            .map_err(|e| anyhow!("Failed to create tray icon: {}", e))?;

        let menu_events = events.clone();
        let menu_ctx = ctx.clone();
        MenuEvent::set_event_handler(Some(move |event: MenuEvent| {
            tracing::debug!("Tray menu event: {:?}", event.id);
            let app_event = if event.id == show_id {
                AppEvent::ShowWindow
            } else if event.id == quit_id {
                AppEvent::Quit
            } else {
                return;
            };
            let _ = menu_events.send(app_event);
            menu_ctx.request_repaint();
        }));

        TrayIconEvent::set_event_handler(Some(move |event: TrayIconEvent| {
            if let TrayIconEvent::Click {
                button: MouseButton::Left,
                button_state: MouseButtonState::Up,
                ..
            } = event
            {
                let _ = events.send(AppEvent::ShowWindow);
                ctx.request_repaint();
            }
        }));

        tracing::info!("Tray icon created");
        Ok(Self {
            tray_icon,
            connected: false,
        })
    }

    pub fn set_connected(&mut self, connected: bool) {
        if self.connected == connected {
            return;
        }
        self.connected = connected;
        if let Err(e) = self.tray_icon.set_tooltip(Some(tooltip(connected))) {
            tracing::warn!("Failed to update tray tooltip: {}", e);
        }
        match status_icon(connected) {
            Ok(icon) => {
                if let Err(e) = self.tray_icon.set_icon(Some(icon)) {
                    tracing::warn!("Failed to update tray icon: {}", e);
                }
            }
            Err(e) => tracing::warn!("{}", e),
        }
    }
}

impl Drop for TrayManager {
    fn drop(&mut self) {
        MenuEvent::set_event_handler(None::<fn(MenuEvent)>);
        TrayIconEvent::set_event_handler(None::<fn(TrayIconEvent)>);
    }
}

/// What a companion tool's tray menu asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCommand {
    RunNow,
    OpenLog,
    Exit,
}

pub type ToolMenu = &'static [(&'static str, ToolCommand)];

pub const KIOSK_MENU: ToolMenu = &[("Open Log File", ToolCommand::OpenLog), ("Exit", ToolCommand::Exit)];

pub const DIAGNOSTICS_MENU: ToolMenu = &[
    ("Run Diagnostics Now", ToolCommand::RunNow),
    ("Open Logs Folder", ToolCommand::OpenLog),
    ("Exit", ToolCommand::Exit),
];

fn command_for(ids: &[(MenuId, ToolCommand)], id: &MenuId) -> Option<ToolCommand> {
    ids.iter().find(|(item, _)| item == id).map(|(_, command)| *command)
}

fn build_tool_tray(tooltip: &str, menu_items: ToolMenu, color: [u8; 3]) -> Result<(TrayIcon, Vec<(MenuId, ToolCommand)>)> {
    let menu = Menu::new();
    let mut ids = Vec::new();
    for (label, command) in menu_items {
        if *command == ToolCommand::Exit && !ids.is_empty() {
            menu.append(&PredefinedMenuItem::separator())
                .map_err(|e| anyhow!("Failed to add separator: {}", e))?;
        }
        let item = MenuItem::new(*label, true, None);
        menu.append(&item)
            .map_err(|e| anyhow!("Failed to add {}: {}", label, e))?;
        ids.push((item.id().clone(), *command));
    }

    let tray_icon = TrayIconBuilder::new()
        .with_tooltip(tooltip)
        .with_icon(colored_icon(color)?)
        .with_menu(Box::new(menu))
        .build()
        .map_err(|e| anyhow!("Failed to create tray icon: {}", e))?;
    Ok((tray_icon, ids))
}

#[cfg(windows)]
fn pump_messages() {
    use winapi::um::winuser::{DispatchMessageW, PeekMessageW, TranslateMessage, MSG, PM_REMOVE};
    unsafe {
        let mut msg: MSG = std::mem::zeroed();
        while PeekMessageW(&mut msg, std::ptr::null_mut(), 0, 0, PM_REMOVE) != 0 {
            TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }
}

/// Tray icon of a companion tool, living on its own thread with a message pump.
/// Removed when dropped.
pub struct ToolTray {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ToolTray {
    /// Menu clicks arrive on `commands`. Windows only: the tools have no
    /// window system loop to host the icon elsewhere.
    pub fn spawn(
        tooltip: &'static str,
        menu_items: ToolMenu,
        color: [u8; 3],
        commands: UnboundedSender<ToolCommand>,
    ) -> Result<Self> {
        if !cfg!(windows) {
            return Err(anyhow!("Tray menu is only available on Windows"));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("tool-tray".to_string())
            .spawn(move || {
                let (tray_icon, ids) = match build_tool_tray(tooltip, menu_items, color) {
                    Ok(built) => built,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                MenuEvent::set_event_handler(Some(move |event: MenuEvent| {
                    if let Some(command) = command_for(&ids, &event.id) {
                        tracing::debug!("Tray command: {:?}", command);
                        let _ = commands.send(command);
                    }
                }));
                let _ = ready_tx.send(Ok(()));

                while !thread_stop.load(Ordering::Relaxed) {
                    #[cfg(windows)]
                    pump_messages();
                    std::thread::sleep(Duration::from_millis(50));
                }
                MenuEvent::set_event_handler(None::<fn(MenuEvent)>);
                drop(tray_icon);
            })?;

        ready_rx
            .recv()
            .map_err(|_| anyhow!("Tray thread exited before the icon was created"))??;
        tracing::info!("Tray icon \"{}\" created", tooltip);
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }
}

impl Drop for ToolTray {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
