//! Hosts the scrcpy window inside the Screen tab.
//!
//! scrcpy is started with a unique window title. Once that top-level window
//! shows up it is re-parented into the main window as a child and kept sized
//! to the tab's rectangle. Outside Windows scrcpy keeps its own window.

use crate::bridge::ScrcpyBridge;
use crate::config::ScrcpySettings;
use std::process::Child;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

const FIND_WINDOW_TIMEOUT: Duration = Duration::from_secs(10);
/// scrcpy dying this soon after launch means the device or the flags were rejected.
const QUICK_EXIT: Duration = Duration::from_secs(3);

static LAUNCH_COUNTER: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Window embedding is only supported on Windows")]
    Unsupported,
    #[error("Host window \"{0}\" not found")]
    HostNotFound(String),
    #[error("Failed to start scrcpy: {0}")]
    Launch(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedState {
    Idle,
    /// scrcpy is running but its window has not appeared yet.
    Waiting,
    Embedded,
    /// scrcpy runs in its own top-level window.
    Detached,
}

/// Client-area rectangle in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PixelRect {
    pub fn from_egui(rect: egui::Rect, pixels_per_point: f32) -> Self {
        Self {
            x: (rect.min.x * pixels_per_point).round() as i32,
            y: (rect.min.y * pixels_per_point).round() as i32,
            width: (rect.width() * pixels_per_point).round().max(1.0) as i32,
            height: (rect.height() * pixels_per_point).round().max(1.0) as i32,
        }
    }
}

pub fn unique_window_title() -> String {
    let n = LAUNCH_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("HHT Screen {}-{}", std::process::id(), n)
}

pub struct ScreenEmbed {
    host_title: String,
    child: Option<Child>,
    title: String,
    started: Option<Instant>,
    window: Option<isize>,
    state: EmbedState,
    last_rect: Option<PixelRect>,
    exit_note: Option<String>,
}

impl ScreenEmbed {
    pub fn new(host_title: impl Into<String>) -> Self {
        Self {
            host_title: host_title.into(),
            child: None,
            title: String::new(),
            started: None,
            window: None,
            state: EmbedState::Idle,
            last_rect: None,
            exit_note: None,
        }
    }

    pub fn state(&self) -> EmbedState {
        self.state
    }

    pub fn start(
        &mut self,
        scrcpy: &ScrcpyBridge,
        serial: Option<&str>,
        settings: &ScrcpySettings,
    ) -> Result<(), EmbedError> {
        self.stop();
        let title = unique_window_title();
        let args = scrcpy.build_args(serial, settings, &title);
        let child = scrcpy.start(&args)?;
        self.launch(child, title);
        Ok(())
    }

    fn launch(&mut self, child: Child, title: String) {
        self.child = Some(child);
        self.title = title;
        self.started = Some(Instant::now());
        self.exit_note = None;
        self.state = if cfg!(windows) {
            EmbedState::Waiting
        } else {
            EmbedState::Detached
        };
    }

    /// Why scrcpy quit right after launch, once.
    pub fn take_exit_note(&mut self) -> Option<String> {
        self.exit_note.take()
    }

    /// Advance the state machine. Call once per frame while the Screen tab is visible.
    pub fn poll(&mut self) -> EmbedState {
        let exit = match self.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(None) => None,
                Ok(Some(status)) => Some(Some(status)),
                Err(e) => {
                    tracing::error!("Error checking scrcpy process status: {}", e);
                    Some(None)
                }
            },
            None => Some(None),
        };
        if let Some(status) = exit {
            let quick = self.started.is_some_and(|started| started.elapsed() < QUICK_EXIT);
            match status {
                Some(status) if quick => {
                    let note = format!("scrcpy exited immediately with status: {}", status);
                    tracing::error!("{}", note);
                    self.exit_note = Some(note);
                }
                _ if self.state != EmbedState::Idle => tracing::info!("scrcpy exited"),
                _ => {}
            }
            self.reset();
            return self.state;
        }

        match self.state {
            EmbedState::Waiting => self.try_embed(),
            EmbedState::Embedded => {
                if !self.window.is_some_and(platform::is_window) {
                    tracing::warn!("Embedded scrcpy window is gone");
                    self.window = None;
                    self.state = EmbedState::Detached;
                }
            }
            EmbedState::Idle | EmbedState::Detached => {}
        }
        self.state
    }

    fn try_embed(&mut self) {
        let Some(window) = platform::find_window(&self.title) else {
            if self
                .started
                .is_some_and(|started| started.elapsed() > FIND_WINDOW_TIMEOUT)
            {
                tracing::warn!("scrcpy window \"{}\" never appeared; leaving it detached", self.title);
                self.state = EmbedState::Detached;
            }
            return;
        };

        match self.attach(window) {
            Ok(()) => {
                tracing::info!("Embedded scrcpy window \"{}\"", self.title);
                self.window = Some(window);
                self.last_rect = None;
                self.state = EmbedState::Embedded;
            }
            Err(e) => {
                tracing::warn!("Could not embed scrcpy: {}", e);
                self.state = EmbedState::Detached;
            }
        }
    }

    fn attach(&self, window: isize) -> Result<(), EmbedError> {
        let host = platform::find_window(&self.host_title)
            .ok_or_else(|| EmbedError::HostNotFound(self.host_title.clone()))?;
        platform::reparent(window, host)
    }

    /// Keep the embedded window covering `rect`. Unchanged rectangles are skipped.
    pub fn place(&mut self, rect: PixelRect) {
        let Some(window) = self.window else {
            return;
        };
        if self.last_rect == Some(rect) {
            return;
        }
        platform::move_window(window, rect);
        self.last_rect = Some(rect);
    }

    pub fn is_running(&self) -> bool {
        self.state != EmbedState::Idle
    }

    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                tracing::debug!("scrcpy kill: {}", e);
            }
            let _ = child.wait();
            tracing::info!("scrcpy stopped");
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.child = None;
        self.window = None;
        self.started = None;
        self.last_rect = None;
        self.state = EmbedState::Idle;
    }
}

impl Drop for ScreenEmbed {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(windows)]
mod platform {
    use super::{EmbedError, PixelRect};
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use std::ptr;
    use winapi::shared::windef::HWND;
    use winapi::um::winuser::{
        FindWindowW, GetWindowLongW, IsWindow, MoveWindow, SetParent, SetWindowLongW, GWL_STYLE,
        WS_CAPTION, WS_CHILD, WS_POPUP, WS_THICKFRAME,
    };

    fn wide(text: &str) -> Vec<u16> {
        OsStr::new(text).encode_wide().chain(Some(0)).collect()
    }

    pub fn find_window(title: &str) -> Option<isize> {
        let title = wide(title);
        let hwnd = unsafe { FindWindowW(ptr::null(), title.as_ptr()) };
        (!hwnd.is_null()).then_some(hwnd as isize)
    }

    pub fn is_window(window: isize) -> bool {
        unsafe { IsWindow(window as HWND) != 0 }
    }

    pub fn reparent(window: isize, host: isize) -> Result<(), EmbedError> {
        let hwnd = window as HWND;
        unsafe {
            let style = GetWindowLongW(hwnd, GWL_STYLE) as u32;
            let child_style = (style & !(WS_POPUP | WS_CAPTION | WS_THICKFRAME)) | WS_CHILD;
            SetWindowLongW(hwnd, GWL_STYLE, child_style as i32);
            if SetParent(hwnd, host as HWND).is_null() {
                return Err(EmbedError::Launch(anyhow::anyhow!(
                    "SetParent failed: {}",
                    std::io::Error::last_os_error()
                )));
            }
        }
        Ok(())
    }

    pub fn move_window(window: isize, rect: PixelRect) {
        unsafe {
            MoveWindow(window as HWND, rect.x, rect.y, rect.width, rect.height, 1);
        }
    }
}

#[cfg(not(windows))]
mod platform {
    use super::{EmbedError, PixelRect};

    pub fn find_window(_title: &str) -> Option<isize> {
        None
    }

    pub fn is_window(_window: isize) -> bool {
        false
    }

    pub fn reparent(_window: isize, _host: isize) -> Result<(), EmbedError> {
        Err(EmbedError::Unsupported)
    }

    pub fn move_window(_window: isize, _rect: PixelRect) {}
}
