//! Single-instance guard and Windows elevation helpers.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use sysinfo::{Pid, System};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("App already running (pid {0}).")]
    AlreadyRunning(u32),
    #[error("Lock file error: {0}")]
    Io(#[from] io::Error),
}

/// A PID file in the temp directory, removed again on drop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    pid: u32,
}

impl InstanceLock {
    pub fn default_path(app_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}.lock", app_name))
    }

    /// Takes the lock unless the PID recorded in `path` is still alive.
    /// A stale or unreadable file is overwritten.
    pub fn acquire(path: &Path) -> Result<Self, InstanceError> {
        let pid = std::process::id();

        if let Some(other) = read_pid(path) {
            if other != pid && pid_alive(other) {
                return Err(InstanceError::AlreadyRunning(other));
            }
            tracing::info!("Replacing stale lock file {} (pid {})", path.display(), other);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, pid.to_string())?;

        Ok(Self {
            path: path.to_path_buf(),
            pid,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if read_pid(&self.path) == Some(self.pid) {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!("Failed to remove lock file {}: {}", self.path.display(), e);
            }
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

pub fn pid_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_process(Pid::from_u32(pid))
}

#[cfg(windows)]
pub fn is_elevated() -> bool {
    unsafe { winapi::um::shlobj::IsUserAnAdmin() != 0 }
}

#[cfg(not(windows))]
pub fn is_elevated() -> bool {
    true
}

/// Start this executable again through the UAC `runas` verb.
#[cfg(windows)]
pub fn relaunch_elevated() -> anyhow::Result<()> {
    use std::os::windows::ffi::OsStrExt;
    use std::ptr::null_mut;
    use winapi::um::shellapi::ShellExecuteW;
    use winapi::um::winuser::SW_SHOWNORMAL;

    fn wide(s: &std::ffi::OsStr) -> Vec<u16> {
        s.encode_wide().chain(std::iter::once(0)).collect()
    }

    let exe = std::env::current_exe()?;
    let params = std::env::args()
        .skip(1)
        .map(|arg| if arg.contains(' ') { format!("\"{}\"", arg) } else { arg })
        .collect::<Vec<_>>()
        .join(" ");

    let verb = wide("runas".as_ref());
    let file = wide(exe.as_os_str());
    let params = wide(params.as_ref());

    let result = unsafe {
        ShellExecuteW(
            null_mut(),
            verb.as_ptr(),
            file.as_ptr(),
            params.as_ptr(),
            null_mut(),
            SW_SHOWNORMAL,
        )
    };

    // Values above 32 mean success.
    if result as isize <= 32 {
        anyhow::bail!("ShellExecuteW(runas) failed with code {}", result as isize);
    }
    Ok(())
}

#[cfg(not(windows))]
pub fn relaunch_elevated() -> anyhow::Result<()> {
    anyhow::bail!("Elevation is only supported on Windows")
}
