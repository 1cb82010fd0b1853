use anyhow::Result;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Directory holding the executable and its bundled tools (`adb/`, `scrcpy/`, `configs/`).
pub fn base_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn find_executable(name: &str) -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        if let Ok(output) = Command::new("where").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .next()
                    .unwrap_or("")
                    .trim()
                    .to_string();
                if !path.is_empty() {
                    return Some(PathBuf::from(path));
                }
            }
        }

        let common_paths = [
            "C:\\Program Files\\Android\\android-sdk\\platform-tools",
            "C:\\Program Files (x86)\\Android\\android-sdk\\platform-tools",
            "C:\\Android\\platform-tools",
        ];

        for path in &common_paths {
            let full_path = PathBuf::from(path).join(format!("{}.exe", name));
            if full_path.exists() {
                return Some(full_path);
            }
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Ok(output) = Command::new("which").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(PathBuf::from(path));
                }
            }
        }

        for path in ["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin"] {
            let full_path = PathBuf::from(path).join(name);
            if full_path.exists() {
                return Some(full_path);
            }
        }
    }

    None
}

/// `<base>/<dir>/<name>.exe` (or without extension off Windows), if present.
pub fn bundled_tool(base: &Path, dir: &str, name: &str) -> Option<PathBuf> {
    let file_name = if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    };
    let candidate = base.join(dir).join(file_name);
    candidate.is_file().then_some(candidate)
}

/// Bundled adb first, then whatever is on PATH, then the bare name.
pub fn find_adb(base: &Path) -> PathBuf {
    bundled_tool(base, "adb", "adb")
        .or_else(|| find_executable("adb"))
        .unwrap_or_else(|| PathBuf::from("adb"))
}

pub fn find_scrcpy(base: &Path) -> Option<PathBuf> {
    bundled_tool(base, "scrcpy", "scrcpy").or_else(|| find_executable("scrcpy"))
}

pub fn find_api_exe(base: &Path) -> Option<PathBuf> {
    let candidate = base.join("api.exe");
    candidate.is_file().then_some(candidate)
}

/// Poll until the file can be opened for reading.
///
/// Sleeps `delay` after every failed attempt; returns `false` once `attempts`
/// are used up.
pub fn wait_until_readable(path: &Path, attempts: u32, delay: Duration) -> bool {
    for attempt in 1..=attempts {
        match File::open(path) {
            Ok(_) => return true,
            Err(e) => {
                tracing::debug!(
                    "{} not readable yet (attempt {}/{}): {}",
                    path.display(),
                    attempt,
                    attempts,
                    e
                );
                std::thread::sleep(delay);
            }
        }
    }
    false
}

pub fn open_path(path: &Path) -> Result<()> {
    #[cfg(target_os = "windows")]
    {
        Command::new("explorer").arg(path).spawn()?;
    }

    #[cfg(target_os = "macos")]
    {
        Command::new("open").arg(path).spawn()?;
    }

    #[cfg(target_os = "linux")]
    {
        Command::new("xdg-open").arg(path).spawn()?;
    }

    Ok(())
}

pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
