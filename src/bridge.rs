use crate::config::ScrcpySettings;
use crate::device::{parse_devices, Device};
use anyhow::Result;
use regex::Regex;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::LazyLock;
use thiserror::Error;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

static VERSION_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"versionCode=(\d+)").expect("valid regex"));

#[derive(Debug, Error)]
pub enum AdbError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("adb {command} failed: {stderr}")]
    Failed { command: String, stderr: String },
}

/// Build a command that never flashes a console window on Windows.
pub fn hidden_command(program: impl AsRef<std::ffi::OsStr>) -> Command {
    #[allow(unused_mut)]
    let mut cmd = Command::new(program);
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// First `versionCode=<n>` in `dumpsys package` output.
pub fn parse_version_code(dumpsys: &str) -> Option<u64> {
    VERSION_CODE
        .captures(dumpsys)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[derive(Debug, Clone)]
pub struct AdbBridge {
    path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ScrcpyBridge {
    path: PathBuf,
}

impl AdbBridge {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn run(&self, args: &[&str]) -> Result<Output, AdbError> {
        tracing::debug!("adb {}", args.join(" "));
        hidden_command(&self.path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| AdbError::Spawn {
                program: self.path.display().to_string(),
                source,
            })
    }

    fn run_checked(&self, args: &[&str]) -> Result<String, AdbError> {
        let output = self.run(args)?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(AdbError::Failed {
                command: args.join(" "),
                stderr: if stderr.is_empty() { stdout.trim().to_string() } else { stderr },
            });
        }

        Ok(stdout)
    }

    pub fn version(&self) -> Result<String, AdbError> {
        self.run_checked(&["version"])
    }

    pub fn start_server(&self) -> Result<(), AdbError> {
        self.run_checked(&["start-server"]).map(|_| ())
    }

    pub fn kill_server(&self) -> Result<(), AdbError> {
        self.run_checked(&["kill-server"]).map(|_| ())
    }

    pub fn restart_server(&self) -> Result<(), AdbError> {
        self.kill_server()?;
        self.start_server()
    }

    pub fn devices(&self) -> Result<Vec<Device>, AdbError> {
        let output = self.run_checked(&["devices", "-l"])?;
        Ok(parse_devices(&output))
    }

    pub fn reverse(&self, serial: &str, port: u16) -> Result<(), AdbError> {
        let spec = format!("tcp:{}", port);
        self.run_checked(&["-s", serial, "reverse", &spec, &spec])
            .map(|_| ())
    }

    pub fn reverse_remove(&self, serial: &str, port: u16) -> Result<(), AdbError> {
        let spec = format!("tcp:{}", port);
        self.run_checked(&["-s", serial, "reverse", "--remove", &spec])
            .map(|_| ())
    }

    pub fn shell(&self, serial: &str, command: &[&str]) -> Result<String, AdbError> {
        let mut args = vec!["-s", serial, "shell"];
        args.extend_from_slice(command);
        self.run_checked(&args)
    }

    /// `None` when the package is not installed on the device.
    pub fn installed_version_code(
        &self,
        serial: &str,
        package: &str,
    ) -> Result<Option<u64>, AdbError> {
        let dumpsys = self.shell(serial, &["dumpsys", "package", package])?;
        Ok(parse_version_code(&dumpsys))
    }

    /// `adb install -r`; only a `Success` line on stdout counts.
    pub fn install(&self, serial: &str, apk: &Path) -> Result<bool, AdbError> {
        let apk = apk.to_string_lossy();
        let output = self.run(&["-s", serial, "install", "-r", &apk])?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.contains("Success") {
            tracing::warn!(
                "Install of {} on {} failed: {}",
                apk,
                serial,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(false);
        }
        Ok(true)
    }
}

impl ScrcpyBridge {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn build_args(
        &self,
        serial: Option<&str>,
        settings: &ScrcpySettings,
        window_title: &str,
    ) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(serial) = serial {
            args.extend_from_slice(&["-s".to_string(), serial.to_string()]);
        }

        args.extend_from_slice(&["--window-title".to_string(), window_title.to_string()]);
        args.push(format!("--video-bit-rate={}M", settings.bitrate_mbps));

        if let Some(size) = settings.max_size {
            args.extend_from_slice(&["--max-size".to_string(), size.to_string()]);
        }

        if settings.show_touches {
            args.push("--show-touches".to_string());
        }

        if settings.turn_screen_off {
            args.push("--turn-screen-off".to_string());
        }

        if settings.stay_awake {
            args.push("--stay-awake".to_string());
        }

        if settings.borderless {
            args.push("--window-borderless".to_string());
        }

        args.extend(settings.extra_args.split_whitespace().map(str::to_string));

        args
    }

    /// Spawn scrcpy and return at once; stderr is forwarded to the log.
    /// Early exits are picked up by whoever polls the child.
    pub fn start(&self, args: &[String]) -> Result<Child> {
        let mut cmd = hidden_command(&self.path);
        cmd.args(args);
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        tracing::info!("Starting scrcpy: {} {}", self.path.display(), args.join(" "));

        let mut child = cmd.spawn()?;
        tracing::info!("scrcpy started (pid {})", child.id());

        if let Some(stderr) = child.stderr.take() {
            std::thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    tracing::info!("scrcpy: {}", line);
                }
            });
        }

        Ok(child)
    }
}
