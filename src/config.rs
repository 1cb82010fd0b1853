use ::config::{Config, File, FileFormat};
use anyhow::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// User preferences, persisted as TOML in the per-user config directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub adb_path: Option<String>,
    pub scrcpy_path: Option<String>,
    pub api_exe_path: Option<String>,
    pub reverse_port: u16,
    pub poll_interval_secs: u64,
    pub online_marker: String,
    pub log_retention_days: u64,
    pub autosave_secs: u64,
    pub max_parallel_jobs: usize,
    pub notifications: bool,
    pub scrcpy: ScrcpySettings,
    pub theme: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrcpySettings {
    pub bitrate_mbps: u32,
    pub max_size: Option<u32>,
    pub show_touches: bool,
    pub turn_screen_off: bool,
    pub stay_awake: bool,
    pub borderless: bool,
    pub extra_args: String,
}

impl Default for ScrcpySettings {
    fn default() -> Self {
        Self {
            bitrate_mbps: 8,
            max_size: Some(1024),
            show_touches: false,
            turn_screen_off: false,
            stay_awake: true,
            borderless: true,
            extra_args: String::new(),
        }
    }
}

impl AppConfig {
    /// Configured adb, else the bundled copy, else whatever is on PATH.
    pub fn adb_executable(&self, base_dir: &Path) -> PathBuf {
        self.adb_path
            .as_ref()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| crate::utils::find_adb(base_dir))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            adb_path: None,
            scrcpy_path: None,
            api_exe_path: None,
            reverse_port: 8000,
            poll_interval_secs: 3,
            online_marker: "fiber".to_string(),
            log_retention_days: 7,
            autosave_secs: 30,
            max_parallel_jobs: 4,
            notifications: true,
            scrcpy: ScrcpySettings::default(),
            theme: "light".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let mut path = config_dir().ok_or_else(|| {
            anyhow::anyhow!("Could not determine config directory")
        })?;
        path.push("HHTConnect");
        path.push("config.toml");
        Ok(path)
    }
}

#[derive(Debug, Error)]
pub enum SiteConfigError {
    #[error("Config not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config.ini: {0}")]
    Parse(#[from] ::config::ConfigError),
    #[error("Missing [{section}] {key} in config.ini")]
    MissingKey {
        section: &'static str,
        key: &'static str,
    },
}

/// Site settings shipped next to the executable in `configs/config.ini`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteConfig {
    pub price_tag_path: PathBuf,
    pub zip_filename_prefix: String,
    pub apk_monitor_path: PathBuf,
}

impl SiteConfig {
    pub fn path_in(base_dir: &Path) -> PathBuf {
        base_dir.join("configs").join("config.ini")
    }

    pub fn load(path: &Path) -> Result<Self, SiteConfigError> {
        if !path.exists() {
            return Err(SiteConfigError::NotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path).map_err(|source| SiteConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, SiteConfigError> {
        // The INI reader treats backslash as an escape; Windows paths must stay literal.
        let literal = text.replace('\\', "\\\\");
        let cfg = Config::builder()
            .add_source(File::from_str(&literal, FileFormat::Ini))
            .build()?;

        let price_tag_path = required(&cfg, "SETTING", "DEFAULT_PRICE_TAG_PATH")?;
        let apk_monitor_path = required(&cfg, "APK_INSTALLER", "MONITOR_PATH")?;
        let zip_filename_prefix = lookup(&cfg, "SETTING", "ZIP_FILENAME_PREFIX").unwrap_or_default();

        Ok(Self {
            price_tag_path: PathBuf::from(price_tag_path),
            zip_filename_prefix,
            apk_monitor_path: PathBuf::from(apk_monitor_path),
        })
    }
}

fn lookup(cfg: &Config, section: &str, key: &str) -> Option<String> {
    let exact = format!("{}.{}", section, key);
    cfg.get_string(&exact)
        .or_else(|_| cfg.get_string(&exact.to_lowercase()))
        .ok()
        .map(|value| value.trim().to_string())
}

fn required(
    cfg: &Config,
    section: &'static str,
    key: &'static str,
) -> Result<String, SiteConfigError> {
    lookup(cfg, section, key)
        .filter(|value| !value.is_empty())
        .ok_or(SiteConfigError::MissingKey { section, key })
}
