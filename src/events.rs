use crate::device::Device;
use std::fmt;
use std::path::PathBuf;

/// Messages sent from background services to the UI thread.
#[derive(Debug, Clone)]
pub enum AppEvent {
    DevicesRefreshed(Vec<Device>),
    DeviceListFailed(String),
    DeviceConnected(String),
    DeviceDisconnected { serial: String, unplugged: bool },
    ConnectFailed { serial: String, reason: String },
    JobQueued { kind: JobKind, path: PathBuf },
    JobUpdated { kind: JobKind, path: PathBuf, status: JobStatus },
    ApkMonitorReset,
    ApiLine(String),
    ApiStatus(ApiStatus),
    /// Free-form status line for the UI.
    Notice(String),
    ShowWindow,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Zip,
    Apk,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Checking,
    Waiting,
    Installing,
    Upgrading,
    Success,
    Skipped(u64),
    Failed(Option<String>),
}

/// Row coloring bucket for a job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTone {
    Pending,
    Processing,
    Done,
    Skipped,
    Error,
}

impl JobStatus {
    pub fn error(reason: impl Into<String>) -> Self {
        JobStatus::Failed(Some(reason.into()))
    }

    pub fn tone(&self) -> StatusTone {
        match self {
            JobStatus::Pending => StatusTone::Pending,
            JobStatus::Processing
            | JobStatus::Checking
            | JobStatus::Waiting
            | JobStatus::Installing
            | JobStatus::Upgrading => StatusTone::Processing,
            JobStatus::Done | JobStatus::Success => StatusTone::Done,
            JobStatus::Skipped(_) => StatusTone::Skipped,
            JobStatus::Failed(_) => StatusTone::Error,
        }
    }

    /// Whether reaching this status bumps the processed counter.
    pub fn counts_as_processed(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Success)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => f.write_str("Pending"),
            JobStatus::Processing => f.write_str("Processing"),
            JobStatus::Done => f.write_str("Done"),
            JobStatus::Checking => f.write_str("Checking..."),
            JobStatus::Waiting => f.write_str("Waiting..."),
            JobStatus::Installing => f.write_str("Installing..."),
            JobStatus::Upgrading => f.write_str("Upgrading..."),
            JobStatus::Success => f.write_str("Success"),
            JobStatus::Skipped(version) => write!(f, "Skipped (v{})", version),
            JobStatus::Failed(None) => f.write_str("Error"),
            JobStatus::Failed(Some(reason)) => write!(f, "Error: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStatus {
    Online,
    Offline,
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiStatus::Online => f.write_str("Online"),
            ApiStatus::Offline => f.write_str("Offline"),
        }
    }
}
