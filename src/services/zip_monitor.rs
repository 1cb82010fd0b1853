use crate::events::{AppEvent, JobKind, JobStatus};
use crate::services::file_queue::{InFlight, JobPool, Readiness};
use crate::services::watcher::{self, FolderWatch, Trigger};
use crate::services::zip_repack::ZipRepacker;
use chrono::Local;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

/// Create events for an archive we wrote ourselves arrive shortly after the write.
const OWN_OUTPUT_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ZipMonitorSettings {
    pub folder: PathBuf,
    pub prefix: String,
    pub tmp_root: PathBuf,
    pub readiness: Readiness,
}

/// Watches the price-tag folder and repacks every new archive once.
pub struct ZipMonitor {
    settings: ZipMonitorSettings,
    repacker: ZipRepacker,
    in_flight: InFlight,
    produced: Mutex<HashMap<PathBuf, Instant>>,
    pool: JobPool,
    events: UnboundedSender<AppEvent>,
}

impl ZipMonitor {
    pub fn new(settings: ZipMonitorSettings, pool: JobPool, events: UnboundedSender<AppEvent>) -> Arc<Self> {
        Arc::new(Self {
            repacker: ZipRepacker::new(&settings.tmp_root),
            settings,
            in_flight: InFlight::new(),
            produced: Mutex::new(HashMap::new()),
            pool,
            events,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.settings.folder
    }

    pub fn watch(self: &Arc<Self>) -> notify::Result<FolderWatch> {
        let monitor = Arc::clone(self);
        FolderWatch::start(&self.settings.folder, &[Trigger::Created], move |_, path| {
            monitor.offer(path);
        })
    }

    fn is_own_output(&self, path: &Path) -> bool {
        let mut produced = self.produced.lock().unwrap_or_else(|p| p.into_inner());
        produced.retain(|_, written| written.elapsed() < OWN_OUTPUT_WINDOW);
        produced.remove(path).is_some()
    }

    /// Queue `path` unless it is filtered out, already running, or our own output.
    pub fn offer(self: &Arc<Self>, path: PathBuf) -> bool {
        if !watcher::zip_candidate(&path, &self.settings.prefix) || self.is_own_output(&path) {
            return false;
        }
        let Some(guard) = self.in_flight.claim(&path) else {
            return false;
        };

        tracing::info!("New zip file detected: {}", path.display());
        let _ = self.events.send(AppEvent::JobQueued {
            kind: JobKind::Zip,
            path: path.clone(),
        });

        let monitor = Arc::clone(self);
        self.pool.spawn(move || {
            monitor.run_job(guard.path());
        });
        true
    }

    fn report(&self, path: &Path, status: JobStatus) {
        let _ = self.events.send(AppEvent::JobUpdated {
            kind: JobKind::Zip,
            path: path.to_path_buf(),
            status,
        });
    }

    /// Blocking body of one zip job; returns the final status.
    pub fn run_job(&self, path: &Path) -> JobStatus {
        self.report(path, JobStatus::Processing);

        if !self.settings.readiness.wait(path) {
            tracing::warn!("Timeout: {} is locked or incomplete", path.display());
            let status = JobStatus::error("Locked");
            self.report(path, status.clone());
            return status;
        }

        let today = Local::now().date_naive();
        let target = path.with_file_name(crate::services::zip_repack::renamed_file_name(
            &crate::utils::file_name_of(path),
            today,
        ));
        // registered before the write so an early create event is already covered
        self.produced
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(target.clone(), Instant::now());

        let status = match self.repacker.repack(path, today) {
            Ok(_) => JobStatus::Done,
            Err(e) => {
                tracing::error!("Zip process error for {}: {}", path.display(), e);
                self.produced
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .remove(&target);
                JobStatus::Failed(None)
            }
        };
        self.report(path, status.clone());
        status
    }
}
