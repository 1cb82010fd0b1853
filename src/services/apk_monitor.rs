use crate::device::SharedConnection;
use crate::events::{AppEvent, JobKind, JobStatus};
use crate::services::apk_installer::{run_install_job, InstallTiming, PackageInstaller};
use crate::services::file_queue::{InFlight, JobPool};
use crate::services::watcher::{self, FolderWatch, Trigger};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

/// Installs APKs dropped into the monitor folder onto the connected device.
///
/// Every path is handled once until [`ApkMonitor::reset`], which happens
/// whenever a device connects or disconnects.
pub struct ApkMonitor {
    folder: PathBuf,
    installer: Arc<dyn PackageInstaller>,
    connection: SharedConnection,
    timing: InstallTiming,
    seen: Mutex<HashSet<PathBuf>>,
    in_flight: InFlight,
    pool: JobPool,
    events: UnboundedSender<AppEvent>,
    shutdown: AtomicBool,
}

impl ApkMonitor {
    pub fn new(
        folder: PathBuf,
        installer: Arc<dyn PackageInstaller>,
        connection: SharedConnection,
        timing: InstallTiming,
        pool: JobPool,
        events: UnboundedSender<AppEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            folder,
            installer,
            connection,
            timing,
            seen: Mutex::new(HashSet::new()),
            in_flight: InFlight::new(),
            pool,
            events,
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn watch(self: &Arc<Self>) -> notify::Result<FolderWatch> {
        let monitor = Arc::clone(self);
        FolderWatch::start(
            &self.folder,
            &[Trigger::Created, Trigger::Modified],
            move |_, path| {
                monitor.offer(path);
            },
        )
    }

    /// Queue `path` unless it was already seen or is being installed.
    pub fn offer(self: &Arc<Self>, path: PathBuf) -> bool {
        if !watcher::apk_candidate(&path) || self.shutdown.load(Ordering::Relaxed) {
            return false;
        }
        if self.in_flight.contains(&path) {
            return false;
        }
        if !self
            .seen
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(path.clone())
        {
            return false;
        }
        let Some(guard) = self.in_flight.claim(&path) else {
            return false;
        };

        tracing::info!("New APK file: {}", path.display());
        let _ = self.events.send(AppEvent::JobQueued {
            kind: JobKind::Apk,
            path: path.clone(),
        });

        let monitor = Arc::clone(self);
        self.pool.spawn(move || {
            monitor.run_job(guard.path());
        });
        true
    }

    pub fn run_job(&self, path: &Path) -> JobStatus {
        let report = |status: JobStatus| {
            let _ = self.events.send(AppEvent::JobUpdated {
                kind: JobKind::Apk,
                path: path.to_path_buf(),
                status,
            });
        };
        run_install_job(
            path,
            self.installer.as_ref(),
            &self.connection,
            &self.timing,
            &self.shutdown,
            &report,
        )
    }

    /// Forget every seen path and clear the UI table.
    ///
    /// Jobs still running keep their place: they stay seen and get their row
    /// back, so their later updates still land in the table.
    pub fn reset(&self) {
        let running = self.in_flight.paths();
        {
            let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
            seen.clear();
            seen.extend(running.iter().cloned());
        }
        let _ = self.events.send(AppEvent::ApkMonitorReset);
        for path in running {
            let _ = self.events.send(AppEvent::JobQueued {
                kind: JobKind::Apk,
                path,
            });
        }
    }

    /// Offer every APK already in the folder. Returns how many were queued.
    pub fn rescan(self: &Arc<Self>) -> usize {
        watcher::existing_files(&self.folder, watcher::apk_candidate)
            .into_iter()
            .filter(|path| self.offer(path.clone()))
            .count()
    }

    /// Stop accepting files and cut short any device wait.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::apk_installer::fake::FakeInstaller;
    use crate::services::apk_manifest::fixtures;
    use crate::services::file_queue::{FileQueue, Readiness};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn timing() -> InstallTiming {
        InstallTiming {
            readiness: Readiness {
                attempts: 2,
                delay: Duration::from_millis(1),
                settle: Duration::ZERO,
            },
            device_wait_attempts: 1,
            device_wait_delay: Duration::from_millis(1),
        }
    }

    async fn final_statuses(
        rx: &mut mpsc::UnboundedReceiver<AppEvent>,
        expected: usize,
    ) -> Vec<(PathBuf, JobStatus)> {
        let mut done = Vec::new();
        while done.len() < expected {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for job")
                .expect("channel closed");
            if let AppEvent::JobUpdated { path, status, .. } = event {
                if matches!(status, JobStatus::Success | JobStatus::Skipped(_) | JobStatus::Failed(_)) {
                    done.push((path, status));
                }
            }
        }
        done.sort_by(|a, b| a.0.cmp(&b.0));
        done
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rescan_installs_each_file_once() {
        let dir = TempDir::new().unwrap();
        for (name, package) in [("a.apk", "com.a"), ("b.apk", "com.b")] {
            std::fs::write(
                dir.path().join(name),
                fixtures::apk(&fixtures::manifest(package, 3, "3")),
            )
            .unwrap();
        }
        std::fs::write(dir.path().join("readme.txt"), b"").unwrap();

        let connection = SharedConnection::new();
        connection.claim("R58M");
        let installer = Arc::new(FakeInstaller::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let monitor = ApkMonitor::new(
            dir.path().to_path_buf(),
            installer.clone(),
            connection,
            timing(),
            JobPool::new(2),
            tx,
        );

        assert_eq!(monitor.rescan(), 2);
        let done = final_statuses(&mut rx, 2).await;
        assert!(done.iter().all(|(_, s)| *s == JobStatus::Success));

        // Already seen: nothing new until the monitor is reset.
        assert_eq!(monitor.rescan(), 0);
        while !monitor.in_flight.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        monitor.reset();
        assert_eq!(monitor.rescan(), 2);
        final_statuses(&mut rx, 2).await;
        assert_eq!(installer.installs.lock().unwrap().len(), 4);
    }

    /// Mirror of what the window does with monitor events.
    fn apply(queue: &mut FileQueue, event: AppEvent) -> Option<JobStatus> {
        match event {
            AppEvent::JobQueued { path, .. } => queue.push(path),
            AppEvent::JobUpdated { path, status, .. } => {
                queue.update(&path, status.clone());
                return Some(status);
            }
            AppEvent::ApkMonitorReset => queue.clear(),
            _ => {}
        }
        None
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_job_waiting_for_device_keeps_row_across_reset() {
        let dir = TempDir::new().unwrap();
        let apk = dir.path().join("pos.apk");
        std::fs::write(&apk, fixtures::apk(&fixtures::manifest("com.pos", 5, "5"))).unwrap();

        let connection = SharedConnection::new();
        let installer = Arc::new(FakeInstaller::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let monitor = ApkMonitor::new(
            dir.path().to_path_buf(),
            installer.clone(),
            connection.clone(),
            InstallTiming {
                device_wait_attempts: 500,
                device_wait_delay: Duration::from_millis(20),
                ..timing()
            },
            JobPool::new(1),
            tx,
        );
        let mut queue = FileQueue::new();

        assert!(monitor.offer(apk.clone()));
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for device wait")
                .expect("channel closed");
            if apply(&mut queue, event) == Some(JobStatus::Waiting) {
                break;
            }
        }

        // device shows up: claim, reset the table, rescan the folder
        connection.claim("R58M");
        monitor.reset();
        assert_eq!(monitor.rescan(), 0);

        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for install")
                .expect("channel closed");
            if apply(&mut queue, event) == Some(JobStatus::Success) {
                break;
            }
        }

        assert_eq!(installer.installs.lock().unwrap().len(), 1);
        assert_eq!(queue.rows().len(), 1);
        assert_eq!(queue.rows()[0].path, apk);
        assert_eq!(queue.rows()[0].status, JobStatus::Success);
        assert_eq!(queue.processed(), 1);

        // still seen after the job ends: a modify event does not reinstall it
        while !monitor.in_flight.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!monitor.offer(apk));
    }

    #[tokio::test]
    async fn test_offer_ignores_other_files_and_after_shutdown() {
        let dir = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let monitor = ApkMonitor::new(
            dir.path().to_path_buf(),
            Arc::new(FakeInstaller::default()),
            SharedConnection::new(),
            timing(),
            JobPool::new(1),
            tx,
        );

        assert!(!monitor.offer(dir.path().join("photo.jpg")));
        monitor.shutdown();
        assert!(!monitor.offer(dir.path().join("late.apk")));
    }
}
