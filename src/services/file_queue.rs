use crate::events::JobStatus;
use crate::utils::{file_name_of, wait_until_readable};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Paths with a job currently running. Shared between watcher callbacks and jobs.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    inner: Arc<Mutex<HashSet<PathBuf>>>,
}

/// Releases its path from the [`InFlight`] set when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    set: InFlight,
    path: PathBuf,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `None` if a job for `path` is already running.
    pub fn claim(&self, path: &Path) -> Option<InFlightGuard> {
        if !self.lock().insert(path.to_path_buf()) {
            return None;
        }
        Some(InFlightGuard {
            set: self.clone(),
            path: path.to_path_buf(),
        })
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Snapshot of the running paths, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.lock().iter().cloned().collect();
        paths.sort();
        paths
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl InFlightGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.path);
    }
}

/// How long a job waits for a freshly dropped file to become readable.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub attempts: u32,
    pub delay: Duration,
    /// Extra pause after the first successful open, for files still arriving over the network.
    pub settle: Duration,
}

impl Readiness {
    pub const ZIP: Readiness = Readiness {
        attempts: 20,
        delay: Duration::from_secs(1),
        settle: Duration::from_secs(1),
    };

    pub const APK: Readiness = Readiness {
        attempts: 5,
        delay: Duration::from_secs(1),
        settle: Duration::ZERO,
    };

    pub fn wait(&self, path: &Path) -> bool {
        if !wait_until_readable(path, self.attempts, self.delay) {
            return false;
        }
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
        true
    }
}

/// Runs blocking file jobs on the tokio runtime, at most `limit` at a time.
#[derive(Debug, Clone)]
pub struct JobPool {
    permits: Arc<Semaphore>,
    runtime: Handle,
}

impl JobPool {
    /// Must be called from inside the runtime.
    pub fn new(limit: usize) -> Self {
        Self::with_handle(limit, Handle::current())
    }

    pub fn with_handle(limit: usize, runtime: Handle) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit.max(1))),
            runtime,
        }
    }

    pub fn spawn<F>(&self, job: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let permits = self.permits.clone();
        self.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if let Err(e) = tokio::task::spawn_blocking(job).await {
                tracing::error!("File job panicked: {}", e);
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRow {
    pub path: PathBuf,
    pub file_name: String,
    pub status: JobStatus,
}

/// UI-side rows for one monitor tab plus its processed counter.
#[derive(Debug, Default)]
pub struct FileQueue {
    rows: Vec<FileRow>,
    processed: usize,
}

impl FileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: PathBuf) {
        self.rows.push(FileRow {
            file_name: file_name_of(&path),
            path,
            status: JobStatus::Pending,
        });
    }

    /// Updates the newest row for `path`. Returns `false` for unknown paths.
    pub fn update(&mut self, path: &Path, status: JobStatus) -> bool {
        let Some(row) = self.rows.iter_mut().rev().find(|row| row.path == path) else {
            return false;
        };
        if status.counts_as_processed() && !row.status.counts_as_processed() {
            self.processed += 1;
        }
        row.status = status;
        true
    }

    pub fn rows(&self) -> &[FileRow] {
        &self.rows
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.processed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_exclusive_until_dropped() {
        let in_flight = InFlight::new();
        let path = Path::new("/drop/a.zip");

        let guard = in_flight.claim(path).unwrap();
        assert!(in_flight.claim(path).is_none());
        assert!(in_flight.contains(path));

        drop(guard);
        assert!(in_flight.is_empty());
        assert!(in_flight.claim(path).is_some());
    }

    #[test]
    fn test_queue_counts_each_row_once() {
        let mut queue = FileQueue::new();
        let path = PathBuf::from("/drop/a.zip");
        queue.push(path.clone());

        assert!(queue.update(&path, JobStatus::Processing));
        assert!(queue.update(&path, JobStatus::Done));
        assert!(queue.update(&path, JobStatus::Done));
        assert_eq!(queue.processed(), 1);
        assert_eq!(queue.rows()[0].file_name, "a.zip");
    }

    #[test]
    fn test_queue_updates_newest_row() {
        let mut queue = FileQueue::new();
        let path = PathBuf::from("/drop/a.zip");
        queue.push(path.clone());
        queue.update(&path, JobStatus::Done);
        queue.push(path.clone());
        queue.update(&path, JobStatus::error("Locked"));

        assert_eq!(queue.rows()[0].status, JobStatus::Done);
        assert_eq!(queue.rows()[1].status, JobStatus::error("Locked"));
        assert!(!queue.update(Path::new("/other.zip"), JobStatus::Done));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_job_pool_limits_concurrency() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let pool = JobPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.spawn(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clear_resets_counter() {
        let mut queue = FileQueue::new();
        let path = PathBuf::from("/apk/app.apk");
        queue.push(path.clone());
        queue.update(&path, JobStatus::Success);
        queue.clear();
        assert_eq!(queue.processed(), 0);
        assert!(queue.rows().is_empty());
    }
}
