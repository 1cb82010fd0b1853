//! End-to-end tests for the price-tag zip monitor

use chrono::Local;
use hht_connect::events::{AppEvent, JobKind, JobStatus};
use hht_connect::services::file_queue::{JobPool, Readiness};
use hht_connect::services::zip_monitor::{ZipMonitor, ZipMonitorSettings};
use hht_connect::services::zip_repack::renamed_file_name;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    for (name, body) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

fn settings(dir: &TempDir, prefix: &str) -> ZipMonitorSettings {
    ZipMonitorSettings {
        folder: dir.path().join("tags"),
        prefix: prefix.to_string(),
        tmp_root: dir.path().join("tmp"),
        readiness: Readiness {
            attempts: 3,
            delay: Duration::from_millis(10),
            settle: Duration::ZERO,
        },
    }
}

async fn final_status(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> JobStatus {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        if let AppEvent::JobUpdated { kind: JobKind::Zip, status, .. } = event {
            if status != JobStatus::Processing {
                return status;
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_offer_repacks_and_renames() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir, "1021");
    fs::create_dir_all(&settings.folder).unwrap();
    let source = settings.folder.join("1021-05-PT-0001-7.zip");
    write_zip(&source, &[("tags/a.txt", "A"), ("b.txt", "B")]);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let monitor = ZipMonitor::new(settings.clone(), JobPool::new(2), tx);
    assert!(monitor.offer(source.clone()));

    assert!(matches!(rx.recv().await, Some(AppEvent::JobQueued { kind: JobKind::Zip, .. })));
    assert_eq!(final_status(&mut rx).await, JobStatus::Done);

    let renamed = settings
        .folder
        .join(renamed_file_name("1021-05-PT-0001-7.zip", Local::now().date_naive()));
    assert!(!source.exists());
    assert!(renamed.exists());

    let mut archive = ZipArchive::new(File::open(&renamed).unwrap()).unwrap();
    let mut body = String::new();
    archive.by_name("tags/a.txt").unwrap().read_to_string(&mut body).unwrap();
    assert_eq!(body, "A");
    assert!(archive.by_name("tags/").unwrap().is_dir());

    // The archive we just wrote is not picked up again
    assert!(!monitor.offer(renamed));
    assert!(!settings.tmp_root.join("extract_1021-05-PT-0001-7.zip").exists());
}

#[tokio::test]
async fn test_prefix_and_extension_filter() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir, "1021");
    let (tx, _rx) = mpsc::unbounded_channel();
    let monitor = ZipMonitor::new(settings.clone(), JobPool::new(1), tx);

    assert!(!monitor.offer(settings.folder.join("2000-05-PT-0001-7.zip")));
    assert!(!monitor.offer(settings.folder.join("1021-notes.txt")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_corrupt_archive_reports_error() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir, "");
    fs::create_dir_all(&settings.folder).unwrap();
    let source = settings.folder.join("broken.zip");
    fs::write(&source, b"not a zip").unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let monitor = ZipMonitor::new(settings, JobPool::new(1), tx);
    assert!(monitor.offer(source.clone()));

    assert_eq!(final_status(&mut rx).await, JobStatus::Failed(None));
    assert_eq!(JobStatus::Failed(None).to_string(), "Error");
    assert!(source.exists());

    // A fixed copy dropped under the same name is picked up on the first try
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(monitor.offer(source.clone()));
}
