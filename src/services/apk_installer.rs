use crate::bridge::{AdbBridge, AdbError};
use crate::device::SharedConnection;
use crate::events::JobStatus;
use crate::services::apk_manifest::read_apk_info;
use crate::services::file_queue::Readiness;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// The adb operations an install job needs; faked in tests.
pub trait PackageInstaller: Send + Sync {
    fn installed_version(&self, serial: &str, package: &str) -> Result<Option<u64>, AdbError>;
    fn install(&self, serial: &str, apk: &Path) -> Result<bool, AdbError>;
}

impl PackageInstaller for AdbBridge {
    fn installed_version(&self, serial: &str, package: &str) -> Result<Option<u64>, AdbError> {
        self.installed_version_code(serial, package)
    }

    fn install(&self, serial: &str, apk: &Path) -> Result<bool, AdbError> {
        AdbBridge::install(self, serial, apk)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPlan {
    Install,
    Upgrade,
    Skip(u64),
}

pub fn plan_install(apk_version: u64, installed: Option<u64>) -> InstallPlan {
    match installed {
        None | Some(0) => InstallPlan::Install,
        Some(current) if apk_version > current => InstallPlan::Upgrade,
        Some(current) => InstallPlan::Skip(current),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InstallTiming {
    pub readiness: Readiness,
    pub device_wait_attempts: u32,
    pub device_wait_delay: Duration,
}

impl Default for InstallTiming {
    fn default() -> Self {
        Self {
            readiness: Readiness::APK,
            device_wait_attempts: 10,
            device_wait_delay: Duration::from_secs(1),
        }
    }
}

/// One APK job from `Checking...` to its final status.
///
/// `report` receives every intermediate status; the final one is also returned.
pub fn run_install_job(
    apk: &Path,
    installer: &dyn PackageInstaller,
    connection: &SharedConnection,
    timing: &InstallTiming,
    shutdown: &AtomicBool,
    report: &dyn Fn(JobStatus),
) -> JobStatus {
    let finish = |status: JobStatus| {
        report(status.clone());
        status
    };

    report(JobStatus::Checking);
    if !timing.readiness.wait(apk) {
        return finish(JobStatus::error("File locked"));
    }

    let info = match read_apk_info(apk) {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!("{} is not a usable APK: {}", apk.display(), e);
            return finish(JobStatus::error("Invalid APK"));
        }
    };

    let mut waited = 0;
    while connection.current().is_none()
        && waited < timing.device_wait_attempts
        && !shutdown.load(Ordering::Relaxed)
    {
        report(JobStatus::Waiting);
        std::thread::sleep(timing.device_wait_delay);
        waited += 1;
    }
    let Some(serial) = connection.current() else {
        return finish(JobStatus::error("No device"));
    };

    let installed = installer
        .installed_version(&serial, &info.package)
        .unwrap_or_else(|e| {
            tracing::warn!("Could not read installed version of {}: {}", info.package, e);
            None
        });

    match plan_install(info.version_code, installed) {
        InstallPlan::Install => report(JobStatus::Installing),
        InstallPlan::Upgrade => report(JobStatus::Upgrading),
        InstallPlan::Skip(current) => {
            tracing::info!("{} v{} already on {} (v{})", info.package, info.version_code, serial, current);
            return finish(JobStatus::Skipped(current));
        }
    }

    match installer.install(&serial, apk) {
        Ok(true) => {
            tracing::info!("Installed {} v{} on {}", info.package, info.version_code, serial);
            finish(JobStatus::Success)
        }
        Ok(false) => finish(JobStatus::error("Install Fail")),
        Err(e) => finish(JobStatus::error(e.to_string())),
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeInstaller;
    use super::*;
    use crate::services::apk_manifest::fixtures;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn fast_timing() -> InstallTiming {
        InstallTiming {
            readiness: Readiness {
                attempts: 2,
                delay: Duration::from_millis(1),
                settle: Duration::ZERO,
            },
            device_wait_attempts: 3,
            device_wait_delay: Duration::from_millis(1),
        }
    }

    fn write_apk(dir: &TempDir, name: &str, package: &str, version: u32) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, fixtures::apk(&fixtures::manifest(package, version, "x"))).unwrap();
        path
    }

    fn run(apk: &Path, installer: &FakeInstaller, connection: &SharedConnection) -> Vec<JobStatus> {
        let seen = Mutex::new(Vec::new());
        let shutdown = AtomicBool::new(false);
        run_install_job(apk, installer, connection, &fast_timing(), &shutdown, &|s| {
            seen.lock().unwrap().push(s)
        });
        seen.into_inner().unwrap()
    }

    fn connected(serial: &str) -> SharedConnection {
        let connection = SharedConnection::new();
        connection.claim(serial);
        connection
    }

    #[test]
    fn test_plan_install() {
        assert_eq!(plan_install(5, None), InstallPlan::Install);
        assert_eq!(plan_install(5, Some(0)), InstallPlan::Install);
        assert_eq!(plan_install(5, Some(4)), InstallPlan::Upgrade);
        assert_eq!(plan_install(5, Some(5)), InstallPlan::Skip(5));
        assert_eq!(plan_install(5, Some(9)), InstallPlan::Skip(9));
    }

    #[test]
    fn test_fresh_install() {
        let dir = TempDir::new().unwrap();
        let apk = write_apk(&dir, "store.apk", "com.store", 10);
        let installer = FakeInstaller::default();

        let statuses = run(&apk, &installer, &connected("R58M"));
        assert_eq!(
            statuses,
            vec![JobStatus::Checking, JobStatus::Installing, JobStatus::Success]
        );
        assert_eq!(
            installer.installs.lock().unwrap().as_slice(),
            &[("R58M".to_string(), "store.apk".to_string())]
        );
    }

    #[test]
    fn test_upgrade_and_skip() {
        let dir = TempDir::new().unwrap();
        let apk = write_apk(&dir, "store.apk", "com.store", 10);

        let older = FakeInstaller::with_version("com.store", 9);
        assert_eq!(
            run(&apk, &older, &connected("A")).last(),
            Some(&JobStatus::Success)
        );

        let same = FakeInstaller::with_version("com.store", 10);
        let statuses = run(&apk, &same, &connected("A"));
        assert_eq!(statuses, vec![JobStatus::Checking, JobStatus::Skipped(10)]);
        assert!(same.installs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_install_failure() {
        let dir = TempDir::new().unwrap();
        let apk = write_apk(&dir, "store.apk", "com.store", 10);
        let installer = FakeInstaller {
            fail_install: true,
            ..Default::default()
        };
        let statuses = run(&apk, &installer, &connected("A"));
        assert_eq!(statuses.last(), Some(&JobStatus::error("Install Fail")));
    }

    #[test]
    fn test_waits_then_gives_up_without_device() {
        let dir = TempDir::new().unwrap();
        let apk = write_apk(&dir, "store.apk", "com.store", 10);
        let statuses = run(&apk, &FakeInstaller::default(), &SharedConnection::new());
        assert_eq!(
            statuses,
            vec![
                JobStatus::Checking,
                JobStatus::Waiting,
                JobStatus::Waiting,
                JobStatus::Waiting,
                JobStatus::error("No device"),
            ]
        );
    }

    #[test]
    fn test_invalid_and_missing_files() {
        let dir = TempDir::new().unwrap();
        let broken = dir.path().join("broken.apk");
        std::fs::write(&broken, b"garbage").unwrap();
        let installer = FakeInstaller::default();

        assert_eq!(
            run(&broken, &installer, &connected("A")).last(),
            Some(&JobStatus::error("Invalid APK"))
        );
        assert_eq!(
            run(&dir.path().join("gone.apk"), &installer, &connected("A")).last(),
            Some(&JobStatus::error("File locked"))
        );
    }
}
