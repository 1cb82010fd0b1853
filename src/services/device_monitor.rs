use crate::bridge::{AdbBridge, AdbError};
use crate::device::{usable_serials, Device, DeviceTracker, SharedConnection, TrackerAction};
use crate::events::AppEvent;
use crate::services::apk_monitor::ApkMonitor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Disconnect first ({0} is connected)")]
    AlreadyConnected(String),
    #[error("No device connected")]
    NotConnected,
    #[error(transparent)]
    Adb(#[from] AdbError),
}

/// adb calls the monitor depends on; faked in tests.
pub trait DeviceControl: Send + Sync {
    fn devices(&self) -> Result<Vec<Device>, AdbError>;
    fn reverse(&self, serial: &str, port: u16) -> Result<(), AdbError>;
    fn reverse_remove(&self, serial: &str, port: u16) -> Result<(), AdbError>;
}

impl DeviceControl for AdbBridge {
    fn devices(&self) -> Result<Vec<Device>, AdbError> {
        AdbBridge::devices(self)
    }

    fn reverse(&self, serial: &str, port: u16) -> Result<(), AdbError> {
        AdbBridge::reverse(self, serial, port)
    }

    fn reverse_remove(&self, serial: &str, port: u16) -> Result<(), AdbError> {
        AdbBridge::reverse_remove(self, serial, port)
    }
}

/// Owns the connect/disconnect lifecycle of the single active device.
pub struct DeviceMonitor {
    adb: Arc<dyn DeviceControl>,
    connection: SharedConnection,
    port: u16,
    tracker: Mutex<DeviceTracker>,
    apk_monitor: Mutex<Option<Arc<ApkMonitor>>>,
    events: UnboundedSender<AppEvent>,
}

impl DeviceMonitor {
    pub fn new(
        adb: Arc<dyn DeviceControl>,
        connection: SharedConnection,
        port: u16,
        events: UnboundedSender<AppEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            adb,
            connection,
            port,
            tracker: Mutex::new(DeviceTracker::new()),
            apk_monitor: Mutex::new(None),
            events,
        })
    }

    /// APK monitor to reset on every connection change.
    pub fn attach_apk_monitor(&self, monitor: Arc<ApkMonitor>) {
        *self.apk_monitor.lock().unwrap_or_else(|p| p.into_inner()) = Some(monitor);
    }

    pub fn connection(&self) -> &SharedConnection {
        &self.connection
    }

    fn send(&self, event: AppEvent) {
        let _ = self.events.send(event);
    }

    fn reset_apk_monitor(&self, rescan: bool) {
        let monitor = self.apk_monitor.lock().unwrap_or_else(|p| p.into_inner()).clone();
        if let Some(monitor) = monitor {
            monitor.reset();
            if rescan {
                let queued = monitor.rescan();
                tracing::info!("Queued {} existing APK(s) from {}", queued, monitor.folder().display());
            }
        }
    }

    /// List devices and publish them without touching the connection.
    pub fn refresh(&self) -> Result<Vec<Device>, AdbError> {
        match self.adb.devices() {
            Ok(devices) => {
                self.send(AppEvent::DevicesRefreshed(devices.clone()));
                Ok(devices)
            }
            Err(e) => {
                self.send(AppEvent::DeviceListFailed(e.to_string()));
                Err(e)
            }
        }
    }

    /// One monitor cycle: refresh, diff, then act on the result.
    pub fn poll_once(&self) -> TrackerAction {
        let devices = match self.refresh() {
            Ok(devices) => devices,
            Err(e) => {
                tracing::debug!("Device poll failed: {}", e);
                return TrackerAction::None;
            }
        };

        let current = usable_serials(&devices);
        let connected = self.connection.current();
        let action = self
            .tracker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .observe(current, connected.as_deref());

        match &action {
            TrackerAction::Lost(serial) => self.handle_lost(serial),
            TrackerAction::AutoConnect(serial) => {
                tracing::info!("New device {} detected, connecting", serial);
                if let Err(e) = self.connect(serial) {
                    tracing::warn!("Auto-connect to {} failed: {}", serial, e);
                }
            }
            TrackerAction::None => {}
        }
        action
    }

    fn handle_lost(&self, serial: &str) {
        tracing::warn!("Device {} disappeared", serial);
        self.connection.release();
        self.send(AppEvent::DeviceDisconnected {
            serial: serial.to_string(),
            unplugged: true,
        });
        self.reset_apk_monitor(false);
    }

    /// Map the API port onto `serial` and make it the active device.
    pub fn connect(&self, serial: &str) -> Result<(), ConnectError> {
        if let Some(current) = self.connection.current() {
            return Err(ConnectError::AlreadyConnected(current));
        }

        if let Err(e) = self.adb.reverse(serial, self.port) {
            self.send(AppEvent::ConnectFailed {
                serial: serial.to_string(),
                reason: e.to_string(),
            });
            return Err(e.into());
        }

        if !self.connection.claim(serial) {
            // Lost a race with another connect; the other device keeps the slot.
            let current = self.connection.current().unwrap_or_default();
            return Err(ConnectError::AlreadyConnected(current));
        }

        tracing::info!("Connected {} (tcp:{})", serial, self.port);
        self.send(AppEvent::DeviceConnected(serial.to_string()));
        self.reset_apk_monitor(true);
        Ok(())
    }

    /// Remove the port mapping and release the active device.
    pub fn disconnect(&self) -> Result<String, ConnectError> {
        let serial = self.connection.current().ok_or(ConnectError::NotConnected)?;
        self.adb.reverse_remove(&serial, self.port)?;

        self.connection.release();
        tracing::info!("Disconnected {}", serial);
        self.send(AppEvent::DeviceDisconnected {
            serial: serial.clone(),
            unplugged: false,
        });
        self.reset_apk_monitor(false);
        Ok(serial)
    }

    /// Best-effort cleanup on quit.
    pub fn release_on_exit(&self) {
        if let Some(serial) = self.connection.release() {
            if let Err(e) = self.adb.reverse_remove(&serial, self.port) {
                tracing::warn!("Failed to remove reverse mapping for {}: {}", serial, e);
            }
        }
    }

    /// Poll until `cancel` flips to `true` or its sender is dropped.
    pub async fn run(self: Arc<Self>, interval: Duration, mut cancel: watch::Receiver<bool>) {
        tracing::info!("Device monitor started ({:?} interval)", interval);
        loop {
            if *cancel.borrow() {
                break;
            }

            let monitor = Arc::clone(&self);
            if let Err(e) = tokio::task::spawn_blocking(move || monitor.poll_once()).await {
                tracing::error!("Device poll task failed: {}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = cancel.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Device monitor stopped");
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use crate::device::DeviceStatus;

    #[derive(Default)]
    pub struct FakeAdb {
        pub devices: Mutex<Vec<Device>>,
        pub calls: Mutex<Vec<String>>,
        pub reverse_error: Mutex<Option<String>>,
    }

    impl FakeAdb {
        pub fn plug(&self, serials: &[&str]) {
            *self.devices.lock().unwrap() = serials
                .iter()
                .map(|s| Device {
                    identifier: s.to_string(),
                    status: DeviceStatus::Device,
                    product: "unknown".into(),
                    model: "unknown".into(),
                    device: "unknown".into(),
                    transport_id: "unknown".into(),
                })
                .collect();
        }
    }

    impl DeviceControl for FakeAdb {
        fn devices(&self) -> Result<Vec<Device>, AdbError> {
            Ok(self.devices.lock().unwrap().clone())
        }

        fn reverse(&self, serial: &str, port: u16) -> Result<(), AdbError> {
            self.calls.lock().unwrap().push(format!("reverse {} {}", serial, port));
            match self.reverse_error.lock().unwrap().clone() {
                Some(stderr) => Err(AdbError::Failed {
                    command: "reverse".into(),
                    stderr,
                }),
                None => Ok(()),
            }
        }

        fn reverse_remove(&self, serial: &str, port: u16) -> Result<(), AdbError> {
            self.calls.lock().unwrap().push(format!("remove {} {}", serial, port));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeAdb;
    use super::*;
    use tokio::sync::mpsc;

    fn monitor() -> (Arc<FakeAdb>, Arc<DeviceMonitor>, mpsc::UnboundedReceiver<AppEvent>) {
        let adb = Arc::new(FakeAdb::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let monitor = DeviceMonitor::new(adb.clone(), SharedConnection::new(), 8000, tx);
        (adb, monitor, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> Vec<AppEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_auto_connect_then_unplug() {
        let (adb, monitor, mut rx) = monitor();

        adb.plug(&["R58M"]);
        assert_eq!(monitor.poll_once(), TrackerAction::AutoConnect("R58M".into()));
        assert_eq!(monitor.connection().current().as_deref(), Some("R58M"));
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, AppEvent::DeviceConnected(s) if s == "R58M")));

        adb.plug(&[]);
        assert_eq!(monitor.poll_once(), TrackerAction::Lost("R58M".into()));
        assert!(!monitor.connection().is_connected());
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            AppEvent::DeviceDisconnected { unplugged: true, .. }
        )));
        assert_eq!(adb.calls.lock().unwrap().as_slice(), &["reverse R58M 8000"]);
    }

    #[test]
    fn test_only_one_auto_connect_per_cycle() {
        let (adb, monitor, _rx) = monitor();
        adb.plug(&["B", "A"]);
        monitor.poll_once();
        assert_eq!(monitor.connection().current().as_deref(), Some("A"));
        assert_eq!(monitor.poll_once(), TrackerAction::None);
        assert_eq!(adb.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_connect_failure_reports_stderr() {
        let (adb, monitor, mut rx) = monitor();
        *adb.reverse_error.lock().unwrap() = Some("error: device unauthorized".into());

        let err = monitor.connect("X").unwrap_err();
        assert!(matches!(err, ConnectError::Adb(_)));
        assert!(!monitor.connection().is_connected());
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            AppEvent::ConnectFailed { reason, .. } if reason.contains("unauthorized")
        )));
    }

    #[test]
    fn test_manual_connect_refused_while_connected() {
        let (_adb, monitor, _rx) = monitor();
        monitor.connect("A").unwrap();
        assert!(matches!(
            monitor.connect("B"),
            Err(ConnectError::AlreadyConnected(s)) if s == "A"
        ));
    }

    #[test]
    fn test_disconnect_removes_reverse() {
        let (adb, monitor, _rx) = monitor();
        assert!(matches!(monitor.disconnect(), Err(ConnectError::NotConnected)));

        monitor.connect("A").unwrap();
        assert_eq!(monitor.disconnect().unwrap(), "A");
        assert_eq!(
            adb.calls.lock().unwrap().as_slice(),
            &["reverse A 8000", "remove A 8000"]
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (_adb, monitor, _rx) = monitor();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(monitor.run(Duration::from_millis(10), cancel_rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
