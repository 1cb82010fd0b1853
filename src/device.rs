use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub identifier: String,
    pub status: DeviceStatus,
    pub product: String,
    pub model: String,
    pub device: String,
    pub transport_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    Device,
    Offline,
    Unauthorized,
    NoPermission,
    Unknown(String),
}

impl From<&str> for DeviceStatus {
    fn from(s: &str) -> Self {
        match s {
            "device" => DeviceStatus::Device,
            "offline" => DeviceStatus::Offline,
            "unauthorized" => DeviceStatus::Unauthorized,
            "no_permission" | "no" => DeviceStatus::NoPermission,
            _ => DeviceStatus::Unknown(s.to_string()),
        }
    }
}

impl Device {
    pub fn is_usable(&self) -> bool {
        matches!(self.status, DeviceStatus::Device)
    }
}

/// Parse `adb devices` / `adb devices -l` output.
pub fn parse_devices(output: &str) -> Vec<Device> {
    let mut devices = Vec::new();

    for line in output.lines() {
        // Header and daemon startup chatter.
        if line.trim().is_empty() || line.starts_with('*') || line.starts_with("List of devices") {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }

        let field = |key: &str| {
            parts
                .iter()
                .find_map(|p| p.strip_prefix(key))
                .unwrap_or("unknown")
                .to_string()
        };

        devices.push(Device {
            identifier: parts[0].to_string(),
            status: DeviceStatus::from(parts[1]),
            product: field("product:"),
            model: field("model:"),
            device: field("device:"),
            transport_id: field("transport_id:"),
        });
    }

    devices
}

/// Serials of devices that are online and authorized.
pub fn usable_serials(devices: &[Device]) -> BTreeSet<String> {
    devices
        .iter()
        .filter(|d| d.is_usable())
        .map(|d| d.identifier.clone())
        .collect()
}

/// What the monitor should do after one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerAction {
    None,
    Lost(String),
    AutoConnect(String),
}

/// Diffs consecutive polls against the currently connected device.
#[derive(Debug, Default)]
pub struct DeviceTracker {
    known: BTreeSet<String>,
}

impl DeviceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn known(&self) -> &BTreeSet<String> {
        &self.known
    }

    /// One monitor cycle. At most one action is returned per call.
    pub fn observe(&mut self, current: BTreeSet<String>, connected: Option<&str>) -> TrackerAction {
        let action = match connected {
            Some(serial) if !current.contains(serial) => TrackerAction::Lost(serial.to_string()),
            Some(_) => TrackerAction::None,
            None => current
                .difference(&self.known)
                .next()
                .map(|serial| TrackerAction::AutoConnect(serial.clone()))
                .unwrap_or(TrackerAction::None),
        };
        self.known = current;
        action
    }
}

/// The device currently holding the reverse mapping, shared across services.
#[derive(Debug, Clone, Default)]
pub struct SharedConnection {
    inner: Arc<RwLock<Option<String>>>,
}

impl SharedConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        self.current().is_some()
    }

    /// Claims the slot for `serial`; fails if another device already holds it.
    pub fn claim(&self, serial: &str) -> bool {
        let mut slot = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() {
            return false;
        }
        *slot = Some(serial.to_string());
        true
    }

    pub fn release(&self) -> Option<String> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_devices_long_format() {
        let output = "List of devices attached\n\
            R58M12ABC      device usb:1-1 product:a51 model:SM_A515F device:a51 transport_id:3\n\
            emulator-5554  offline transport_id:1\n\n";
        let devices = parse_devices(output);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].identifier, "R58M12ABC");
        assert_eq!(devices[0].model, "SM_A515F");
        assert!(devices[0].is_usable());
        assert_eq!(devices[1].status, DeviceStatus::Offline);
        assert_eq!(devices[1].model, "unknown");
    }

    #[test]
    fn test_parse_devices_short_format() {
        let output = "* daemon started successfully\nList of devices attached\nABC\tdevice\nDEF\tunauthorized\n";
        let devices = parse_devices(output);
        assert_eq!(usable_serials(&devices), set(&["ABC"]));
    }

    #[test]
    fn test_tracker_auto_connects_smallest_new_serial() {
        let mut tracker = DeviceTracker::new();
        let action = tracker.observe(set(&["B", "A"]), None);
        assert_eq!(action, TrackerAction::AutoConnect("A".into()));
    }

    #[test]
    fn test_tracker_ignores_already_known_devices() {
        let mut tracker = DeviceTracker::new();
        tracker.observe(set(&["A"]), Some("A"));
        // "A" was released manually but is still plugged in.
        assert_eq!(tracker.observe(set(&["A"]), None), TrackerAction::None);
        assert_eq!(
            tracker.observe(set(&["A", "C"]), None),
            TrackerAction::AutoConnect("C".into())
        );
    }

    #[test]
    fn test_tracker_reports_lost_device_without_auto_connect() {
        let mut tracker = DeviceTracker::new();
        tracker.observe(set(&["A"]), Some("A"));
        let action = tracker.observe(set(&["B"]), Some("A"));
        assert_eq!(action, TrackerAction::Lost("A".into()));
        assert_eq!(tracker.known(), &set(&["B"]));
    }

    #[test]
    fn test_shared_connection_claim() {
        let connection = SharedConnection::new();
        assert!(connection.claim("A"));
        assert!(!connection.claim("B"));
        assert_eq!(connection.current().as_deref(), Some("A"));
        assert_eq!(connection.release().as_deref(), Some("A"));
        assert!(!connection.is_connected());
    }
}
