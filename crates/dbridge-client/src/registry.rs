//! Known devices and the runtimes derived from them.
//!
//! The registry is owned by the reconciliation task and is never shared.
//! Each insertion stamps the device with a fresh epoch; discovery results
//! carry the epoch they were started under and are dropped when it no
//! longer matches, so a device that disconnected (or disconnected and came
//! back) mid-query never receives stale data.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use dbridge_core::{Error, Result};

/// How a device is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Emulator or a device reached over loopback.
    Local,
    Usb,
}

impl RuntimeKind {
    /// Classify a device by its serial.
    pub fn for_device(serial: &str) -> Self {
        let host = serial.rsplit_once(':').map_or(serial, |(host, _)| host);
        if serial.starts_with("emulator-") || host == "localhost" || host == "127.0.0.1" {
            RuntimeKind::Local
        } else {
            RuntimeKind::Usb
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeKind::Local => f.write_str("local"),
            RuntimeKind::Usb => f.write_str("usb"),
        }
    }
}

/// A debuggable endpoint: one debugger socket on one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Runtime {
    /// `<device-id>|<socket-path>`.
    pub id: String,
    pub device_id: String,
    pub socket_path: String,
    /// Device display name.
    pub name: String,
    pub kind: RuntimeKind,
}

/// A device seen online by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    /// Model name, once queried.
    pub model: Option<String>,
    /// Debugger sockets from the last discovery pass.
    pub sockets: Option<Vec<String>>,
    epoch: u64,
}

impl Device {
    /// Display name: the model when known, the id otherwise.
    pub fn name(&self) -> &str {
        self.model.as_deref().unwrap_or(&self.id)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Devices currently online, keyed by id.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, Device>,
    next_epoch: u64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device and return its epoch.
    ///
    /// Re-inserting a present device keeps it (and its epoch) unchanged.
    pub fn insert(&mut self, id: &str) -> u64 {
        if let Some(device) = self.devices.get(id) {
            return device.epoch;
        }
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        self.devices.insert(
            id.to_string(),
            Device {
                id: id.to_string(),
                model: None,
                sockets: None,
                epoch,
            },
        );
        epoch
    }

    pub fn remove(&mut self, id: &str) -> Option<Device> {
        self.devices.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn current_mut(&mut self, id: &str, epoch: u64) -> Result<&mut Device> {
        self.devices
            .get_mut(id)
            .filter(|device| device.epoch == epoch)
            .ok_or_else(|| Error::DeviceNotFound(id.to_string()))
    }

    /// Record the model name queried under `epoch`.
    pub fn set_model(&mut self, id: &str, epoch: u64, model: String) -> Result<()> {
        self.current_mut(id, epoch)?.model = Some(model);
        Ok(())
    }

    /// Record the socket list discovered under `epoch`.
    pub fn set_sockets(&mut self, id: &str, epoch: u64, sockets: Vec<String>) -> Result<()> {
        self.current_mut(id, epoch)?.sockets = Some(sockets);
        Ok(())
    }

    /// `(id, epoch)` of every device, for a discovery pass.
    pub fn discovery_targets(&self) -> Vec<(String, u64)> {
        self.devices
            .values()
            .map(|device| (device.id.clone(), device.epoch))
            .collect()
    }

    /// One runtime per discovered socket, ordered by device then socket.
    pub fn runtimes(&self) -> Vec<Runtime> {
        self.devices
            .values()
            .flat_map(|device| {
                device.sockets.iter().flatten().map(move |socket| Runtime {
                    id: format!("{}|{}", device.id, socket),
                    device_id: device.id.clone(),
                    socket_path: socket.clone(),
                    name: device.name().to_string(),
                    kind: RuntimeKind::for_device(&device.id),
                })
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }
}

/// Extract socket paths from a socket table listing.
///
/// Keeps the last whitespace-separated field of every line containing
/// `marker`, first occurrence only.
pub fn parse_socket_table(output: &str, marker: &str) -> Vec<String> {
    let mut sockets: Vec<String> = Vec::new();
    for line in output.lines().filter(|line| line.contains(marker)) {
        let Some(path) = line.split_whitespace().last() else {
            continue;
        };
        if !sockets.iter().any(|s| s == path) {
            sockets.push(path.to_string());
        }
    }
    sockets
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOCKET_TABLE: &str = "\
00000000: 00000002 00000000 00010000 0001 01 12345 @org.mozilla.firefox/firefox-debugger-socket
00000000: 00000003 00000000 00000000 0001 03 12346 @org.mozilla.firefox/firefox-debugger-socket
00000000: 00000002 00000000 00010000 0001 01 22222 /data/data/org.example/debugger-socket
00000000: 00000002 00000000 00010000 0001 01 33333 @jdwp-control
";

    #[test]
    fn socket_table_dedupes_in_order() {
        let sockets = parse_socket_table(SOCKET_TABLE, "debugger-socket");
        assert_eq!(
            sockets,
            vec![
                "@org.mozilla.firefox/firefox-debugger-socket".to_string(),
                "/data/data/org.example/debugger-socket".to_string(),
            ]
        );
    }

    #[test]
    fn socket_table_empty_output() {
        assert!(parse_socket_table("", "debugger-socket").is_empty());
    }

    #[test]
    fn kind_heuristic() {
        assert_eq!(RuntimeKind::for_device("emulator-5554"), RuntimeKind::Local);
        assert_eq!(RuntimeKind::for_device("127.0.0.1:5555"), RuntimeKind::Local);
        assert_eq!(RuntimeKind::for_device("localhost:5555"), RuntimeKind::Local);
        assert_eq!(RuntimeKind::for_device("0123456789ABCDEF"), RuntimeKind::Usb);
        assert_eq!(RuntimeKind::for_device("192.168.1.20:5555"), RuntimeKind::Usb);
    }

    #[test]
    fn name_falls_back_to_id() {
        let mut registry = DeviceRegistry::new();
        let epoch = registry.insert("serial1");
        assert_eq!(registry.get("serial1").unwrap().name(), "serial1");
        registry.set_model("serial1", epoch, "Pixel 7".into()).unwrap();
        assert_eq!(registry.get("serial1").unwrap().name(), "Pixel 7");
    }

    #[test]
    fn stale_epoch_rejected() {
        let mut registry = DeviceRegistry::new();
        let first = registry.insert("serial1");
        registry.remove("serial1");
        let second = registry.insert("serial1");
        assert_ne!(first, second);

        let err = registry
            .set_sockets("serial1", first, vec!["@sock".into()])
            .unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(_)));
        assert!(registry.runtimes().is_empty());
    }

    #[test]
    fn removed_device_rejects_results() {
        let mut registry = DeviceRegistry::new();
        let epoch = registry.insert("serial1");
        registry.remove("serial1");
        assert!(registry.set_model("serial1", epoch, "x".into()).is_err());
    }

    #[test]
    fn reinsert_keeps_epoch() {
        let mut registry = DeviceRegistry::new();
        let epoch = registry.insert("serial1");
        assert_eq!(registry.insert("serial1"), epoch);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn runtimes_per_socket() {
        let mut registry = DeviceRegistry::new();
        let a = registry.insert("emulator-5554");
        let b = registry.insert("serial1");
        registry.insert("serial2");
        registry.set_model("emulator-5554", a, "sdk_phone".into()).unwrap();
        registry
            .set_sockets("emulator-5554", a, vec!["@one".into(), "/two".into()])
            .unwrap();
        registry.set_sockets("serial1", b, Vec::new()).unwrap();

        let runtimes = registry.runtimes();
        assert_eq!(runtimes.len(), 2);
        assert_eq!(runtimes[0].id, "emulator-5554|@one");
        assert_eq!(runtimes[0].name, "sdk_phone");
        assert_eq!(runtimes[0].kind, RuntimeKind::Local);
        assert_eq!(runtimes[1].socket_path, "/two");
    }

    #[test]
    fn runtime_serializes_lowercase_kind() {
        let runtime = Runtime {
            id: "serial1|@sock".into(),
            device_id: "serial1".into(),
            socket_path: "@sock".into(),
            name: "serial1".into(),
            kind: RuntimeKind::Usb,
        };
        let json = serde_json::to_value(&runtime).unwrap();
        assert_eq!(json["kind"], "usb");
        assert_eq!(json["id"], "serial1|@sock");
    }
}
