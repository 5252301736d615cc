//! Device list snapshots and the online/offline diff between them.

use std::collections::{BTreeMap, BTreeSet};

use dbridge_core::constants::STATUS_OFFLINE;

/// Online-ness transition of one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceChange {
    Connected(String),
    Disconnected(String),
}

impl DeviceChange {
    pub fn device_id(&self) -> &str {
        match self {
            DeviceChange::Connected(id) | DeviceChange::Disconnected(id) => id,
        }
    }
}

/// Parse a snapshot payload of `<id>\t<status>` lines.
///
/// Lines without a tab are skipped.
pub fn parse_device_list(payload: &str) -> BTreeMap<String, String> {
    payload
        .lines()
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            let (id, status) = line.split_once('\t')?;
            let id = id.trim();
            if id.is_empty() {
                return None;
            }
            Some((id.to_string(), status.trim().to_string()))
        })
        .collect()
}

fn is_online(status: Option<&String>) -> bool {
    status.is_some_and(|s| !s.is_empty() && s != STATUS_OFFLINE)
}

/// The last device list received from the server.
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    devices: BTreeMap<String, String>,
}

impl DeviceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot with `payload` and return the transitions.
    ///
    /// The diff compares the mapping held before this call against the one
    /// parsed from `payload`; a status change that keeps a device on the
    /// same side of online/offline produces nothing.
    pub fn apply(&mut self, payload: &str) -> Vec<DeviceChange> {
        let next = parse_device_list(payload);
        let ids: BTreeSet<&String> = self.devices.keys().chain(next.keys()).collect();

        let changes = ids
            .into_iter()
            .filter_map(|id| {
                let was_online = is_online(self.devices.get(id));
                let now_online = is_online(next.get(id));
                match (was_online, now_online) {
                    (false, true) => Some(DeviceChange::Connected(id.clone())),
                    (true, false) => Some(DeviceChange::Disconnected(id.clone())),
                    _ => None,
                }
            })
            .collect();

        self.devices = next;
        changes
    }

    /// Ids of devices currently online.
    pub fn online_ids(&self) -> BTreeSet<String> {
        self.devices
            .iter()
            .filter(|(_, status)| is_online(Some(*status)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Status string of `id`, if listed.
    pub fn status(&self, id: &str) -> Option<&str> {
        self.devices.get(id).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_skips_junk_lines() {
        let list = parse_device_list("A\tdevice\r\nnot a record\n\tdevice\nB\toffline\n");
        assert_eq!(list.len(), 2);
        assert_eq!(list["A"], "device");
        assert_eq!(list["B"], "offline");
    }

    #[test]
    fn first_snapshot_connects_online_devices() {
        let mut snap = DeviceSnapshot::new();
        let changes = snap.apply("A\tdevice\nB\toffline\n");
        assert_eq!(changes, vec![DeviceChange::Connected("A".into())]);
    }

    #[test]
    fn empty_payload_disconnects_everything() {
        let mut snap = DeviceSnapshot::new();
        snap.apply("A\tdevice\nB\tdevice");
        let changes = snap.apply("");
        assert_eq!(
            changes,
            vec![
                DeviceChange::Disconnected("A".into()),
                DeviceChange::Disconnected("B".into()),
            ]
        );
        assert!(snap.online_ids().is_empty());
    }

    #[test]
    fn offline_transition_disconnects() {
        let mut snap = DeviceSnapshot::new();
        snap.apply("A\tdevice\n");
        let changes = snap.apply("A\toffline\n");
        assert_eq!(changes, vec![DeviceChange::Disconnected("A".into())]);
        assert_eq!(snap.status("A"), Some("offline"));
    }

    #[test]
    fn online_status_text_change_ignored() {
        let mut snap = DeviceSnapshot::new();
        snap.apply("A\tdevice\n");
        assert!(snap.apply("A\tunauthorized\n").is_empty());
    }

    #[test]
    fn same_snapshot_twice_is_silent() {
        let mut snap = DeviceSnapshot::new();
        snap.apply("A\tdevice\n");
        assert!(snap.apply("A\tdevice\n").is_empty());
    }

    fn arb_snapshot() -> impl Strategy<Value = Vec<(u8, bool)>> {
        prop::collection::vec((0u8..6, any::<bool>()), 0..6)
    }

    fn render(entries: &[(u8, bool)]) -> String {
        entries
            .iter()
            .map(|(id, online)| {
                let status = if *online { "device" } else { "offline" };
                format!("dev{}\t{}\n", id, status)
            })
            .collect()
    }

    proptest! {
        #[test]
        fn replayed_changes_match_final_online_set(frames in prop::collection::vec(arb_snapshot(), 1..20)) {
            let mut snap = DeviceSnapshot::new();
            let mut replay = BTreeSet::new();

            for frame in &frames {
                for change in snap.apply(&render(frame)) {
                    match change {
                        DeviceChange::Connected(id) => prop_assert!(replay.insert(id)),
                        DeviceChange::Disconnected(id) => prop_assert!(replay.remove(&id)),
                    }
                }
            }

            prop_assert_eq!(replay, snap.online_ids());
        }
    }
}
