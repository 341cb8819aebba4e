use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Opaque identifier for a known MIDI device, stable across rescans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Raw identifier value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

/// Which way a device carries MIDI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceDirection {
    Input,
    Output,
    Both,
}

impl DeviceDirection {
    /// Whether a device with this direction should appear in a `list(query)`.
    ///
    /// `Both` devices show up in input and output listings; a `Both` query only
    /// matches `Both` devices.
    pub fn matches(self, query: DeviceDirection) -> bool {
        match query {
            DeviceDirection::Both => self == DeviceDirection::Both,
            DeviceDirection::Input => {
                matches!(self, DeviceDirection::Input | DeviceDirection::Both)
            }
            DeviceDirection::Output => {
                matches!(self, DeviceDirection::Output | DeviceDirection::Both)
            }
        }
    }

    fn from_flags(input: bool, output: bool) -> Option<Self> {
        match (input, output) {
            (true, true) => Some(DeviceDirection::Both),
            (true, false) => Some(DeviceDirection::Input),
            (false, true) => Some(DeviceDirection::Output),
            (false, false) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Presence {
    Present,
    Removed,
}

/// A device the platform has reported at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    /// Display name as reported by the platform. This is the matching key.
    pub name: String,
    pub direction: DeviceDirection,
    pub presence: Presence,
}

impl DeviceRecord {
    /// True while the platform still reports the device.
    pub fn is_present(&self) -> bool {
        self.presence == Presence::Present
    }
}

/// Outcome of reconciling one platform report against the known devices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Present devices usable as inputs, in discovery order.
    pub inputs: Vec<DeviceRecord>,
    /// Present devices usable as outputs, in discovery order.
    pub outputs: Vec<DeviceRecord>,
    /// Devices that became present with this scan.
    pub added: Vec<DeviceId>,
    /// Devices that were present and are now gone.
    pub removed: Vec<DeviceId>,
}

impl ScanResult {
    /// True when the scan neither added nor removed anything.
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Registry of known devices, keyed by display name.
///
/// Names are the only key the platform guarantees, so two physical devices
/// sharing a name collapse into a single record.
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    records: Vec<DeviceRecord>,
    next_id: u64,
}

impl DeviceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            next_id: 1,
        }
    }

    /// Reconcile the live device sets reported by the platform.
    pub fn scan<I, O>(&mut self, current_inputs: I, current_outputs: O) -> ScanResult
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        O: IntoIterator,
        O::Item: AsRef<str>,
    {
        // (name, is_input, is_output) in first-reported order
        let mut reported: Vec<(String, bool, bool)> = Vec::new();
        let mut seen_inputs = HashSet::new();
        let mut seen_outputs = HashSet::new();

        for name in current_inputs {
            let name = name.as_ref();
            if !seen_inputs.insert(name.to_owned()) {
                warn!(device = name, "duplicate MIDI input name; devices cannot be told apart");
                continue;
            }
            reported.push((name.to_owned(), true, false));
        }
        for name in current_outputs {
            let name = name.as_ref();
            if !seen_outputs.insert(name.to_owned()) {
                warn!(device = name, "duplicate MIDI output name; devices cannot be told apart");
                continue;
            }
            match reported.iter_mut().find(|(known, _, _)| known == name) {
                Some(entry) => entry.2 = true,
                None => reported.push((name.to_owned(), false, true)),
            }
        }

        let mut added = Vec::new();
        let mut removed = Vec::new();

        for record in &mut self.records {
            if record.is_present() && !reported.iter().any(|(name, _, _)| *name == record.name) {
                record.presence = Presence::Removed;
                removed.push(record.id);
            }
        }

        for (name, is_input, is_output) in reported {
            let Some(direction) = DeviceDirection::from_flags(is_input, is_output) else {
                continue;
            };
            match self.records.iter_mut().find(|record| record.name == name) {
                Some(record) => {
                    if !record.is_present() {
                        record.presence = Presence::Present;
                        added.push(record.id);
                    }
                    record.direction = direction;
                }
                None => {
                    let id = self.allocate_id();
                    self.records.push(DeviceRecord {
                        id,
                        name,
                        direction,
                        presence: Presence::Present,
                    });
                    added.push(id);
                }
            }
        }

        debug!(added = added.len(), removed = removed.len(), "midi device scan reconciled");

        ScanResult {
            inputs: self.list(DeviceDirection::Input),
            outputs: self.list(DeviceDirection::Output),
            added,
            removed,
        }
    }

    /// Drop every known device.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Present devices matching `direction`, in discovery order.
    pub fn list(&self, direction: DeviceDirection) -> Vec<DeviceRecord> {
        self.records
            .iter()
            .filter(|record| record.is_present() && record.direction.matches(direction))
            .cloned()
            .collect()
    }

    /// Every known record, removed ones included.
    pub fn records(&self) -> &[DeviceRecord] {
        &self.records
    }

    /// Record for `id`, present or removed.
    pub fn get(&self, id: DeviceId) -> Option<&DeviceRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    /// Record with this display name, present or removed.
    pub fn find_by_name(&self, name: &str) -> Option<&DeviceRecord> {
        self.records.iter().find(|record| record.name == name)
    }

    /// Number of records, removed ones included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no device was ever seen since the last clear.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn allocate_id(&mut self) -> DeviceId {
        // `Default` leaves the counter at zero
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        DeviceId(id)
    }
}
