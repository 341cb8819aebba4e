//! Host runtime bridge.
//!
//! A host (for instance an Android activity talking over JNI) announces
//! devices one name at a time and hands over MIDI as signed byte arrays.
//! The bridge batches the announcements into a single scan and turns byte
//! transfers into channel pushes and drains, so no host runtime is needed to
//! exercise it.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::device::{DeviceDirection, ScanResult};
use crate::hotplug::DeviceSnapshot;
use crate::session::SessionManager;
use crate::MidiError;

pub struct HostBridge {
    session: Arc<SessionManager>,
    pending: Mutex<DeviceSnapshot>,
}

impl HostBridge {
    /// Bridge feeding the given session.
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self {
            session,
            pending: Mutex::new(DeviceSnapshot::default()),
        }
    }

    /// Session behind the bridge.
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Start a new announcement batch, forgetting names announced so far.
    pub fn clear_known_devices(&self) {
        *self.pending.lock() = DeviceSnapshot::default();
    }

    /// Add a device name to the current batch.
    pub fn announce_device(&self, name: impl Into<String>, direction: DeviceDirection) {
        let name = name.into();
        trace!(device = %name, ?direction, "host announced midi device");
        let mut pending = self.pending.lock();
        if matches!(direction, DeviceDirection::Input | DeviceDirection::Both) {
            pending.inputs.push(name.clone());
        }
        if matches!(direction, DeviceDirection::Output | DeviceDirection::Both) {
            pending.outputs.push(name);
        }
    }

    /// Apply the whole batch as one device scan.
    ///
    /// The batch is kept on failure so a later commit can retry it.
    pub fn commit_devices(&self) -> Result<ScanResult, MidiError> {
        let batch = std::mem::take(&mut *self.pending.lock());
        match self.session.on_devices_changed(&batch.inputs, &batch.outputs) {
            Ok(result) => {
                debug!(
                    inputs = batch.inputs.len(),
                    outputs = batch.outputs.len(),
                    "host device batch committed"
                );
                Ok(result)
            }
            Err(err) => {
                let mut pending = self.pending.lock();
                if pending.inputs.is_empty() && pending.outputs.is_empty() {
                    *pending = batch;
                }
                Err(err)
            }
        }
    }

    /// Hand over a message received by the host.
    pub fn message_from_host(&self, bytes: &[i8]) -> Result<(), MidiError> {
        let octets: Vec<u8> = bytes.iter().map(|&b| b as u8).collect();
        self.session.push_inbound(&octets)
    }

    /// Collect every outbound message for the host to transmit.
    pub fn messages_for_host(&self) -> Result<Vec<Vec<i8>>, MidiError> {
        Ok(self
            .session
            .drain_outbound()?
            .into_iter()
            .map(|message| message.bytes().iter().map(|&b| b as i8).collect())
            .collect())
    }
}
