use std::sync::Arc;

use parking_lot::Mutex;

use crate::hotplug::{DeviceBackend, DeviceSnapshot};
use crate::session::SessionManager;
use crate::MidiError;

/// In-memory device set, used for tests, demos and hosts without OS MIDI.
///
/// Clones share the same device set, so one clone can be handed to a
/// [`HotplugWatcher`](crate::HotplugWatcher) while another plugs and unplugs.
#[derive(Debug, Clone, Default)]
pub struct VirtualBackend {
    devices: Arc<Mutex<DeviceSnapshot>>,
}

impl VirtualBackend {
    /// Backend with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-populated with the given port names.
    pub fn with_devices<I, O>(inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        let backend = Self::new();
        {
            let mut devices = backend.devices.lock();
            devices.inputs.extend(inputs.into_iter().map(Into::into));
            devices.outputs.extend(outputs.into_iter().map(Into::into));
        }
        backend
    }

    /// Report a new input port.
    pub fn plug_input(&self, name: impl Into<String>) {
        self.devices.lock().inputs.push(name.into());
    }

    /// Report a new output port.
    pub fn plug_output(&self, name: impl Into<String>) {
        self.devices.lock().outputs.push(name.into());
    }

    /// Remove every port with this name, in both directions.
    pub fn unplug(&self, name: &str) {
        let mut devices = self.devices.lock();
        devices.inputs.retain(|candidate| candidate != name);
        devices.outputs.retain(|candidate| candidate != name);
    }

    /// Echo pending outbound messages back as inbound ones.
    ///
    /// Returns the number of messages looped back.
    pub fn loopback(&self, session: &SessionManager) -> Result<usize, MidiError> {
        let outbound = session.drain_outbound()?;
        let count = outbound.len();
        for message in outbound {
            session.push_inbound(message.bytes())?;
        }
        Ok(count)
    }
}

impl DeviceBackend for VirtualBackend {
    fn enumerate(&self) -> anyhow::Result<DeviceSnapshot> {
        Ok(self.devices.lock().clone())
    }
}
