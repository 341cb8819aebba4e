use std::sync::Arc;

use anyhow::Context;
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput};
use tracing::{info, trace};

use crate::hotplug::{DeviceBackend, DeviceSnapshot};
use crate::output::MidiOutputHandle;
use crate::session::SessionManager;
use crate::MidiError;

/// Open input port; dropping it closes the port.
pub type MidiInputHandle = MidiInputConnection<()>;

/// Backend implemented using the `midir` crate.
#[derive(Debug, Clone)]
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    /// Backend whose OS client is registered as `client_name`.
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    /// Open the named input port and push everything it receives into the session.
    ///
    /// Dropping the returned connection closes the port.
    pub fn connect_input(
        &self,
        port_name: &str,
        session: Arc<SessionManager>,
    ) -> anyhow::Result<MidiInputHandle> {
        let mut input =
            MidiInput::new(&self.client_name).context("initialise midir for input")?;
        input.ignore(Ignore::None);
        let ports = input.ports();
        let Some(port) = ports
            .iter()
            .find(|port| input.port_name(port).as_deref() == Ok(port_name))
        else {
            return Err(MidiError::UnknownPort(port_name.to_owned()).into());
        };

        let connection = input
            .connect(
                port,
                &format!("{}-in", self.client_name),
                move |_timestamp, message, _| {
                    // NotStarted: the session was stopped under us, drop the bytes
                    if session.push_inbound(message).is_err() {
                        trace!("midi input received while session stopped");
                    }
                },
                (),
            )
            .map_err(|err| anyhow::anyhow!("failed to connect midi input: {err}"))?;
        info!(port = port_name, "connected midi input");
        Ok(connection)
    }

    /// Open the named output port.
    pub fn open_output(&self, port_name: &str) -> anyhow::Result<MidiOutputHandle> {
        let output = MidiOutput::new(&self.client_name).context("initialise midir for output")?;
        let ports = output.ports();
        let Some(port) = ports
            .iter()
            .find(|port| output.port_name(port).as_deref() == Ok(port_name))
        else {
            return Err(MidiError::UnknownPort(port_name.to_owned()).into());
        };
        let connection = output
            .connect(port, &format!("{}-out", self.client_name))
            .map_err(|err| anyhow::anyhow!("failed to open midi output: {err}"))?;
        info!(port = port_name, "connected midi output");
        Ok(MidiOutputHandle::new(port_name, connection))
    }
}

impl Default for MidirBackend {
    fn default() -> Self {
        Self::new("tabsynth-midi")
    }
}

impl DeviceBackend for MidirBackend {
    fn enumerate(&self) -> anyhow::Result<DeviceSnapshot> {
        let input = MidiInput::new(&self.client_name).context("initialise midir for enumeration")?;
        let mut inputs = Vec::new();
        for (index, port) in input.ports().into_iter().enumerate() {
            let name = input
                .port_name(&port)
                .unwrap_or_else(|_| format!("Input {index}"));
            inputs.push(name);
        }

        let output =
            MidiOutput::new(&self.client_name).context("initialise midir for enumeration")?;
        let mut outputs = Vec::new();
        for (index, port) in output.ports().into_iter().enumerate() {
            let name = output
                .port_name(&port)
                .unwrap_or_else(|_| format!("Output {index}"));
            outputs.push(name);
        }

        Ok(DeviceSnapshot { inputs, outputs })
    }
}
