//! MIDI session core for TabSynth.
//!
//! The crate sits between platform MIDI callbacks (hotplug notifications and
//! raw message delivery) and the synth engine. It tracks the devices the
//! platform reports, queues raw MIDI bytes in bounded drop-oldest rings and
//! exposes a single [`SessionManager`] surface to the UI and the engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod bridge;
pub mod channel;
pub mod clock;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod hotplug;
pub mod output;
pub mod session;
pub mod virtual_backend;

#[cfg(feature = "midir")]
pub mod backend_midir;

pub use channel::{ChannelStats, MessageChannel};
pub use clock::{MidiClock, MidiTimestamp};
pub use config::SessionConfig;
pub use device::{DeviceDirection, DeviceId, DeviceRecord, DeviceRegistry, Presence, ScanResult};
pub use hotplug::{DeviceBackend, DeviceSnapshot, HotplugWatcher};
pub use output::{FlushReport, MidiSink};
pub use session::{DeviceObserver, ObserverId, SessionManager, SessionState};
pub use virtual_backend::VirtualBackend;

/// Errors that can be produced by the session core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MidiError {
    /// The session has not been started (or has been stopped).
    #[error("MIDI session not started")]
    NotStarted,
    /// The configuration failed validation.
    #[error("invalid MIDI configuration: {0}")]
    InvalidConfig(String),
    /// The requested port could not be found.
    #[error("unknown MIDI port: {0}")]
    UnknownPort(String),
    /// Backend specific failure with additional context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Direction of a message relative to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageDirection {
    /// Received from a device.
    Inbound,
    /// Sent to a device.
    Outbound,
}

/// Raw MIDI message travelling through the session.
///
/// The bytes are opaque wire bytes and are never inspected by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiMessage {
    bytes: Vec<u8>,
    direction: MessageDirection,
    timestamp: MidiTimestamp,
}

impl MidiMessage {
    /// Creates a message from the given bytes.
    pub fn new(
        bytes: impl Into<Vec<u8>>,
        direction: MessageDirection,
        timestamp: MidiTimestamp,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            direction,
            timestamp,
        }
    }

    /// Raw MIDI bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether the message came from a device or is headed to one.
    pub fn direction(&self) -> MessageDirection {
        self.direction
    }

    /// Tick at which the message entered the channel.
    pub fn timestamp(&self) -> MidiTimestamp {
        self.timestamp
    }

    /// Consumes the message and returns its payload.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
