//! Delivery of outbound session messages to output ports.

use tracing::{trace, warn};

use crate::session::SessionManager;
use crate::{MidiError, MidiMessage};

/// Destination able to transmit raw MIDI bytes.
pub trait MidiSink {
    /// Port name used in logs.
    fn port_name(&self) -> &str;

    /// Transmit one message.
    fn send(&mut self, bytes: &[u8]) -> anyhow::Result<()>;
}

/// Outcome of pushing a batch of messages to a sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub failed: usize,
}

/// Send every message in order. A failed message is counted and skipped;
/// the rest of the batch is still attempted.
pub fn transmit<S: MidiSink + ?Sized>(sink: &mut S, messages: &[MidiMessage]) -> FlushReport {
    let mut report = FlushReport::default();
    for message in messages {
        match sink.send(message.bytes()) {
            Ok(()) => report.sent += 1,
            Err(err) => {
                trace!(port = sink.port_name(), ?err, "midi send failed");
                report.failed += 1;
            }
        }
    }
    if report.failed > 0 {
        warn!(
            port = sink.port_name(),
            sent = report.sent,
            failed = report.failed,
            "some midi messages could not be sent"
        );
    } else if report.sent > 0 {
        trace!(port = sink.port_name(), sent = report.sent, "flushed midi output");
    }
    report
}

/// Drain the session's outbound queue into `sink`.
pub fn flush<S: MidiSink + ?Sized>(
    sink: &mut S,
    session: &SessionManager,
) -> Result<FlushReport, MidiError> {
    let pending = session.drain_outbound()?;
    Ok(transmit(sink, &pending))
}

#[cfg(feature = "midir")]
pub use self::os::MidiOutputHandle;

#[cfg(feature = "midir")]
mod os {
    use std::sync::Arc;

    use midir::MidiOutputConnection;

    use super::{FlushReport, MidiSink};
    use crate::session::SessionManager;
    use crate::MidiError;

    /// Handle to an open OS output port.
    pub struct MidiOutputHandle {
        name: Arc<str>,
        connection: MidiOutputConnection,
    }

    impl MidiOutputHandle {
        /// Wrap an open connection.
        pub fn new(name: impl Into<Arc<str>>, connection: MidiOutputConnection) -> Self {
            Self {
                name: name.into(),
                connection,
            }
        }

        /// Name of the connected port.
        pub fn name(&self) -> &str {
            &self.name
        }

        /// Transmit every outbound message pending in the session.
        pub fn flush(&mut self, session: &SessionManager) -> Result<FlushReport, MidiError> {
            super::flush(self, session)
        }
    }

    impl MidiSink for MidiOutputHandle {
        fn port_name(&self) -> &str {
            &self.name
        }

        fn send(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
            self.connection
                .send(bytes)
                .map_err(|err| anyhow::anyhow!("failed to send MIDI message: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionConfig;

    /// Sink that rejects note-off messages.
    #[derive(Default)]
    struct PickySink {
        delivered: Vec<Vec<u8>>,
    }

    impl MidiSink for PickySink {
        fn port_name(&self) -> &str {
            "Picky Synth"
        }

        fn send(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
            if bytes[0] & 0xF0 == 0x80 {
                anyhow::bail!("port rejected note off");
            }
            self.delivered.push(bytes.to_vec());
            Ok(())
        }
    }

    fn started_session() -> SessionManager {
        let session = SessionManager::new(SessionConfig::default()).unwrap();
        session.start();
        session
    }

    #[test]
    fn failed_send_does_not_lose_the_rest_of_the_batch() {
        let session = started_session();
        session.send_message(&[0x90, 60, 100]).unwrap();
        session.send_message(&[0x80, 60, 0]).unwrap();
        session.send_message(&[0x90, 64, 100]).unwrap();

        let mut sink = PickySink::default();
        let report = flush(&mut sink, &session).unwrap();

        assert_eq!(report, FlushReport { sent: 2, failed: 1 });
        assert_eq!(sink.delivered, [vec![0x90, 60, 100], vec![0x90, 64, 100]]);
        assert!(session.drain_outbound().unwrap().is_empty());
    }

    #[test]
    fn flush_requires_a_started_session() {
        let session = SessionManager::default();
        let mut sink = PickySink::default();
        assert_eq!(flush(&mut sink, &session), Err(MidiError::NotStarted));
    }
}
