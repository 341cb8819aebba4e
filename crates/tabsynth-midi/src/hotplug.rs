use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::session::SessionManager;
use crate::MidiError;

/// Device names currently reported by a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Backend abstraction for platform specific device enumeration.
pub trait DeviceBackend: Send {
    /// Enumerate available input and output port names.
    fn enumerate(&self) -> anyhow::Result<DeviceSnapshot>;
}

impl<B: DeviceBackend + ?Sized> DeviceBackend for Box<B> {
    fn enumerate(&self) -> anyhow::Result<DeviceSnapshot> {
        (**self).enumerate()
    }
}

/// Snapshot last forwarded, tagged with the session generation it went to.
type AppliedSnapshot = (u64, DeviceSnapshot);

enum Signal {
    Poll,
    Stop,
}

/// Watcher that periodically queries a backend and forwards changed device
/// lists to the session.
pub struct HotplugWatcher {
    signal_tx: Sender<Signal>,
    thread: Option<thread::JoinHandle<()>>,
}

impl HotplugWatcher {
    /// Spawn a new watcher. The first poll happens immediately.
    pub fn spawn<B>(
        backend: B,
        session: Arc<SessionManager>,
        interval: Duration,
    ) -> anyhow::Result<Self>
    where
        B: DeviceBackend + 'static,
    {
        let (signal_tx, signal_rx) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name("tabsynth-midi-hotplug".into())
            .spawn(move || run(backend, session, interval, signal_rx))?;
        Ok(Self {
            signal_tx,
            thread: Some(handle),
        })
    }

    /// Ask the watcher thread to poll without waiting for the next tick.
    pub fn poll_now(&self) {
        let _ = self.signal_tx.send(Signal::Poll);
    }
}

impl Drop for HotplugWatcher {
    fn drop(&mut self) {
        let _ = self.signal_tx.send(Signal::Stop);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("midi hotplug thread panicked");
            }
        }
    }
}

fn run<B: DeviceBackend>(
    backend: B,
    session: Arc<SessionManager>,
    interval: Duration,
    signals: Receiver<Signal>,
) {
    let mut last: Option<AppliedSnapshot> = None;
    loop {
        poll_once(&backend, &session, &mut last);
        match signals.recv_timeout(interval) {
            Ok(Signal::Poll) | Err(RecvTimeoutError::Timeout) => continue,
            Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("midi hotplug watcher stopped");
}

fn poll_once<B: DeviceBackend>(
    backend: &B,
    session: &SessionManager,
    last: &mut Option<AppliedSnapshot>,
) {
    let snapshot = match backend.enumerate() {
        Ok(snapshot) => snapshot,
        Err(err) => {
            debug!(?err, "midi hotplug enumerate failed");
            return;
        }
    };
    // read before applying: a restart racing the scan forces a re-apply next tick
    let generation = session.generation();
    if let Some((applied_generation, applied)) = last.as_ref() {
        if *applied_generation == generation && *applied == snapshot {
            return;
        }
    }
    match session.on_devices_changed(&snapshot.inputs, &snapshot.outputs) {
        Ok(_) => *last = Some((generation, snapshot)),
        Err(MidiError::NotStarted) => debug!("midi session not started; will retry snapshot"),
        Err(err) => debug!(?err, "failed to apply midi device snapshot"),
    }
}
