use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, trace};

use crate::channel::{ChannelStats, MessageChannel};
use crate::clock::MidiClock;
use crate::config::SessionConfig;
use crate::device::{DeviceDirection, DeviceRecord, DeviceRegistry, ScanResult};
use crate::{MidiError, MidiMessage};

/// Lifecycle state of a [`SessionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Active,
}

/// Receives device list change notifications.
///
/// Closures taking a `&ScanResult` implement this trait.
pub trait DeviceObserver: Send + Sync {
    fn on_devices_changed(&self, scan: &ScanResult);
}

impl<F> DeviceObserver for F
where
    F: Fn(&ScanResult) + Send + Sync,
{
    fn on_devices_changed(&self, scan: &ScanResult) {
        self(scan)
    }
}

/// Handle returned by [`SessionManager::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// State allocated by `start()` and released by `stop()`.
struct ActiveSession {
    registry: RwLock<DeviceRegistry>,
    channel: MessageChannel,
}

/// Entry point shared by the platform layer, the UI and the engine.
///
/// Every method takes `&self`; wrap the manager in an `Arc` to share it
/// between the hotplug thread, the engine thread and senders.
pub struct SessionManager {
    config: SessionConfig,
    active: RwLock<Option<Arc<ActiveSession>>>,
    observers: RwLock<Vec<(ObserverId, Arc<dyn DeviceObserver>)>>,
    next_observer: AtomicU64,
    generation: AtomicU64,
}

impl SessionManager {
    /// Create an uninitialised manager after validating `config`.
    pub fn new(config: SessionConfig) -> Result<Self, MidiError> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: SessionConfig) -> Self {
        Self {
            config,
            active: RwLock::new(None),
            observers: RwLock::new(Vec::new()),
            next_observer: AtomicU64::new(1),
            generation: AtomicU64::new(0),
        }
    }

    /// Settings the manager was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        if self.active.read().is_some() {
            SessionState::Active
        } else {
            SessionState::Uninitialized
        }
    }

    /// Shorthand for `state() == SessionState::Active`.
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Number of times the session has gone Uninitialized -> Active.
    ///
    /// A change means the device list was reset and must be reported again.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Uninitialized -> Active. Starting an active session does nothing.
    pub fn start(&self) {
        if MidiClock::init_process_epoch() {
            debug!("midi clock epoch captured");
        }

        let mut active = self.active.write();
        if active.is_some() {
            debug!("midi session already active");
            return;
        }
        *active = Some(Arc::new(ActiveSession {
            registry: RwLock::new(DeviceRegistry::new()),
            channel: MessageChannel::new(
                self.config.inbound_capacity,
                self.config.outbound_capacity,
            ),
        }));
        self.generation.fetch_add(1, Ordering::AcqRel);
        info!(
            inbound_capacity = self.config.inbound_capacity,
            outbound_capacity = self.config.outbound_capacity,
            "midi session started"
        );
    }

    /// Active -> Uninitialized. Pending messages and known devices are discarded.
    ///
    /// Calls racing with `stop()` finish against the detached session.
    pub fn stop(&self) {
        let Some(session) = self.active.write().take() else {
            debug!("midi session already stopped");
            return;
        };
        let stats = session.channel.stats();
        session.channel.clear();
        session.registry.write().clear();
        info!(
            discarded_inbound = stats.inbound_pending,
            discarded_outbound = stats.outbound_pending,
            "midi session stopped"
        );
    }

    /// Reconcile a platform device report and notify observers.
    pub fn on_devices_changed<I, O>(&self, inputs: I, outputs: O) -> Result<ScanResult, MidiError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        O: IntoIterator,
        O::Item: AsRef<str>,
    {
        let session = self.session()?;
        let result = session.registry.write().scan(inputs, outputs);
        info!(
            inputs = result.inputs.len(),
            outputs = result.outputs.len(),
            added = result.added.len(),
            removed = result.removed.len(),
            "midi device list changed"
        );
        self.notify(&result);
        Ok(result)
    }

    /// Queue bytes for transmission to a device.
    pub fn send_message(&self, bytes: &[u8]) -> Result<(), MidiError> {
        let session = self.session()?;
        session.channel.push_outbound(bytes);
        trace!(len = bytes.len(), "midi message queued for output");
        Ok(())
    }

    /// Queue bytes received from a device. Meant for OS callback threads.
    pub fn push_inbound(&self, bytes: &[u8]) -> Result<(), MidiError> {
        let session = self.session()?;
        session.channel.push_inbound(bytes);
        Ok(())
    }

    /// Next inbound message, if any.
    pub fn receive_message(&self) -> Result<Option<MidiMessage>, MidiError> {
        Ok(self.session()?.channel.pop_inbound())
    }

    /// Every inbound message pending right now, oldest first.
    pub fn drain_inbound(&self) -> Result<Vec<MidiMessage>, MidiError> {
        Ok(self.session()?.channel.drain_inbound().collect())
    }

    /// Every outbound message pending right now, oldest first.
    pub fn drain_outbound(&self) -> Result<Vec<MidiMessage>, MidiError> {
        Ok(self.session()?.channel.drain_outbound().collect())
    }

    /// Snapshot of present devices matching `direction`.
    pub fn list_devices(&self, direction: DeviceDirection) -> Result<Vec<DeviceRecord>, MidiError> {
        Ok(self.session()?.registry.read().list(direction))
    }

    /// Queue depths and overflow counters of the active session.
    pub fn stats(&self) -> Result<ChannelStats, MidiError> {
        Ok(self.session()?.channel.stats())
    }

    /// Register an observer for device list changes. Observers outlive stop/start.
    pub fn subscribe(&self, observer: impl DeviceObserver + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer. Returns `false` when the id was unknown.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(candidate, _)| *candidate != id);
        observers.len() != before
    }

    fn session(&self) -> Result<Arc<ActiveSession>, MidiError> {
        self.active.read().clone().ok_or(MidiError::NotStarted)
    }

    fn notify(&self, result: &ScanResult) {
        // observers may call back into the manager, so no lock is held while notifying
        let observers: Vec<_> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            observer.on_devices_changed(result);
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::from_valid_config(SessionConfig::default())
    }
}
