#[cfg(feature = "midir")]
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tabsynth_midi::config::{self, SessionConfig};
use tabsynth_midi::{
    DeviceBackend, DeviceRecord, HotplugWatcher, ScanResult, SessionManager, VirtualBackend,
};
#[cfg(feature = "midir")]
use tabsynth_midi::backend_midir::{MidiInputHandle, MidirBackend};
#[cfg(feature = "midir")]
use tabsynth_midi::output::MidiOutputHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const MONITOR_POLL: Duration = Duration::from_millis(5);
const DEMO_NOTE_INTERVAL: Duration = Duration::from_millis(500);
/// C major arpeggio played on the virtual loopback.
const DEMO_ARPEGGIO: [u8; 4] = [60, 64, 67, 72];

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    match cli.command {
        Commands::Config(args) => execute_config(args),
        Commands::Devices(args) => execute_devices(args),
        Commands::Monitor(args) => execute_monitor(args),
    }
}

#[derive(Parser)]
#[command(author, version, about = "MIDI session tools for TabSynth")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective MIDI settings, or write the defaults.
    Config(ConfigArgs),
    /// List the MIDI devices currently reported by the backend.
    Devices(BackendArgs),
    /// Start a session and print device changes and incoming messages.
    Monitor(MonitorArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// Settings file to use instead of the per-user default.
    #[arg(long)]
    path: Option<PathBuf>,
    /// Write the default settings to the settings file.
    #[arg(long)]
    init: bool,
}

#[derive(Args)]
struct BackendArgs {
    /// Use in-memory demo devices instead of OS MIDI ports.
    #[arg(long = "virtual")]
    use_virtual: bool,
    /// Settings file to use instead of the per-user default.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct MonitorArgs {
    #[command(flatten)]
    backend: BackendArgs,
    /// Stop after this many seconds (runs until interrupted otherwise).
    #[arg(long)]
    seconds: Option<u64>,
    /// Forward every incoming message to this output port.
    #[arg(long, value_name = "PORT")]
    thru: Option<String>,
}

fn load_config(path: Option<&PathBuf>) -> Result<SessionConfig> {
    match path {
        Some(path) => config::load_from(path),
        None => Ok(config::load()),
    }
}

fn execute_config(args: ConfigArgs) -> Result<()> {
    if args.init {
        let defaults = SessionConfig::default();
        let path = match args.path {
            Some(path) => path,
            None => config::settings_path().context("no per-user config directory available")?,
        };
        config::save_to(&path, &defaults)?;
        println!("Wrote default MIDI settings to {}", path.display());
        return Ok(());
    }

    let config = load_config(args.path.as_ref())?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn select_backend(args: &BackendArgs, config: &SessionConfig) -> Box<dyn DeviceBackend> {
    if args.use_virtual {
        return Box::new(demo_backend());
    }
    os_backend(config)
}

#[cfg(feature = "midir")]
fn os_backend(config: &SessionConfig) -> Box<dyn DeviceBackend> {
    Box::new(MidirBackend::new(config.client_name.clone()))
}

#[cfg(not(feature = "midir"))]
fn os_backend(_config: &SessionConfig) -> Box<dyn DeviceBackend> {
    warn!("built without the `midir` feature; using virtual devices");
    Box::new(demo_backend())
}

fn demo_backend() -> VirtualBackend {
    VirtualBackend::with_devices(["Virtual Keyboard"], ["Virtual Synth"])
}

fn print_devices(label: &str, devices: &[DeviceRecord]) {
    if devices.is_empty() {
        println!("No MIDI {label} detected.");
        return;
    }
    println!("MIDI {label}:");
    for device in devices {
        println!("  - {} ({})", device.name, device.id);
    }
}

fn execute_devices(args: BackendArgs) -> Result<()> {
    let config = load_config(args.config.as_ref())?;
    let backend = select_backend(&args, &config);
    let snapshot = backend.enumerate().context("failed to enumerate MIDI devices")?;

    let session = SessionManager::new(config)?;
    session.start();
    let scan = session.on_devices_changed(&snapshot.inputs, &snapshot.outputs)?;
    print_devices("inputs", &scan.inputs);
    print_devices("outputs", &scan.outputs);
    session.stop();
    Ok(())
}

/// Demo traffic for virtual devices: an arpeggio sent out and looped back in.
struct DemoPorts {
    backend: VirtualBackend,
    next_note: Instant,
    step: usize,
}

impl DemoPorts {
    fn pump(&mut self, session: &SessionManager) -> Result<()> {
        if Instant::now() >= self.next_note {
            let len = DEMO_ARPEGGIO.len();
            let key = DEMO_ARPEGGIO[self.step % len];
            let previous = DEMO_ARPEGGIO[(self.step + len - 1) % len];
            session.send_message(&[0x80, previous, 0])?;
            session.send_message(&[0x90, key, 100])?;
            self.step += 1;
            self.next_note = Instant::now() + DEMO_NOTE_INTERVAL;
        }
        self.backend.loopback(session)?;
        Ok(())
    }
}

/// OS ports opened as the hotplug watcher reports them.
#[cfg(feature = "midir")]
struct OsPorts {
    backend: MidirBackend,
    inputs: HashMap<String, MidiInputHandle>,
    thru_port: Option<String>,
    thru: Option<MidiOutputHandle>,
}

#[cfg(feature = "midir")]
impl OsPorts {
    fn apply(&mut self, scan: &ScanResult, session: &Arc<SessionManager>) {
        self.inputs
            .retain(|name, _| scan.inputs.iter().any(|record| &record.name == name));
        for record in &scan.inputs {
            if self.inputs.contains_key(&record.name) {
                continue;
            }
            match self.backend.connect_input(&record.name, Arc::clone(session)) {
                Ok(connection) => {
                    self.inputs.insert(record.name.clone(), connection);
                }
                Err(err) => warn!(port = %record.name, ?err, "could not open midi input"),
            }
        }

        let Some(port) = self.thru_port.as_deref() else {
            return;
        };
        let present = scan.outputs.iter().any(|record| record.name == port);
        if !present {
            self.thru = None;
        } else if self.thru.is_none() {
            match self.backend.open_output(port) {
                Ok(handle) => self.thru = Some(handle),
                Err(err) => warn!(port, ?err, "could not open midi thru port"),
            }
        }
    }

    fn pump(&mut self, session: &SessionManager) -> Result<()> {
        match self.thru.as_mut() {
            Some(thru) => {
                thru.flush(session)?;
            }
            // nowhere to send; keep the outbound ring from filling up
            None => {
                session.drain_outbound()?;
            }
        }
        Ok(())
    }
}

enum MonitorPorts {
    Demo(DemoPorts),
    #[cfg(feature = "midir")]
    Os(OsPorts),
}

impl MonitorPorts {
    fn open(args: &MonitorArgs, config: &SessionConfig) -> Self {
        if args.backend.use_virtual {
            return Self::demo();
        }
        os_ports(args, config)
    }

    fn demo() -> Self {
        Self::Demo(DemoPorts {
            backend: demo_backend(),
            next_note: Instant::now(),
            step: 0,
        })
    }

    fn device_backend(&self) -> Box<dyn DeviceBackend> {
        match self {
            Self::Demo(demo) => Box::new(demo.backend.clone()),
            #[cfg(feature = "midir")]
            Self::Os(os) => Box::new(os.backend.clone()),
        }
    }

    fn forwards_thru(&self) -> bool {
        match self {
            Self::Demo(_) => false,
            #[cfg(feature = "midir")]
            Self::Os(os) => os.thru_port.is_some(),
        }
    }

    #[cfg_attr(not(feature = "midir"), allow(unused_variables))]
    fn apply(&mut self, scan: &ScanResult, session: &Arc<SessionManager>) {
        match self {
            // virtual ports need no connection
            Self::Demo(_) => {}
            #[cfg(feature = "midir")]
            Self::Os(os) => os.apply(scan, session),
        }
    }

    fn pump(&mut self, session: &SessionManager) -> Result<()> {
        match self {
            Self::Demo(demo) => demo.pump(session),
            #[cfg(feature = "midir")]
            Self::Os(os) => os.pump(session),
        }
    }
}

#[cfg(feature = "midir")]
fn os_ports(args: &MonitorArgs, config: &SessionConfig) -> MonitorPorts {
    MonitorPorts::Os(OsPorts {
        backend: MidirBackend::new(config.client_name.clone()),
        inputs: HashMap::new(),
        thru_port: args.thru.clone(),
        thru: None,
    })
}

#[cfg(not(feature = "midir"))]
fn os_ports(args: &MonitorArgs, _config: &SessionConfig) -> MonitorPorts {
    warn!("built without the `midir` feature; monitoring virtual devices");
    if args.thru.is_some() {
        warn!("--thru needs OS MIDI ports and is ignored");
    }
    MonitorPorts::demo()
}

fn execute_monitor(args: MonitorArgs) -> Result<()> {
    let config = load_config(args.backend.config.as_ref())?;
    let interval = config.hotplug_interval();
    let mut ports = MonitorPorts::open(&args, &config);
    let backend = ports.device_backend();

    let session = Arc::new(SessionManager::new(config)?);
    let (scan_tx, scan_rx) = crossbeam_channel::unbounded::<ScanResult>();
    session.subscribe(move |scan: &ScanResult| {
        println!(
            "devices changed: +{} -{}",
            scan.added.len(),
            scan.removed.len()
        );
        print_devices("inputs", &scan.inputs);
        print_devices("outputs", &scan.outputs);
        // ports are opened on the monitor thread, which owns the connections
        let _ = scan_tx.send(scan.clone());
    });
    session.start();

    let _watcher = HotplugWatcher::spawn(backend, Arc::clone(&session), interval)?;
    info!("monitoring MIDI; press Ctrl+C to stop");

    let deadline = args
        .seconds
        .map(|seconds| Instant::now() + Duration::from_secs(seconds));
    while deadline.map_or(true, |deadline| Instant::now() < deadline) {
        for scan in scan_rx.try_iter() {
            ports.apply(&scan, &session);
        }
        ports.pump(&session)?;

        let mut idle = true;
        while let Some(message) = session.receive_message()? {
            idle = false;
            let hex: Vec<String> = message.bytes().iter().map(|b| format!("{b:02X}")).collect();
            println!(
                "{:>12.6}s  {}",
                message.timestamp().as_duration().as_secs_f64(),
                hex.join(" ")
            );
            if ports.forwards_thru() {
                session.send_message(message.bytes())?;
            }
        }
        if idle {
            thread::sleep(MONITOR_POLL);
        }
    }

    let stats = session.stats()?;
    if stats.inbound_dropped > 0 {
        warn!(dropped = stats.inbound_dropped, "inbound messages were dropped");
    }
    session.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_monitor_receives_looped_back_notes() {
        let session = Arc::new(SessionManager::default());
        session.start();
        let mut ports = MonitorPorts::demo();
        assert!(!ports.forwards_thru());

        ports.pump(&session).unwrap();
        let received: Vec<Vec<u8>> = session
            .drain_inbound()
            .unwrap()
            .into_iter()
            .map(|message| message.into_bytes())
            .collect();
        assert_eq!(received, [vec![0x80, 72, 0], vec![0x90, 60, 100]]);
        assert!(session.drain_outbound().unwrap().is_empty());
    }

    #[test]
    fn virtual_monitor_backend_reports_demo_devices() {
        let ports = MonitorPorts::demo();
        let snapshot = ports.device_backend().enumerate().unwrap();
        assert_eq!(snapshot.inputs, ["Virtual Keyboard"]);
        assert_eq!(snapshot.outputs, ["Virtual Synth"]);
    }
}
