use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::MidiError;

const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Session settings stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Client name announced to OS MIDI backends.
    pub client_name: String,
    /// Inbound queue size, in messages.
    pub inbound_capacity: usize,
    /// Outbound queue size, in messages.
    pub outbound_capacity: usize,
    /// Delay between two hotplug polls.
    pub hotplug_interval_ms: u64,
    /// Pitch bend magnitude (0..1) below which the engine is told to unbend.
    pub pitch_bend_dead_zone: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_name: "tabsynth-midi".into(),
            inbound_capacity: DEFAULT_QUEUE_CAPACITY,
            outbound_capacity: DEFAULT_QUEUE_CAPACITY,
            hotplug_interval_ms: 1000,
            pitch_bend_dead_zone: 0.02,
        }
    }
}

impl SessionConfig {
    /// Reject settings the session cannot run with.
    pub fn validate(&self) -> Result<(), MidiError> {
        if self.client_name.trim().is_empty() {
            return Err(MidiError::InvalidConfig("client_name is empty".into()));
        }
        if self.inbound_capacity == 0 || self.outbound_capacity == 0 {
            return Err(MidiError::InvalidConfig(
                "queue capacities must be at least 1".into(),
            ));
        }
        if self.hotplug_interval_ms == 0 {
            return Err(MidiError::InvalidConfig(
                "hotplug_interval_ms must be at least 1".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.pitch_bend_dead_zone) {
            return Err(MidiError::InvalidConfig(format!(
                "pitch_bend_dead_zone {} outside [0, 1)",
                self.pitch_bend_dead_zone
            )));
        }
        Ok(())
    }

    /// Device polling period.
    pub fn hotplug_interval(&self) -> Duration {
        Duration::from_millis(self.hotplug_interval_ms)
    }
}

/// Default location of the settings file, creating the parent directory if needed.
pub fn settings_path() -> Option<PathBuf> {
    let mut base = dirs::config_dir()?;
    base.push("TabSynth");
    if !base.exists() {
        let _ = fs::create_dir_all(&base);
    }
    base.push("midi.json");
    Some(base)
}

/// Load settings from the default location. Returns defaults if loading fails.
pub fn load() -> SessionConfig {
    let Some(path) = settings_path() else {
        return SessionConfig::default();
    };
    if !path.exists() {
        return SessionConfig::default();
    }
    match load_from(&path) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(?err, path = %path.display(), "failed to load midi settings; using defaults");
            SessionConfig::default()
        }
    }
}

/// Save settings to the default location.
pub fn save(config: &SessionConfig) {
    let Some(path) = settings_path() else {
        return;
    };
    if let Err(err) = save_to(&path, config) {
        tracing::warn!(?err, "failed to write midi settings");
    }
}

/// Load and validate settings from an explicit path.
pub fn load_from(path: &Path) -> anyhow::Result<SessionConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: SessionConfig = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a valid midi settings file", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Write settings as pretty JSON, creating parent directories.
pub fn save_to(path: &Path, config: &SessionConfig) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(config).context("failed to serialise midi settings")?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SessionConfig::default().validate().unwrap();
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{ "inbound_capacity": 64 }"#).unwrap();
        assert_eq!(config.inbound_capacity, 64);
        assert_eq!(config.outbound_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.client_name, "tabsynth-midi");
    }

    #[test]
    fn rejects_bad_values() {
        let zero = SessionConfig {
            outbound_capacity: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(zero.validate(), Err(MidiError::InvalidConfig(_))));

        let dead_zone = SessionConfig {
            pitch_bend_dead_zone: 1.5,
            ..SessionConfig::default()
        };
        assert!(dead_zone.validate().is_err());

        let unnamed = SessionConfig {
            client_name: "  ".into(),
            ..SessionConfig::default()
        };
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn save_then_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TabSynth").join("midi.json");
        let config = SessionConfig {
            client_name: "stage-rig".into(),
            hotplug_interval_ms: 250,
            ..SessionConfig::default()
        };
        save_to(&path, &config).unwrap();
        assert_eq!(load_from(&path).unwrap(), config);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("midi.json");
        fs::write(&path, r#"{ "inbound_capacity": 0 }"#).unwrap();
        assert!(load_from(&path).is_err());
        fs::write(&path, "not json").unwrap();
        assert!(load_from(&path).is_err());
    }
}
