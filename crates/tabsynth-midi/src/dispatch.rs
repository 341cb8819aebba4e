//! Routing of inbound MIDI to the synth engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use midly::live::LiveEvent;
use midly::MidiMessage as ChannelMessage;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, trace, warn};

use crate::session::SessionManager;
use crate::{MidiError, MidiMessage};

/// First controller of the knob bank (CC 70..=77).
const KNOB_CC_BASE: u8 = 70;
const KNOB_COUNT: u8 = 8;
/// Modulation wheel, drives the volume swell.
const VOLUME_SWELL_CC: u8 = 1;
const DISPATCH_IDLE_SLEEP: Duration = Duration::from_micros(500);

/// Engine action decoded from a MIDI message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEvent {
    NoteOn { key: u8, velocity: u8 },
    NoteOff { key: u8 },
    /// Pitch bend in `[-1, 1]`.
    Bend(f32),
    /// Pitch bend back inside the dead zone.
    Unbend,
    /// Knob `index` (0..8) set to `value` in `[0, 1]`.
    Knob { index: u8, value: f32 },
    /// Volume swell in `[0, 1]`.
    VolumeSwell(f32),
    Control { controller: u8, value: u8 },
}

#[derive(Debug, Error)]
#[error("undecodable MIDI message {bytes:02X?}: {reason}")]
pub struct DecodeError {
    pub bytes: Vec<u8>,
    pub reason: String,
}

/// Decode raw bytes into an engine action.
///
/// `Ok(None)` means the message is valid MIDI the engine does not handle
/// (system messages, aftertouch, program changes).
pub fn decode(bytes: &[u8], dead_zone: f32) -> Result<Option<EngineEvent>, DecodeError> {
    let event = LiveEvent::parse(bytes).map_err(|err| DecodeError {
        bytes: bytes.to_vec(),
        reason: err.to_string(),
    })?;
    let LiveEvent::Midi { message, .. } = event else {
        return Ok(None);
    };

    let decoded = match message {
        ChannelMessage::NoteOn { key, vel } if vel.as_int() > 0 => EngineEvent::NoteOn {
            key: key.as_int(),
            velocity: vel.as_int(),
        },
        ChannelMessage::NoteOn { key, .. } | ChannelMessage::NoteOff { key, .. } => {
            EngineEvent::NoteOff { key: key.as_int() }
        }
        ChannelMessage::PitchBend { bend } => {
            let amount = (f32::from(bend.as_int()) / 8192.0).clamp(-1.0, 1.0);
            if amount.abs() <= dead_zone {
                EngineEvent::Unbend
            } else {
                EngineEvent::Bend(amount)
            }
        }
        ChannelMessage::Controller { controller, value } => {
            let controller = controller.as_int();
            let value = value.as_int();
            let scaled = f32::from(value) / 127.0;
            match controller {
                VOLUME_SWELL_CC => EngineEvent::VolumeSwell(scaled),
                c if (KNOB_CC_BASE..KNOB_CC_BASE + KNOB_COUNT).contains(&c) => EngineEvent::Knob {
                    index: c - KNOB_CC_BASE,
                    value: scaled,
                },
                _ => EngineEvent::Control { controller, value },
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(decoded))
}

/// Sound engine driven by decoded MIDI.
pub trait SynthEngine: Send {
    fn play(&mut self, key: u8, velocity: u8);
    fn stop(&mut self, key: u8);
    fn bend(&mut self, amount: f32);
    fn unbend(&mut self);
    fn knob(&mut self, index: u8, value: f32);
    fn volume_swell(&mut self, value: f32);

    /// Controllers without a dedicated mapping.
    fn control(&mut self, _controller: u8, _value: u8) {}
}

/// Apply one decoded event to the engine.
pub fn route<E: SynthEngine + ?Sized>(event: EngineEvent, engine: &mut E) {
    match event {
        EngineEvent::NoteOn { key, velocity } => engine.play(key, velocity),
        EngineEvent::NoteOff { key } => engine.stop(key),
        EngineEvent::Bend(amount) => engine.bend(amount),
        EngineEvent::Unbend => engine.unbend(),
        EngineEvent::Knob { index, value } => engine.knob(index, value),
        EngineEvent::VolumeSwell(value) => engine.volume_swell(value),
        EngineEvent::Control { controller, value } => engine.control(controller, value),
    }
}

/// Decode and route a batch of messages. Returns how many reached the engine.
pub fn dispatch_batch<E: SynthEngine + ?Sized>(
    messages: &[MidiMessage],
    engine: &mut E,
    dead_zone: f32,
) -> usize {
    let mut routed = 0;
    for message in messages {
        match decode(message.bytes(), dead_zone) {
            Ok(Some(event)) => {
                trace!(?event, "routing midi to engine");
                route(event, engine);
                routed += 1;
            }
            Ok(None) => {}
            Err(err) => error!("{err}"),
        }
    }
    routed
}

/// Background thread feeding inbound session messages to an engine.
pub struct EngineDispatcher {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EngineDispatcher {
    /// Spawn the dispatcher. Pitch bend uses the session's configured dead zone.
    pub fn spawn<E>(session: Arc<SessionManager>, engine: Arc<Mutex<E>>) -> anyhow::Result<Self>
    where
        E: SynthEngine + 'static,
    {
        let dead_zone = session.config().pitch_bend_dead_zone;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("tabsynth-midi-dispatch".into())
            .spawn(move || {
                while !stop_flag.load(Ordering::Acquire) {
                    let batch = match session.drain_inbound() {
                        Ok(batch) => batch,
                        Err(MidiError::NotStarted) => Vec::new(),
                        Err(err) => {
                            warn!(?err, "midi dispatch drain failed");
                            Vec::new()
                        }
                    };
                    if batch.is_empty() {
                        thread::sleep(DISPATCH_IDLE_SLEEP);
                        continue;
                    }
                    let mut engine = engine.lock();
                    dispatch_batch(&batch, &mut *engine, dead_zone);
                }
                debug!("midi dispatcher stopped");
            })?;
        Ok(Self {
            stop,
            thread: Some(handle),
        })
    }

    /// Stop the thread and wait for it. Further calls do nothing.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("midi dispatcher thread panicked");
            }
        }
    }
}

impl Drop for EngineDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::SessionConfig;

    const DEAD_ZONE: f32 = 0.02;

    #[derive(Default)]
    struct RecordingEngine {
        log: Vec<String>,
    }

    impl SynthEngine for RecordingEngine {
        fn play(&mut self, key: u8, velocity: u8) {
            self.log.push(format!("play {key} {velocity}"));
        }
        fn stop(&mut self, key: u8) {
            self.log.push(format!("stop {key}"));
        }
        fn bend(&mut self, amount: f32) {
            self.log.push(format!("bend {amount:.2}"));
        }
        fn unbend(&mut self) {
            self.log.push("unbend".into());
        }
        fn knob(&mut self, index: u8, value: f32) {
            self.log.push(format!("knob {index} {value:.2}"));
        }
        fn volume_swell(&mut self, value: f32) {
            self.log.push(format!("swell {value:.2}"));
        }
    }

    #[test]
    fn notes_decode() {
        assert_eq!(
            decode(&[0x90, 60, 100], DEAD_ZONE).unwrap(),
            Some(EngineEvent::NoteOn { key: 60, velocity: 100 })
        );
        assert_eq!(
            decode(&[0x91, 60, 0], DEAD_ZONE).unwrap(),
            Some(EngineEvent::NoteOff { key: 60 })
        );
        assert_eq!(
            decode(&[0x80, 61, 64], DEAD_ZONE).unwrap(),
            Some(EngineEvent::NoteOff { key: 61 })
        );
    }

    #[test]
    fn pitch_bend_respects_dead_zone() {
        // centre is 0x2000: lsb 0x00, msb 0x40
        assert_eq!(decode(&[0xE0, 0x00, 0x40], DEAD_ZONE).unwrap(), Some(EngineEvent::Unbend));
        assert_eq!(decode(&[0xE0, 0x10, 0x40], DEAD_ZONE).unwrap(), Some(EngineEvent::Unbend));

        let Some(EngineEvent::Bend(up)) = decode(&[0xE0, 0x7F, 0x7F], DEAD_ZONE).unwrap() else {
            panic!("expected bend");
        };
        assert!(up > 0.99 && up <= 1.0);

        let Some(EngineEvent::Bend(down)) = decode(&[0xE0, 0x00, 0x00], DEAD_ZONE).unwrap() else {
            panic!("expected bend");
        };
        assert_eq!(down, -1.0);
    }

    #[test]
    fn controllers_map_to_knobs_and_swell() {
        assert_eq!(
            decode(&[0xB0, 70, 127], DEAD_ZONE).unwrap(),
            Some(EngineEvent::Knob { index: 0, value: 1.0 })
        );
        assert_eq!(
            decode(&[0xB0, 77, 0], DEAD_ZONE).unwrap(),
            Some(EngineEvent::Knob { index: 7, value: 0.0 })
        );
        assert_eq!(
            decode(&[0xB0, 1, 127], DEAD_ZONE).unwrap(),
            Some(EngineEvent::VolumeSwell(1.0))
        );
        assert_eq!(
            decode(&[0xB0, 78, 5], DEAD_ZONE).unwrap(),
            Some(EngineEvent::Control { controller: 78, value: 5 })
        );
    }

    #[test]
    fn unhandled_and_invalid_messages() {
        assert_eq!(decode(&[0xF8], DEAD_ZONE).unwrap(), None);
        assert_eq!(decode(&[0xC0, 5], DEAD_ZONE).unwrap(), None);
        assert!(decode(&[0x3C, 0x40], DEAD_ZONE).is_err());
        assert!(decode(&[], DEAD_ZONE).is_err());
    }

    #[test]
    fn batch_routes_in_order_and_skips_garbage() {
        use crate::{MessageDirection, MidiTimestamp};

        let messages: Vec<MidiMessage> = [
            vec![0x90, 60, 100],
            vec![0x12],
            vec![0xB0, 71, 127],
            vec![0xE0, 0x00, 0x40],
            vec![0x80, 60, 0],
        ]
        .into_iter()
        .map(|bytes| MidiMessage::new(bytes, MessageDirection::Inbound, MidiTimestamp::default()))
        .collect();

        let mut engine = RecordingEngine::default();
        assert_eq!(dispatch_batch(&messages, &mut engine, DEAD_ZONE), 4);
        assert_eq!(engine.log, ["play 60 100", "knob 1 1.00", "unbend", "stop 60"]);
    }

    #[test]
    fn dispatcher_feeds_the_engine() {
        let session = Arc::new(SessionManager::default());
        session.start();
        let engine = Arc::new(Mutex::new(RecordingEngine::default()));
        let mut dispatcher =
            EngineDispatcher::spawn(Arc::clone(&session), Arc::clone(&engine)).unwrap();

        session.push_inbound(&[0x90, 64, 90]).unwrap();
        session.push_inbound(&[0x80, 64, 0]).unwrap();

        wait_for_log(&engine, 2);
        dispatcher.stop();
        assert_eq!(engine.lock().log, ["play 64 90", "stop 64"]);
    }

    fn wait_for_log(engine: &Mutex<RecordingEngine>, len: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while engine.lock().log.len() < len && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn bend_through_dispatcher(dead_zone: f32) -> Vec<String> {
        let session = Arc::new(
            SessionManager::new(SessionConfig {
                pitch_bend_dead_zone: dead_zone,
                ..SessionConfig::default()
            })
            .unwrap(),
        );
        session.start();
        let engine = Arc::new(Mutex::new(RecordingEngine::default()));
        let mut dispatcher =
            EngineDispatcher::spawn(Arc::clone(&session), Arc::clone(&engine)).unwrap();

        // +0.125 of full range
        session.push_inbound(&[0xE0, 0x00, 0x48]).unwrap();
        wait_for_log(&engine, 1);
        dispatcher.stop();
        let log = engine.lock().log.clone();
        log
    }

    #[test]
    fn dispatcher_uses_configured_dead_zone() {
        let wide = bend_through_dispatcher(0.2);
        assert_eq!(wide, ["unbend"]);

        let narrow = bend_through_dispatcher(DEAD_ZONE);
        assert_eq!(narrow.len(), 1);
        assert!(narrow[0].starts_with("bend 0.1"), "{narrow:?}");
    }
}
