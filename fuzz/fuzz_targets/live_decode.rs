#![no_main]

use libfuzzer_sys::fuzz_target;
use tabsynth_midi::dispatch::{decode, EngineEvent};

fuzz_target!(|data: &[u8]| {
    if let Ok(Some(event)) = decode(data, 0.02) {
        match event {
            EngineEvent::Bend(amount) => assert!((-1.0..=1.0).contains(&amount)),
            EngineEvent::Knob { index, value } => {
                assert!(index < 8);
                assert!((0.0..=1.0).contains(&value));
            }
            EngineEvent::VolumeSwell(value) => assert!((0.0..=1.0).contains(&value)),
            _ => {}
        }
    }
});
