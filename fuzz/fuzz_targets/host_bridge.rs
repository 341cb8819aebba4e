#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use tabsynth_midi::bridge::HostBridge;
use tabsynth_midi::{SessionConfig, SessionManager};

fuzz_target!(|data: &[u8]| {
    let session = SessionManager::new(SessionConfig {
        inbound_capacity: 16,
        outbound_capacity: 16,
        ..SessionConfig::default()
    })
    .expect("valid config");
    session.start();
    let bridge = HostBridge::new(Arc::new(session));

    for chunk in data.chunks(3) {
        let signed: Vec<i8> = chunk.iter().map(|&b| b as i8).collect();
        bridge.message_from_host(&signed).expect("session started");
        bridge.session().send_message(chunk).expect("session started");
    }
    let stats = bridge.session().stats().expect("session started");
    assert!(stats.inbound_pending <= 16 && stats.outbound_pending <= 16);
    let _ = bridge.messages_for_host();
});
