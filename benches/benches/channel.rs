use std::time::Duration;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use tabsynth_midi::{MessageChannel, SessionManager};

fn channel_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("push_drain_256_note_pairs", |b| {
        let channel = MessageChannel::new(1024, 1024);
        b.iter(|| {
            for key in 0..128u8 {
                channel.push_inbound(&[0x90, key, 100]);
                channel.push_inbound(&[0x80, key, 0]);
            }
            channel.drain_inbound().count()
        });
    });

    group.bench_function("push_overflowing_ring", |b| {
        b.iter_batched(
            || MessageChannel::new(64, 64),
            |channel| {
                for value in 0..1024u32 {
                    channel.push_outbound(&[0xB0, 7, (value % 128) as u8]);
                }
                channel.stats().outbound_dropped
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("session_send_receive", |b| {
        let session = SessionManager::default();
        session.start();
        b.iter(|| {
            session.push_inbound(&[0x90, 60, 100]).expect("started");
            session.receive_message().expect("started")
        });
    });

    group.finish();
}

criterion_group!(benches, channel_throughput);
criterion_main!(benches);
