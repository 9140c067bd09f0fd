//! Codec benchmarks for beacon-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use beacon_protocol::{codec, ClientEvent, ServerEvent};
use serde_json::json;

fn bench_encode_signal(c: &mut Criterion) {
    let event = ClientEvent::Signal {
        to: "u2".into(),
        body: json!({"type": "offer", "sdp": "v=0\r\no=- 0 0 IN IP4 127.0.0.1"}),
    };

    let mut group = c.benchmark_group("encode");
    group.bench_function("signal", |b| b.iter(|| codec::encode(black_box(&event))));
    group.finish();
}

fn bench_decode_signal(c: &mut Criterion) {
    let event = ClientEvent::Signal {
        to: "u2".into(),
        body: json!({"type": "offer", "sdp": "v=0\r\no=- 0 0 IN IP4 127.0.0.1"}),
    };
    let encoded = codec::encode(&event).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("signal", |b| {
        b.iter(|| codec::decode::<ClientEvent>(black_box(&encoded)))
    });
    group.finish();
}

fn bench_roundtrip_user_list(c: &mut Criterion) {
    let event = ServerEvent::UserList {
        users: (0..32)
            .map(|i| beacon_protocol::UserSummary {
                id: format!("user_{i}"),
                name: format!("User {i}"),
                online: i % 2 == 0,
                last_seen: 1_700_000_000_000 + i,
            })
            .collect(),
    };

    c.bench_function("roundtrip_user_list_32", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&event)).unwrap();
            codec::decode::<ServerEvent>(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_signal,
    bench_decode_signal,
    bench_roundtrip_user_list
);
criterion_main!(benches);
