use criterion::{Criterion, criterion_group, criterion_main};

use streamtally::{Record, protocol};

fn bench_codec(c: &mut Criterion) {
    let record = Record::new("sensor-1", 1_722_000_000_000, vec![0xAB; 256]);
    let mut framed = Vec::new();
    protocol::encode_frame(&record, &mut framed).expect("encode");
    let body = framed[protocol::FRAME_HEADER_BYTES..].to_vec();

    let mut group = c.benchmark_group("record_codec");
    group.bench_function("encode", |b| {
        let mut buf = Vec::with_capacity(framed.len());
        b.iter(|| {
            buf.clear();
            protocol::encode_frame(&record, &mut buf).expect("encode")
        })
    });
    group.bench_function("decode", |b| {
        b.iter(|| protocol::decode_frame(&body).expect("decode"))
    });
    group.finish();
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
