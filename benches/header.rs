use criterion::{black_box, criterion_group, criterion_main, Criterion};
use connmux::core::{read_client_id, ClientId};
use std::time::Duration;

fn benchmark_header_encode(c: &mut Criterion) {
    let id = ClientId(0x0123_4567_89ab_cdef);

    c.bench_function("header_encode", |bench| {
        bench.iter(|| black_box(black_box(id).to_header()))
    });
}

fn benchmark_header_decode(c: &mut Criterion) {
    let header = ClientId(0x0123_4567_89ab_cdef).to_header();

    c.bench_function("header_decode", |bench| {
        bench.iter(|| black_box(ClientId::from_header(black_box(header))))
    });
}

fn benchmark_header_read(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let mut input = ClientId(7).to_header().to_vec();
    input.extend_from_slice(b"payload");

    c.bench_function("header_read_with_timeout", |bench| {
        bench.iter(|| {
            rt.block_on(async {
                let mut reader = input.as_slice();
                black_box(read_client_id(&mut reader, Duration::from_secs(1)).await)
            })
        })
    });
}

criterion_group!(
    benches,
    benchmark_header_encode,
    benchmark_header_decode,
    benchmark_header_read
);
criterion_main!(benches);
