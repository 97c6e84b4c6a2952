use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use connmux::infrastructure::queue::unbounded;
use std::thread;

fn benchmark_send_try_recv(c: &mut Criterion) {
    let (tx, mut rx) = unbounded::<u64>();

    c.bench_function("queue_send_try_recv", |bench| {
        bench.iter(|| {
            tx.send(black_box(42)).ok();
            black_box(rx.try_recv())
        })
    });
}

fn benchmark_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_burst");

    for size in [16usize, 256, 4096] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bench, &size| {
            let (tx, mut rx) = unbounded::<u64>();
            bench.iter(|| {
                for i in 0..size as u64 {
                    tx.send(i).ok();
                }
                let mut sum = 0u64;
                while let Some(v) = rx.try_recv() {
                    sum += v;
                }
                black_box(sum)
            })
        });
    }

    group.finish();
}

fn benchmark_contended_producers(c: &mut Criterion) {
    const PER_PRODUCER: u64 = 1_000;
    const PRODUCERS: u64 = 4;

    let mut group = c.benchmark_group("queue_contended");
    group.throughput(Throughput::Elements(PER_PRODUCER * PRODUCERS));

    group.bench_function("4_producers", |bench| {
        bench.iter(|| {
            let (tx, mut rx) = unbounded::<u64>();
            let handles: Vec<_> = (0..PRODUCERS)
                .map(|_| {
                    let tx = tx.clone();
                    thread::spawn(move || {
                        for i in 0..PER_PRODUCER {
                            tx.send(i).ok();
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().ok();
            }
            black_box(rx.len());
            while rx.try_recv().is_some() {}
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_send_try_recv,
    benchmark_burst,
    benchmark_contended_producers
);
criterion_main!(benches);
