use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use telemetry_core::ScalarRing;

const PUSHES_PER_WRITER: u64 = 200_000;

fn bench_single_writer_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("scalar_ring_single_writer");
    group.throughput(Throughput::Elements(PUSHES_PER_WRITER));

    group.bench_function("push", |b| {
        b.iter(|| {
            let ring = ScalarRing::new(1024);
            for i in 0..PUSHES_PER_WRITER {
                ring.push(i as i64, black_box(i as f64));
            }
        });
    });

    group.finish();
}

fn bench_concurrent_writers(c: &mut Criterion) {
    let mut group = c.benchmark_group("scalar_ring_concurrent_writers");

    for writers in [2usize, 4, 8] {
        group.throughput(Throughput::Elements(PUSHES_PER_WRITER * writers as u64));
        group.bench_with_input(BenchmarkId::from_parameter(writers), &writers, |b, &writers| {
            b.iter(|| {
                let ring = Arc::new(ScalarRing::new(4096));
                let handles: Vec<_> = (0..writers)
                    .map(|w| {
                        let ring = Arc::clone(&ring);
                        thread::spawn(move || {
                            let base = (w as u64) * PUSHES_PER_WRITER;
                            for i in 0..PUSHES_PER_WRITER {
                                ring.push((base + i) as i64, (base + i) as f64);
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
                black_box(ring.count());
            });
        });
    }

    group.finish();
}

fn bench_reader_under_concurrent_write_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("scalar_ring_reader_contention");

    group.bench_function("snapshot_window_while_writer_runs", |b| {
        b.iter(|| {
            let ring = Arc::new(ScalarRing::new(1024));
            let stop = Arc::new(AtomicU64::new(0));

            let writer_ring = Arc::clone(&ring);
            let writer_stop = Arc::clone(&stop);
            let writer = thread::spawn(move || {
                let mut i: i64 = 0;
                while writer_stop.load(Ordering::Relaxed) == 0 {
                    writer_ring.push(i, i as f64);
                    i += 1;
                }
            });

            for _ in 0..1000 {
                black_box(ring.snapshot_window(64));
            }

            stop.store(1, Ordering::Relaxed);
            writer.join().unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_writer_push,
    bench_concurrent_writers,
    bench_reader_under_concurrent_write_load
);
criterion_main!(benches);
