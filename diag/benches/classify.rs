use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pprof::criterion::{Output, PProfProfiler};
use rand::Rng;

use diag::{classify, DEFAULT_HEADER_LEN};

const PKT_SIZES: [usize; 4] = [80, 256, 1500, 9216];

fn packets(size: usize, flips: usize) -> (Vec<u8>, Vec<u8>) {
    let mut rng = rand::thread_rng();
    let mut expected = vec![0u8; size];
    rng.fill(&mut expected[..]);

    let mut received = expected.clone();
    for _ in 0..flips {
        let byte = rng.gen_range(DEFAULT_HEADER_LEN..size);
        received[byte] ^= 1 << rng.gen_range(0..8);
    }

    (expected, received)
}

fn classify_clean(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify_clean");
    for size in PKT_SIZES {
        let (expected, received) = packets(size, 0);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| classify(black_box(&expected), black_box(&received), DEFAULT_HEADER_LEN));
        });
    }
    group.finish();
}

fn classify_flipped(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify_flipped");
    for size in PKT_SIZES {
        let (expected, received) = packets(size, 8);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| classify(black_box(&expected), black_box(&received), DEFAULT_HEADER_LEN));
        });
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().with_profiler(PProfProfiler::new(100, Output::Flamegraph(None)));
    targets = classify_clean, classify_flipped
}

criterion_main!(benches);
