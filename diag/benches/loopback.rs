use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pprof::criterion::{Output, PProfProfiler};
use tokio::runtime::Runtime;

use diag::{backend::RxPath, DevId, DevPort, Diag, DiagOptions, LoopbackMode};
use diag_sim::SimSwitch;

const DEV: DevId = DevId(0);
const N_PKTS: u64 = 1_000;
const PKT_SIZES: [usize; 3] = [80, 512, 1500];

/// Round trip of CPU-injected packets through a simulated 8-port loopback, including
/// classification of every received packet.
fn loopback_round_trip(c: &mut Criterion) {
    let _ = tracing_subscriber::fmt::try_init();

    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap();
    let sim = SimSwitch::default();
    let mut diag = Diag::with_options(sim.clone(), DiagOptions::instant());
    let ports: Vec<_> = (0..8).map(|i| DevPort::new(0, i)).collect();

    let hdl = rt.block_on(async {
        diag.attach_device(DEV).unwrap();
        diag.attach_rx(RxPath::Dma, sim.rx_stream(RxPath::Dma)).unwrap();
        diag.loopback_setup(DEV, ports.clone(), LoopbackMode::MacNear).await.unwrap()
    });

    let mut group = c.benchmark_group("loopback");
    group.sample_size(10);
    for size in PKT_SIZES {
        group.throughput(Throughput::Elements(N_PKTS * ports.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, size| {
            b.iter(|| run(&rt, &mut diag, &sim, hdl, *size));
        });
    }
    group.finish();

    rt.block_on(async {
        diag.cleanup(hdl).await.unwrap();
    });
}

fn run(rt: &Runtime, diag: &mut Diag<SimSwitch>, sim: &SimSwitch, hdl: diag::SessHdl, size: usize) {
    rt.block_on(async {
        diag.start(hdl, N_PKTS, size, false).await.unwrap();
        diag.stop(hdl).await.unwrap();
        while (diag.rx_stats().packets(RxPath::Dma) as u64) < sim.counters().punted {
            tokio::task::yield_now().await;
        }
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().with_profiler(PProfProfiler::new(100, Output::Flamegraph(None)));
    targets = loopback_round_trip
}

criterion_main!(benches);
