use std::time::Duration;

use diag_engine::{DevId, DevPort, Diag, DiagOptions, SessHdl, TestStatus};
use diag_backend::RxPath;
use diag_sim::{SimConfig, SimSwitch};

mod config;
mod loopback;
mod multicast;
mod pair;
mod sessions;
mod snake;
mod stream;

pub(crate) const DEV: DevId = DevId(0);

/// Front-panel port `local` on `pipe`.
pub(crate) const fn port(pipe: u16, local: u16) -> DevPort {
    DevPort::new(pipe, local)
}

pub(crate) fn engine() -> (Diag<SimSwitch>, SimSwitch) {
    engine_with(SimConfig::default(), DiagOptions::instant())
}

pub(crate) fn engine_with(config: SimConfig, options: DiagOptions) -> (Diag<SimSwitch>, SimSwitch) {
    let _ = tracing_subscriber::fmt::try_init();

    let sim = SimSwitch::new(config);
    let mut diag = Diag::with_options(sim.clone(), options);
    for dev in sim.config().devices.clone() {
        diag.attach_device(dev).unwrap();
    }
    diag.attach_rx(RxPath::Dma, sim.rx_stream(RxPath::Dma)).unwrap();

    (diag, sim)
}

/// Waits until the engine has processed every packet the switch punted, then returns the
/// session status.
pub(crate) async fn wait_status(diag: &Diag<SimSwitch>, sim: &SimSwitch, hdl: SessHdl) -> TestStatus {
    for _ in 0..400 {
        if diag.rx_stats().packets(RxPath::Dma) as u64 >= sim.counters().punted {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    diag.status(hdl).await.unwrap()
}
