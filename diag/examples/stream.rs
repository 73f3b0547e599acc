use std::time::Duration;

use diag::{backend::RxPath, DevId, DevPort, Diag, DiagOptions, LoopbackMode};
use diag_sim::SimSwitch;

const DEV: DevId = DevId(0);

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    let sim = SimSwitch::default();
    let mut diag = Diag::with_options(sim.clone(), DiagOptions::instant());
    diag.attach_device(DEV).unwrap();
    diag.attach_rx(RxPath::Dma, sim.rx_stream(RxPath::Dma)).unwrap();

    // One generator per port, running until stopped.
    let ports = vec![DevPort::new(0, 0), DevPort::new(1, 0)];
    let hdl = diag.stream_setup(DEV, ports, LoopbackMode::PcsNear, 10_000, true).await.unwrap();
    diag.start(hdl, 0, 1500, false).await.unwrap();

    for rate in [20_000, 50_000, 100_000] {
        tokio::time::sleep(Duration::from_millis(250)).await;
        diag.stream_adjust(hdl, rate).await.unwrap();
        let status = diag.status(hdl).await.unwrap();
        println!("rate {rate}: tx {} rx {}", status.tx_total, status.rx_good);
    }

    diag.stop(hdl).await.unwrap();
    let status = diag.cleanup(hdl).await.unwrap();
    println!("{status}");
}
