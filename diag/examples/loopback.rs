use std::time::Duration;

use diag::{backend::RxPath, DevId, DevPort, Diag, DiagOptions, LoopbackMode};
use diag_sim::{Impairment, SimSwitch};

const DEV: DevId = DevId(0);

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    // A simulated switch where one port flips a payload bit on every packet.
    let sim = SimSwitch::default();
    sim.set_impairment(DEV, DevPort::new(1, 2), Impairment::new().flip_bit(100 * 8 + 3));

    let options = DiagOptions::default().settle(Duration::from_millis(100));
    let mut diag = Diag::with_options(sim.clone(), options);
    diag.attach_device(DEV).unwrap();
    diag.attach_rx(RxPath::Dma, sim.rx_stream(RxPath::Dma)).unwrap();

    let ports: Vec<_> = (0..4).flat_map(|i| [DevPort::new(0, i), DevPort::new(1, i)]).collect();
    let hdl = diag.loopback_setup(DEV, ports, LoopbackMode::MacNear).await.unwrap();

    diag.start(hdl, 1_000, 512, true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    diag.stop(hdl).await.unwrap();

    let status = diag.cleanup(hdl).await.unwrap();
    println!("{status}");
}
