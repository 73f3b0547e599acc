use diag_engine::{Direction, LoopbackMode, TestKind, Verdict};
use diag_sim::Impairment;

use crate::{engine, port, wait_status, DEV};

#[tokio::test]
async fn snake_traverses_every_port() {
    let (mut diag, sim) = engine();
    let ports: Vec<_> = (0..3).flat_map(|i| [port(0, i), port(1, i)]).collect();

    let hdl = diag.snake_setup(DEV, ports.clone(), LoopbackMode::MacFar).await.unwrap();
    assert_eq!(diag.session_info(hdl).unwrap().kind, TestKind::Snake);
    // a single chain: cpu into the first port, port to port, last port to cpu
    assert_eq!(sim.rule_count(DEV), ports.len() + 1);

    diag.start(hdl, 25, 512, true).await.unwrap();
    diag.stop(hdl).await.unwrap();

    let status = wait_status(&diag, &sim, hdl).await;
    assert_eq!(status.flows.len(), 2);
    assert_eq!(status.flows[0].dir, Direction::Forward);
    assert_eq!(status.flows[0].ports, ports);
    assert_eq!(status.flows[1].dir, Direction::Reverse);
    assert_eq!(status.flows[1].ports.first(), ports.last());
    assert_eq!(status.tx_total, 50);
    assert_eq!(status.rx_good, 50);
    assert!(status.passed());

    diag.cleanup(hdl).await.unwrap();
    assert_eq!(sim.rule_count(DEV), 0);
}

#[tokio::test]
async fn snake_with_lossy_port_fails() {
    let (mut diag, sim) = engine();
    let ports: Vec<_> = (4..8).map(|i| port(0, i)).collect();
    sim.set_impairment(DEV, ports[2], Impairment::new().loss(100.0));

    let hdl = diag.snake_setup(DEV, ports, LoopbackMode::MacNear).await.unwrap();
    diag.start(hdl, 10, 256, false).await.unwrap();

    let status = wait_status(&diag, &sim, hdl).await;
    assert_eq!(status.tx_total, 10);
    assert_eq!(status.rx_good, 0);
    assert_eq!(status.verdict, Verdict::Fail);
}
