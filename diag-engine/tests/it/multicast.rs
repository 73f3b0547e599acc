use diag_engine::{DiagOptions, ErrorKind, LoopbackMode};
use diag_sim::SimConfig;

use crate::{engine, engine_with, port, wait_status, DEV};

#[tokio::test]
async fn multicast_copies_return() {
    let (mut diag, sim) = engine();
    let ports = vec![port(0, 1), port(1, 1), port(0, 2), port(1, 2)];

    let hdl = diag.multicast_setup(DEV, ports, LoopbackMode::MacNear).await.unwrap();
    // one group and one node per flow
    assert_eq!(sim.mc_objects(DEV), (4, 4));

    diag.start(hdl, 10, 256, false).await.unwrap();
    diag.stop(hdl).await.unwrap();

    let status = wait_status(&diag, &sim, hdl).await;
    // each packet is copied to its peer on the other pipe and once more to the designated port
    for flow in &status.flows {
        assert_eq!(flow.tx, 10);
        assert_eq!(flow.expected, 20);
        assert_eq!(flow.rx_good, 20);
    }
    assert_eq!(status.rx_expected, 80);
    assert!(status.passed());

    let status = diag.cleanup(hdl).await.unwrap();
    assert_eq!(status.cleanup_errors, 0);
    assert_eq!(sim.mc_objects(DEV), (0, 0));
    assert_eq!(sim.rule_count(DEV), 0);
}

#[tokio::test]
async fn extra_copies_scale_expectation() {
    let options = DiagOptions::instant().mc_extra_copies(3);
    let (mut diag, sim) = engine_with(SimConfig::default().pipes(1), options);

    let hdl = diag.multicast_setup(DEV, vec![port(0, 5), port(0, 6)], LoopbackMode::PcsNear).await.unwrap();
    diag.start(hdl, 4, 128, true).await.unwrap();

    let status = wait_status(&diag, &sim, hdl).await;
    // multicast flows carry no reverse traffic
    assert_eq!(status.flows.len(), 2);
    assert_eq!(status.flows[0].expected, 12);
    assert_eq!(status.rx_good, 24);
    assert!(status.passed());
}

#[tokio::test]
async fn multicast_needs_copies() {
    let options = DiagOptions::instant().mc_extra_copies(0);
    let (mut diag, sim) = engine_with(SimConfig::default(), options);

    // same pipe, no extra copies: nothing to replicate to
    let err = diag.multicast_setup(DEV, vec![port(0, 1), port(0, 2)], LoopbackMode::MacNear).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = diag.multicast_setup(DEV, vec![port(0, 1)], LoopbackMode::MacNear).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(sim.mc_objects(DEV), (0, 0));
}
