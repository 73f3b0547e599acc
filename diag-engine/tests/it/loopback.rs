use diag_engine::{DiagError, ErrorKind, LoopbackMode, TestState, Verdict, MAX_FLOWS};
use diag_sim::Impairment;

use crate::{engine, port, wait_status, DEV};

#[tokio::test]
async fn loopback_all_packets_return() {
    let (mut diag, sim) = engine();
    let ports: Vec<_> = (0..4).map(|i| port(0, i)).collect();

    let hdl = diag.loopback_setup(DEV, ports.clone(), LoopbackMode::MacNear).await.unwrap();
    for p in &ports {
        assert_eq!(sim.port_mode(DEV, *p), LoopbackMode::MacNear);
    }
    // one rule into each port, one back to the CPU
    assert_eq!(sim.rule_count(DEV), 8);

    diag.start(hdl, 100, 256, false).await.unwrap();
    diag.stop(hdl).await.unwrap();

    let status = wait_status(&diag, &sim, hdl).await;
    assert_eq!(status.tx_total, 400);
    assert_eq!(status.rx_good, 400);
    assert_eq!(status.rx_bad, 0);
    assert_eq!(status.flows.len(), 4);
    assert_eq!(status.verdict, Verdict::Pass);
    assert_eq!(status.state, TestState::Configured);
    assert_eq!(diag.rx_stats().port_bytes(ports[0]), 100 * 256);

    let status = diag.cleanup(hdl).await.unwrap();
    assert!(status.passed());
    assert_eq!(status.cleanup_errors, 0);
    assert_eq!(sim.rule_count(DEV), 0);
    assert_eq!(diag.recorded_packets(), 0);
    assert!(!diag.is_valid(hdl));
    for p in &ports {
        assert_eq!(sim.port_mode(DEV, *p), LoopbackMode::None);
    }
}

#[tokio::test]
async fn loopback_bidirectional() {
    let (mut diag, sim) = engine();
    let hdl = diag.loopback_setup(DEV, vec![port(0, 1), port(1, 1)], LoopbackMode::PcsNear).await.unwrap();

    diag.start(hdl, 10, 128, true).await.unwrap();
    // reverse rules are installed on the first bidirectional start
    assert_eq!(sim.rule_count(DEV), 8);
    diag.stop(hdl).await.unwrap();

    let status = wait_status(&diag, &sim, hdl).await;
    assert_eq!(status.flows.len(), 4);
    assert_eq!(status.tx_total, 40);
    assert_eq!(status.rx_good, 40);
    assert!(status.passed());

    // a second start does not install them again
    diag.start(hdl, 1, 128, true).await.unwrap();
    assert_eq!(sim.rule_count(DEV), 8);
    diag.cleanup(hdl).await.unwrap();
    assert_eq!(sim.rule_count(DEV), 0);
}

#[tokio::test]
async fn bit_flips_are_classified() {
    let (mut diag, sim) = engine();
    let ports = vec![port(0, 1), port(0, 2)];
    sim.set_impairment(DEV, ports[1], Impairment::new().flip(100, 0x01));

    let hdl = diag.loopback_setup(DEV, ports, LoopbackMode::MacNear).await.unwrap();
    diag.start(hdl, 50, 256, false).await.unwrap();
    diag.stop(hdl).await.unwrap();

    let status = wait_status(&diag, &sim, hdl).await;
    assert_eq!(status.verdict, Verdict::Fail);
    assert_eq!(status.flows[0].verdict, Verdict::Pass);
    assert_eq!(status.flows[1].verdict, Verdict::Fail);
    assert_eq!(status.flows[1].rx_bad, 50);
    assert_eq!(status.rx_good, 50);
    assert_eq!(status.bytes_mismatched, 50);
    assert_eq!(status.bits_mismatched, 50);
    assert_eq!(status.flips_1_to_0 + status.flips_0_to_1, 50);
    assert_eq!(status.failures.failed(), 50);
    assert_eq!(diag.rx_stats().bad(), 50);
}

#[tokio::test]
async fn resized_packets_fail_the_test() {
    let (mut diag, sim) = engine();
    let ports = vec![port(0, 3)];
    sim.set_impairment(DEV, ports[0], Impairment::new().truncate(200));

    let hdl = diag.loopback_setup(DEV, ports, LoopbackMode::MacNear).await.unwrap();
    diag.start(hdl, 5, 256, false).await.unwrap();

    let status = wait_status(&diag, &sim, hdl).await;
    assert_eq!(status.rx_good, 0);
    // truncation also cuts the identifier replicas
    assert_eq!(status.pkt_id_corrupt + status.size_mismatch, 5);
    assert!(!status.passed());
}

#[tokio::test]
async fn packet_size_bounds() {
    let (mut diag, _sim) = engine();
    let hdl = diag.loopback_setup(DEV, vec![port(0, 1)], LoopbackMode::MacNear).await.unwrap();

    let err = diag.start(hdl, 1, 79, false).await.unwrap_err();
    assert!(matches!(err, DiagError::PacketSize { size: 79, min: 80, .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(diag.start(hdl, 1, 9217, false).await.is_err());

    diag.start(hdl, 1, 9216, false).await.unwrap();
    diag.cleanup(hdl).await.unwrap();

    // smaller packets need the reduced identifier
    diag.set_min_pkt_size(true).unwrap();
    let hdl = diag.loopback_setup(DEV, vec![port(0, 1)], LoopbackMode::MacNear).await.unwrap();
    assert!(diag.start(hdl, 1, 63, false).await.is_err());
    diag.start(hdl, 20, 64, false).await.unwrap();
    assert!(diag.set_min_pkt_size(false).is_err());
    diag.cleanup(hdl).await.unwrap();
}

#[tokio::test]
async fn min_size_packets_pass() {
    let (mut diag, sim) = engine();
    diag.set_min_pkt_size(true).unwrap();

    let hdl = diag.loopback_setup(DEV, vec![port(0, 4), port(1, 4)], LoopbackMode::SerdesNear).await.unwrap();
    diag.start(hdl, 30, 64, false).await.unwrap();

    let status = wait_status(&diag, &sim, hdl).await;
    assert_eq!(status.rx_good, 60);
    assert!(status.passed());
}

#[tokio::test]
async fn all_ports_selection() {
    let (mut diag, sim) = engine();
    let hdl = diag.loopback_setup(DEV, diag_engine::PortSelection::All, LoopbackMode::MacNear).await.unwrap();

    // front panel and internal ports on both pipes plus the Ethernet CPU port
    let info = diag.session_info(hdl).unwrap();
    assert_eq!(info.ports.len(), 2 * (16 + 4) + 1);
    assert!(info.ports.len() <= MAX_FLOWS);

    diag.start(hdl, 2, 100, false).await.unwrap();
    let status = wait_status(&diag, &sim, hdl).await;
    assert_eq!(status.rx_good, 2 * info.ports.len() as u64);
    assert!(status.passed());
}
