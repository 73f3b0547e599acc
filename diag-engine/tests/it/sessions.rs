use diag_engine::{DevId, DiagError, DiagOptions, ErrorKind, LoopbackMode, SessHdl, TestState};
use diag_backend::Forwarding;
use diag_sim::{SimConfig, SimOp};

use crate::{engine, engine_with, port, wait_status, DEV};

#[tokio::test]
async fn handles_run_out() {
    let (mut diag, _sim) = engine();
    diag.set_max_sessions(2);

    let a = diag.loopback_setup(DEV, vec![port(0, 1)], LoopbackMode::MacNear).await.unwrap();
    let b = diag.loopback_setup(DEV, vec![port(0, 2)], LoopbackMode::MacNear).await.unwrap();
    assert_eq!((a.slot(), b.slot()), (0, 1));

    let err = diag.loopback_setup(DEV, vec![port(0, 3)], LoopbackMode::MacNear).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoResources);

    diag.cleanup(a).await.unwrap();
    let c = diag.loopback_setup(DEV, vec![port(0, 3)], LoopbackMode::MacNear).await.unwrap();
    assert_eq!(c.slot(), 0);
}

#[tokio::test]
async fn overlapping_ports() {
    let (mut diag, sim) = engine();
    let a = diag.loopback_setup(DEV, vec![port(0, 1), port(0, 2)], LoopbackMode::MacNear).await.unwrap();

    let err = diag.snake_setup(DEV, vec![port(0, 2), port(0, 3)], LoopbackMode::PcsNear).await.unwrap_err();
    assert!(matches!(err, DiagError::Overlap { session, .. } if session == a));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    // sharing a port in the same mode is fine
    let b = diag.snake_setup(DEV, vec![port(0, 2), port(0, 3)], LoopbackMode::MacNear).await.unwrap();
    assert_eq!(diag.sessions().len(), 2);
    assert!(diag.set_drain_full_range(true).is_err());

    diag.start(a, 10, 128, false).await.unwrap();
    diag.start(b, 10, 128, false).await.unwrap();

    let status_a = wait_status(&diag, &sim, a).await;
    let status_b = wait_status(&diag, &sim, b).await;
    assert_eq!(status_a.rx_good, 20);
    assert_eq!(status_b.rx_good, 10);
    assert!(status_a.passed() && status_b.passed());
}

#[tokio::test]
async fn drain_full_range_refuses_any_overlap() {
    let (mut diag, _sim) = engine_with(SimConfig::default(), DiagOptions::instant().drain_full_range(true));
    diag.loopback_setup(DEV, vec![port(0, 1)], LoopbackMode::MacNear).await.unwrap();

    let err = diag.loopback_setup(DEV, vec![port(0, 1)], LoopbackMode::MacNear).await.unwrap_err();
    assert!(matches!(err, DiagError::Overlap { .. }));
}

#[tokio::test]
async fn failed_rule_install_rolls_back() {
    let (mut diag, sim) = engine();
    let ports: Vec<_> = (0..4).map(|i| port(1, i)).collect();

    sim.fail_on(SimOp::InstallRule, 5);
    let err = diag.loopback_setup(DEV, ports.clone(), LoopbackMode::MacNear).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);

    assert_eq!(sim.rule_count(DEV), 0);
    assert!(diag.sessions().is_empty());
    for p in &ports {
        assert_eq!(sim.port_mode(DEV, *p), LoopbackMode::None);
    }

    // the handle was returned
    let hdl = diag.loopback_setup(DEV, ports, LoopbackMode::MacNear).await.unwrap();
    assert_eq!(hdl, SessHdl::new(DEV, 0));
}

#[tokio::test]
async fn failed_mode_change_rolls_back() {
    let (mut diag, sim) = engine();
    let ports: Vec<_> = (0..3).map(|i| port(0, i)).collect();

    sim.fail_on(SimOp::SetLoopbackMode, 2);
    assert!(diag.loopback_setup(DEV, ports.clone(), LoopbackMode::MacNear).await.is_err());

    assert_eq!(sim.rule_count(DEV), 0);
    for p in &ports {
        assert_eq!(sim.port_mode(DEV, *p), LoopbackMode::None);
    }
}

#[tokio::test]
async fn failed_multicast_tree_rolls_back() {
    let (mut diag, sim) = engine();
    let ports = vec![port(0, 1), port(1, 1), port(0, 2), port(1, 2)];

    sim.fail_on(SimOp::McAssociate, 3);
    let err = diag.multicast_setup(DEV, ports, LoopbackMode::MacNear).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);
    assert_eq!(sim.mc_objects(DEV), (0, 0));
    assert_eq!(sim.rule_count(DEV), 0);
}

#[tokio::test]
async fn shared_ports_keep_their_mode_until_the_last_session() {
    let (mut diag, sim) = engine();
    let (p, q) = (port(0, 7), port(0, 8));
    sim.set_loopback_mode(DEV, p, LoopbackMode::MacFar).await.unwrap();

    let a = diag.loopback_setup(DEV, vec![p], LoopbackMode::MacNear).await.unwrap();
    let b = diag.loopback_setup(DEV, vec![p, q], LoopbackMode::MacNear).await.unwrap();

    diag.cleanup(a).await.unwrap();
    assert_eq!(sim.port_mode(DEV, p), LoopbackMode::MacNear);

    diag.cleanup(b).await.unwrap();
    assert_eq!(sim.port_mode(DEV, p), LoopbackMode::MacFar);
    assert_eq!(sim.port_mode(DEV, q), LoopbackMode::None);
}

#[tokio::test]
async fn lifecycle_errors() {
    let (mut diag, _sim) = engine();
    let hdl = diag.loopback_setup(DEV, vec![port(0, 1)], LoopbackMode::MacNear).await.unwrap();

    assert!(matches!(diag.stop(hdl).await.unwrap_err(), DiagError::NotRunning(_)));

    diag.start(hdl, 1, 128, false).await.unwrap();
    let err = diag.start(hdl, 1, 128, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(diag.session_info(hdl).unwrap().state, TestState::Running);

    assert_eq!(diag.clear_stats(hdl).unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(diag.set_replication(2).unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(diag.detach_device(DEV).unwrap_err().kind(), ErrorKind::InvalidState);

    diag.stop(hdl).await.unwrap();
    diag.clear_stats(hdl).unwrap();
    assert_eq!(diag.stats(hdl).unwrap().total(|d| d.tx), 0);
    assert!(diag.status(hdl).await.unwrap().passed());

    let missing = SessHdl::new(DEV, 99);
    assert!(!diag.is_valid(missing));
    assert!(matches!(diag.status(missing).await.unwrap_err(), DiagError::SessionNotFound(_)));
    assert!(diag.cleanup(missing).await.is_err());

    diag.cleanup(hdl).await.unwrap();
    diag.detach_device(DEV).unwrap();
    assert_eq!(
        diag.loopback_setup(DEV, vec![port(0, 1)], LoopbackMode::MacNear).await.unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
}

#[tokio::test]
async fn bad_port_lists() {
    let (mut diag, _sim) = engine();

    let err = diag.loopback_setup(DEV, vec![port(0, 1), port(0, 1)], LoopbackMode::MacNear).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = diag.loopback_setup(DEV, vec![port(0, 40)], LoopbackMode::MacNear).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = diag.loopback_setup(DEV, Vec::new(), LoopbackMode::MacNear).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn cleanup_stops_and_sweeps() {
    let (mut diag, sim) = engine();
    let hdl = diag.loopback_setup(DEV, vec![port(0, 1), port(0, 2)], LoopbackMode::MacNear).await.unwrap();

    diag.start(hdl, 30, 200, false).await.unwrap();
    assert_eq!(diag.recorded_packets(), 60);
    let _ = wait_status(&diag, &sim, hdl).await;

    let status = diag.cleanup(hdl).await.unwrap();
    assert_eq!(status.state, TestState::Configured);
    assert_eq!(status.rx_good, 60);
    assert!(status.passed());
    assert_eq!(diag.recorded_packets(), 0);
}

#[tokio::test]
async fn cleanup_counts_backend_failures() {
    let (mut diag, sim) = engine();
    let hdl = diag.loopback_setup(DEV, vec![port(0, 1)], LoopbackMode::MacNear).await.unwrap();

    sim.fail_on(SimOp::RemoveRule, 1);
    let status = diag.cleanup(hdl).await.unwrap();
    assert_eq!(status.cleanup_errors, 1);
    assert_eq!(sim.rule_count(DEV), 1);
    assert!(!diag.is_valid(hdl));
}

#[tokio::test]
async fn never_started_session_passes() {
    let (mut diag, _sim) = engine();
    let hdl = diag.loopback_setup(DEV, vec![port(0, 1)], LoopbackMode::MacNear).await.unwrap();
    assert!(diag.status(hdl).await.unwrap().passed());
    assert!(diag.cleanup(hdl).await.unwrap().passed());
}

#[tokio::test]
async fn sessions_on_two_devices() {
    let config = SimConfig::default().devices(vec![DevId(0), DevId(1)]);
    let (mut diag, sim) = engine_with(config, DiagOptions::instant());

    let a = diag.loopback_setup(DevId(0), vec![port(0, 1)], LoopbackMode::MacNear).await.unwrap();
    let b = diag.loopback_setup(DevId(1), vec![port(0, 1)], LoopbackMode::PcsNear).await.unwrap();
    assert_ne!(a, b);
    assert_eq!(b.dev(), DevId(1));

    diag.start(a, 5, 128, false).await.unwrap();
    diag.start(b, 7, 128, false).await.unwrap();

    assert_eq!(wait_status(&diag, &sim, a).await.rx_good, 5);
    assert_eq!(wait_status(&diag, &sim, b).await.rx_good, 7);

    let infos = diag.sessions();
    assert_eq!(infos.iter().map(|i| i.hdl).collect::<Vec<_>>(), vec![a, b]);
}

#[tokio::test]
async fn min_size_identifiers_cover_two_devices() {
    let config = SimConfig::default().devices(vec![DevId(0), DevId(2)]);
    let (mut diag, sim) = engine_with(config, DiagOptions::instant());

    let err = diag.set_min_pkt_size(true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(!diag.options().is_min_pkt_size());

    diag.detach_device(DevId(2)).unwrap();
    diag.set_min_pkt_size(true).unwrap();
    diag.attach_device(DevId(2)).unwrap();

    let err = diag.loopback_setup(DevId(2), vec![port(0, 1)], LoopbackMode::MacNear).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(diag.sessions().is_empty());
    assert_eq!(sim.rule_count(DevId(2)), 0);
    assert_eq!(sim.port_mode(DevId(2), port(0, 1)), LoopbackMode::None);

    let hdl = diag.loopback_setup(DEV, vec![port(0, 1)], LoopbackMode::MacNear).await.unwrap();
    diag.start(hdl, 10, 64, false).await.unwrap();
    let status = wait_status(&diag, &sim, hdl).await;
    assert_eq!(status.rx_good, 10);
    assert!(status.passed());
}
