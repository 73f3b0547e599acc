use std::time::Duration;

use diag_engine::{DiagError, ErrorKind, LoopbackMode, TestKind, TestState};
use diag_sim::SimOp;

use crate::{engine, port, wait_status, DEV};

#[tokio::test]
async fn stream_burst() {
    let (mut diag, sim) = engine();
    let ports = vec![port(0, 1), port(1, 1)];

    let hdl = diag.stream_setup(DEV, ports, LoopbackMode::MacNear, 10_000, false).await.unwrap();
    assert_eq!(diag.session_info(hdl).unwrap().kind, TestKind::Stream);
    assert_eq!(sim.pktgen_apps(DEV), 0);

    diag.start(hdl, 50, 256, false).await.unwrap();
    assert_eq!(sim.pktgen_apps(DEV), 2);
    diag.stop(hdl).await.unwrap();

    let status = wait_status(&diag, &sim, hdl).await;
    assert_eq!(status.tx_total, 100);
    assert_eq!(status.rx_good, 100);
    assert!(status.passed());

    diag.cleanup(hdl).await.unwrap();
    assert_eq!(sim.pktgen_apps(DEV), 0);
}

#[tokio::test]
async fn stream_continuous_with_adjust() {
    let (mut diag, sim) = engine();
    let hdl = diag.stream_setup(DEV, vec![port(0, 2)], LoopbackMode::MacNear, 20_000, true).await.unwrap();

    let err = diag.stream_adjust(hdl, 1000).await.unwrap_err();
    assert!(matches!(err, DiagError::NotRunning(_)));

    diag.start(hdl, 0, 128, false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    diag.stream_adjust(hdl, 50_000).await.unwrap();
    assert_eq!(diag.stream_adjust(hdl, 0).await.unwrap_err().kind(), ErrorKind::InvalidArgument);
    tokio::time::sleep(Duration::from_millis(20)).await;
    diag.stop(hdl).await.unwrap();

    let status = wait_status(&diag, &sim, hdl).await;
    assert!(status.tx_total > 0);
    assert_eq!(status.rx_good, status.tx_total);
    assert!(status.passed());
}

#[tokio::test]
async fn adjust_requires_a_stream() {
    let (mut diag, _sim) = engine();
    let hdl = diag.loopback_setup(DEV, vec![port(0, 1)], LoopbackMode::MacNear).await.unwrap();
    diag.start(hdl, 1, 128, false).await.unwrap();

    let err = diag.stream_adjust(hdl, 100).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn zero_rate_is_rejected() {
    let (mut diag, _sim) = engine();
    let err = diag.stream_setup(DEV, vec![port(0, 1)], LoopbackMode::MacNear, 0, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn failed_start_leaves_no_generator_running() {
    let (mut diag, sim) = engine();
    let ports = vec![port(0, 3), port(1, 3)];
    let hdl = diag.stream_setup(DEV, ports, LoopbackMode::MacNear, 20_000, true).await.unwrap();

    // nothing is loaded into the generators yet
    assert!(diag.status(hdl).await.unwrap().passed());

    sim.fail_on(SimOp::PktGenStart, 2);
    let err = diag.start(hdl, 0, 128, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);
    assert_eq!(diag.session_info(hdl).unwrap().state, TestState::Configured);

    let generated = sim.counters().generated;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(sim.counters().generated, generated);
    assert!(matches!(diag.stop(hdl).await, Err(DiagError::NotRunning(_))));

    diag.start(hdl, 0, 128, false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    diag.stop(hdl).await.unwrap();

    let status = wait_status(&diag, &sim, hdl).await;
    assert!(status.tx_total > 0);
    assert_eq!(status.rx_good, status.tx_total);

    let status = diag.cleanup(hdl).await.unwrap();
    assert_eq!(status.cleanup_errors, 0);
    assert_eq!(sim.pktgen_apps(DEV), 0);
}

#[tokio::test]
async fn generator_apps_run_out_per_pipe() {
    let (mut diag, sim) = engine();
    let ports: Vec<_> = (0..9).map(|i| port(0, i)).collect();

    let err = diag.stream_setup(DEV, ports.clone(), LoopbackMode::MacNear, 10_000, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoResources);
    assert!(diag.sessions().is_empty());
    assert_eq!(sim.rule_count(DEV), 0);
    assert!(ports.iter().all(|p| sim.port_mode(DEV, *p) == LoopbackMode::None));

    // eight fit on one pipe and the apps of the failed setup are free again
    let hdl = diag.stream_setup(DEV, ports[..8].to_vec(), LoopbackMode::MacNear, 10_000, false).await.unwrap();
    diag.start(hdl, 5, 128, false).await.unwrap();
    diag.stop(hdl).await.unwrap();
    let status = wait_status(&diag, &sim, hdl).await;
    assert_eq!(status.rx_good, 40);
    assert!(status.passed());
}

#[tokio::test]
async fn generator_buffer_runs_out_at_start() {
    let (mut diag, sim) = engine();
    let ports = vec![port(0, 5), port(0, 6)];
    let hdl = diag.stream_setup(DEV, ports, LoopbackMode::MacNear, 20_000, true).await.unwrap();

    // two jumbo templates exceed the buffer of one pipe
    let err = diag.start(hdl, 0, 9216, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoResources);
    assert_eq!(diag.session_info(hdl).unwrap().state, TestState::Configured);

    let generated = sim.counters().generated;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(sim.counters().generated, generated);

    diag.start(hdl, 0, 1024, false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    diag.stop(hdl).await.unwrap();

    let status = wait_status(&diag, &sim, hdl).await;
    assert!(status.tx_total > 0);
    assert_eq!(status.rx_good, status.tx_total);
}
