use diag_engine::{ErrorKind, LoopbackMode, PortSelection, TestKind};

use crate::{engine, port, wait_status, DEV};

#[tokio::test]
async fn pairs_even_ports() {
    let (mut diag, sim) = engine();
    let ports: Vec<_> = (0..4).map(|i| port(1, i)).collect();

    let hdl = diag.pair_setup(DEV, ports.clone(), LoopbackMode::MacNear).await.unwrap();
    assert_eq!(diag.session_info(hdl).unwrap().kind, TestKind::PairedLoopback);

    diag.start(hdl, 20, 300, true).await.unwrap();
    diag.stop(hdl).await.unwrap();

    let status = wait_status(&diag, &sim, hdl).await;
    // two pairs, both directions
    assert_eq!(status.flows.len(), 4);
    assert_eq!(status.flows[0].ports, vec![ports[0], ports[1]]);
    assert_eq!(status.tx_total, 80);
    assert_eq!(status.rx_good, 80);
    assert!(status.passed());
}

#[tokio::test]
async fn odd_port_joins_the_last_pair() {
    let (mut diag, sim) = engine();
    let ports: Vec<_> = (0..5).map(|i| port(0, i)).collect();

    let hdl = diag.pair_setup(DEV, ports.clone(), LoopbackMode::MacNear).await.unwrap();
    diag.start(hdl, 10, 256, false).await.unwrap();

    let status = wait_status(&diag, &sim, hdl).await;
    assert_eq!(status.flows.len(), 2);
    assert_eq!(status.flows[1].ports, ports[2..].to_vec());
    assert_eq!(status.rx_good, 20);
    assert!(status.passed());
}

#[tokio::test]
async fn single_port_cannot_pair() {
    let (mut diag, sim) = engine();
    let err = diag.pair_setup(DEV, vec![port(0, 1)], LoopbackMode::MacNear).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(diag.sessions().is_empty());
    assert_eq!(sim.rule_count(DEV), 0);
}

#[tokio::test]
async fn internal_and_mesh_selections_pair_up() {
    for selection in [PortSelection::AllInternal, PortSelection::AllMesh] {
        let (mut diag, sim) = engine();
        let hdl = diag.pair_setup(DEV, selection, LoopbackMode::MacNear).await.unwrap();

        // four ports on each pipe plus the Ethernet CPU port
        let info = diag.session_info(hdl).unwrap();
        assert_eq!(info.ports.len(), 9);
        assert_eq!(info.ports.last(), Some(&port(0, 66)));

        diag.start(hdl, 10, 200, false).await.unwrap();
        let status = wait_status(&diag, &sim, hdl).await;
        assert_eq!(status.flows.len(), 4);
        assert_eq!(status.flows[3].ports.len(), 3);
        assert_eq!(status.flows[3].ports[2], port(0, 66));
        assert_eq!(status.rx_good, 40);
        assert!(status.passed());

        diag.cleanup(hdl).await.unwrap();
        assert_eq!(sim.rule_count(DEV), 0);
    }
}
