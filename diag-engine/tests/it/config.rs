use std::time::Duration;

use bytes::Bytes;
use diag_backend::RxPath;
use diag_engine::{ErrorKind, FailureType, LoopbackMode, Verdict};
use diag_sim::Impairment;
use diag_wire::{PacketId, PayloadPattern};

use crate::{engine, port, wait_status, DEV};

#[tokio::test]
async fn flip_offsets_are_recorded_per_packet() {
    let (mut diag, sim) = engine();
    let p = port(0, 5);
    diag.set_payload_pattern(PayloadPattern::Payload(Bytes::from_static(&[0x00])));
    sim.set_impairment(DEV, p, Impairment::new().flip(100, 0x01));

    let hdl = diag.loopback_setup(DEV, vec![p], LoopbackMode::MacNear).await.unwrap();
    diag.start(hdl, 1, 256, false).await.unwrap();

    let status = wait_status(&diag, &sim, hdl).await;
    assert_eq!(status.rx_bad, 1);
    assert_eq!(status.failures[FailureType::SHold], 1);

    // first identifier issued by a fresh engine
    let id = PacketId::new(hdl, p, 0);
    let flips = diag.packet_flips(id).unwrap();
    assert_eq!(flips.zeros_to_one, vec![100]);
    assert!(flips.ones_to_zero.is_empty());

    diag.cleanup(hdl).await.unwrap();
    assert!(diag.packet_flips(id).is_none());
}

#[tokio::test]
async fn header_length_moves_the_setup_boundary() {
    let (mut diag, sim) = engine();
    let p = port(1, 2);
    diag.set_payload_pattern(PayloadPattern::Payload(Bytes::from_static(&[0xff])));
    sim.set_impairment(DEV, p, Impairment::new().flip(70, 0x02));

    let hdl = diag.loopback_setup(DEV, vec![p], LoopbackMode::MacNear).await.unwrap();
    diag.start(hdl, 4, 200, false).await.unwrap();
    diag.stop(hdl).await.unwrap();

    let status = wait_status(&diag, &sim, hdl).await;
    assert_eq!(status.failures[FailureType::PayloadSetup], 4);

    diag.clear_stats(hdl).unwrap();
    diag.set_classify_header_len(128);
    assert_eq!(diag.options().get_classify_header_len(), 128);
    diag.start(hdl, 4, 200, false).await.unwrap();
    diag.stop(hdl).await.unwrap();

    let status = wait_status(&diag, &sim, hdl).await;
    assert_eq!(status.failures[FailureType::PayloadSetup], 0);
    assert_eq!(status.failures[FailureType::SsSetup], 4);
}

#[tokio::test]
async fn full_packet_override() {
    let (mut diag, sim) = engine();

    let err = diag.set_full_packet(Some(Bytes::from(vec![0u8; 20]))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    diag.set_full_packet(Some(Bytes::from(vec![0xab; 100]))).unwrap();
    let hdl = diag.loopback_setup(DEV, vec![port(0, 7), port(0, 8)], LoopbackMode::PcsNear).await.unwrap();
    diag.start(hdl, 10, 300, false).await.unwrap();

    let status = wait_status(&diag, &sim, hdl).await;
    assert_eq!(status.rx_good, 20);
    assert_eq!(status.verdict, Verdict::Pass);
    diag.cleanup(hdl).await.unwrap();

    diag.set_full_packet(None).unwrap();
}

#[tokio::test]
async fn receive_paths_attach_and_detach() {
    let (mut diag, sim) = engine();

    diag.detach_rx(RxPath::Dma).await.unwrap();
    assert!(diag.detach_rx(RxPath::Dma).await.is_err());

    let hdl = diag.loopback_setup(DEV, vec![port(0, 1)], LoopbackMode::MacNear).await.unwrap();
    diag.start(hdl, 5, 128, false).await.unwrap();
    diag.stop(hdl).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(diag.rx_stats().packets(RxPath::Dma), 0);

    diag.attach_rx(RxPath::Dma, sim.rx_stream(RxPath::Dma)).unwrap();
    let err = diag.attach_rx(RxPath::Dma, Box::pin(futures::stream::empty())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    diag.start(hdl, 5, 128, false).await.unwrap();
    for _ in 0..400 {
        if diag.rx_stats().packets(RxPath::Dma) >= 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let status = diag.status(hdl).await.unwrap();
    assert_eq!(status.tx_total, 10);
    assert_eq!(status.rx_good, 5);
    assert!(!status.passed());
}
