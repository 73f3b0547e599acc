use std::{fmt, pin::Pin};

use bytes::Bytes;
use futures::Stream;

use diag_common::{DevId, DevPort};

/// The receive paths a packet can reach the CPU through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RxPath {
    /// The hardware DMA ring.
    Dma,
    /// Kernel network interface fallback.
    KernelSocket,
    /// Raw Ethernet socket fallback.
    RawEthernet,
}

impl RxPath {
    pub const ALL: [Self; 3] = [Self::Dma, Self::KernelSocket, Self::RawEthernet];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::Dma => 0,
            Self::KernelSocket => 1,
            Self::RawEthernet => 2,
        }
    }
}

impl fmt::Display for RxPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dma => f.write_str("dma"),
            Self::KernelSocket => f.write_str("kernel-socket"),
            Self::RawEthernet => f.write_str("raw-ethernet"),
        }
    }
}

/// A packet punted to the CPU: the exact bytes received and the port they arrived on.
#[derive(Debug, Clone)]
pub struct RxPacket {
    pub dev: DevId,
    /// The ingress port of the packet that was punted.
    pub port: DevPort,
    pub data: Bytes,
}

/// A boxed stream of received packets.
pub type RxStream = Pin<Box<dyn Stream<Item = RxPacket> + Send>>;
