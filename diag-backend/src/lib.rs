//! The contract between the diagnostics engine and the hardware it drives.
//!
//! The engine never touches ASIC tables directly. It asks a [`Forwarding`] implementation to
//! install match-action rules, program multicast trees and change port loopback modes, a
//! [`PacketGen`] implementation to drive the on-chip packet generator, and a [`PacketIo`]
//! implementation to inject packets from the CPU. Received packets flow back to the engine as
//! a [`Stream`](futures::Stream) of [`RxPacket`]s, one stream per [`RxPath`].
use bytes::Bytes;
use thiserror::Error;

use diag_common::{DevId, DevPort, LoopbackMode};

mod mc;
pub use mc::*;

mod pktgen;
pub use pktgen::*;

mod rule;
pub use rule::*;

mod rx;
pub use rx::*;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("device {0} is not present")]
    NoDevice(DevId),
    #[error("port {0} is not present")]
    NoPort(DevPort),
    #[error("rule {0} not found")]
    NoRule(RuleHandle),
    #[error("multicast object {0} not found")]
    NoMcObject(u64),
    #[error("packet generator app {0} is not configured")]
    NoPktGenApp(PktGenApp),
    #[error("table full")]
    TableFull,
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("transmit failed: {0}")]
    Transmit(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Which port list to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortClass {
    /// Every front-panel and internal port.
    All,
    /// Ports without an external connector.
    Internal,
    /// Ports cabled into the fabric mesh.
    Mesh,
}

/// Match-action rules, multicast and port modes.
#[async_trait::async_trait]
pub trait Forwarding: Send + Sync + 'static {
    /// The PCIe CPU port. Packets transmitted by the CPU ingress here, and rules egressing here
    /// punt packets to the CPU.
    fn cpu_port(&self, dev: DevId) -> DevPort;

    /// The Ethernet CPU port, if the device has one. It behaves like a regular port.
    fn eth_cpu_port(&self, dev: DevId) -> Option<DevPort>;

    /// Enumerates the ports of a device.
    fn ports(&self, dev: DevId, class: PortClass) -> Vec<DevPort>;

    /// Number of pipes on the device.
    fn num_pipes(&self, dev: DevId) -> u16;

    async fn install_rule(&self, dev: DevId, rule: &ForwardRule) -> Result<RuleHandle>;

    async fn remove_rule(&self, dev: DevId, hdl: RuleHandle) -> Result<()>;

    async fn set_loopback_mode(&self, dev: DevId, port: DevPort, mode: LoopbackMode)
        -> Result<()>;

    async fn loopback_mode(&self, dev: DevId, port: DevPort) -> Result<LoopbackMode>;

    async fn mc_group_create(&self, dev: DevId, group: McGroupId) -> Result<McGroupHandle>;

    async fn mc_group_destroy(&self, dev: DevId, group: McGroupHandle) -> Result<()>;

    /// Creates a replication node: one copy per listed port (duplicates allowed), tagged with
    /// the replication id `rid`.
    async fn mc_node_create(&self, dev: DevId, rid: u16, ports: &[DevPort])
        -> Result<McNodeHandle>;

    async fn mc_node_update(&self, dev: DevId, node: McNodeHandle, ports: &[DevPort])
        -> Result<()>;

    async fn mc_node_destroy(&self, dev: DevId, node: McNodeHandle) -> Result<()>;

    async fn mc_associate(&self, dev: DevId, group: McGroupHandle, node: McNodeHandle)
        -> Result<()>;

    async fn mc_dissociate(&self, dev: DevId, group: McGroupHandle, node: McNodeHandle)
        -> Result<()>;
}

/// The on-chip packet generator, one application per `(pipe, app)` slot.
#[async_trait::async_trait]
pub trait PacketGen: Send + Sync + 'static {
    /// The port generated packets ingress on for the given pipe.
    fn pktgen_port(&self, dev: DevId, pipe: u16) -> DevPort;

    /// Writes `template` into the generator buffer and configures the application.
    async fn pktgen_setup(
        &self,
        dev: DevId,
        app: PktGenApp,
        cfg: &PktGenConfig,
        template: Bytes,
    ) -> Result<()>;

    async fn pktgen_start(&self, dev: DevId, app: PktGenApp) -> Result<()>;

    async fn pktgen_adjust(&self, dev: DevId, app: PktGenApp, pkt_rate: u64) -> Result<()>;

    async fn pktgen_stop(&self, dev: DevId, app: PktGenApp) -> Result<()>;

    /// Number of packets generated by the application so far.
    async fn pktgen_counter(&self, dev: DevId, app: PktGenApp) -> Result<u64>;

    async fn pktgen_cleanup(&self, dev: DevId, app: PktGenApp) -> Result<()>;
}

/// CPU packet injection. Implementations must deliver exactly the bytes given.
#[async_trait::async_trait]
pub trait PacketIo: Send + Sync + 'static {
    async fn transmit(&self, dev: DevId, pkt: Bytes) -> Result<()>;
}

/// Everything the engine needs from the hardware.
pub trait Backend: Forwarding + PacketGen + PacketIo {}

impl<T: Forwarding + PacketGen + PacketIo> Backend for T {}
