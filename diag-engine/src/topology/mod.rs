//! Test topologies.
//!
//! Each test kind is a [`Topology`] implementation, chosen once at setup from a [`TestConfig`]
//! and stored with the session. A topology describes its traffic as a list of [`Flow`]s, each
//! flow owning one forward and one reverse sub-range of the session's [`TcpPlan`], and turns
//! those flows into forwarding rules. Installing and removing the rules, loopback modes and
//! draining are shared by every kind.
use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use diag_backend::{Backend, Egress, ForwardRule, RuleHandle};
use diag_common::{DevId, DevPort};
use diag_wire::PacketBuilder;

use crate::{
    ctx::Shared,
    error::{DiagError, Result},
    options::DiagOptions,
    pktgen::PktGenAllocator,
    session::{Session, TestKind},
};

mod drain;
pub(crate) use drain::drain;

mod loopback;
mod multicast;
mod pair;
mod snake;
mod stream;

mod plan;
pub use plan::{Direction, TcpPlan, BLOCK_LEN, MAX_FLOWS, REVERSE_OFFSET, SUB_RANGE_LEN};

mod traffic;

/// Test kind and its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestConfig {
    /// Every port loops its own traffic back to the CPU.
    Loopback,
    /// All ports chained into one path.
    Snake,
    /// Ports grouped two at a time, the last group takes three on an odd count.
    Pair,
    /// Every port fans out to its peers on other pipes plus `extra_copies` copies on a
    /// designated port.
    Multicast { extra_copies: u16 },
    /// Traffic from the on-chip packet generator instead of the CPU.
    Stream { pkt_rate: u64, continuous: bool },
}

impl TestConfig {
    pub const fn kind(&self) -> TestKind {
        match self {
            Self::Loopback => TestKind::Loopback,
            Self::Snake => TestKind::Snake,
            Self::Pair => TestKind::PairedLoopback,
            Self::Multicast { .. } => TestKind::MulticastLoopback,
            Self::Stream { .. } => TestKind::Stream,
        }
    }
}

/// One unit of test traffic: packets travel along `path` in the forward direction and along
/// the reversed path in the reverse direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    /// Ports in forward order. Never empty.
    pub path: Vec<DevPort>,
    /// Copies of every sent packet expected back at the CPU.
    pub copies: u64,
    /// Whether the flow can carry reverse traffic.
    pub reversible: bool,
}

impl Flow {
    pub(crate) fn chain(path: Vec<DevPort>) -> Self {
        Self { path, copies: 1, reversible: true }
    }

    /// The first port a packet of direction `dir` enters. Stamped into its identifier.
    pub fn origin(&self, dir: Direction) -> DevPort {
        match dir {
            Direction::Forward => self.path[0],
            Direction::Reverse => self.path[self.path.len() - 1],
        }
    }

    /// The ports in traversal order for `dir`.
    pub fn hops(&self, dir: Direction) -> Vec<DevPort> {
        let mut hops = self.path.clone();
        if dir == Direction::Reverse {
            hops.reverse();
        }
        hops
    }
}

/// Per-start traffic parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartParams {
    /// Packets per flow and direction.
    pub num_packets: u64,
    pub pkt_size: usize,
    /// Also send reverse traffic.
    pub bidir: bool,
}

/// Everything a topology needs from the diagnostics context.
pub(crate) struct TopoCx<'a, B> {
    pub(crate) backend: &'a B,
    pub(crate) dev: DevId,
    pub(crate) shared: &'a Shared,
    pub(crate) options: &'a DiagOptions,
    pub(crate) pktgen: &'a Mutex<PktGenAllocator>,
}

impl<B: Backend> TopoCx<'_, B> {
    #[inline]
    pub(crate) fn cpu_port(&self) -> DevPort {
        self.backend.cpu_port(self.dev)
    }

    /// A packet builder for the configured payload pattern or full packet override.
    pub(crate) fn packet_builder(&self) -> Result<PacketBuilder> {
        let builder = PacketBuilder::new(self.options.payload.clone());
        match &self.options.full_packet {
            Some(pkt) => Ok(builder.with_full_packet(pkt.clone())?),
            None => Ok(builder),
        }
    }

    /// Installs `rules` in order. If one fails, the ones already installed are removed again.
    pub(crate) async fn install_rules(&self, rules: &[ForwardRule]) -> Result<Vec<RuleHandle>> {
        let mut installed = Vec::with_capacity(rules.len());
        for rule in rules {
            match self.backend.install_rule(self.dev, rule).await {
                Ok(hdl) => installed.push(hdl),
                Err(e) => {
                    warn!(%rule, error = %e, "failed to install rule, rolling back");
                    self.remove_rules(&installed).await;
                    return Err(e.into());
                }
            }
        }

        debug!(dev = %self.dev, count = installed.len(), "installed rules");
        Ok(installed)
    }

    /// Removes rules, continuing past failures. Returns the number of failures.
    pub(crate) async fn remove_rules(&self, handles: &[RuleHandle]) -> usize {
        let mut errors = 0;
        for hdl in handles {
            if let Err(e) = self.backend.remove_rule(self.dev, *hdl).await {
                warn!(rule = %hdl, error = %e, "failed to remove rule");
                errors += 1;
            }
        }
        errors
    }

    /// Removes rules, continuing past failures. Returns the first failure.
    pub(crate) async fn try_remove_rules(&self, handles: &[RuleHandle]) -> Result<()> {
        let mut first = None;
        for hdl in handles {
            if let Err(e) = self.backend.remove_rule(self.dev, *hdl).await {
                warn!(rule = %hdl, error = %e, "failed to remove rule");
                first.get_or_insert(e);
            }
        }

        match first {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl<B> fmt::Debug for TopoCx<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopoCx").field("dev", &self.dev).finish_non_exhaustive()
    }
}

/// Rules sending packets from `inject` through `hops` in order and back to `cpu`, all
/// matching `range`.
pub(crate) fn chain_rules(
    inject: DevPort,
    hops: &[DevPort],
    cpu: DevPort,
    range: diag_backend::TcpRange,
) -> Vec<ForwardRule> {
    let mut rules = Vec::with_capacity(hops.len() + 1);
    let mut ingress = inject;
    for hop in hops {
        rules.push(ForwardRule::new(ingress, Egress::Port(*hop), range));
        ingress = *hop;
    }
    rules.push(ForwardRule::new(ingress, Egress::Port(cpu), range));
    rules
}

/// A test topology. Implementations keep whatever backend objects they own beyond forwarding
/// rules and release them in [`Topology::release`].
#[async_trait]
pub(crate) trait Topology<B: Backend>: Send + Sync + fmt::Debug {
    fn kind(&self) -> TestKind;

    /// The forwarding rules of one direction. Empty for directions the topology cannot carry.
    fn rules(&self, cx: &TopoCx<'_, B>, session: &Session, dir: Direction) -> Vec<ForwardRule> {
        let cpu = cx.cpu_port();
        session
            .flows()
            .iter()
            .enumerate()
            .filter(|(_, flow)| dir == Direction::Forward || flow.reversible)
            .flat_map(|(k, flow)| chain_rules(cpu, &flow.hops(dir), cpu, session.plan().range(k, dir)))
            .collect()
    }

    /// Acquires backend objects other than forwarding rules. Runs before any rule is
    /// installed; on failure everything acquired so far must already be released.
    async fn acquire(&mut self, _cx: &TopoCx<'_, B>, _session: &Session) -> Result<()> {
        Ok(())
    }

    /// Releases what [`Topology::acquire`] and [`Topology::start`] took, best effort. Returns
    /// the number of failed backend calls.
    async fn release(&mut self, _cx: &TopoCx<'_, B>, _session: &Session) -> usize {
        0
    }

    /// Sends test traffic.
    async fn start(
        &mut self,
        cx: &TopoCx<'_, B>,
        session: &Session,
        params: &StartParams,
    ) -> Result<()> {
        traffic::inject(cx, session, params).await
    }

    /// Halts traffic sources before the session is drained.
    async fn halt(&mut self, _cx: &TopoCx<'_, B>, _session: &Session) -> Result<()> {
        Ok(())
    }

    /// Brings transmit counters kept outside the engine up to date.
    async fn refresh(&self, _cx: &TopoCx<'_, B>, _session: &Session) -> Result<()> {
        Ok(())
    }

    /// Changes the rate of running traffic.
    async fn adjust(&mut self, _cx: &TopoCx<'_, B>, session: &Session, _pkt_rate: u64) -> Result<()> {
        Err(DiagError::InvalidState(format!("{} tests cannot adjust their rate", session.kind())))
    }
}

/// Validates the ports of a test and builds its topology and flows.
pub(crate) fn build<B: Backend>(
    config: TestConfig,
    backend: &B,
    dev: DevId,
    ports: &[DevPort],
) -> Result<(Box<dyn Topology<B>>, Vec<Flow>)> {
    if ports.is_empty() {
        return Err(DiagError::invalid("empty port list"));
    }

    let (topo, flows): (Box<dyn Topology<B>>, _) = match config {
        TestConfig::Loopback => (Box::new(loopback::Loopback), loopback::flows(ports)),
        TestConfig::Snake => (Box::new(snake::Snake), snake::flows(ports)),
        TestConfig::Pair => (Box::new(pair::Pair), pair::flows(ports)?),
        TestConfig::Multicast { extra_copies } => {
            let flows = multicast::flows(ports, extra_copies)?;
            (Box::new(multicast::Multicast::new(ports, extra_copies)), flows)
        }
        TestConfig::Stream { pkt_rate, continuous } => {
            if pkt_rate == 0 {
                return Err(DiagError::invalid("stream packet rate must be positive"));
            }
            let flows = stream::flows(ports);
            (Box::new(stream::Stream::new(pkt_rate, continuous, flows.len())), flows)
        }
    };

    if flows.len() > MAX_FLOWS {
        return Err(DiagError::invalid(format!(
            "{} flows exceed the limit of {MAX_FLOWS}",
            flows.len()
        )));
    }

    debug!(%dev, kind = %topo.kind(), flows = flows.len(), cpu = %backend.cpu_port(dev), "built topology");
    Ok((topo, flows))
}
