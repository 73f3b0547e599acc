use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use diag_backend::{
    BackendError, Egress, ForwardRule, Forwarding, McGroupHandle, McGroupId, McNodeHandle,
    PacketGen, PacketIo, PktGenApp, PktGenConfig, PortClass, Result, RuleHandle, RxPacket,
    RxPath, RxStream,
};
use diag_common::{DevId, DevPort, LoopbackMode};
use diag_wire::header::tcp_dst;

use crate::{config::SimConfig, generator, impairment::Impairment};

/// Size of a pipe's packet generator buffer.
pub const PKTGEN_BUFFER_LEN: usize = 16 * 1024;

/// Backend calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    InstallRule,
    RemoveRule,
    SetLoopbackMode,
    McGroupCreate,
    McNodeCreate,
    McAssociate,
    PktGenSetup,
    PktGenStart,
    Transmit,
}

/// Packet counters of the whole switch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimCounters {
    /// Packets injected from the CPU.
    pub transmitted: u64,
    /// Packets emitted by packet generators.
    pub generated: u64,
    /// Packets handed to a receive path.
    pub punted: u64,
    /// Packets that left the device on a port without loopback.
    pub egressed: u64,
    /// Packets without a matching rule, lost to an impairment or without a receive path.
    pub dropped: u64,
    /// Packets dropped after exceeding the hop limit.
    pub looped: u64,
}

#[derive(Debug)]
struct McGroup {
    id: McGroupId,
    nodes: Vec<McNodeHandle>,
}

#[derive(Debug)]
struct McNode {
    rid: u16,
    ports: Vec<DevPort>,
}

#[derive(Debug)]
pub(crate) struct App {
    pub(crate) cfg: PktGenConfig,
    pub(crate) template: Bytes,
    pub(crate) counter: Arc<AtomicU64>,
    pub(crate) rate: Arc<AtomicU64>,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

/// Tables of one device.
#[derive(Debug, Default)]
struct DevState {
    rules: FxHashMap<RuleHandle, ForwardRule>,
    modes: FxHashMap<DevPort, LoopbackMode>,
    groups: FxHashMap<McGroupHandle, McGroup>,
    nodes: FxHashMap<McNodeHandle, McNode>,
    impairments: FxHashMap<DevPort, Impairment>,
    apps: FxHashMap<PktGenApp, App>,
}

impl DevState {
    /// The highest priority rule matching the packet; the oldest rule wins ties.
    fn lookup(&self, ingress: DevPort, tcp_dst: u16) -> Option<&ForwardRule> {
        self.rules
            .iter()
            .filter(|(_, r)| r.matches(ingress, tcp_dst))
            .max_by(|(ha, a), (hb, b)| a.priority.cmp(&b.priority).then(hb.cmp(ha)))
            .map(|(_, r)| r)
    }

    /// Egress ports of every copy a multicast group makes.
    fn replicate(&self, id: McGroupId) -> Vec<DevPort> {
        self.groups
            .values()
            .filter(|g| g.id == id)
            .flat_map(|g| g.nodes.iter())
            .filter_map(|n| self.nodes.get(n))
            .flat_map(|n| n.ports.iter().copied())
            .collect()
    }
}

#[derive(Debug, Default)]
struct State {
    devs: FxHashMap<DevId, DevState>,
    next_handle: u64,
    calls: FxHashMap<SimOp, usize>,
    /// Call number at which an operation fails once.
    failures: FxHashMap<SimOp, usize>,
    counters: SimCounters,
}

impl State {
    fn check(&mut self, op: SimOp) -> Result<()> {
        let calls = self.calls.entry(op).or_default();
        *calls += 1;
        if self.failures.get(&op) == Some(&*calls) {
            self.failures.remove(&op);
            debug!(?op, "injecting failure");
            return Err(BackendError::Hardware(format!("injected {op:?} failure")));
        }
        Ok(())
    }

    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn dev(&mut self, dev: DevId) -> Result<&mut DevState> {
        self.devs.get_mut(&dev).ok_or(BackendError::NoDevice(dev))
    }

    /// Runs a packet through the forwarding pipeline, collecting what reaches the CPU.
    fn forward(
        &mut self,
        config: &SimConfig,
        dev: DevId,
        ingress: DevPort,
        data: Vec<u8>,
        punts: &mut Vec<RxPacket>,
    ) {
        let Self { devs, counters, .. } = self;
        let Some(state) = devs.get(&dev) else {
            counters.dropped += 1;
            return;
        };

        let mut queue = VecDeque::from([(ingress, data, 0)]);
        while let Some((ingress, data, hops)) = queue.pop_front() {
            if hops >= config.hop_limit {
                warn!(%dev, %ingress, hops, "packet exceeded the hop limit");
                counters.looped += 1;
                continue;
            }

            let Some(rule) = tcp_dst(&data).and_then(|port| state.lookup(ingress, port)) else {
                trace!(%dev, %ingress, "no matching rule");
                counters.dropped += 1;
                continue;
            };

            let egress = match rule.egress {
                Egress::Port(port) => vec![port],
                Egress::Multicast(id) => state.replicate(id),
            };

            for port in egress {
                if port == config.cpu_port() {
                    punts.push(RxPacket { dev, port: ingress, data: Bytes::from(data.clone()) });
                    continue;
                }

                if !state.modes.get(&port).copied().unwrap_or_default().is_loopback() {
                    counters.egressed += 1;
                    continue;
                }

                let mut copy = data.clone();
                if let Some(imp) = state.impairments.get(&port) {
                    if !imp.apply(&mut copy) {
                        counters.dropped += 1;
                        continue;
                    }
                }
                queue.push_back((port, copy, hops + 1));
            }
        }
    }
}

struct Inner {
    config: SimConfig,
    state: Mutex<State>,
    rx: Mutex<FxHashMap<RxPath, mpsc::UnboundedSender<RxPacket>>>,
}

/// An in-memory switch.
///
/// Rules forward packets between ports by TCP destination port range. A packet egressing a
/// port in a loopback mode re-ingresses on the same port after the port's [`Impairment`] is
/// applied; a packet egressing the CPU port is delivered on the configured receive path. Clones
/// share the same switch.
#[derive(Clone)]
pub struct SimSwitch {
    inner: Arc<Inner>,
}

impl Default for SimSwitch {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl fmt::Debug for SimSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimSwitch").field("config", &self.inner.config).finish_non_exhaustive()
    }
}

impl SimSwitch {
    pub fn new(config: SimConfig) -> Self {
        let state = State {
            devs: config.devices.iter().map(|d| (*d, DevState::default())).collect(),
            ..Default::default()
        };

        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
                rx: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.inner.config
    }

    /// Opens a receive path. Replaces an earlier stream of the same path.
    pub fn rx_stream(&self, path: RxPath) -> RxStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.rx.lock().insert(path, tx);
        Box::pin(UnboundedReceiverStream::new(rx))
    }

    /// Applies `imp` to every packet leaving `port`.
    pub fn set_impairment(&self, dev: DevId, port: DevPort, imp: Impairment) {
        let mut state = self.inner.state.lock();
        if let Ok(d) = state.dev(dev) {
            d.impairments.insert(port, imp);
        }
    }

    pub fn clear_impairment(&self, dev: DevId, port: DevPort) {
        let mut state = self.inner.state.lock();
        if let Ok(d) = state.dev(dev) {
            d.impairments.remove(&port);
        }
    }

    /// Makes the `n`-th next call of `op` fail. `n` counts from 1.
    pub fn fail_on(&self, op: SimOp, n: usize) {
        let mut state = self.inner.state.lock();
        let calls = state.calls.get(&op).copied().unwrap_or_default();
        state.failures.insert(op, calls + n.max(1));
    }

    /// Number of calls of `op` so far.
    pub fn calls(&self, op: SimOp) -> usize {
        self.inner.state.lock().calls.get(&op).copied().unwrap_or_default()
    }

    pub fn counters(&self) -> SimCounters {
        self.inner.state.lock().counters
    }

    /// Installed rules of a device.
    pub fn rules(&self, dev: DevId) -> Vec<ForwardRule> {
        let state = self.inner.state.lock();
        let mut rules: Vec<_> = state
            .devs
            .get(&dev)
            .map(|d| d.rules.iter().map(|(h, r)| (*h, *r)).collect())
            .unwrap_or_default();
        rules.sort_by_key(|(h, _)| *h);
        rules.into_iter().map(|(_, r)| r).collect()
    }

    pub fn rule_count(&self, dev: DevId) -> usize {
        self.inner.state.lock().devs.get(&dev).map_or(0, |d| d.rules.len())
    }

    /// Number of multicast groups and nodes of a device.
    pub fn mc_objects(&self, dev: DevId) -> (usize, usize) {
        self.inner.state.lock().devs.get(&dev).map_or((0, 0), |d| (d.groups.len(), d.nodes.len()))
    }

    pub fn pktgen_apps(&self, dev: DevId) -> usize {
        self.inner.state.lock().devs.get(&dev).map_or(0, |d| d.apps.len())
    }

    /// The current loopback mode of a port, without going through the backend API.
    pub fn port_mode(&self, dev: DevId, port: DevPort) -> LoopbackMode {
        let state = self.inner.state.lock();
        state.devs.get(&dev).and_then(|d| d.modes.get(&port)).copied().unwrap_or_default()
    }

    fn check_port(&self, port: DevPort) -> Result<()> {
        if !self.inner.config.port_exists(port) {
            return Err(BackendError::NoPort(port));
        }
        Ok(())
    }

    /// Hands punted packets to the configured receive path.
    fn deliver(&self, punts: Vec<RxPacket>) {
        if punts.is_empty() {
            return;
        }

        let path = self.inner.config.punt_path;
        let mut delivered = 0;
        {
            let rx = self.inner.rx.lock();
            if let Some(tx) = rx.get(&path) {
                for pkt in punts.iter().cloned() {
                    if tx.send(pkt).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }

        let mut state = self.inner.state.lock();
        state.counters.punted += delivered;
        state.counters.dropped += punts.len() as u64 - delivered;
    }

    /// Emits `count` copies of an application's template.
    pub(crate) fn generate(&self, dev: DevId, app: PktGenApp, count: u64) -> u64 {
        let mut punts = Vec::new();
        let emitted = {
            let mut state = self.inner.state.lock();
            let Some((template, counter)) = state
                .devs
                .get(&dev)
                .and_then(|d| d.apps.get(&app))
                .map(|a| (a.template.clone(), Arc::clone(&a.counter)))
            else {
                return 0;
            };

            let port = self.inner.config.pktgen_port(app.pipe);
            for _ in 0..count {
                state.forward(&self.inner.config, dev, port, template.to_vec(), &mut punts);
            }
            state.counters.generated += count;
            counter.fetch_add(count, Ordering::Relaxed);
            count
        };

        self.deliver(punts);
        emitted
    }
}

#[async_trait]
impl Forwarding for SimSwitch {
    fn cpu_port(&self, _dev: DevId) -> DevPort {
        self.inner.config.cpu_port()
    }

    fn eth_cpu_port(&self, _dev: DevId) -> Option<DevPort> {
        self.inner.config.eth_cpu_port()
    }

    fn ports(&self, dev: DevId, class: PortClass) -> Vec<DevPort> {
        if !self.inner.config.has_device(dev) {
            return Vec::new();
        }
        self.inner.config.ports(class)
    }

    fn num_pipes(&self, _dev: DevId) -> u16 {
        self.inner.config.num_pipes
    }

    async fn install_rule(&self, dev: DevId, rule: &ForwardRule) -> Result<RuleHandle> {
        self.check_port(rule.ingress)?;
        if let Egress::Port(port) = rule.egress {
            self.check_port(port)?;
        }

        let mut state = self.inner.state.lock();
        state.check(SimOp::InstallRule)?;
        let hdl = RuleHandle(state.handle());
        state.dev(dev)?.rules.insert(hdl, *rule);

        trace!(%dev, %hdl, %rule, "installed rule");
        Ok(hdl)
    }

    async fn remove_rule(&self, dev: DevId, hdl: RuleHandle) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.check(SimOp::RemoveRule)?;
        state.dev(dev)?.rules.remove(&hdl).map(|_| ()).ok_or(BackendError::NoRule(hdl))
    }

    async fn set_loopback_mode(&self, dev: DevId, port: DevPort, mode: LoopbackMode) -> Result<()> {
        self.check_port(port)?;

        let mut state = self.inner.state.lock();
        state.check(SimOp::SetLoopbackMode)?;
        state.dev(dev)?.modes.insert(port, mode);
        Ok(())
    }

    async fn loopback_mode(&self, dev: DevId, port: DevPort) -> Result<LoopbackMode> {
        self.check_port(port)?;

        let mut state = self.inner.state.lock();
        Ok(state.dev(dev)?.modes.get(&port).copied().unwrap_or_default())
    }

    async fn mc_group_create(&self, dev: DevId, group: McGroupId) -> Result<McGroupHandle> {
        let mut state = self.inner.state.lock();
        state.check(SimOp::McGroupCreate)?;
        let hdl = McGroupHandle(state.handle());
        state.dev(dev)?.groups.insert(hdl, McGroup { id: group, nodes: Vec::new() });
        Ok(hdl)
    }

    async fn mc_group_destroy(&self, dev: DevId, group: McGroupHandle) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.dev(dev)?.groups.remove(&group).map(|_| ()).ok_or(BackendError::NoMcObject(group.0))
    }

    async fn mc_node_create(&self, dev: DevId, rid: u16, ports: &[DevPort]) -> Result<McNodeHandle> {
        for port in ports {
            self.check_port(*port)?;
        }

        let mut state = self.inner.state.lock();
        state.check(SimOp::McNodeCreate)?;
        let hdl = McNodeHandle(state.handle());
        state.dev(dev)?.nodes.insert(hdl, McNode { rid, ports: ports.to_vec() });
        trace!(%dev, rid, copies = ports.len(), "created replication node");
        Ok(hdl)
    }

    async fn mc_node_update(&self, dev: DevId, node: McNodeHandle, ports: &[DevPort]) -> Result<()> {
        let mut state = self.inner.state.lock();
        let n = state.dev(dev)?.nodes.get_mut(&node).ok_or(BackendError::NoMcObject(node.0))?;
        n.ports = ports.to_vec();
        Ok(())
    }

    async fn mc_node_destroy(&self, dev: DevId, node: McNodeHandle) -> Result<()> {
        let mut state = self.inner.state.lock();
        let d = state.dev(dev)?;
        if d.groups.values().any(|g| g.nodes.contains(&node)) {
            return Err(BackendError::Hardware(format!("node {} is still associated", node.0)));
        }
        let n = d.nodes.remove(&node).ok_or(BackendError::NoMcObject(node.0))?;
        trace!(%dev, rid = n.rid, "destroyed replication node");
        Ok(())
    }

    async fn mc_associate(&self, dev: DevId, group: McGroupHandle, node: McNodeHandle) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.check(SimOp::McAssociate)?;
        let d = state.dev(dev)?;
        if !d.nodes.contains_key(&node) {
            return Err(BackendError::NoMcObject(node.0));
        }
        d.groups.get_mut(&group).ok_or(BackendError::NoMcObject(group.0))?.nodes.push(node);
        Ok(())
    }

    async fn mc_dissociate(&self, dev: DevId, group: McGroupHandle, node: McNodeHandle) -> Result<()> {
        let mut state = self.inner.state.lock();
        let g = state.dev(dev)?.groups.get_mut(&group).ok_or(BackendError::NoMcObject(group.0))?;
        let before = g.nodes.len();
        g.nodes.retain(|n| *n != node);
        if g.nodes.len() == before {
            return Err(BackendError::NoMcObject(node.0));
        }
        Ok(())
    }
}

#[async_trait]
impl PacketGen for SimSwitch {
    fn pktgen_port(&self, _dev: DevId, pipe: u16) -> DevPort {
        self.inner.config.pktgen_port(pipe)
    }

    async fn pktgen_setup(
        &self,
        dev: DevId,
        app: PktGenApp,
        cfg: &PktGenConfig,
        template: Bytes,
    ) -> Result<()> {
        if app.pipe >= self.inner.config.num_pipes {
            return Err(BackendError::NoPktGenApp(app));
        }
        if template.len() != cfg.pkt_len || cfg.buffer_offset + cfg.pkt_len > PKTGEN_BUFFER_LEN {
            return Err(BackendError::Hardware(format!(
                "template of {} bytes at {} does not fit the generator buffer",
                template.len(),
                cfg.buffer_offset
            )));
        }

        let mut state = self.inner.state.lock();
        state.check(SimOp::PktGenSetup)?;
        let d = state.dev(dev)?;
        if d.apps.get(&app).is_some_and(|a| a.running.is_some()) {
            return Err(BackendError::Hardware(format!("{app} is running")));
        }
        d.apps.insert(
            app,
            App {
                cfg: *cfg,
                template,
                counter: Arc::default(),
                rate: Arc::new(AtomicU64::new(cfg.pkt_rate)),
                running: None,
            },
        );
        Ok(())
    }

    async fn pktgen_start(&self, dev: DevId, app: PktGenApp) -> Result<()> {
        let count = {
            let mut state = self.inner.state.lock();
            state.check(SimOp::PktGenStart)?;
            let a = state.dev(dev)?.apps.get_mut(&app).ok_or(BackendError::NoPktGenApp(app))?;
            if a.running.is_some() {
                return Ok(());
            }

            match a.cfg.pkt_count {
                Some(count) => count,
                None => {
                    let cancel = CancellationToken::new();
                    let task = generator::spawn(self.clone(), dev, app, Arc::clone(&a.rate), cancel.clone());
                    a.running = Some((cancel, task));
                    debug!(%dev, %app, rate = a.cfg.pkt_rate, "generator running");
                    return Ok(());
                }
            }
        };

        self.generate(dev, app, count);
        debug!(%dev, %app, count, "generator burst done");
        Ok(())
    }

    async fn pktgen_adjust(&self, dev: DevId, app: PktGenApp, pkt_rate: u64) -> Result<()> {
        let mut state = self.inner.state.lock();
        let a = state.dev(dev)?.apps.get(&app).ok_or(BackendError::NoPktGenApp(app))?;
        a.rate.store(pkt_rate, Ordering::Relaxed);
        Ok(())
    }

    async fn pktgen_stop(&self, dev: DevId, app: PktGenApp) -> Result<()> {
        let running = {
            let mut state = self.inner.state.lock();
            state.dev(dev)?.apps.get_mut(&app).ok_or(BackendError::NoPktGenApp(app))?.running.take()
        };

        if let Some((cancel, task)) = running {
            cancel.cancel();
            if let Err(e) = task.await {
                warn!(%app, error = %e, "generator task failed");
            }
        }
        Ok(())
    }

    async fn pktgen_counter(&self, dev: DevId, app: PktGenApp) -> Result<u64> {
        let mut state = self.inner.state.lock();
        let a = state.dev(dev)?.apps.get(&app).ok_or(BackendError::NoPktGenApp(app))?;
        Ok(a.counter.load(Ordering::Relaxed))
    }

    async fn pktgen_cleanup(&self, dev: DevId, app: PktGenApp) -> Result<()> {
        self.pktgen_stop(dev, app).await?;
        let mut state = self.inner.state.lock();
        state.dev(dev)?.apps.remove(&app);
        Ok(())
    }
}

#[async_trait]
impl PacketIo for SimSwitch {
    async fn transmit(&self, dev: DevId, pkt: Bytes) -> Result<()> {
        let mut punts = Vec::new();
        {
            let mut state = self.inner.state.lock();
            state.check(SimOp::Transmit).map_err(|e| BackendError::Transmit(e.to_string()))?;
            if !self.inner.config.has_device(dev) {
                return Err(BackendError::NoDevice(dev));
            }
            state.counters.transmitted += 1;
            let cpu = self.inner.config.cpu_port();
            state.forward(&self.inner.config, dev, cpu, pkt.to_vec(), &mut punts);
        }

        self.deliver(punts);
        Ok(())
    }
}
