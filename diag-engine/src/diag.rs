use std::{fmt, sync::Arc};

use bytes::Bytes;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info, warn, Instrument};

use diag_backend::{Backend, BackendError, PortClass, RuleHandle, RxPath, RxStream};
use diag_common::{DevId, DevPort, LoopbackMode, PortSelection, SessHdl};
use diag_wire::{
    pkt_id::MAX_REPLICATION, IdLayout, PacketId, PayloadPattern, MAX_PKT_SIZE, MIN_PKT_SIZE,
    MIN_PKT_SIZE_REDUCED, PKT_HDR_LEN,
};

use crate::{
    ctx::Shared,
    db::FlipRecord,
    error::{DiagError, Result},
    options::{DiagOptions, MAX_SESSIONS_CEILING},
    pktgen::PktGenAllocator,
    rx::{RxDriver, RxStats},
    session::{Registry, Session, SessionInfo, SessionStats, TestKind, TestState},
    status::TestStatus,
    topology::{self, Direction, StartParams, TestConfig, TopoCx, Topology},
};

/// Lifecycle state of one session, owned by the caller side.
struct SessionCtl<B> {
    session: Arc<Session>,
    topo: Box<dyn Topology<B>>,
    state: TestState,
    /// Every installed test rule, forward first.
    rules: Vec<RuleHandle>,
    reverse_installed: bool,
}

/// Per-device context, created on attach.
struct Device<B> {
    registry: Registry,
    pktgen: Mutex<PktGenAllocator>,
    sessions: FxHashMap<SessHdl, SessionCtl<B>>,
}

/// A running receive driver.
struct RxTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// The diagnostics engine.
///
/// Owns the forwarding backend, one context per attached device and the packet database.
/// Lifecycle calls take `&mut self`, so setup, start, stop and cleanup of sessions are always
/// serialized, while receive drivers attached with [`Diag::attach_rx`] run concurrently.
///
/// Dropping the engine stops all receive drivers. Sessions still set up at that point leave
/// their rules installed in the backend.
pub struct Diag<B: Backend> {
    backend: B,
    shared: Arc<Shared>,
    options: DiagOptions,
    devices: FxHashMap<DevId, Device<B>>,
    rx_tasks: FxHashMap<RxPath, RxTask>,
    cancel: CancellationToken,
}

impl<B: Backend> Diag<B> {
    pub fn new(backend: B) -> Self {
        Self::with_options(backend, DiagOptions::default())
    }

    pub fn with_options(backend: B, options: DiagOptions) -> Self {
        Self {
            backend,
            shared: Arc::new(Shared::new(&options)),
            options,
            devices: FxHashMap::default(),
            rx_tasks: FxHashMap::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> &DiagOptions {
        &self.options
    }

    /// Creates the diagnostics context of a device.
    pub fn attach_device(&mut self, dev: DevId) -> Result<()> {
        if self.devices.contains_key(&dev) {
            return Err(DiagError::DeviceAttached(dev));
        }
        if self.backend.ports(dev, PortClass::All).is_empty() {
            return Err(BackendError::NoDevice(dev).into());
        }

        self.devices.insert(
            dev,
            Device {
                registry: Registry::new(dev, self.options.max_sessions),
                pktgen: Mutex::new(PktGenAllocator::new()),
                sessions: FxHashMap::default(),
            },
        );

        info!(%dev, "attached device");
        Ok(())
    }

    /// Drops the context of a device. Refused while the device has sessions.
    pub fn detach_device(&mut self, dev: DevId) -> Result<()> {
        let device = self.devices.get(&dev).ok_or(DiagError::DeviceNotAttached(dev))?;
        if !device.sessions.is_empty() {
            return Err(DiagError::InvalidState(format!(
                "{dev} still has {} sessions",
                device.sessions.len()
            )));
        }

        self.devices.remove(&dev);
        info!(%dev, "detached device");
        Ok(())
    }

    /// Spawns a driver classifying every packet received on `stream`. One driver per path.
    pub fn attach_rx(&mut self, path: RxPath, stream: RxStream) -> Result<()> {
        if self.rx_tasks.get(&path).is_some_and(|t| !t.handle.is_finished()) {
            return Err(DiagError::InvalidState(format!("receive path {path} is already attached")));
        }

        let cancel = self.cancel.child_token();
        let driver = RxDriver {
            path,
            stream,
            shared: Arc::clone(&self.shared),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(driver.run());
        self.rx_tasks.insert(path, RxTask { cancel, handle });

        Ok(())
    }

    /// Stops the driver of a receive path and waits for it to exit.
    pub async fn detach_rx(&mut self, path: RxPath) -> Result<()> {
        let task = self
            .rx_tasks
            .remove(&path)
            .ok_or_else(|| DiagError::InvalidState(format!("receive path {path} is not attached")))?;

        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            warn!(%path, error = %e, "receive driver panicked");
        }

        Ok(())
    }

    /// Sets up a test on `ports` of `dev`, returning the new session handle.
    ///
    /// Validates the ports, checks for conflicts with live sessions, allocates a handle,
    /// installs the forward rules and puts every port not shared with another session into
    /// `loop_mode`, then waits for links to settle. On failure everything done so far is
    /// undone.
    pub async fn setup(
        &mut self,
        dev: DevId,
        config: TestConfig,
        ports: impl Into<PortSelection>,
        loop_mode: LoopbackMode,
    ) -> Result<SessHdl> {
        let span = debug_span!("setup", %dev, kind = %config.kind());
        self.setup_inner(dev, config, ports.into(), loop_mode).instrument(span).await
    }

    pub async fn loopback_setup(
        &mut self,
        dev: DevId,
        ports: impl Into<PortSelection>,
        loop_mode: LoopbackMode,
    ) -> Result<SessHdl> {
        self.setup(dev, TestConfig::Loopback, ports, loop_mode).await
    }

    pub async fn snake_setup(
        &mut self,
        dev: DevId,
        ports: impl Into<PortSelection>,
        loop_mode: LoopbackMode,
    ) -> Result<SessHdl> {
        self.setup(dev, TestConfig::Snake, ports, loop_mode).await
    }

    pub async fn pair_setup(
        &mut self,
        dev: DevId,
        ports: impl Into<PortSelection>,
        loop_mode: LoopbackMode,
    ) -> Result<SessHdl> {
        self.setup(dev, TestConfig::Pair, ports, loop_mode).await
    }

    /// Multicast loopback with the configured number of extra copies.
    pub async fn multicast_setup(
        &mut self,
        dev: DevId,
        ports: impl Into<PortSelection>,
        loop_mode: LoopbackMode,
    ) -> Result<SessHdl> {
        let config = TestConfig::Multicast { extra_copies: self.options.mc_extra_copies };
        self.setup(dev, config, ports, loop_mode).await
    }

    pub async fn stream_setup(
        &mut self,
        dev: DevId,
        ports: impl Into<PortSelection>,
        loop_mode: LoopbackMode,
        pkt_rate: u64,
        continuous: bool,
    ) -> Result<SessHdl> {
        self.setup(dev, TestConfig::Stream { pkt_rate, continuous }, ports, loop_mode).await
    }

    async fn setup_inner(
        &mut self,
        dev: DevId,
        config: TestConfig,
        selection: PortSelection,
        loop_mode: LoopbackMode,
    ) -> Result<SessHdl> {
        let ports = self.expand_ports(dev, selection)?;
        self.check_id_range(dev, &ports)?;
        let Device { registry, pktgen, sessions } =
            self.devices.get_mut(&dev).ok_or(DiagError::DeviceNotAttached(dev))?;

        if !loop_mode.is_loopback() {
            warn!("ports will not loop back, traffic relies on external cabling");
        }

        if let Some((session, port)) =
            registry.overlap_check(&ports, loop_mode, self.options.drain_full_range)
        {
            return Err(DiagError::Overlap { port, session });
        }

        let (mut topo, flows) = topology::build(config, &self.backend, dev, &ports)?;

        let hdl = registry.allocate().ok_or(DiagError::NoResources("session handle"))?;
        registry.register(hdl, &ports, loop_mode);
        let session = Arc::new(Session::new(hdl, config.kind(), ports, loop_mode, flows));

        let cx = TopoCx {
            backend: &self.backend,
            dev,
            shared: &self.shared,
            options: &self.options,
            pktgen: &*pktgen,
        };

        let rules = match install(&cx, registry, topo.as_mut(), &session).await {
            Ok(rules) => rules,
            Err(e) => {
                registry.free(hdl);
                warn!(sess = %hdl, error = %e, "setup failed, rolled back");
                return Err(e);
            }
        };

        info!(sess = %hdl, ports = session.ports().len(), %loop_mode, "session set up");
        sessions.insert(
            hdl,
            SessionCtl {
                session: Arc::clone(&session),
                topo,
                state: TestState::Configured,
                rules,
                reverse_installed: false,
            },
        );
        self.shared.insert_session(session);

        Ok(hdl)
    }

    /// Sends `num_packets` packets of `pkt_size` bytes per flow, and in the reverse direction
    /// as well if `bidir` is set.
    pub async fn start(
        &mut self,
        hdl: SessHdl,
        num_packets: u64,
        pkt_size: usize,
        bidir: bool,
    ) -> Result<()> {
        self.check_pkt_size(pkt_size)?;
        let params = StartParams { num_packets, pkt_size, bidir };

        let Device { pktgen, sessions, .. } =
            self.devices.get_mut(&hdl.dev()).ok_or(DiagError::SessionNotFound(hdl))?;
        let ctl = sessions.get_mut(&hdl).ok_or(DiagError::SessionNotFound(hdl))?;
        if ctl.state != TestState::Configured {
            return Err(DiagError::AlreadyRunning(hdl));
        }

        let cx = TopoCx {
            backend: &self.backend,
            dev: hdl.dev(),
            shared: &self.shared,
            options: &self.options,
            pktgen: &*pktgen,
        };

        if bidir && !ctl.reverse_installed {
            let rules = ctl.topo.rules(&cx, &ctl.session, Direction::Reverse);
            let handles = cx.install_rules(&rules).await?;
            ctl.rules.extend(handles);
            ctl.reverse_installed = true;
        }

        {
            let mut stats = ctl.session.stats().lock();
            stats.started = true;
            stats.pkt_sizes.push(pkt_size);
            if bidir {
                stats.bidirectional = true;
            }
        }

        ctl.state = TestState::Running;
        if let Err(e) = ctl.topo.start(&cx, &ctl.session, &params).await {
            ctl.state = TestState::Configured;
            warn!(sess = %hdl, error = %e, "start failed");
            return Err(e);
        }

        info!(sess = %hdl, num_packets, pkt_size, bidir, "session started");
        Ok(())
    }

    /// Halts traffic and drains whatever is still in flight.
    pub async fn stop(&mut self, hdl: SessHdl) -> Result<()> {
        let Device { pktgen, sessions, .. } =
            self.devices.get_mut(&hdl.dev()).ok_or(DiagError::SessionNotFound(hdl))?;
        let ctl = sessions.get_mut(&hdl).ok_or(DiagError::SessionNotFound(hdl))?;
        if ctl.state != TestState::Running {
            return Err(DiagError::NotRunning(hdl));
        }

        let cx = TopoCx {
            backend: &self.backend,
            dev: hdl.dev(),
            shared: &self.shared,
            options: &self.options,
            pktgen: &*pktgen,
        };

        ctl.state = TestState::Stopping;
        let halted = ctl.topo.halt(&cx, &ctl.session).await;
        let drained = topology::drain(&cx, &ctl.session).await;
        ctl.state = TestState::Configured;

        info!(sess = %hdl, "session stopped");
        halted.and(drained)
    }

    /// Evaluates the statistics of a session.
    pub async fn status(&self, hdl: SessHdl) -> Result<TestStatus> {
        let device = self.devices.get(&hdl.dev()).ok_or(DiagError::SessionNotFound(hdl))?;
        let ctl = device.sessions.get(&hdl).ok_or(DiagError::SessionNotFound(hdl))?;

        let cx = TopoCx {
            backend: &self.backend,
            dev: hdl.dev(),
            shared: &self.shared,
            options: &self.options,
            pktgen: &device.pktgen,
        };
        ctl.topo.refresh(&cx, &ctl.session).await?;

        Ok(TestStatus::evaluate(&ctl.session, ctl.state, &ctl.session.snapshot()))
    }

    /// Tears a session down and returns its final status.
    ///
    /// A running session is stopped first. Loopback modes are reverted on ports no other
    /// session holds, all rules and backend objects are released and the session's packets are
    /// erased from the database. Backend failures do not stop the cleanup; they are counted in
    /// [`TestStatus::cleanup_errors`].
    pub async fn cleanup(&mut self, hdl: SessHdl) -> Result<TestStatus> {
        let span = debug_span!("cleanup", sess = %hdl);
        self.cleanup_inner(hdl).instrument(span).await
    }

    async fn cleanup_inner(&mut self, hdl: SessHdl) -> Result<TestStatus> {
        let mut errors = 0;
        if self.state(hdl)? == TestState::Running {
            if let Err(e) = self.stop(hdl).await {
                warn!(error = %e, "failed to stop session");
                errors += 1;
            }
        }

        let Device { registry, pktgen, sessions } =
            self.devices.get_mut(&hdl.dev()).ok_or(DiagError::SessionNotFound(hdl))?;
        let mut ctl = sessions.remove(&hdl).ok_or(DiagError::SessionNotFound(hdl))?;

        let cx = TopoCx {
            backend: &self.backend,
            dev: hdl.dev(),
            shared: &self.shared,
            options: &self.options,
            pktgen: &*pktgen,
        };

        if let Err(e) = ctl.topo.refresh(&cx, &ctl.session).await {
            warn!(error = %e, "failed to read final counters");
            errors += 1;
        }
        errors += revert_modes(&cx, registry, hdl, ctl.session.ports()).await;
        errors += cx.remove_rules(&ctl.rules).await;
        errors += ctl.topo.release(&cx, &ctl.session).await;

        let swept = self.shared.db.sweep_by_session(hdl);
        self.shared.remove_session(hdl);
        registry.free(hdl);

        let mut status = TestStatus::evaluate(&ctl.session, ctl.state, &ctl.session.snapshot());
        status.cleanup_errors = errors;

        info!(verdict = %status.verdict, swept, errors, "session cleaned up");
        Ok(status)
    }

    /// Changes the packet rate of a running stream test.
    pub async fn stream_adjust(&mut self, hdl: SessHdl, pkt_rate: u64) -> Result<()> {
        let Device { pktgen, sessions, .. } =
            self.devices.get_mut(&hdl.dev()).ok_or(DiagError::SessionNotFound(hdl))?;
        let ctl = sessions.get_mut(&hdl).ok_or(DiagError::SessionNotFound(hdl))?;
        if ctl.session.kind() != TestKind::Stream {
            return Err(DiagError::invalid(format!("session {hdl} is not a stream test")));
        }
        if ctl.state != TestState::Running {
            return Err(DiagError::NotRunning(hdl));
        }

        let cx = TopoCx {
            backend: &self.backend,
            dev: hdl.dev(),
            shared: &self.shared,
            options: &self.options,
            pktgen: &*pktgen,
        };
        ctl.topo.adjust(&cx, &ctl.session, pkt_rate).await
    }

    /// Returns `true` if `hdl` is a live session.
    pub fn is_valid(&self, hdl: SessHdl) -> bool {
        self.ctl(hdl).is_ok()
    }

    pub fn session_info(&self, hdl: SessHdl) -> Result<SessionInfo> {
        let ctl = self.ctl(hdl)?;
        Ok(SessionInfo::new(&ctl.session, ctl.state))
    }

    /// All live sessions, ordered by handle.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<_> = self
            .devices
            .values()
            .flat_map(|d| d.sessions.values())
            .map(|ctl| SessionInfo::new(&ctl.session, ctl.state))
            .collect();
        infos.sort_by_key(|i| i.hdl);
        infos
    }

    /// A copy of the running statistics of a session.
    pub fn stats(&self, hdl: SessHdl) -> Result<SessionStats> {
        Ok(self.ctl(hdl)?.session.snapshot())
    }

    /// Resets the statistics of a session that is not running.
    pub fn clear_stats(&mut self, hdl: SessHdl) -> Result<()> {
        let ctl = self.ctl(hdl)?;
        if ctl.state != TestState::Configured {
            return Err(DiagError::InvalidState(format!("session {hdl} is {}", ctl.state)));
        }

        ctl.session.stats().lock().clear();
        debug!(sess = %hdl, "cleared statistics");
        Ok(())
    }

    /// Global receive statistics.
    pub fn rx_stats(&self) -> &RxStats {
        &self.shared.rx_stats
    }

    /// Flip offsets observed on received copies of a packet.
    pub fn packet_flips(&self, id: PacketId) -> Option<FlipRecord> {
        self.shared.db.flips(id)
    }

    /// Number of packets recorded in the packet database.
    pub fn recorded_packets(&self) -> usize {
        self.shared.db.len()
    }

    /// Sets the number of concurrent sessions per device, capped at 128.
    pub fn set_max_sessions(&mut self, max: usize) {
        self.options.max_sessions = max.clamp(1, MAX_SESSIONS_CEILING);
        for device in self.devices.values_mut() {
            device.registry.set_max(self.options.max_sessions);
        }
    }

    /// Switches the identifier layout. Refused while sessions exist, since their packets
    /// could no longer be decoded.
    ///
    /// The reduced identifier has room for 8 bits of session handle, which covers devices 0
    /// and 1 only. Enabling it is refused while a higher device is attached.
    pub fn set_min_pkt_size(&mut self, enabled: bool) -> Result<()> {
        self.check_no_sessions("minimum packet size mode")?;
        if enabled {
            if let Some(dev) = self.devices.keys().find(|dev| !fits_min_size(**dev)) {
                return Err(DiagError::invalid(format!(
                    "{dev} is out of range of minimum size packet identifiers"
                )));
            }
        }
        self.options.min_pkt_size = enabled;
        let layout = if enabled { IdLayout::MinSize } else { IdLayout::Normal };
        self.shared.reconfigure_codec(layout, self.options.replication);
        Ok(())
    }

    /// Sets the identifier replication factor. Refused while sessions exist.
    pub fn set_replication(&mut self, replication: usize) -> Result<()> {
        if replication == 0 || replication > MAX_REPLICATION {
            return Err(DiagError::invalid(format!(
                "replication factor must be in 1..={MAX_REPLICATION}"
            )));
        }
        self.check_no_sessions("replication factor")?;
        self.options.replication = replication;
        let layout = self.shared.codec().layout();
        self.shared.reconfigure_codec(layout, replication);
        Ok(())
    }

    /// Sets the payload pattern. Applies from the next start on.
    pub fn set_payload_pattern(&mut self, pattern: PayloadPattern) {
        self.options.payload = pattern;
    }

    /// Sends the given bytes instead of generated packets, or goes back to generated packets.
    pub fn set_full_packet(&mut self, pkt: Option<Bytes>) -> Result<()> {
        if let Some(pkt) = &pkt {
            if pkt.len() < PKT_HDR_LEN {
                return Err(DiagError::invalid(format!(
                    "full packet of {} bytes is shorter than the header",
                    pkt.len()
                )));
            }
        }
        self.options.full_packet = pkt;
        Ok(())
    }

    /// Enables draining of the full port space. Refused while live sessions share ports.
    pub fn set_drain_full_range(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            for device in self.devices.values() {
                let mut seen = Vec::new();
                for ctl in device.sessions.values() {
                    for port in ctl.session.ports() {
                        if seen.contains(port) {
                            return Err(DiagError::InvalidState(format!(
                                "port {port} is shared between sessions"
                            )));
                        }
                        seen.push(*port);
                    }
                }
            }
        }
        self.options.drain_full_range = enabled;
        Ok(())
    }

    /// Sets how many leading bytes the classifier treats as header.
    pub fn set_classify_header_len(&mut self, len: usize) {
        self.options.classify_header_len = len;
        self.shared.set_header_len(len);
    }

    fn ctl(&self, hdl: SessHdl) -> Result<&SessionCtl<B>> {
        self.devices
            .get(&hdl.dev())
            .and_then(|d| d.sessions.get(&hdl))
            .ok_or(DiagError::SessionNotFound(hdl))
    }

    fn state(&self, hdl: SessHdl) -> Result<TestState> {
        Ok(self.ctl(hdl)?.state)
    }

    fn check_no_sessions(&self, what: &str) -> Result<()> {
        if self.shared.has_sessions() {
            return Err(DiagError::InvalidState(format!("cannot change {what} while sessions exist")));
        }
        Ok(())
    }

    /// Checks that every session handle of `dev` and every port can be stamped into the
    /// current identifier layout.
    fn check_id_range(&self, dev: DevId, ports: &[DevPort]) -> Result<()> {
        let layout = self.shared.codec().layout();
        let last = SessHdl::new(dev, (SessHdl::MAX_SLOTS - 1) as u16);
        for port in ports {
            if let Err(e) = layout.check(last, *port) {
                return Err(DiagError::invalid(format!("{dev} port {port}: {e}")));
            }
        }
        Ok(())
    }

    fn check_pkt_size(&self, size: usize) -> Result<()> {
        let min = if self.options.min_pkt_size { MIN_PKT_SIZE_REDUCED } else { MIN_PKT_SIZE };
        let min = min.max(self.shared.codec().min_packet_size());
        if size < min || size > MAX_PKT_SIZE {
            return Err(DiagError::PacketSize { size, min, max: MAX_PKT_SIZE });
        }
        Ok(())
    }

    /// Resolves a port selection into a validated, duplicate free port list.
    fn expand_ports(&self, dev: DevId, selection: PortSelection) -> Result<Vec<DevPort>> {
        if !self.devices.contains_key(&dev) {
            return Err(DiagError::DeviceNotAttached(dev));
        }

        let eth_cpu = self.backend.eth_cpu_port(dev);
        let class = match selection {
            PortSelection::List(ports) => {
                let known = self.backend.ports(dev, PortClass::All);
                for (i, port) in ports.iter().enumerate() {
                    if !known.contains(port) && Some(*port) != eth_cpu {
                        return Err(DiagError::invalid(format!("port {port} does not exist on {dev}")));
                    }
                    if ports[..i].contains(port) {
                        return Err(DiagError::invalid(format!("port {port} is listed twice")));
                    }
                }
                return Ok(ports);
            }
            PortSelection::All => PortClass::All,
            PortSelection::AllInternal => PortClass::Internal,
            PortSelection::AllMesh => PortClass::Mesh,
        };

        let mut ports = self.backend.ports(dev, class);
        if let Some(cpu) = eth_cpu {
            if !ports.contains(&cpu) {
                ports.push(cpu);
            }
        }

        debug!(%dev, ?class, count = ports.len(), "expanded port selection");
        Ok(ports)
    }
}

impl<B: Backend> Drop for Diag<B> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<B: Backend> fmt::Debug for Diag<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diag")
            .field("options", &self.options)
            .field("devices", &self.devices.keys().collect::<Vec<_>>())
            .field("rx_paths", &self.rx_tasks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn fits_min_size(dev: DevId) -> bool {
    IdLayout::MinSize.check(SessHdl::new(dev, (SessHdl::MAX_SLOTS - 1) as u16), DevPort(0)).is_ok()
}

/// Acquires the topology's backend objects, installs its forward rules and sets loopback
/// modes. Undoes everything on failure.
async fn install<B: Backend>(
    cx: &TopoCx<'_, B>,
    registry: &mut Registry,
    topo: &mut dyn Topology<B>,
    session: &Session,
) -> Result<Vec<RuleHandle>> {
    topo.acquire(cx, session).await?;

    let rules = topo.rules(cx, session, Direction::Forward);
    let handles = match cx.install_rules(&rules).await {
        Ok(handles) => handles,
        Err(e) => {
            topo.release(cx, session).await;
            return Err(e);
        }
    };

    if let Err(e) = set_modes(cx, registry, session).await {
        cx.remove_rules(&handles).await;
        topo.release(cx, session).await;
        return Err(e);
    }

    Ok(handles)
}

/// Puts every session port no other session holds into the session's loopback mode, saving
/// the previous mode, then waits for links to settle.
async fn set_modes<B: Backend>(
    cx: &TopoCx<'_, B>,
    registry: &mut Registry,
    session: &Session,
) -> Result<()> {
    let mut changed = Vec::new();
    for port in session.ports() {
        if registry.port_held_by_other(session.hdl(), *port) {
            continue;
        }

        let result = async {
            let previous = cx.backend.loopback_mode(cx.dev, *port).await?;
            cx.backend.set_loopback_mode(cx.dev, *port, session.loop_mode()).await?;
            Ok::<_, BackendError>(previous)
        }
        .await;

        match result {
            Ok(previous) => {
                registry.save_mode(*port, previous);
                changed.push(*port);
            }
            Err(e) => {
                revert_modes(cx, registry, session.hdl(), &changed).await;
                return Err(e.into());
            }
        }
    }

    if !changed.is_empty() && !cx.options.settle.is_zero() {
        debug!(ports = changed.len(), settle = ?cx.options.settle, "waiting for links to settle");
        tokio::time::sleep(cx.options.settle).await;
    }

    Ok(())
}

/// Restores the saved loopback mode of every port in `ports` that no other session holds.
/// Returns the number of failures.
async fn revert_modes<B: Backend>(
    cx: &TopoCx<'_, B>,
    registry: &mut Registry,
    hdl: SessHdl,
    ports: &[DevPort],
) -> usize {
    let mut errors = 0;
    for port in ports {
        if registry.port_held_by_other(hdl, *port) {
            continue;
        }
        let Some(mode) = registry.take_saved_mode(*port) else {
            continue;
        };
        if let Err(e) = cx.backend.set_loopback_mode(cx.dev, *port, mode).await {
            warn!(%port, %mode, error = %e, "failed to revert loopback mode");
            errors += 1;
        }
    }
    errors
}
