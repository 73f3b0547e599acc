use std::fmt;

use parking_lot::Mutex;

use diag_common::{DevPort, LoopbackMode, SessHdl};

use crate::topology::{Flow, TcpPlan};

mod registry;
pub use registry::Registry;

mod stats;
pub use stats::{DirStats, FailureTally, FlowStats, SessionStats};

/// The kind of test a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestKind {
    None,
    Loopback,
    Snake,
    PairedLoopback,
    MulticastLoopback,
    Stream,
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Loopback => "loopback",
            Self::Snake => "snake",
            Self::PairedLoopback => "paired-loopback",
            Self::MulticastLoopback => "multicast-loopback",
            Self::Stream => "stream",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of a set up session. A session that does not exist is either not set up
/// yet or cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestState {
    /// Rules are installed, no traffic is in flight.
    Configured,
    Running,
    /// Draining in-flight traffic.
    Stopping,
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configured => f.write_str("configured"),
            Self::Running => f.write_str("running"),
            Self::Stopping => f.write_str("stopping"),
        }
    }
}

/// A diagnostic session, shared between the lifecycle caller and the receive drivers.
#[derive(Debug)]
pub struct Session {
    hdl: SessHdl,
    kind: TestKind,
    ports: Vec<DevPort>,
    loop_mode: LoopbackMode,
    plan: TcpPlan,
    flows: Vec<Flow>,
    stats: Mutex<SessionStats>,
}

impl Session {
    pub(crate) fn new(
        hdl: SessHdl,
        kind: TestKind,
        ports: Vec<DevPort>,
        loop_mode: LoopbackMode,
        flows: Vec<Flow>,
    ) -> Self {
        let stats = Mutex::new(SessionStats::new(flows.len()));
        Self { hdl, kind, ports, loop_mode, plan: TcpPlan::for_session(hdl), flows, stats }
    }

    #[inline]
    pub const fn hdl(&self) -> SessHdl {
        self.hdl
    }

    #[inline]
    pub const fn kind(&self) -> TestKind {
        self.kind
    }

    #[inline]
    pub fn ports(&self) -> &[DevPort] {
        &self.ports
    }

    #[inline]
    pub const fn loop_mode(&self) -> LoopbackMode {
        self.loop_mode
    }

    #[inline]
    pub const fn plan(&self) -> &TcpPlan {
        &self.plan
    }

    #[inline]
    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    pub(crate) fn stats(&self) -> &Mutex<SessionStats> {
        &self.stats
    }

    /// A copy of the current statistics.
    pub fn snapshot(&self) -> SessionStats {
        self.stats.lock().clone()
    }

    /// Returns `true` if the session owns `port`.
    #[inline]
    pub fn has_port(&self, port: DevPort) -> bool {
        self.ports.contains(&port)
    }
}

/// A printable summary of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub hdl: SessHdl,
    pub kind: TestKind,
    pub state: TestState,
    pub loop_mode: LoopbackMode,
    pub ports: Vec<DevPort>,
    pub bidirectional: bool,
    pub pkt_sizes: Vec<usize>,
}

impl SessionInfo {
    pub(crate) fn new(session: &Session, state: TestState) -> Self {
        let stats = session.stats.lock();
        Self {
            hdl: session.hdl,
            kind: session.kind,
            state,
            loop_mode: session.loop_mode,
            ports: session.ports.clone(),
            bidirectional: stats.bidirectional,
            pkt_sizes: stats.pkt_sizes.clone(),
        }
    }
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "session {} ({})", self.hdl, self.hdl.dev())?;
        writeln!(f, "  test:      {}", self.kind)?;
        writeln!(f, "  state:     {}", self.state)?;
        writeln!(f, "  loopback:  {}", self.loop_mode)?;
        writeln!(f, "  bidir:     {}", self.bidirectional)?;

        write!(f, "  ports:    ")?;
        for port in &self.ports {
            write!(f, " {port}")?;
        }
        writeln!(f)?;

        write!(f, "  sizes:    ")?;
        if self.pkt_sizes.is_empty() {
            write!(f, " -")?;
        }
        for size in &self.pkt_sizes {
            write!(f, " {size}")?;
        }
        writeln!(f)
    }
}
