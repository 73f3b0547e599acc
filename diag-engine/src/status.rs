use std::fmt;

use diag_common::{DevPort, SessHdl};

use crate::{
    session::{FailureTally, Session, SessionStats, TestKind, TestState},
    topology::Direction,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Pass,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => f.write_str("PASS"),
            Self::Fail => f.write_str("FAIL"),
        }
    }
}

/// Result of one flow in one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowResult {
    pub flow: usize,
    pub dir: Direction,
    /// Ports in traversal order.
    pub ports: Vec<DevPort>,
    pub tx: u64,
    /// Packets expected back: `tx` times the number of copies per packet.
    pub expected: u64,
    pub rx_good: u64,
    pub rx_bad: u64,
    pub verdict: Verdict,
}

/// The outcome of a test, as returned by status and cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestStatus {
    pub hdl: SessHdl,
    pub kind: TestKind,
    pub state: TestState,
    pub verdict: Verdict,
    pub flows: Vec<FlowResult>,
    pub tx_total: u64,
    pub rx_expected: u64,
    pub rx_good: u64,
    pub rx_bad: u64,
    pub bytes_mismatched: u64,
    pub bits_mismatched: u64,
    pub flips_1_to_0: u64,
    pub flips_0_to_1: u64,
    pub failures: FailureTally,
    pub pkt_id_corrupt: u64,
    pub size_mismatch: u64,
    pub unknown: u64,
    /// Backend calls that failed during cleanup.
    pub cleanup_errors: usize,
}

impl TestStatus {
    /// Evaluates the statistics of a session.
    ///
    /// A flow passes when every expected copy came back unmodified. The test passes when every
    /// flow passes and no packet was corrupt, resized or unknown. A session that was never
    /// started passes vacuously; one that was started but sent nothing fails.
    pub(crate) fn evaluate(session: &Session, state: TestState, stats: &SessionStats) -> Self {
        let mut flows = Vec::new();
        for (k, flow) in session.flows().iter().enumerate() {
            for dir in Direction::BOTH {
                if dir == Direction::Reverse && !(stats.bidirectional && flow.reversible) {
                    continue;
                }

                let s = stats.flows.get(k).map(|f| f[dir]).unwrap_or_default();
                let expected = s.tx * flow.copies;
                let verdict = if s.rx_good == expected && s.rx_bad == 0 {
                    Verdict::Pass
                } else {
                    Verdict::Fail
                };

                flows.push(FlowResult {
                    flow: k,
                    dir,
                    ports: flow.hops(dir),
                    tx: s.tx,
                    expected,
                    rx_good: s.rx_good,
                    rx_bad: s.rx_bad,
                    verdict,
                });
            }
        }

        let tx_total = stats.total(|d| d.tx);
        let rx_expected = flows.iter().map(|f| f.expected).sum();

        let verdict = if !stats.started {
            Verdict::Pass
        } else if tx_total == 0
            || flows.iter().any(|f| f.verdict == Verdict::Fail)
            || stats.pkt_id_corrupt > 0
            || stats.size_mismatch > 0
            || stats.unknown > 0
        {
            Verdict::Fail
        } else {
            Verdict::Pass
        };

        Self {
            hdl: session.hdl(),
            kind: session.kind(),
            state,
            verdict,
            flows,
            tx_total,
            rx_expected,
            rx_good: stats.total(|d| d.rx_good),
            rx_bad: stats.total(|d| d.rx_bad),
            bytes_mismatched: stats.bytes_mismatched,
            bits_mismatched: stats.bits_mismatched,
            flips_1_to_0: stats.flips_1_to_0,
            flips_0_to_1: stats.flips_0_to_1,
            failures: stats.failures,
            pkt_id_corrupt: stats.pkt_id_corrupt,
            size_mismatch: stats.size_mismatch,
            unknown: stats.unknown,
            cleanup_errors: 0,
        }
    }

    #[inline]
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} test, session {}: {} ({})", self.kind, self.hdl, self.verdict, self.state)?;
        writeln!(
            f,
            "  tx {}  expected {}  rx good {}  rx bad {}",
            self.tx_total, self.rx_expected, self.rx_good, self.rx_bad
        )?;

        for r in &self.flows {
            let path: Vec<_> = r.ports.iter().map(ToString::to_string).collect();
            writeln!(
                f,
                "  flow {:>3} {} [{}]  tx {}  expected {}  good {}  bad {}  {}",
                r.flow,
                r.dir,
                path.join(" -> "),
                r.tx,
                r.expected,
                r.rx_good,
                r.rx_bad,
                r.verdict
            )?;
        }

        if self.bytes_mismatched > 0 {
            writeln!(
                f,
                "  mismatched bytes {}  bits {}  1->0 {}  0->1 {}",
                self.bytes_mismatched, self.bits_mismatched, self.flips_1_to_0, self.flips_0_to_1
            )?;
            for (failure, count) in self.failures.iter() {
                if count > 0 {
                    writeln!(f, "    {failure:<14} {count}")?;
                }
            }
        }

        if self.pkt_id_corrupt > 0 || self.size_mismatch > 0 || self.unknown > 0 {
            writeln!(
                f,
                "  corrupt ids {}  resized {}  unknown {}",
                self.pkt_id_corrupt, self.size_mismatch, self.unknown
            )?;
        }

        if self.cleanup_errors > 0 {
            writeln!(f, "  cleanup errors {}", self.cleanup_errors)?;
        }

        Ok(())
    }
}
