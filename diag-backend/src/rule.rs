use std::fmt;

use diag_common::DevPort;

use crate::McGroupId;

/// Priority of the rules making up a test topology.
pub const TEST_RULE_PRIORITY: u32 = 10;
/// Priority of the temporary drain-to-CPU rules; must beat [`TEST_RULE_PRIORITY`].
pub const DRAIN_RULE_PRIORITY: u32 = 100;

/// Opaque handle of an installed rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleHandle(pub u64);

impl fmt::Display for RuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

/// An inclusive range of TCP destination ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcpRange {
    pub start: u16,
    pub end: u16,
}

impl TcpRange {
    /// The whole TCP port space.
    pub const FULL: Self = Self { start: 0, end: u16::MAX };

    #[inline]
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    #[inline]
    pub const fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }

    #[inline]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Number of ports in the range.
    #[allow(clippy::len_without_is_empty)]
    #[inline]
    pub const fn len(&self) -> u32 {
        self.end as u32 - self.start as u32 + 1
    }
}

impl fmt::Display for TcpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Where a matching packet goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Egress {
    Port(DevPort),
    Multicast(McGroupId),
}

impl fmt::Display for Egress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Port(p) => write!(f, "port {p}"),
            Self::Multicast(g) => write!(f, "{g}"),
        }
    }
}

/// Forward packets arriving on `ingress` whose TCP destination port falls in `tcp_dst` to
/// `egress`. Among matching rules the highest `priority` wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForwardRule {
    pub ingress: DevPort,
    pub egress: Egress,
    pub tcp_dst: TcpRange,
    pub priority: u32,
}

impl ForwardRule {
    pub const fn new(ingress: DevPort, egress: Egress, tcp_dst: TcpRange) -> Self {
        Self { ingress, egress, tcp_dst, priority: TEST_RULE_PRIORITY }
    }

    pub const fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    #[inline]
    pub const fn matches(&self, ingress: DevPort, tcp_dst: u16) -> bool {
        self.ingress.0 == ingress.0 && self.tcp_dst.contains(tcp_dst)
    }
}

impl fmt::Display for ForwardRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] -> {} (prio {})", self.ingress, self.tcp_dst, self.egress, self.priority)
    }
}
