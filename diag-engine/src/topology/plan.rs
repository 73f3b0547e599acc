//! TCP destination-port plan.
//!
//! Test rules match on the TCP destination port, which is how test traffic of one session and
//! flow is told apart from any other traffic on the same ports. Every session owns a block of
//! [`BLOCK_LEN`] ports starting at `slot * BLOCK_LEN`. The first half of the block holds the
//! forward sub-ranges, the second half the reverse ones, [`SUB_RANGE_LEN`] ports per flow.
use std::fmt;

use diag_backend::TcpRange;
use diag_common::SessHdl;

/// Destination ports reserved per session.
pub const BLOCK_LEN: u16 = 512;

/// Destination ports per flow and direction.
pub const SUB_RANGE_LEN: u16 = 2;

/// Offset of the reverse sub-ranges inside a block.
pub const REVERSE_OFFSET: u16 = BLOCK_LEN / 2;

/// Largest number of flows a session can carry.
pub const MAX_FLOWS: usize = (REVERSE_OFFSET / SUB_RANGE_LEN) as usize;

/// Direction of traffic along a flow's path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub const BOTH: [Self; 2] = [Self::Forward, Self::Reverse];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::Forward => 0,
            Self::Reverse => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => f.write_str("fwd"),
            Self::Reverse => f.write_str("rev"),
        }
    }
}

/// The destination-port block of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpPlan {
    base: u16,
}

impl TcpPlan {
    pub const fn for_session(hdl: SessHdl) -> Self {
        Self { base: hdl.slot() * BLOCK_LEN }
    }

    /// The whole block of the session.
    pub const fn block(&self) -> TcpRange {
        TcpRange::new(self.base, self.base + (BLOCK_LEN - 1))
    }

    /// The sub-range of flow `flow` in direction `dir`.
    pub const fn range(&self, flow: usize, dir: Direction) -> TcpRange {
        let start = match dir {
            Direction::Forward => self.base + flow as u16 * SUB_RANGE_LEN,
            Direction::Reverse => self.base + REVERSE_OFFSET + flow as u16 * SUB_RANGE_LEN,
        };
        TcpRange::new(start, start + (SUB_RANGE_LEN - 1))
    }

    /// Finds the flow and direction a destination port belongs to.
    pub const fn locate(&self, tcp_dst: u16) -> Option<(usize, Direction)> {
        if tcp_dst < self.base || tcp_dst > self.base + (BLOCK_LEN - 1) {
            return None;
        }

        let offset = tcp_dst - self.base;
        if offset < REVERSE_OFFSET {
            Some(((offset / SUB_RANGE_LEN) as usize, Direction::Forward))
        } else {
            Some((((offset - REVERSE_OFFSET) / SUB_RANGE_LEN) as usize, Direction::Reverse))
        }
    }

    /// The range drained on step `step` of `steps`. Each step doubles the drained width, the
    /// last one covers the session block, or every port if `full` is set.
    pub fn drain_step(&self, step: u32, steps: u32, full: bool) -> TcpRange {
        let outer = if full { TcpRange::FULL } else { self.block() };
        let steps = steps.max(1);
        let shift = steps.saturating_sub(step + 1).min(31);
        let width = (outer.len() >> shift).max(SUB_RANGE_LEN as u32);
        let end = outer.start as u32 + width - 1;

        TcpRange::new(outer.start, end.min(outer.end as u32) as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diag_common::DevId;

    #[test]
    fn blocks_are_disjoint() {
        let a = TcpPlan::for_session(SessHdl::new(DevId(0), 0));
        let b = TcpPlan::for_session(SessHdl::new(DevId(0), 1));
        let last = TcpPlan::for_session(SessHdl::new(DevId(3), 127));

        assert_eq!(a.block(), TcpRange::new(0, 511));
        assert_eq!(b.block(), TcpRange::new(512, 1023));
        assert_eq!(last.block(), TcpRange::new(65024, 65535));
        assert!(!a.block().overlaps(&b.block()));
    }

    #[test]
    fn sub_ranges() {
        let plan = TcpPlan::for_session(SessHdl::new(DevId(0), 2));
        assert_eq!(plan.range(0, Direction::Forward), TcpRange::new(1024, 1025));
        assert_eq!(plan.range(3, Direction::Forward), TcpRange::new(1030, 1031));
        assert_eq!(plan.range(3, Direction::Reverse), TcpRange::new(1286, 1287));
        assert_eq!(plan.range(MAX_FLOWS - 1, Direction::Reverse).end, plan.block().end);

        assert!(!plan.range(5, Direction::Forward).overlaps(&plan.range(6, Direction::Forward)));
        assert!(!plan.range(5, Direction::Forward).overlaps(&plan.range(5, Direction::Reverse)));
    }

    #[test]
    fn locate_inverts_range() {
        let plan = TcpPlan::for_session(SessHdl::new(DevId(1), 9));
        for flow in [0, 1, 64, MAX_FLOWS - 1] {
            for dir in Direction::BOTH {
                let r = plan.range(flow, dir);
                assert_eq!(plan.locate(r.start), Some((flow, dir)));
                assert_eq!(plan.locate(r.end), Some((flow, dir)));
            }
        }

        assert_eq!(plan.locate(plan.block().start - 1), None);
        assert_eq!(plan.locate(plan.block().end + 1), None);
    }

    #[test]
    fn drain_widens() {
        let plan = TcpPlan::for_session(SessHdl::new(DevId(0), 1));
        let steps: Vec<_> = (0..4).map(|i| plan.drain_step(i, 4, false)).collect();

        assert_eq!(steps[0], TcpRange::new(512, 575));
        assert_eq!(steps[1], TcpRange::new(512, 639));
        assert_eq!(steps[2], TcpRange::new(512, 767));
        assert_eq!(steps[3], plan.block());

        assert_eq!(plan.drain_step(0, 1, false), plan.block());
        assert_eq!(plan.drain_step(3, 4, true), TcpRange::FULL);
        assert_eq!(plan.drain_step(0, 2, true), TcpRange::new(0, 32767));
    }
}
