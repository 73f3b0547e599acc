use std::ops::{Index, IndexMut};

use crate::{
    classify::{Classification, FailureType},
    topology::Direction,
};

/// Per-failure-type packet counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureTally([u64; FailureType::ALL.len()]);

impl FailureTally {
    #[inline]
    pub fn increment(&mut self, failure: FailureType) {
        self[failure] += 1;
    }

    /// Packets with any failure other than [`FailureType::NoFailure`].
    pub fn failed(&self) -> u64 {
        self.iter().filter(|(f, _)| *f != FailureType::NoFailure).map(|(_, n)| n).sum()
    }

    /// Iterates over `(failure type, count)` pairs in taxonomy order.
    pub fn iter(&self) -> impl Iterator<Item = (FailureType, u64)> + '_ {
        FailureType::ALL.iter().map(|f| (*f, self[*f]))
    }
}

impl Index<FailureType> for FailureTally {
    type Output = u64;

    fn index(&self, failure: FailureType) -> &Self::Output {
        &self.0[failure.index()]
    }
}

impl IndexMut<FailureType> for FailureTally {
    fn index_mut(&mut self, failure: FailureType) -> &mut Self::Output {
        &mut self.0[failure.index()]
    }
}

/// Packet counters of one flow in one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirStats {
    /// Packets sent.
    pub tx: u64,
    /// Packets received unmodified.
    pub rx_good: u64,
    /// Packets received with mismatches.
    pub rx_bad: u64,
    /// Bytes received, good or bad.
    pub rx_bytes: u64,
}

/// Counters of one flow, indexed by [`Direction`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowStats([DirStats; 2]);

impl Index<Direction> for FlowStats {
    type Output = DirStats;

    fn index(&self, dir: Direction) -> &Self::Output {
        &self.0[dir.index()]
    }
}

impl IndexMut<Direction> for FlowStats {
    fn index_mut(&mut self, dir: Direction) -> &mut Self::Output {
        &mut self.0[dir.index()]
    }
}

/// Running statistics of a session. Updated by the receive path and read by status queries,
/// always under the session's own lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// One entry per flow.
    pub flows: Vec<FlowStats>,
    pub bytes_mismatched: u64,
    pub bits_mismatched: u64,
    pub flips_1_to_0: u64,
    pub flips_0_to_1: u64,
    pub failures: FailureTally,
    /// Packets whose identifier replicas disagreed.
    pub pkt_id_corrupt: u64,
    /// Packets whose length differed from the recorded one.
    pub size_mismatch: u64,
    /// Packets carrying a well-formed identifier of this session that was never recorded.
    pub unknown: u64,
    /// Packet sizes used by every start, in order.
    pub pkt_sizes: Vec<usize>,
    /// Set once reverse traffic has been sent. Never cleared.
    pub bidirectional: bool,
    /// Set once the session has been started.
    pub started: bool,
}

impl SessionStats {
    pub fn new(num_flows: usize) -> Self {
        Self { flows: vec![FlowStats::default(); num_flows], ..Default::default() }
    }

    #[inline]
    pub fn increment_tx(&mut self, flow: usize, dir: Direction, n: u64) {
        if let Some(f) = self.flows.get_mut(flow) {
            f[dir].tx += n;
        }
    }

    /// Overwrites the transmit count of a flow, for hardware generated traffic.
    #[inline]
    pub fn set_tx(&mut self, flow: usize, dir: Direction, n: u64) {
        if let Some(f) = self.flows.get_mut(flow) {
            f[dir].tx = n;
        }
    }

    /// Accounts a received packet of a flow.
    pub fn record_rx(&mut self, flow: usize, dir: Direction, bytes: usize, c: &Classification) {
        self.bytes_mismatched += c.bytes_mismatched;
        self.bits_mismatched += c.bits_mismatched;
        self.flips_1_to_0 += c.flips_1_to_0;
        self.flips_0_to_1 += c.flips_0_to_1;
        self.failures.increment(c.failure);

        if let Some(f) = self.flows.get_mut(flow) {
            let d = &mut f[dir];
            d.rx_bytes += bytes as u64;
            if c.is_clean() {
                d.rx_good += 1;
            } else {
                d.rx_bad += 1;
            }
        }
    }

    /// Accounts a packet whose length changed on the way.
    pub fn record_size_mismatch(&mut self) {
        self.size_mismatch += 1;
        self.failures.increment(FailureType::Unknown);
    }

    /// Sum of a counter over every flow and direction.
    pub fn total(&self, f: impl Fn(&DirStats) -> u64) -> u64 {
        self.flows.iter().flat_map(|s| s.0.iter()).map(f).sum()
    }

    /// Resets all counters and the start marker, keeping the flow layout, the packet size
    /// history and the bidirectional flag. A cleared session reports like one never started.
    pub fn clear(&mut self) {
        let num_flows = self.flows.len();
        *self = Self {
            flows: vec![FlowStats::default(); num_flows],
            pkt_sizes: std::mem::take(&mut self.pkt_sizes),
            bidirectional: self.bidirectional,
            ..Default::default()
        };
    }
}
