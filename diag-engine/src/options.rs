use std::time::Duration;

use bytes::Bytes;

use diag_wire::{pkt_id::DEFAULT_REPLICATION, PayloadPattern};

use crate::classify::DEFAULT_HEADER_LEN;

/// Default number of concurrent sessions per device.
pub const DEFAULT_MAX_SESSIONS: usize = 32;

/// Hard ceiling on concurrent sessions per device.
pub const MAX_SESSIONS_CEILING: usize = 128;

/// Global configuration of the diagnostics engine.
#[derive(Debug, Clone)]
pub struct DiagOptions {
    /// Maximum number of concurrent sessions per device.
    pub(crate) max_sessions: usize,
    /// Allow packets down to 64 bytes by shrinking the packet identifier to 5 bytes and a
    /// single replica.
    pub(crate) min_pkt_size: bool,
    /// Number of identifier replicas in each packet's tail.
    pub(crate) replication: usize,
    /// Payload pattern for generated packets.
    pub(crate) payload: PayloadPattern,
    /// Send these bytes instead of generated packets.
    pub(crate) full_packet: Option<Bytes>,
    /// Drain the full TCP port space on stop instead of the session's own block. Any port
    /// overlap between sessions is refused while this is set.
    pub(crate) drain_full_range: bool,
    /// Bytes at the start of a packet treated as header by the classifier.
    pub(crate) classify_header_len: usize,
    /// Time to let links settle after a loopback mode change.
    pub(crate) settle: Duration,
    /// Number of drain iterations on stop.
    pub(crate) drain_iterations: u32,
    /// Pause between drain iterations.
    pub(crate) drain_interval: Duration,
    /// Additional copies on the designated port of a multicast loopback test.
    pub(crate) mc_extra_copies: u16,
}

impl Default for DiagOptions {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            min_pkt_size: false,
            replication: DEFAULT_REPLICATION,
            payload: PayloadPattern::Random,
            full_packet: None,
            drain_full_range: false,
            classify_header_len: DEFAULT_HEADER_LEN,
            settle: Duration::from_secs(3),
            drain_iterations: 4,
            drain_interval: Duration::from_millis(500),
            mc_extra_copies: 1,
        }
    }
}

impl DiagOptions {
    /// Sets the maximum number of concurrent sessions per device, capped at
    /// [`MAX_SESSIONS_CEILING`].
    pub fn max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.clamp(1, MAX_SESSIONS_CEILING);
        self
    }

    /// Enables or disables minimum-size packets.
    pub fn min_pkt_size(mut self, enabled: bool) -> Self {
        self.min_pkt_size = enabled;
        self
    }

    /// Sets the identifier replication factor. Ignored in minimum-size mode.
    pub fn replication(mut self, replication: usize) -> Self {
        self.replication = replication;
        self
    }

    pub fn payload(mut self, payload: PayloadPattern) -> Self {
        self.payload = payload;
        self
    }

    pub fn full_packet(mut self, pkt: Bytes) -> Self {
        self.full_packet = Some(pkt);
        self
    }

    pub fn drain_full_range(mut self, enabled: bool) -> Self {
        self.drain_full_range = enabled;
        self
    }

    /// Sets how many leading bytes the classifier treats as header.
    pub fn classify_header_len(mut self, len: usize) -> Self {
        self.classify_header_len = len;
        self
    }

    /// Sets the time to wait after changing port loopback modes.
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Sets the drain schedule used when stopping a test.
    pub fn drain(mut self, iterations: u32, interval: Duration) -> Self {
        self.drain_iterations = iterations.max(1);
        self.drain_interval = interval;
        self
    }

    pub fn mc_extra_copies(mut self, copies: u16) -> Self {
        self.mc_extra_copies = copies;
        self
    }

    /// Options suited for simulated backends: no settle or drain pauses.
    pub fn instant() -> Self {
        Self::default().settle(Duration::ZERO).drain(1, Duration::ZERO)
    }

    #[inline]
    pub const fn get_max_sessions(&self) -> usize {
        self.max_sessions
    }

    #[inline]
    pub const fn is_min_pkt_size(&self) -> bool {
        self.min_pkt_size
    }

    #[inline]
    pub const fn is_drain_full_range(&self) -> bool {
        self.drain_full_range
    }

    #[inline]
    pub const fn get_classify_header_len(&self) -> usize {
        self.classify_header_len
    }
}
