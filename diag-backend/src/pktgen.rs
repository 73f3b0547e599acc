use std::fmt;

/// A packet generator application slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PktGenApp {
    pub pipe: u16,
    pub app: u8,
}

impl fmt::Display for PktGenApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipe {} app {}", self.pipe, self.app)
    }
}

/// How a packet generator application emits its template packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PktGenConfig {
    /// Offset of the template in the pipe's generator buffer.
    pub buffer_offset: usize,
    /// Length of the template packet.
    pub pkt_len: usize,
    /// Total packets to emit, or `None` to run until stopped.
    pub pkt_count: Option<u64>,
    /// Target rate in packets per second.
    pub pkt_rate: u64,
}
