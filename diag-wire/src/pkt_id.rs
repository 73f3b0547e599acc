//! Packet identity codec.
//!
//! Every test packet carries a 64-bit [`PacketId`] in its tail bytes. The identifier is
//! replicated `R` times so that corruption of the identifier region itself can be detected:
//! decoding only succeeds if every replica agrees.
//!
//! Tail layout for a packet of `size` bytes with a per-replica footprint of `w` bytes:
//!
//! ```text
//! | header | payload ... | copy R-1 | ... | copy 1 | copy 0 |
//!                                                   ^ size - w
//! ```
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use thiserror::Error;

use crate::header::PKT_HDR_LEN;
use diag_common::{DevPort, SessHdl};

/// Default number of identifier replicas.
pub const DEFAULT_REPLICATION: usize = 3;

/// Upper bound on the replication factor.
pub const MAX_REPLICATION: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("packet of {size} bytes cannot hold the identifier (need at least {min})")]
    TooSmall { size: usize, min: usize },
    #[error("identifier replicas disagree")]
    ReplicaMismatch,
    #[error("session {0} does not fit the minimum-size identifier layout")]
    SessionRange(SessHdl),
    #[error("port {0} does not fit the minimum-size identifier layout")]
    PortRange(DevPort),
}

/// A unique packet identifier: session handle, originating port and a monotonic counter.
///
/// The in-memory representation is always `sess[63:48] | port[47:32] | counter[31:0]`,
/// independent of the [`IdLayout`] used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketId(u64);

impl PacketId {
    #[inline]
    pub const fn new(sess: SessHdl, port: DevPort, counter: u32) -> Self {
        Self((sess.0 as u64) << 48 | (port.0 as u64) << 32 | counter as u64)
    }

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn session(self) -> SessHdl {
        SessHdl((self.0 >> 48) as u16)
    }

    #[inline]
    pub const fn port(self) -> DevPort {
        DevPort((self.0 >> 32) as u16)
    }

    #[inline]
    pub const fn counter(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// How the identifier is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdLayout {
    /// 8 bytes: 16-bit session, 16-bit port, 32-bit counter.
    #[default]
    Normal,
    /// 5 bytes: 8-bit session, 9-bit port, 23-bit counter. Used when minimum-size packets
    /// are enabled; the replication factor is forced to 1.
    MinSize,
}

impl IdLayout {
    /// Number of bytes one identifier replica occupies.
    #[inline]
    pub const fn wire_len(self) -> usize {
        match self {
            Self::Normal => 8,
            Self::MinSize => 5,
        }
    }

    #[inline]
    const fn counter_mask(self) -> u64 {
        match self {
            Self::Normal => 0xffff_ffff,
            Self::MinSize => 0x7f_ffff,
        }
    }

    fn to_wire(self, id: PacketId) -> u64 {
        match self {
            Self::Normal => id.raw(),
            Self::MinSize => {
                (id.session().0 as u64) << 32
                    | (id.port().0 as u64) << 23
                    | (id.counter() as u64 & self.counter_mask())
            }
        }
    }

    fn from_wire(self, wire: u64) -> PacketId {
        match self {
            Self::Normal => PacketId::from_raw(wire),
            Self::MinSize => PacketId::new(
                SessHdl(((wire >> 32) & 0xff) as u16),
                DevPort(((wire >> 23) & 0x1ff) as u16),
                (wire & self.counter_mask()) as u32,
            ),
        }
    }

    /// Checks that `sess` and `port` fit the fields of this layout.
    pub fn check(self, sess: SessHdl, port: DevPort) -> Result<(), IdError> {
        if let Self::MinSize = self {
            if sess.0 > 0xff {
                return Err(IdError::SessionRange(sess));
            }
            if port.0 > 0x1ff {
                return Err(IdError::PortRange(port));
            }
        }

        Ok(())
    }
}

/// Encodes and decodes replicated packet identifiers.
///
/// Clones share the same counter, so reconfiguring the layout with [`IdCodec::reconfigure`]
/// never rewinds the sequence of issued identifiers.
#[derive(Debug, Clone)]
pub struct IdCodec {
    layout: IdLayout,
    replication: usize,
    counter: Arc<AtomicU64>,
}

impl Default for IdCodec {
    fn default() -> Self {
        Self::new(IdLayout::Normal, DEFAULT_REPLICATION)
    }
}

impl IdCodec {
    /// Creates a new codec. The replication factor is clamped to `1..=MAX_REPLICATION`, and
    /// forced to 1 for [`IdLayout::MinSize`].
    pub fn new(layout: IdLayout, replication: usize) -> Self {
        Self {
            layout,
            replication: Self::effective_replication(layout, replication),
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns a codec with a different layout that keeps issuing identifiers from the same
    /// counter.
    pub fn reconfigure(&self, layout: IdLayout, replication: usize) -> Self {
        Self {
            layout,
            replication: Self::effective_replication(layout, replication),
            counter: Arc::clone(&self.counter),
        }
    }

    fn effective_replication(layout: IdLayout, replication: usize) -> usize {
        match layout {
            IdLayout::MinSize => 1,
            IdLayout::Normal => replication.clamp(1, MAX_REPLICATION),
        }
    }

    #[inline]
    pub const fn layout(&self) -> IdLayout {
        self.layout
    }

    #[inline]
    pub const fn replication(&self) -> usize {
        self.replication
    }

    /// Bytes taken by all identifier replicas.
    #[inline]
    pub const fn footprint(&self) -> usize {
        self.layout.wire_len() * self.replication
    }

    /// The smallest packet that can carry an identifier.
    #[inline]
    pub const fn min_packet_size(&self) -> usize {
        PKT_HDR_LEN + self.footprint()
    }

    /// Number of identifiers issued so far.
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Stamps a fresh identifier into the tail of `buf` and returns it. The counter advances
    /// by one per call, regardless of the replication factor.
    pub fn encode(&self, sess: SessHdl, port: DevPort, buf: &mut [u8]) -> Result<PacketId, IdError> {
        let min = self.min_packet_size();
        if buf.len() < min {
            return Err(IdError::TooSmall { size: buf.len(), min });
        }
        self.layout.check(sess, port)?;

        let counter = self.counter.fetch_add(1, Ordering::Relaxed) & self.layout.counter_mask();
        let id = PacketId::new(sess, port, counter as u32);

        let w = self.layout.wire_len();
        let wire = self.layout.to_wire(id).to_be_bytes();
        let size = buf.len();
        for copy in 0..self.replication {
            let end = size - copy * w;
            buf[end - w..end].copy_from_slice(&wire[8 - w..]);
        }

        Ok(id)
    }

    /// Decodes the identifier from the tail of `buf`. Fails if the packet is too small or if
    /// any two replicas disagree.
    pub fn decode(&self, buf: &[u8]) -> Result<PacketId, IdError> {
        let min = self.min_packet_size();
        if buf.len() < min {
            return Err(IdError::TooSmall { size: buf.len(), min });
        }

        let w = self.layout.wire_len();
        let size = buf.len();
        let first = &buf[size - w..];
        for copy in 1..self.replication {
            let end = size - copy * w;
            if &buf[end - w..end] != first {
                return Err(IdError::ReplicaMismatch);
            }
        }

        let mut wire = [0u8; 8];
        wire[8 - w..].copy_from_slice(first);

        Ok(self.layout.from_wire(u64::from_be_bytes(wire)))
    }
}
