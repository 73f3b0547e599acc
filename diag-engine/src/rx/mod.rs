//! The receive path.
//!
//! Every packet punted to the CPU is decoded, looked up in the packet database, compared bit
//! by bit against what was sent and credited to its session. Corruption never fails anything
//! here; it only shows up in statistics.
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use diag_backend::{RxPacket, RxPath};
use diag_common::DevPort;
use diag_wire::header::tcp_dst;

use crate::{
    classify::classify,
    ctx::Shared,
    db::DbError,
    topology::Direction,
};

mod driver;
pub(crate) use driver::RxDriver;

/// Global receive statistics. Shared by all receive drivers.
#[derive(Debug, Default)]
pub struct RxStats {
    /// Packets received per [`RxPath`].
    packets: [AtomicUsize; RxPath::ALL.len()],
    /// Packets that matched their recorded copy.
    good: AtomicUsize,
    /// Packets that differed from their recorded copy.
    bad: AtomicUsize,
    /// Packets whose identifier replicas disagreed.
    pkt_id_corrupt: AtomicUsize,
    /// Well-formed identifiers unknown to the packet database.
    unknown: AtomicUsize,
    /// Identifiers of sessions that no longer exist.
    stale: AtomicUsize,
    /// Packets whose length differed from the recorded length.
    size_mismatch: AtomicUsize,
    /// Bytes received per ingress port.
    port_bytes: Mutex<FxHashMap<DevPort, u64>>,
}

impl RxStats {
    #[inline]
    fn increment(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn increment_packets(&self, path: RxPath, port: DevPort, bytes: usize) {
        Self::increment(&self.packets[path.index()]);
        *self.port_bytes.lock().entry(port).or_default() += bytes as u64;
    }

    /// Packets received through `path`.
    #[inline]
    pub fn packets(&self, path: RxPath) -> usize {
        self.packets[path.index()].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn good(&self) -> usize {
        self.good.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bad(&self) -> usize {
        self.bad.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn pkt_id_corrupt(&self) -> usize {
        self.pkt_id_corrupt.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn unknown(&self) -> usize {
        self.unknown.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn stale(&self) -> usize {
        self.stale.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn size_mismatch(&self) -> usize {
        self.size_mismatch.load(Ordering::Relaxed)
    }

    /// Bytes received on `port`.
    pub fn port_bytes(&self, port: DevPort) -> u64 {
        self.port_bytes.lock().get(&port).copied().unwrap_or(0)
    }
}

/// Handles one received packet.
pub(crate) fn process(shared: &Shared, path: RxPath, pkt: &RxPacket) {
    let stats = &shared.rx_stats;
    stats.increment_packets(path, pkt.port, pkt.data.len());

    let id = match shared.codec().decode(&pkt.data) {
        Ok(id) => id,
        Err(e) => {
            RxStats::increment(&stats.pkt_id_corrupt);
            match shared.session_owning(pkt.dev, pkt.port) {
                Some(session) => {
                    session.stats().lock().pkt_id_corrupt += 1;
                    debug!(sess = %session.hdl(), port = %pkt.port, %path, error = %e, "corrupt packet identifier");
                }
                None => debug!(port = %pkt.port, %path, error = %e, "corrupt packet identifier, no owning session"),
            }
            return;
        }
    };

    let Some(session) = shared.session(id.session()) else {
        RxStats::increment(&stats.stale);
        trace!(%id, port = %pkt.port, "packet of a session that no longer exists");
        return;
    };

    let expected = match shared.db.get(id, pkt.data.len()) {
        Ok(expected) => expected,
        Err(DbError::SizeMismatch { cached, requested, .. }) => {
            RxStats::increment(&stats.size_mismatch);
            session.stats().lock().record_size_mismatch();
            debug!(%id, cached, requested, "received packet changed size");
            return;
        }
        Err(e) => {
            RxStats::increment(&stats.unknown);
            session.stats().lock().unknown += 1;
            warn!(%id, error = %e, "received packet is not in the database");
            return;
        }
    };

    // the flow comes from the recorded copy, the received header may be corrupt
    let (flow, dir) = tcp_dst(&expected)
        .and_then(|port| session.plan().locate(port))
        .unwrap_or((usize::MAX, Direction::Forward));

    let c = classify(&expected, &pkt.data, shared.header_len());
    if c.is_clean() {
        RxStats::increment(&stats.good);
    } else {
        RxStats::increment(&stats.bad);
        debug!(
            %id,
            port = %pkt.port,
            failure = %c.description(),
            bytes = c.bytes_mismatched,
            bits = c.bits_mismatched,
            "packet mismatch"
        );
    }

    session.stats().lock().record_rx(flow, dir, pkt.data.len(), &c);

    if !c.is_clean() {
        shared.db.record_flips(id, &c.ones_to_zero, &c.zeros_to_one);
    }
}
