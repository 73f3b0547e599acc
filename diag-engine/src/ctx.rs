use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use diag_common::{DevId, DevPort, SessHdl};
use diag_wire::{IdCodec, IdLayout};

use crate::{db::PktDb, options::DiagOptions, rx::RxStats, session::Session};

/// State shared between the lifecycle caller and the receive drivers.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) db: PktDb,
    /// Replaced when the identifier layout changes; clones keep sharing the counter.
    codec: RwLock<IdCodec>,
    /// Live sessions of every device.
    sessions: RwLock<FxHashMap<SessHdl, Arc<Session>>>,
    pub(crate) rx_stats: RxStats,
    /// Bytes at the start of a packet the classifier treats as header.
    header_len: AtomicUsize,
}

impl Shared {
    pub(crate) fn new(options: &DiagOptions) -> Self {
        let layout = if options.min_pkt_size { IdLayout::MinSize } else { IdLayout::Normal };
        Self {
            db: PktDb::new(),
            codec: RwLock::new(IdCodec::new(layout, options.replication)),
            sessions: RwLock::new(FxHashMap::default()),
            rx_stats: RxStats::default(),
            header_len: AtomicUsize::new(options.classify_header_len),
        }
    }

    /// The current codec.
    pub(crate) fn codec(&self) -> IdCodec {
        self.codec.read().clone()
    }

    pub(crate) fn reconfigure_codec(&self, layout: IdLayout, replication: usize) {
        let mut codec = self.codec.write();
        *codec = codec.reconfigure(layout, replication);
    }

    #[inline]
    pub(crate) fn header_len(&self) -> usize {
        self.header_len.load(Ordering::Relaxed)
    }

    pub(crate) fn set_header_len(&self, len: usize) {
        self.header_len.store(len, Ordering::Relaxed);
    }

    pub(crate) fn session(&self, hdl: SessHdl) -> Option<Arc<Session>> {
        self.sessions.read().get(&hdl).cloned()
    }

    pub(crate) fn insert_session(&self, session: Arc<Session>) {
        self.sessions.write().insert(session.hdl(), session);
    }

    pub(crate) fn remove_session(&self, hdl: SessHdl) -> Option<Arc<Session>> {
        self.sessions.write().remove(&hdl)
    }

    pub(crate) fn has_sessions(&self) -> bool {
        !self.sessions.read().is_empty()
    }

    /// The lowest live session on `dev` owning `port`.
    pub(crate) fn session_owning(&self, dev: DevId, port: DevPort) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.hdl().dev() == dev && s.has_port(port))
            .min_by_key(|s| s.hdl())
            .cloned()
    }
}
