//! Content-addressed store of transmitted packets.
//!
//! Every packet sent by a test is recorded here under its [`PacketId`], so the receive path
//! can compare what came back against what went out. Entries live until the owning session is
//! cleaned up; there is no independent expiry.
use bytes::Bytes;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, error};

use diag_common::SessHdl;
use diag_wire::PacketId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DbError {
    #[error("packet {0} already recorded")]
    Exists(PacketId),
    #[error("packet {0} not found")]
    NotFound(PacketId),
    #[error("packet {id} was sent with {cached} bytes, received {requested}")]
    SizeMismatch { id: PacketId, cached: usize, requested: usize },
}

/// A recorded packet.
#[derive(Debug)]
struct PktWrapper {
    pkt: Bytes,
    sess: SessHdl,
    /// Byte offsets where a 1→0 flip was observed on any received copy.
    ones_to_zero: Vec<u32>,
    /// Byte offsets where a 0→1 flip was observed on any received copy.
    zeros_to_one: Vec<u32>,
}

impl PktWrapper {
    #[inline]
    fn size(&self) -> usize {
        self.pkt.len()
    }
}

/// Flip offsets recorded for one packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlipRecord {
    pub ones_to_zero: Vec<u32>,
    pub zeros_to_one: Vec<u32>,
}

/// The packet database. A single lock guards the whole table; it is never held across
/// transmission or backend calls.
#[derive(Debug, Default)]
pub struct PktDb {
    table: Mutex<FxHashMap<PacketId, PktWrapper>>,
}

impl PktDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a copy of `pkt` under `id`. Recording a live identifier twice is refused.
    pub fn add(&self, id: PacketId, pkt: &[u8]) -> Result<(), DbError> {
        let mut table = self.table.lock();
        if table.contains_key(&id) {
            error!(%id, "packet identifier recorded twice");
            return Err(DbError::Exists(id));
        }

        table.insert(
            id,
            PktWrapper {
                pkt: Bytes::copy_from_slice(pkt),
                sess: id.session(),
                ones_to_zero: Vec::new(),
                zeros_to_one: Vec::new(),
            },
        );

        Ok(())
    }

    /// Returns the bytes recorded for `id`. The received size must match the recorded one.
    pub fn get(&self, id: PacketId, requested_size: usize) -> Result<Bytes, DbError> {
        let table = self.table.lock();
        let entry = table.get(&id).ok_or(DbError::NotFound(id))?;
        if entry.size() != requested_size {
            return Err(DbError::SizeMismatch { id, cached: entry.size(), requested: requested_size });
        }

        Ok(entry.pkt.clone())
    }

    /// Appends flip offsets discovered by the classifier to the entry of `id`.
    pub fn record_flips(&self, id: PacketId, ones_to_zero: &[usize], zeros_to_one: &[usize]) {
        let mut table = self.table.lock();
        let Some(entry) = table.get_mut(&id) else {
            return;
        };

        entry.ones_to_zero.extend(ones_to_zero.iter().map(|o| *o as u32));
        entry.zeros_to_one.extend(zeros_to_one.iter().map(|o| *o as u32));
    }

    /// Returns the flip offsets recorded for `id`.
    pub fn flips(&self, id: PacketId) -> Option<FlipRecord> {
        self.table.lock().get(&id).map(|e| FlipRecord {
            ones_to_zero: e.ones_to_zero.clone(),
            zeros_to_one: e.zeros_to_one.clone(),
        })
    }

    /// Erases every entry belonging to `sess`, returning how many were removed.
    pub fn sweep_by_session(&self, sess: SessHdl) -> usize {
        let mut table = self.table.lock();
        let before = table.len();
        table.retain(|_, entry| entry.sess != sess);
        let removed = before - table.len();
        debug!(%sess, removed, "swept packet database");
        removed
    }

    /// Number of entries recorded for `sess`.
    #[cfg(test)]
    fn count_session(&self, sess: SessHdl) -> usize {
        self.table.lock().values().filter(|e| e.sess == sess).count()
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}
