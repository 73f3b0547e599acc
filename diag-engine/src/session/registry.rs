use rustc_hash::FxHashMap;
use tracing::debug;

use diag_common::{DevId, DevPort, LoopbackMode, SessHdl};

use crate::options::MAX_SESSIONS_CEILING;

/// The ports and loopback mode a live session holds.
#[derive(Debug, Clone)]
struct Membership {
    ports: Vec<DevPort>,
    loop_mode: LoopbackMode,
}

/// Per-device session bookkeeping: which handles are allocated, which ports each live session
/// holds and which loopback modes were in place before any session touched a port.
///
/// The registry is only ever mutated by the caller driving session lifecycle, which is
/// serialized through `&mut`.
#[derive(Debug)]
pub struct Registry {
    dev: DevId,
    /// One bit per slot, bit `n` set when slot `n` is allocated.
    bitmap: u128,
    /// Allocation scans slots `0..max`.
    max: usize,
    members: FxHashMap<SessHdl, Membership>,
    /// Loopback mode of a port before the first session changed it.
    saved_modes: FxHashMap<DevPort, LoopbackMode>,
}

impl Registry {
    pub fn new(dev: DevId, max: usize) -> Self {
        Self {
            dev,
            bitmap: 0,
            max: max.clamp(1, MAX_SESSIONS_CEILING),
            members: FxHashMap::default(),
            saved_modes: FxHashMap::default(),
        }
    }

    #[inline]
    pub const fn dev(&self) -> DevId {
        self.dev
    }

    /// Changes the allocation limit. Live sessions above the new limit are untouched.
    pub fn set_max(&mut self, max: usize) {
        self.max = max.clamp(1, MAX_SESSIONS_CEILING);
    }

    #[inline]
    pub const fn max(&self) -> usize {
        self.max
    }

    /// Number of allocated handles.
    #[inline]
    pub const fn allocated(&self) -> usize {
        self.bitmap.count_ones() as usize
    }

    /// Allocates the lowest free slot below the current maximum.
    pub fn allocate(&mut self) -> Option<SessHdl> {
        let slot = (0..self.max).find(|slot| self.bitmap & (1u128 << slot) == 0)?;
        self.bitmap |= 1u128 << slot;

        let hdl = SessHdl::new(self.dev, slot as u16);
        debug!(sess = %hdl, "allocated session handle");
        Some(hdl)
    }

    /// Frees an allocated handle and forgets its membership. Returns `false` if the handle was
    /// not allocated on this device.
    pub fn free(&mut self, hdl: SessHdl) -> bool {
        if !self.is_allocated(hdl) {
            return false;
        }

        self.bitmap &= !(1u128 << hdl.slot());
        self.members.remove(&hdl);
        debug!(sess = %hdl, "freed session handle");
        true
    }

    pub fn is_allocated(&self, hdl: SessHdl) -> bool {
        hdl.dev() == self.dev && self.bitmap & (1u128 << hdl.slot()) != 0
    }

    /// Records the ports and loopback mode of an allocated session.
    pub fn register(&mut self, hdl: SessHdl, ports: &[DevPort], loop_mode: LoopbackMode) {
        self.members.insert(hdl, Membership { ports: ports.to_vec(), loop_mode });
    }

    /// Returns the first live session that conflicts with a candidate port list, together with
    /// the shared port.
    ///
    /// A port conflicts when it belongs to a session with a different loopback mode. With
    /// `drain_full` set any shared port conflicts.
    pub fn overlap_check(
        &self,
        ports: &[DevPort],
        loop_mode: LoopbackMode,
        drain_full: bool,
    ) -> Option<(SessHdl, DevPort)> {
        let mut live: Vec<_> = self.members.iter().collect();
        live.sort_by_key(|(hdl, _)| **hdl);

        for (hdl, member) in live {
            if !drain_full && member.loop_mode == loop_mode {
                continue;
            }

            if let Some(port) = ports.iter().find(|p| member.ports.contains(p)) {
                return Some((*hdl, *port));
            }
        }

        None
    }

    /// Returns `true` if more than one live session holds `port`.
    pub fn port_in_multiple_sessions(&self, port: DevPort) -> bool {
        self.holders(port) > 1
    }

    /// Returns `true` if a live session other than `hdl` holds `port`.
    pub fn port_held_by_other(&self, hdl: SessHdl, port: DevPort) -> bool {
        self.members.iter().any(|(h, m)| *h != hdl && m.ports.contains(&port))
    }

    fn holders(&self, port: DevPort) -> usize {
        self.members.values().filter(|m| m.ports.contains(&port)).count()
    }

    /// Remembers the mode a port had before diagnostics changed it. The first call for a port
    /// wins.
    pub fn save_mode(&mut self, port: DevPort, mode: LoopbackMode) {
        self.saved_modes.entry(port).or_insert(mode);
    }

    /// Takes the saved mode of a port, if any.
    pub fn take_saved_mode(&mut self, port: DevPort) -> Option<LoopbackMode> {
        self.saved_modes.remove(&port)
    }

    /// Live handles in ascending order.
    pub fn handles(&self) -> Vec<SessHdl> {
        (0..MAX_SESSIONS_CEILING)
            .filter(|slot| self.bitmap & (1u128 << slot) != 0)
            .map(|slot| SessHdl::new(self.dev, slot as u16))
            .collect()
    }
}
