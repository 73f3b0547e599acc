//! Bookkeeping of packet generator resources: application slots and template buffer space,
//! both per pipe.
use rustc_hash::FxHashMap;

use diag_backend::PktGenApp;
use diag_common::constants::KiB;

/// Application slots per pipe.
pub const PKTGEN_APPS_PER_PIPE: u8 = 8;

/// Template buffer bytes per pipe.
pub const PKTGEN_BUFFER_SIZE: usize = 16 * KiB as usize;

/// Template allocations start on multiples of this.
pub const PKTGEN_BUFFER_ALIGN: usize = 16;

#[derive(Debug, Default)]
struct PipeResources {
    /// Bit `n` set when app `n` is in use.
    apps: u8,
    /// Allocated `(offset, len)` chunks, sorted by offset.
    chunks: Vec<(usize, usize)>,
}

/// Per-device packet generator allocator.
#[derive(Debug, Default)]
pub struct PktGenAllocator {
    pipes: FxHashMap<u16, PipeResources>,
}

impl PktGenAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lowest free application slot of `pipe`.
    pub fn alloc_app(&mut self, pipe: u16) -> Option<PktGenApp> {
        let res = self.pipes.entry(pipe).or_default();
        let app = (0..PKTGEN_APPS_PER_PIPE).find(|app| res.apps & (1 << app) == 0)?;
        res.apps |= 1 << app;
        Some(PktGenApp { pipe, app })
    }

    /// Returns an application slot. Returns `false` if it was not allocated.
    pub fn free_app(&mut self, app: PktGenApp) -> bool {
        let Some(res) = self.pipes.get_mut(&app.pipe) else {
            return false;
        };
        if app.app >= PKTGEN_APPS_PER_PIPE || res.apps & (1 << app.app) == 0 {
            return false;
        }
        res.apps &= !(1 << app.app);
        true
    }

    /// Allocates `len` bytes of template buffer on `pipe`, first fit. Returns the offset.
    pub fn alloc_buffer(&mut self, pipe: u16, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }

        let res = self.pipes.entry(pipe).or_default();
        let mut cursor = 0;
        let mut at = res.chunks.len();
        for (idx, (offset, chunk_len)) in res.chunks.iter().enumerate() {
            if *offset >= cursor + len {
                at = idx;
                break;
            }
            cursor = align_up(offset + chunk_len);
        }

        if at == res.chunks.len() && cursor + len > PKTGEN_BUFFER_SIZE {
            return None;
        }

        res.chunks.insert(at, (cursor, len));
        Some(cursor)
    }

    /// Frees the buffer chunk starting at `offset`. Returns `false` if there is none.
    pub fn free_buffer(&mut self, pipe: u16, offset: usize) -> bool {
        let Some(res) = self.pipes.get_mut(&pipe) else {
            return false;
        };
        match res.chunks.iter().position(|(o, _)| *o == offset) {
            Some(idx) => {
                res.chunks.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Buffer bytes in use on `pipe`, not counting alignment padding.
    pub fn buffer_used(&self, pipe: u16) -> usize {
        self.pipes.get(&pipe).map(|r| r.chunks.iter().map(|(_, len)| len).sum()).unwrap_or(0)
    }

    /// Application slots in use on `pipe`.
    pub fn apps_used(&self, pipe: u16) -> u32 {
        self.pipes.get(&pipe).map(|r| r.apps.count_ones()).unwrap_or(0)
    }
}

#[inline]
const fn align_up(n: usize) -> usize {
    (n + PKTGEN_BUFFER_ALIGN - 1) & !(PKTGEN_BUFFER_ALIGN - 1)
}
