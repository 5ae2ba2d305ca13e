//! Per-thread service state.
//!
//! One [`Context`] belongs to one service thread; the connections it
//! serves never migrate while active, so nothing here is locked. The
//! statistics counters are relaxed atomics shared with whoever wants
//! to read them; lossy accounting is acceptable.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::HEADROOM;

/// Opaque per-context connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

/// Write-path statistics counters.
#[derive(Debug, Default)]
pub struct Stats {
    /// Calls into the raw issuer.
    pub raw_writes: AtomicU64,
    /// Calls into the public write entry point.
    pub api_writes: AtomicU64,
    /// Payload bytes accepted by the write entry point.
    pub tx_bytes: AtomicU64,
    /// Short writes that left residue behind.
    pub partial_events: AtomicU64,
    /// Bytes taken into the partial-send buffer.
    pub partial_bytes: AtomicU64,
}

impl Stats {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Per-thread context: scratch buffer, draining-extension roster,
/// statistics, connection identity allocator.
#[derive(Debug)]
pub struct Context {
    pub(crate) serv_buf: Vec<u8>,
    timeout_secs: u32,
    draining: Vec<ConnId>,
    stats: Stats,
    next_id: u64,
}

impl Context {
    /// `serv_buf_size` is the shared scratch used by the file pump;
    /// it is clamped below to something the framing layers fit in.
    pub fn new(serv_buf_size: usize, timeout_secs: u32) -> Self {
        Context {
            serv_buf: vec![0u8; serv_buf_size.max(HEADROOM + 256)],
            timeout_secs,
            draining: Vec::new(),
            stats: Stats::default(),
            next_id: 1,
        }
    }

    #[inline]
    pub fn serv_buf_size(&self) -> usize { self.serv_buf.len() }

    /// Seconds granted to one file fragment before the scheduler may
    /// tear the connection down.
    #[inline]
    pub fn timeout_secs(&self) -> u32 { self.timeout_secs }

    #[inline]
    pub fn stats(&self) -> &Stats { &self.stats }

    pub(crate) fn alloc_id(&mut self) -> ConnId {
        let id = ConnId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Connections whose extensions still hold undelivered output.
    /// The event loop must call them back writable, oldest first.
    #[inline]
    pub fn drainings(&self) -> &[ConnId] { &self.draining }

    pub(crate) fn push_draining(&mut self, id: ConnId) {
        if !self.draining.contains(&id) {
            self.draining.push(id);
        }
    }

    pub(crate) fn unlink_draining(&mut self, id: ConnId) {
        self.draining.retain(|d| *d != id);
    }
}
