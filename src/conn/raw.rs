//! Raw packet issuer.
//!
//! One writable cycle gets one issue. The issuer drives the transport
//! once, takes custody of whatever did not fit, and trips on callers
//! that try to write twice in a cycle or while residue is pending.

use log::{debug, error};

use super::residue::Residue;
use super::Limits;
use crate::context::Stats;
use crate::error::WriteError;
use crate::transport::{Transport, TxAttempt};

/// Residue drain verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Drain {
    /// Nothing was pending.
    Idle,
    /// Residue fully delivered.
    Done,
    /// Some residue remains; writable re-armed.
    Partial,
    /// Residue fully delivered while flushing-before-close: tear the
    /// connection down now.
    FlushedClose,
}

/// Transport plus the per-connection write-cycle state.
#[derive(Debug)]
pub(crate) struct RawTx<T> {
    pub(crate) transport: T,
    pub(crate) trunc: Residue,
    /// Set after any wire attempt; reset by the event loop when the
    /// next writable event is delivered.
    pub(crate) could_have_pending: bool,
    pub(crate) unusable: bool,
    /// The kernel refused bytes outright on the last attempt.
    pub(crate) blocking_send: bool,
    pub(crate) wants_writable: bool,
}

impl<T: Transport> RawTx<T> {
    pub fn new(transport: T) -> Self {
        RawTx {
            transport,
            trunc: Residue::new(),
            could_have_pending: false,
            unusable: false,
            blocking_send: false,
            wants_writable: false,
        }
    }

    #[inline]
    pub fn has_residue(&self) -> bool { self.trunc.has_residue() }

    /// One transport attempt; `WouldBlock` counts as zero bytes.
    fn attempt(&mut self, buf: &[u8]) -> Result<usize, WriteError> {
        match self.transport.write(buf) {
            Ok(TxAttempt::Written(n)) => Ok(n),
            Ok(TxAttempt::WouldBlock) => {
                self.blocking_send = true;
                Ok(0)
            }
            Ok(TxAttempt::Interrupted) => Ok(0),
            Err(e) => {
                // sends are over for good; let close know
                self.unusable = true;
                Err(WriteError::Transport(e))
            }
        }
    }

    /// Issue one framed packet. Returns the count of bytes taken into
    /// custody: everything, once the call succeeds, whether the wire
    /// took it now or the residue buffer holds the tail.
    pub fn issue(
        &mut self,
        limits: &Limits,
        serv_buf_size: usize,
        stats: &Stats,
        flushing: bool,
        buf: &[u8],
    ) -> Result<usize, WriteError> {
        if self.could_have_pending {
            error!(
                "illegal back-to-back write of {} detected; \
                 writes belong inside the writable callback",
                buf.len()
            );
            return Err(WriteError::IllegalReentry);
        }

        Stats::bump(&stats.raw_writes, 1);

        if buf.is_empty() {
            return Ok(0);
        }

        // sends after the truncation buffer cleared are ignored
        if flushing && !self.trunc.has_residue() {
            return Ok(buf.len());
        }

        if self.trunc.has_residue() {
            error!(
                "refusing fresh write of {} while {} residue bytes pending",
                buf.len(),
                self.trunc.len()
            );
            return Err(WriteError::PendingResidue);
        }

        let cap = limits.tx_cap(serv_buf_size);
        let n = self.attempt(&buf[..buf.len().min(cap)])?;

        // something got written, it can have been truncated now
        self.could_have_pending = true;

        if n == buf.len() {
            return Ok(n);
        }

        debug!("new partial: sent {} of {}", n, buf.len());
        Stats::bump(&stats.partial_events, 1);
        Stats::bump(&stats.partial_bytes, (buf.len() - n) as u64);

        self.trunc.stash(&buf[n..]);
        // something buffered: force another chance to send
        self.wants_writable = true;

        Ok(buf.len())
    }

    /// Bytes a packet sender already delivered follow the same
    /// custody rules as a transport short write.
    pub fn absorb_handled(
        &mut self,
        stats: &Stats,
        sent: usize,
        buf: &[u8],
    ) -> Result<usize, WriteError> {
        if self.could_have_pending {
            return Err(WriteError::IllegalReentry);
        }
        debug_assert!(!self.trunc.has_residue());

        Stats::bump(&stats.raw_writes, 1);
        self.could_have_pending = true;

        if sent >= buf.len() {
            return Ok(buf.len());
        }

        Stats::bump(&stats.partial_events, 1);
        Stats::bump(&stats.partial_bytes, (buf.len() - sent) as u64);
        self.trunc.stash(&buf[sent..]);
        self.wants_writable = true;

        Ok(buf.len())
    }

    /// Redeliver pending residue. Residue always outranks fresh
    /// payload.
    pub fn drain(&mut self, stats: &Stats, flushing: bool) -> Result<Drain, WriteError> {
        if !self.trunc.has_residue() {
            return Ok(Drain::Idle);
        }
        if self.could_have_pending {
            return Err(WriteError::IllegalReentry);
        }

        Stats::bump(&stats.raw_writes, 1);

        let n = match self.transport.write(self.trunc.pending()) {
            Ok(TxAttempt::Written(n)) => n,
            Ok(TxAttempt::WouldBlock) => {
                self.blocking_send = true;
                0
            }
            Ok(TxAttempt::Interrupted) => 0,
            Err(e) => {
                self.unusable = true;
                return Err(WriteError::Transport(e));
            }
        };

        self.could_have_pending = true;
        self.trunc.advance(n);

        if !self.trunc.has_residue() {
            debug!("partial send completed");
            if flushing {
                debug!("flush done, signalling to close now");
                return Ok(Drain::FlushedClose);
            }
            self.wants_writable = true;
            return Ok(Drain::Done);
        }

        debug!("partial advanced {}, {} left", n, self.trunc.len());
        self.wants_writable = true;
        Ok(Drain::Partial)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::NonBlocking;
    use std::io::Write;

    struct LimitWriter {
        buf: Vec<u8>,
        wlimit: usize,
    }

    impl Write for LimitWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let len = std::cmp::min(buf.len(), self.wlimit);
            self.buf.extend_from_slice(&buf[..len]);
            Ok(len)
        }

        fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
    }

    fn raw(wlimit: usize) -> RawTx<NonBlocking<LimitWriter>> {
        RawTx::new(NonBlocking(LimitWriter {
            buf: Vec::new(),
            wlimit,
        }))
    }

    #[test]
    fn full_write_no_residue() {
        let mut r = raw(64);
        let stats = Stats::default();
        let n = r
            .issue(&Limits::default(), 4096, &stats, false, b"hello")
            .unwrap();
        assert_eq!(n, 5);
        assert!(!r.has_residue());
        assert!(r.could_have_pending);
    }

    #[test]
    fn short_write_takes_custody() {
        let mut r = raw(3);
        let stats = Stats::default();
        let n = r
            .issue(&Limits::default(), 4096, &stats, false, b"hello")
            .unwrap();
        assert_eq!(n, 5);
        assert!(r.has_residue());
        assert!(r.wants_writable);
        assert_eq!(r.transport.as_ref().buf, b"hel");

        r.could_have_pending = false;
        assert_eq!(r.drain(&stats, false).unwrap(), Drain::Done);
        assert_eq!(r.transport.as_ref().buf, b"hello");
    }

    #[test]
    fn reentry_detected() {
        let mut r = raw(64);
        let stats = Stats::default();
        r.issue(&Limits::default(), 4096, &stats, false, b"a").unwrap();
        let err = r.issue(&Limits::default(), 4096, &stats, false, b"b");
        assert!(matches!(err, Err(WriteError::IllegalReentry)));
    }

    #[test]
    fn fresh_write_with_residue_refused() {
        let mut r = raw(1);
        let stats = Stats::default();
        r.issue(&Limits::default(), 4096, &stats, false, b"abc").unwrap();
        r.could_have_pending = false;
        let err = r.issue(&Limits::default(), 4096, &stats, false, b"xyz");
        assert!(matches!(err, Err(WriteError::PendingResidue)));
    }

    #[test]
    fn flush_close_signals() {
        let mut r = raw(1);
        let stats = Stats::default();
        r.issue(&Limits::default(), 4096, &stats, false, b"abc").unwrap();

        // fresh sends while flushing still respect the residue
        r.could_have_pending = false;
        let err = r.issue(&Limits::default(), 4096, &stats, true, b"zz");
        assert!(matches!(err, Err(WriteError::PendingResidue)));

        r.could_have_pending = false;
        assert_eq!(r.drain(&stats, true).unwrap(), Drain::Partial);
        r.could_have_pending = false;
        assert_eq!(r.drain(&stats, true).unwrap(), Drain::FlushedClose);

        // truncation buffer cleared: flushing sends are no-ops
        r.could_have_pending = false;
        let n = r.issue(&Limits::default(), 4096, &stats, true, b"zz").unwrap();
        assert_eq!(n, 2);
    }
}
