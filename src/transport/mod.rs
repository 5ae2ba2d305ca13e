//! Write-capable transport handles.
//!
//! The pipeline never talks to a socket directly; it drives anything
//! implementing [`Transport`]. Plain sockets and TLS sessions both fit
//! behind the [`NonBlocking`] adapter, which translates the
//! `WouldBlock` / `Interrupted` error kinds of a non-blocking
//! [`std::io::Write`] into the three-way [`TxAttempt`] result.

use std::io::{self, ErrorKind, Write};

/// Outcome of one best-effort write.
///
/// Short writes (`Written(n)` with `n < len`) are legal and expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxAttempt {
    /// `n` bytes accepted, possibly fewer than offered.
    Written(usize),
    /// Kernel send space exhausted; retry on the next writable event.
    /// Hints at flow-control pressure.
    WouldBlock,
    /// Interrupted before anything was written; retry later.
    Interrupted,
}

/// One best-effort write to the wire.
///
/// Fatal conditions surface as `Err`; backpressure surfaces as
/// [`TxAttempt::WouldBlock`].
pub trait Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<TxAttempt>;
}

/// Adapter for non-blocking [`std::io::Write`] handles.
#[derive(Debug)]
pub struct NonBlocking<IO>(pub IO);

impl<IO> NonBlocking<IO> {
    #[inline]
    pub fn into_inner(self) -> IO { self.0 }
}

impl<IO> AsRef<IO> for NonBlocking<IO> {
    #[inline]
    fn as_ref(&self) -> &IO { &self.0 }
}

impl<IO> AsMut<IO> for NonBlocking<IO> {
    #[inline]
    fn as_mut(&mut self) -> &mut IO { &mut self.0 }
}

impl<IO: Write> Transport for NonBlocking<IO> {
    fn write(&mut self, buf: &[u8]) -> io::Result<TxAttempt> {
        match self.0.write(buf) {
            Ok(n) => Ok(TxAttempt::Written(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(TxAttempt::WouldBlock),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(TxAttempt::Interrupted),
            Err(e) => Err(e),
        }
    }
}
