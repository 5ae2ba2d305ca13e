//! Payload-transforming extensions.
//!
//! Extensions sit between the caller's payload and the framer. Each
//! one may grow, shrink, replace or withhold the payload (a
//! compression extension does all four). An extension that replaces
//! the buffer must hand back a view with its own headroom, since the
//! frame head is still built in front of whatever reaches the wire.
//!
//! Two capabilities exist, held in separate slots on the connection:
//! the per-frame payload transform ([`Extension`]) and the rare
//! whole-packet takeover ([`PacketSender`]) used by alternative
//! transports.

use crate::conn::WriteProtocol;
use crate::error::WriteError;
use crate::HEADROOM;

/// A payload view with headroom: `buf[..start]` is writable scratch
/// for frame heads, `buf[start..]` is the payload.
#[derive(Debug)]
pub struct TxChunk<'a> {
    pub buf: &'a mut [u8],
    pub start: usize,
}

impl<'a> TxChunk<'a> {
    /// View over a caller buffer laid out with [`HEADROOM`].
    #[inline]
    pub fn with_headroom(buf: &'a mut [u8]) -> Self {
        TxChunk {
            buf,
            start: HEADROOM,
        }
    }

    #[inline]
    pub fn payload_len(&self) -> usize { self.buf.len() - self.start }

    #[inline]
    pub fn payload(&self) -> &[u8] { &self.buf[self.start..] }

    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let start = self.start;
        &mut self.buf[start..]
    }
}

/// Result of one [`Extension::payload_tx`] pass.
pub struct TxPass<'a> {
    /// The payload going onward, possibly a different buffer.
    pub chunk: TxChunk<'a>,
    /// The extension holds more output; it wants another writable
    /// pass before the frame train ends.
    pub more: bool,
    /// RSV bits (pre-shifted, `0x70` mask) to set on the frame head.
    pub rsv: u8,
}

/// Verdict of a [`PacketSender`] offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketTx {
    /// Not handled; the pipeline writes to the socket itself.
    Pass,
    /// The sender put `n` bytes of the packet on its own wire.
    Handled(usize),
}

/// An extension's abort signal. The pipeline turns it into a fatal
/// write error for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtFatal;

/// Per-frame payload transform.
pub trait Extension {
    fn payload_tx<'a>(
        &'a mut self,
        chunk: TxChunk<'a>,
        wp: WriteProtocol,
    ) -> Result<TxPass<'a>, ExtFatal> {
        let _ = wp;
        Ok(TxPass {
            chunk,
            more: false,
            rsv: 0,
        })
    }
}

/// Whole-packet takeover: offered the fully framed bytes right before
/// the socket write.
pub trait PacketSender {
    fn packet_tx(&mut self, buf: &[u8]) -> Result<PacketTx, ExtFatal>;
}

/// Run the chain over one payload. Returns the surviving chunk plus
/// the OR of every extension's drain request and RSV bits.
pub(crate) fn run_payload_tx<'a>(
    exts: &'a mut [Box<dyn Extension>],
    mut chunk: TxChunk<'a>,
    wp: WriteProtocol,
) -> Result<(TxChunk<'a>, bool, u8), WriteError> {
    let mut more = false;
    let mut rsv = 0u8;
    for ext in exts.iter_mut() {
        let pass = Extension::payload_tx(&mut **ext, chunk, wp)
            .map_err(|ExtFatal| WriteError::ExtensionFatal)?;
        chunk = pass.chunk;
        more |= pass.more;
        rsv |= pass.rsv & 0x70;
    }
    Ok((chunk, more, rsv))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::conn::{WriteKind, WriteProtocol};

    struct Doubler {
        out: Vec<u8>,
    }

    impl Extension for Doubler {
        fn payload_tx<'a>(
            &'a mut self,
            chunk: TxChunk<'a>,
            _wp: WriteProtocol,
        ) -> Result<TxPass<'a>, ExtFatal> {
            self.out = vec![0u8; HEADROOM];
            for b in chunk.payload() {
                self.out.push(*b);
                self.out.push(*b);
            }
            Ok(TxPass {
                chunk: TxChunk::with_headroom(&mut self.out),
                more: false,
                rsv: 0x40,
            })
        }
    }

    #[test]
    fn chain_replaces_buffer() {
        let mut exts: Vec<Box<dyn Extension>> = vec![Box::new(Doubler { out: Vec::new() })];
        let mut buf = vec![0u8; HEADROOM + 2];
        buf[HEADROOM..].copy_from_slice(b"hi");

        let wp = WriteProtocol::new(WriteKind::Binary);
        let (chunk, more, rsv) =
            run_payload_tx(&mut exts, TxChunk::with_headroom(&mut buf), wp).unwrap();

        assert_eq!(chunk.payload(), b"hhii");
        assert!(!more);
        assert_eq!(rsv, 0x40);
    }

    #[test]
    fn empty_chain_passes_through() {
        let mut exts: Vec<Box<dyn Extension>> = Vec::new();
        let mut buf = vec![0u8; HEADROOM + 3];
        buf[HEADROOM..].copy_from_slice(b"abc");
        let ptr = buf.as_ptr() as usize;

        let wp = WriteProtocol::new(WriteKind::Text);
        let (chunk, more, rsv) =
            run_payload_tx(&mut exts, TxChunk::with_headroom(&mut buf), wp).unwrap();

        assert_eq!(chunk.buf.as_ptr() as usize, ptr);
        assert_eq!(chunk.payload(), b"abc");
        assert!(!more);
        assert_eq!(rsv, 0);
    }
}
