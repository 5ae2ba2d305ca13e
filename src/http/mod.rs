//! Http serving state and the file pump's collaborators.

pub mod chunked;
mod pump;
pub mod ranges;

pub use pump::FragmentOutcome;
pub use ranges::{ByteRange, RangeState};

use std::io::{self, Read, Seek, SeekFrom};

use crate::conn::WriteProtocol;
use crate::error::WriteError;

/// File provider handle, the shape the pump reads through.
///
/// Closing is dropping. Anything `Read + Seek` qualifies.
pub trait VfsFile {
    /// Seek relative to the current position, returns the new one.
    fn seek_cur(&mut self, offset: i64) -> io::Result<u64>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<T: Read + Seek> VfsFile for T {
    fn seek_cur(&mut self, offset: i64) -> io::Result<u64> {
        self.seek(SeekFrom::Current(offset))
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> { Read::read(self, buf) }
}

/// A child connection's write, handed to the parent's protocol.
pub struct WritePassthru<'a> {
    pub buf: &'a mut [u8],
    pub wp: WriteProtocol,
}

/// One chunk offered to the html interpreter. Data sits in
/// `buf[..len]`; the interpreter may rewrite it in place and grow it
/// up to `buf.len()`.
pub struct HtmlArgs<'a> {
    pub buf: &'a mut [u8],
    pub len: usize,
    pub is_final: bool,
    pub chunked: bool,
}

/// What to do with the connection once a file transaction completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Keep it for the next pipelined transaction.
    KeepAlive,
    /// Hang it up.
    HangUp,
}

/// Protocol hooks the embedder may install on a connection.
pub trait Hooks {
    fn child_write_via_parent(&mut self, pass: WritePassthru) -> Result<(), WriteError> {
        let _ = pass;
        Ok(())
    }

    fn process_html(&mut self, args: &mut HtmlArgs) -> Result<(), WriteError> {
        let _ = args;
        Ok(())
    }

    fn file_completion(&mut self) -> Completion { Completion::KeepAlive }
}

/// Http transaction state, write direction.
#[derive(Default)]
pub struct HttpTx {
    pub(crate) file: Option<Box<dyn VfsFile>>,
    pub(crate) filepos: u64,
    pub(crate) filelen: u64,
    pub(crate) tx_content_length: u64,
    pub(crate) tx_content_remain: u64,
    pub(crate) ranges: Option<RangeState>,
    pub(crate) sending_chunked: bool,
    pub(crate) interpreting: bool,
    pub(crate) multipart_content_type: String,
}

impl HttpTx {
    /// Declare the body size; body writes count down from it and the
    /// last one is promoted to a final write.
    pub fn set_content_length(&mut self, n: u64) {
        self.tx_content_length = n;
        self.tx_content_remain = n;
    }

    #[inline]
    pub fn content_remain(&self) -> u64 { self.tx_content_remain }

    pub fn set_ranges(&mut self, ranges: RangeState) { self.ranges = Some(ranges) }

    pub fn set_chunked(&mut self, v: bool) { self.sending_chunked = v }

    /// Route every chunk through [`Hooks::process_html`].
    pub fn set_interpreting(&mut self, v: bool) { self.interpreting = v }

    /// Content type repeated in each multipart range part.
    pub fn set_multipart_content_type(&mut self, ct: impl Into<String>) {
        self.multipart_content_type = ct.into();
    }

    #[inline]
    pub fn file_open(&self) -> bool { self.file.is_some() }

    #[inline]
    pub fn filepos(&self) -> u64 { self.filepos }

    #[inline]
    pub fn filelen(&self) -> u64 { self.filelen }
}
