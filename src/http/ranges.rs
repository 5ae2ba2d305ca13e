//! Http byte ranges and the multipart/byteranges body framing.
//!
//! The boundary token is the fixed literal `_lws`; servers feeding
//! this layer advertise `multipart/byteranges; boundary=_lws` in the
//! response headers.

use std::io::{self, Write};

/// One requested range, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// Per-part header before each range, trailing boundary after the
/// last.
pub(crate) const TRAILING_BOUNDARY: &[u8] = b"_lws\r\n";

/// Bytes the read budget reserves so the trailing boundary always
/// fits the same fragment as the final range byte.
pub(crate) const TRAILING_RESERVE: usize = 7;

pub(crate) fn part_header(
    out: &mut [u8],
    content_type: &str,
    r: ByteRange,
    extent: u64,
) -> io::Result<usize> {
    let mut cur = io::Cursor::new(out);
    write!(
        cur,
        "_lws\r\nContent-Type: {}\r\nContent-Range: bytes {}-{}/{}\r\n\r\n",
        content_type, r.start, r.end, extent
    )?;
    Ok(cur.position() as usize)
}

/// Range sequencing state across file fragments.
#[derive(Debug)]
pub struct RangeState {
    ranges: Vec<ByteRange>,
    extent: u64,
    send_ctr: usize,
    /// The file is positioned inside the current range.
    pub(crate) inside: bool,
    /// Bytes of the current range still unread.
    pub(crate) budget: u64,
}

impl RangeState {
    /// `extent` is the full resource size quoted in each
    /// `Content-Range`.
    pub fn new(ranges: Vec<ByteRange>, extent: u64) -> Self {
        RangeState {
            ranges,
            extent,
            send_ctr: 0,
            inside: false,
            budget: 0,
        }
    }

    #[inline]
    pub fn count(&self) -> usize { self.ranges.len() }

    /// Two or more ranges take the multipart body form.
    #[inline]
    pub fn is_multipart(&self) -> bool { self.ranges.len() > 1 }

    #[inline]
    pub fn extent(&self) -> u64 { self.extent }

    #[inline]
    pub(crate) fn current(&self) -> ByteRange { self.ranges[self.send_ctr] }

    #[inline]
    pub(crate) fn on_last(&self) -> bool { self.send_ctr + 1 == self.ranges.len() }

    /// Step to the next range; false when all are done.
    pub(crate) fn advance(&mut self) -> bool {
        self.send_ctr += 1;
        self.send_ctr < self.ranges.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sequencing() {
        let mut rs = RangeState::new(
            vec![
                ByteRange { start: 0, end: 3 },
                ByteRange { start: 10, end: 13 },
            ],
            20,
        );
        assert!(rs.is_multipart());
        assert_eq!(rs.current(), ByteRange { start: 0, end: 3 });
        assert!(!rs.on_last());

        assert!(rs.advance());
        assert_eq!(rs.current(), ByteRange { start: 10, end: 13 });
        assert!(rs.on_last());

        assert!(!rs.advance());
    }

    #[test]
    fn part_header_layout() {
        let mut buf = [0u8; 128];
        let n = part_header(
            &mut buf,
            "text/plain",
            ByteRange { start: 10, end: 13 },
            20,
        )
        .unwrap();
        assert_eq!(
            &buf[..n],
            b"_lws\r\nContent-Type: text/plain\r\nContent-Range: bytes 10-13/20\r\n\r\n"
                as &[u8]
        );
    }

    #[test]
    fn single_range_not_multipart() {
        let rs = RangeState::new(vec![ByteRange { start: 5, end: 9 }], 100);
        assert!(!rs.is_multipart());
        assert_eq!(rs.count(), 1);
    }
}
