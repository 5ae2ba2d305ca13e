//! The file-fragment pump.
//!
//! Drives an open file transaction whenever the connection is
//! writable: drains residue first, reads the next fragment into the
//! service scratch, applies range headers and chunk framing, and
//! feeds the write dispatcher until the transport chokes or the file
//! completes.

use log::debug;

use super::{chunked, ranges, Completion, HtmlArgs, VfsFile};
use crate::conn::{Conn, PendingTimeout, State, WriteKind, WriteProtocol};
use crate::context::Context;
use crate::error::{Error, WriteError};
use crate::transport::Transport;
use crate::HEADROOM;

/// Verdict of one [`Conn::serve_file_fragment`] invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// Transaction done; http/1 keepalive may reuse the connection.
    Completed,
    /// Transaction done and the completion hook wants the http/1
    /// connection closed.
    CompletedHangUp,
    /// Transport choked or flow control stalled; more to do on the
    /// next writable event.
    Pending,
    /// No file transaction is active.
    Idle,
}

impl<T: Transport> Conn<T> {
    /// Start streaming `file` of `filelen` bytes. Content length,
    /// ranges, chunking and interpretation are configured on
    /// [`http_mut`](Conn::http_mut) before the first fragment runs.
    pub fn begin_file_serve(&mut self, file: Box<dyn VfsFile>, filelen: u64) {
        self.http.file = Some(file);
        self.http.filelen = filelen;
        self.http.filepos = 0;
    }

    /// Push file fragments at the transport until it chokes or the
    /// file completes. Invoked from the writable callback while a
    /// file transaction is active.
    pub fn serve_file_fragment(&mut self, ctx: &mut Context) -> Result<FragmentOutcome, Error> {
        if self.http.file.is_none() {
            return Ok(FragmentOutcome::Idle);
        }

        // the pump borrows the service scratch for the whole run
        let mut serv = std::mem::take(&mut ctx.serv_buf);
        let res = self.fragment_loop(ctx, &mut serv);
        ctx.serv_buf = serv;

        if res.is_err() {
            // file had it: close the handle, the caller tears down
            self.http.file = None;
        }
        res
    }

    fn fragment_loop(&mut self, ctx: &mut Context, serv: &mut [u8]) -> Result<FragmentOutcome, Error> {
        let mut finished = false;

        loop {
            if self.raw.blocking_send {
                self.raw.wants_writable = true;
                return Ok(FragmentOutcome::Pending);
            }

            // each iteration is its own write cycle
            self.raw.could_have_pending = false;

            // residue outranks fresh fragments
            if self.raw.has_residue() {
                self.raw.drain(ctx.stats(), false)?;
                continue;
            }

            if finished || self.http.filepos >= self.http.filelen {
                return self.file_complete();
            }

            let pstart = HEADROOM;
            let mut p = pstart;

            // entering a range: seek there and emit the part header
            if let Some(r) = self.http.ranges.as_mut() {
                if !r.inside {
                    let cur = r.current();
                    debug!("doing range start {}", cur.start);

                    let delta = cur.start as i64 - self.http.filepos as i64;
                    let file = self
                        .http
                        .file
                        .as_mut()
                        .ok_or(WriteError::FileUnavailable)?;
                    file.seek_cur(delta)?;
                    self.http.filepos = cur.start;

                    if r.is_multipart() {
                        p += ranges::part_header(
                            &mut serv[p..],
                            &self.http.multipart_content_type,
                            cur,
                            r.extent(),
                        )?;
                    }

                    r.budget = cur.end - cur.start + 1;
                    r.inside = true;
                }
            }

            let boundary_len = p - pstart;
            let chunking = self.http.sending_chunked;

            // read budget for this fragment
            let mut poss = serv.len() - p;
            if self.http.tx_content_length > 0 {
                poss = poss.min(self.http.tx_content_remain as usize);
            }
            if let Some(tps) = self.limits.tx_packet_size {
                if tps > 0 {
                    poss = poss.min(tps);
                }
            }
            if let Some(h2) = self.h2.as_ref() {
                let cr = h2.credit.get();
                if cr == 0 {
                    debug!("no tx credit, waiting for the peer");
                    return Ok(FragmentOutcome::Pending);
                }
                poss = poss.min(cr);
            }
            if let Some(r) = self.http.ranges.as_ref() {
                if r.is_multipart() {
                    poss = poss.saturating_sub(ranges::TRAILING_RESERVE);
                }
                poss = poss.min(r.budget as usize);
            }
            if chunking {
                // size-line slot in front, growth room for the
                // interpreter and the chunk CRLF behind
                p += chunked::SIZE_SLOT;
                poss = poss.saturating_sub(chunked::SIZE_SLOT + 128 + chunked::TRAILER.len());
            }

            let amount = {
                let file = self
                    .http
                    .file
                    .as_mut()
                    .ok_or(WriteError::FileUnavailable)?;
                file.read(&mut serv[p..p + poss])?
            };

            let mut n = if chunking { amount } else { boundary_len + amount };

            if n == 0 && amount == 0 {
                // provider ran dry short of filelen
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }

            self.pending_timeout = Some(PendingTimeout::HttpContent);

            let is_final = self.http.filepos + amount as u64 == self.http.filelen;

            if self.http.interpreting {
                if let Some(hooks) = self.hooks.as_mut() {
                    let cap = (p + poss + 128).min(serv.len());
                    let mut args = HtmlArgs {
                        buf: &mut serv[p..cap],
                        len: amount,
                        is_final,
                        chunked: chunking,
                    };
                    hooks.process_html(&mut args)?;
                    let grown = args.len.min(args.buf.len());
                    n = if chunking { grown } else { boundary_len + grown };
                }
            }

            // the very last byte of the last range drags the trailing
            // boundary along in the same fragment
            if let Some(r) = self.http.ranges.as_ref() {
                if r.is_multipart() && r.on_last() && r.budget == amount as u64 {
                    let at = pstart + n;
                    serv[at..at + ranges::TRAILING_BOUNDARY.len()]
                        .copy_from_slice(ranges::TRAILING_BOUNDARY);
                    n += ranges::TRAILING_BOUNDARY.len();
                    debug!("added trailing boundary");
                }
            }

            // chunk framing: size line flush against the data, CRLF
            // behind it
            let (write_from, write_len) = if chunking {
                let mut line = [0u8; chunked::SIZE_SLOT];
                let sl = chunked::encode_size(n, &mut line);
                let head_at = p - sl;
                serv[head_at..p].copy_from_slice(&line[..sl]);
                serv[p + n..p + n + 2].copy_from_slice(chunked::TRAILER);
                (head_at, sl + n + 2)
            } else {
                (pstart, n)
            };

            let wp = if is_final {
                WriteProtocol::new(WriteKind::HttpFinal)
            } else {
                WriteProtocol::new(WriteKind::Http)
            };
            let m = self.write(
                ctx,
                &mut serv[write_from - HEADROOM..write_from + write_len],
                wp,
            )?;

            // headers and boundaries are not file content: the file
            // position moves by what was read, not by what was framed
            self.http.filepos += amount as u64;

            if let Some(r) = self.http.ranges.as_mut() {
                r.budget -= amount as u64;
                if r.budget == 0 {
                    debug!("range budget exhausted");
                    r.inside = false;
                    if !r.advance() {
                        finished = true;
                        continue;
                    }
                }
            }

            if m != write_len {
                // not everything was taken: rewind so the next
                // fragment restarts at the cut
                let file = self
                    .http
                    .file
                    .as_mut()
                    .ok_or(WriteError::FileUnavailable)?;
                file.seek_cur(m as i64 - write_len as i64)?;
            }
        }
    }

    fn file_complete(&mut self) -> Result<FragmentOutcome, Error> {
        self.state = State::Http;
        // might be held in keepalive: close the handle off here
        self.http.file = None;
        debug!("file completed");

        let verdict = match self.hooks.as_mut() {
            Some(hooks) => hooks.file_completion(),
            None => Completion::KeepAlive,
        };

        // an http/2 substream hanging up is a stream matter, not a
        // network-connection one
        if verdict == Completion::HangUp && !self.mode.uses_h2() {
            return Ok(FragmentOutcome::CompletedHangUp);
        }
        Ok(FragmentOutcome::Completed)
    }
}
