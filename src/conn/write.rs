//! The write dispatcher.
//!
//! Public entry point for every outbound payload. Picks the http /
//! websocket / http-2 path, runs the extension transform, builds the
//! frame head in the caller's headroom, masks client frames and hands
//! the finished packet to the raw issuer.

use log::{debug, trace};

use super::raw::RawTx;
use super::{Conn, H2Tx, Limits, PendingTimeout, State, WriteKind, WriteProtocol};
use crate::context::{Context, Stats};
use crate::error::{Error, FrameError, WriteError};
use crate::ext::{run_payload_tx, ExtFatal, PacketSender, PacketTx, TxChunk};
use crate::frame::{mask, Fin, FrameHead, Mask, OpCode, PayloadLen, Rsv};
use crate::h2::frame::MAX_FRAME_PAYLOAD;
use crate::h2::{FrameHeader, FrameKind, FLAG_END_HEADERS, FLAG_END_STREAM, FRAME_HEADER_LEN};
use crate::http::{HttpTx, WritePassthru};
use crate::transport::Transport;
use crate::HEADROOM;

impl<T: Transport> Conn<T> {
    /// Write one payload.
    ///
    /// `buf` must reserve [`HEADROOM`] scratch bytes in front of the
    /// payload: `buf[..HEADROOM]` belongs to the library,
    /// `buf[HEADROOM..]` is the payload. Frame heads are built inside
    /// the gap so one contiguous packet reaches the transport.
    ///
    /// Returns the count of payload bytes taken into custody (sent or
    /// buffered for redelivery). `Ok(0)` means the write was dropped
    /// by state or stalled on flow control; a short count means the
    /// caller retries the remainder on the next writable event, and
    /// only then.
    pub fn write(
        &mut self,
        ctx: &mut Context,
        buf: &mut [u8],
        wp: WriteProtocol,
    ) -> Result<usize, Error> {
        let mut wp = wp;

        if buf.len() < HEADROOM {
            return Err(WriteError::InsufficientHeadroom.into());
        }
        let orig_len = buf.len() - HEADROOM;
        if orig_len > i32::MAX as usize {
            return Err(WriteError::PayloadOverflow.into());
        }

        // a child whose parent owns the socket hands the whole write over
        if self.parent_carries_io {
            let hooks = self.hooks.as_mut().ok_or(WriteError::HookFatal)?;
            hooks.child_write_via_parent(WritePassthru { buf, wp })?;
            return Ok(orig_len);
        }

        Stats::bump(&ctx.stats().api_writes, 1);
        Stats::bump(&ctx.stats().tx_bytes, orig_len as u64);
        self.tx_total += orig_len as u64;

        // a draining extension owns this writable slot: whatever the
        // caller asked, the wire continues the previous action
        if self.ws.tx_draining_ext && self.state.is_ws() {
            ctx.unlink_draining(self.id);
            self.ws.tx_draining_ext = false;
            wp = self
                .ws
                .tx_draining_stashed_wp
                .with_kind(WriteKind::Continuation);
            trace!("forced draining wp to 0x{:02x}", wp.to_bits());
        }

        if self.mode.carries_ws() && self.state.is_ws() {
            self.pending_timeout = Some(PendingTimeout::WsPingPong);
        }

        if wp.kind.is_http() {
            return self.send_http(ctx, buf, wp, orig_len);
        }

        // not in a state to send ws frames: bin it quietly. Close
        // frames stay legal through the close handshake.
        if !self.state.is_ws()
            && !(self.state.in_close_handshake() && wp.kind == WriteKind::Close)
        {
            debug!("binning {:?} write in state {:?}", wp.kind, self.state);
            return Ok(0);
        }

        self.write_ws(ctx, buf, wp, orig_len)
    }

    /// Http body and header writes: no websocket framing, but http/2
    /// connections still wrap the bytes in one frame.
    fn send_http(
        &mut self,
        ctx: &mut Context,
        buf: &mut [u8],
        wp: WriteProtocol,
        orig_len: usize,
    ) -> Result<usize, Error> {
        let flushing = self.state == State::FlushingSendBeforeClose;

        if self.mode.uses_h2() {
            let h2 = match self.h2.as_mut() {
                Some(h2) => h2,
                None => {
                    debug!("h2 write without stream state");
                    return Ok(0);
                }
            };
            return h2_frame_send(
                &mut self.raw,
                h2,
                &mut self.http,
                &self.limits,
                ctx,
                flushing,
                buf,
                HEADROOM,
                0,
                orig_len,
                wp,
            );
        }

        // http/1 body accounting; the wire form does not change when
        // the count runs out, the transaction layer acts on it
        if matches!(wp.kind, WriteKind::Http | WriteKind::HttpFinal)
            && self.http.tx_content_length > 0
        {
            self.http.tx_content_remain =
                self.http.tx_content_remain.saturating_sub(orig_len as u64);
        }

        let n = self.raw.issue(
            &self.limits,
            ctx.serv_buf_size(),
            ctx.stats(),
            flushing,
            &buf[HEADROOM..],
        )?;
        Ok(n)
    }

    fn write_ws(
        &mut self,
        ctx: &mut Context,
        buf: &mut [u8],
        mut wp: WriteProtocol,
        orig_len: usize,
    ) -> Result<usize, Error> {
        if self.ws.ietf_spec_revision != 13 {
            return Err(FrameError::UnsupportedRevision.into());
        }

        let masked = self.mode.masks_frames();
        let flushing = self.state == State::FlushingSendBeforeClose;

        // continuing a frame whose head already went out: no new head,
        // no fresh nonce, the payload was masked on the first pass
        if self.ws.inside_frame {
            debug!("inside frame, {} more payload", orig_len);
            let n = issue_ext_access(
                &mut self.raw,
                &mut self.packet_sender,
                &self.limits,
                ctx,
                flushing,
                &buf[HEADROOM..],
            )?;
            self.ws.inside_frame = self.raw.has_residue();
            return Ok(n);
        }

        self.ws.clean_buffer = true;

        let orig_ptr = buf.as_ptr() as usize;
        let mut chunk = TxChunk::with_headroom(buf);
        let mut rsv = 0u8;

        // extension transform; control frames must cross untouched
        if !wp.kind.is_control() {
            let (out, more, out_rsv) = run_payload_tx(&mut self.exts, chunk, wp)?;
            chunk = out;
            rsv = out_rsv;

            if more && chunk.payload_len() != 0 {
                // the extension promised further fragments: remember
                // the provoking write so the last one gets its FIN,
                // and suppress FIN on this intermediate one
                trace!("extension draining, {} bytes this pass", chunk.payload_len());
                self.ws.tx_draining_ext = true;
                self.ws.tx_draining_stashed_wp = wp;
                ctx.push_draining(self.id);
                self.raw.wants_writable = true;
                wp.no_fin = true;
            }

            if chunk.payload_len() != 0 && self.ws.stashed_write_pending {
                self.ws.stashed_write_pending = false;
                wp = wp.with_kind(self.ws.stashed_write_kind);
            }

            if chunk.buf.as_ptr() as usize != orig_ptr {
                // the extension swapped in its own buffer
                if orig_len != 0 && chunk.payload_len() == 0 {
                    // it ate the input but has nothing to issue yet;
                    // park the write kind or its FIN semantics die here
                    if !self.ws.stashed_write_pending {
                        self.ws.stashed_write_kind = wp.kind;
                    }
                    self.ws.stashed_write_pending = true;
                    return Ok(orig_len);
                }
                self.ws.clean_buffer = false;
            }
        }

        // whatever buffer survived the chain still owes the framers
        // their gap
        if chunk.start < HEADROOM {
            return Err(WriteError::InsufficientHeadroom.into());
        }

        let payload_len = chunk.payload_len();

        let opcode = match wp.kind {
            WriteKind::Text => OpCode::Text,
            WriteKind::Binary => OpCode::Binary,
            WriteKind::Continuation => OpCode::Continue,
            WriteKind::Close => OpCode::Close,
            WriteKind::Ping => OpCode::Ping,
            WriteKind::Pong => OpCode::Pong,
            _ => return Err(WriteError::UnknownWriteKind(wp.to_bits()).into()),
        };

        // fresh per-frame nonce, clients only
        let head_mask = if masked {
            self.ws.mask = mask::new_rand_key();
            self.ws.mask_idx = 0;
            Mask::Key(self.ws.mask)
        } else {
            Mask::None
        };

        let head = FrameHead::new(
            if wp.no_fin { Fin::N } else { Fin::Y },
            Rsv::from_bits(rsv),
            opcode,
            head_mask,
            PayloadLen::from_num(payload_len as u64),
        );
        let pre = head.encoded_len();
        let start = chunk.start;
        head.encode(&mut chunk.buf[start - pre..start])?;

        // mask in place; residue and caller retries stay masked
        if masked {
            self.ws.mask_idx = mask::apply_mask_from(self.ws.mask, 0, chunk.payload_mut());
        }

        if wp.kind == WriteKind::Close && self.state == State::WsEstablished {
            self.state = State::WaitingToSendCloseNotification;
        }

        // ws-over-h2: the whole websocket frame rides in one DATA frame
        if self.mode.uses_h2() {
            let h2 = match self.h2.as_mut() {
                Some(h2) => h2,
                None => {
                    debug!("ws-over-h2 write without stream state");
                    return Ok(0);
                }
            };
            let n = h2_frame_send(
                &mut self.raw,
                h2,
                &mut self.http,
                &self.limits,
                ctx,
                flushing,
                chunk.buf,
                start,
                pre,
                payload_len,
                wp,
            )?;
            return Ok(if n == 0 && payload_len != 0 { 0 } else { orig_len });
        }

        let frame_len = pre + payload_len;
        let n = issue_ext_access(
            &mut self.raw,
            &mut self.packet_sender,
            &self.limits,
            ctx,
            flushing,
            &chunk.buf[start - pre..start + payload_len],
        )?;

        // head is out (or queued): no re-prepending until the frame
        // is fully acknowledged
        self.ws.inside_frame = self.raw.has_residue();

        if n == 0 {
            return Ok(0);
        }

        if n == frame_len {
            if wp.kind == WriteKind::Close
                && self.state == State::WaitingToSendCloseNotification
                && !self.raw.has_residue()
            {
                self.state = State::AwaitingCloseAck;
            }
            return Ok(orig_len);
        }

        if !self.ws.clean_buffer {
            // the wire bytes are the extension's, not the caller's;
            // partial counts in user-buffer units are meaningless and
            // the issuer buffered the transformed frame whole
            return Ok(orig_len);
        }

        Ok(n.saturating_sub(pre))
    }
}

/// Offer the finished packet to a packet sender, fall through to the
/// raw issuer when nobody claims it.
fn issue_ext_access<T: Transport>(
    raw: &mut RawTx<T>,
    packet_sender: &mut Option<Box<dyn PacketSender>>,
    limits: &Limits,
    ctx: &Context,
    flushing: bool,
    frame: &[u8],
) -> Result<usize, WriteError> {
    if let Some(sender) = packet_sender.as_deref_mut() {
        if !raw.has_residue() {
            let claim = sender
                .packet_tx(frame)
                .map_err(|ExtFatal| WriteError::ExtensionFatal)?;
            if let PacketTx::Handled(n) = claim {
                return raw.absorb_handled(ctx.stats(), n, frame);
            }
        }
    }
    raw.issue(limits, ctx.serv_buf_size(), ctx.stats(), flushing, frame)
}

/// Wrap `payload_len` bytes at `buf[start..]` (plus `ws_pre` already
/// framed bytes in front of them) into one http/2 frame and issue it.
///
/// Returns the count of payload bytes committed, after flow-control
/// clamping. A framed websocket payload is all-or-nothing: when the
/// window cannot take the whole frame nothing is sent.
#[allow(clippy::too_many_arguments)]
fn h2_frame_send<T: Transport>(
    raw: &mut RawTx<T>,
    h2: &mut H2Tx,
    http: &mut HttpTx,
    limits: &Limits,
    ctx: &Context,
    flushing: bool,
    buf: &mut [u8],
    start: usize,
    ws_pre: usize,
    payload_len: usize,
    mut wp: WriteProtocol,
) -> Result<usize, Error> {
    let mut flags = 0u8;
    let mut kind = FrameKind::Data;

    match wp.kind {
        WriteKind::HttpHeaders => {
            kind = FrameKind::Headers;
            if !wp.no_fin {
                flags |= FLAG_END_HEADERS;
            }
            if h2.send_end_stream || wp.h2_stream_end {
                flags |= FLAG_END_STREAM;
                h2.send_end_stream = true;
            }
        }
        WriteKind::HttpHeadersContinuation => {
            kind = FrameKind::Continuation;
            if !wp.no_fin {
                flags |= FLAG_END_HEADERS;
            }
            if h2.send_end_stream || wp.h2_stream_end {
                flags |= FLAG_END_STREAM;
                h2.send_end_stream = true;
            }
        }
        _ => {}
    }

    let mut len = payload_len;

    if len + ws_pre > MAX_FRAME_PAYLOAD as usize {
        if ws_pre > 0 {
            return Err(FrameError::PayloadTooLong.into());
        }
        // oversized bodies go out one maximum frame at a time
        len = MAX_FRAME_PAYLOAD as usize;
    }

    if kind == FrameKind::Data {
        if ws_pre > 0 {
            // never split a websocket frame across the window
            if h2.credit.get() < len + ws_pre {
                debug!("h2 credit {} short of framed {}", h2.credit.get(), len + ws_pre);
                return Ok(0);
            }
        } else {
            len = h2.credit.clamp_len(len);
            if len == 0 && payload_len != 0 {
                debug!("no tx credit, stalling");
                return Ok(0);
            }
        }
    }

    // body accounting: the stream ends itself when the declared
    // content runs out
    if matches!(wp.kind, WriteKind::Http | WriteKind::HttpFinal) && http.tx_content_length > 0 {
        http.tx_content_remain = http.tx_content_remain.saturating_sub(len as u64);
        debug!("tx_content_remain = {}", http.tx_content_remain);
        if http.tx_content_remain == 0 {
            debug!("selecting final write mode");
            wp = wp.with_kind(WriteKind::HttpFinal);
        }
    }

    if wp.kind == WriteKind::HttpFinal || wp.h2_stream_end {
        flags |= FLAG_END_STREAM;
        h2.send_end_stream = true;
    }

    let frame_payload = len + ws_pre;
    let hdr = FrameHeader {
        length: frame_payload as u32,
        kind,
        flags,
        stream_id: h2.my_sid,
    };
    let hdr_at = start - ws_pre - FRAME_HEADER_LEN;
    hdr.encode(&mut buf[hdr_at..hdr_at + FRAME_HEADER_LEN])?;

    raw.issue(
        limits,
        ctx.serv_buf_size(),
        ctx.stats(),
        flushing,
        &buf[hdr_at..start + len],
    )?;

    if kind == FrameKind::Data {
        h2.credit.consume(frame_payload);
    }

    Ok(len)
}
