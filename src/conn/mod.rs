//! Connection state and the public write surface.
//!
//! A [`Conn`] owns one transport plus the framing substates of
//! whichever protocol it is serving. The event loop drives it with
//! [`writable_event_begin`](Conn::writable_event_begin) /
//! [`flush_pending`](Conn::flush_pending), applications feed it
//! through [`write`](Conn::write), and file transactions run through
//! [`serve_file_fragment`](Conn::serve_file_fragment).

mod raw;
mod residue;
mod write;

use crate::context::{ConnId, Context};
use crate::error::{Error, WriteError};
use crate::ext::{Extension, PacketSender};
use crate::h2::TxCredit;
use crate::http::{Hooks, HttpTx};
use crate::transport::Transport;
use crate::HEADROOM;

pub(crate) use raw::{Drain, RawTx};

/// What this endpoint is to its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    WsClient,
    WsServer,
    Http1Serving,
    Http2Serving,
    /// A websocket carried inside an http/2 stream.
    Http2WsServing,
}

impl Mode {
    /// Client-to-server frames carry a mask.
    #[inline]
    pub const fn masks_frames(self) -> bool { matches!(self, Mode::WsClient) }

    #[inline]
    pub const fn carries_ws(self) -> bool {
        matches!(self, Mode::WsClient | Mode::WsServer | Mode::Http2WsServing)
    }

    #[inline]
    pub const fn uses_h2(self) -> bool {
        matches!(self, Mode::Http2Serving | Mode::Http2WsServing)
    }
}

/// Connection lifecycle phase, as far as the write path cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Http,
    WsEstablished,
    WaitingToSendCloseNotification,
    AwaitingCloseAck,
    ReturnedCloseAlready,
    /// Only the pending residue may still go out; fresh sends are
    /// ignored and full drain asks for teardown.
    FlushingSendBeforeClose,
}

impl State {
    #[inline]
    pub const fn is_ws(self) -> bool { matches!(self, State::WsEstablished) }

    /// Close frames remain legal in the middle of the close
    /// handshake.
    #[inline]
    pub const fn in_close_handshake(self) -> bool {
        matches!(
            self,
            State::WaitingToSendCloseNotification
                | State::AwaitingCloseAck
                | State::ReturnedCloseAlready
        )
    }
}

/// Write kind: the low five bits of the wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WriteKind {
    Text = 0,
    Binary = 1,
    Continuation = 2,
    Http = 3,
    Close = 4,
    Ping = 5,
    Pong = 6,
    HttpFinal = 7,
    HttpHeaders = 8,
    HttpHeadersContinuation = 9,
}

impl WriteKind {
    #[inline]
    pub const fn is_http(self) -> bool {
        matches!(
            self,
            WriteKind::Http
                | WriteKind::HttpFinal
                | WriteKind::HttpHeaders
                | WriteKind::HttpHeadersContinuation
        )
    }

    /// Control frames skip the extension transform and never
    /// fragment.
    #[inline]
    pub const fn is_control(self) -> bool {
        matches!(self, WriteKind::Close | WriteKind::Ping | WriteKind::Pong)
    }

    pub fn from_bits(b: u8) -> Result<Self, WriteError> {
        use WriteKind::*;
        let kind = match b {
            0 => Text,
            1 => Binary,
            2 => Continuation,
            3 => Http,
            4 => Close,
            5 => Ping,
            6 => Pong,
            7 => HttpFinal,
            8 => HttpHeaders,
            9 => HttpHeadersContinuation,
            _ => return Err(WriteError::UnknownWriteKind(b)),
        };
        Ok(kind)
    }
}

/// Write descriptor: kind plus the two modifier flags.
///
/// The 8-bit wire form keeps the kind in the low five bits, `NO_FIN`
/// at 0x40 and `H2_STREAM_END` at 0x80.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteProtocol {
    pub kind: WriteKind,
    /// Suppress FIN: more fragments of this message follow.
    pub no_fin: bool,
    /// Ask for END_STREAM on the wrapping http/2 frame.
    pub h2_stream_end: bool,
}

impl WriteProtocol {
    pub const NO_FIN: u8 = 0x40;
    pub const H2_STREAM_END: u8 = 0x80;
    pub const KIND_MASK: u8 = 0x1f;

    #[inline]
    pub const fn new(kind: WriteKind) -> Self {
        WriteProtocol {
            kind,
            no_fin: false,
            h2_stream_end: false,
        }
    }

    #[inline]
    pub const fn with_no_fin(mut self) -> Self {
        self.no_fin = true;
        self
    }

    #[inline]
    pub const fn with_h2_stream_end(mut self) -> Self {
        self.h2_stream_end = true;
        self
    }

    pub const fn to_bits(self) -> u8 {
        self.kind as u8
            | if self.no_fin { Self::NO_FIN } else { 0 }
            | if self.h2_stream_end { Self::H2_STREAM_END } else { 0 }
    }

    pub fn from_bits(b: u8) -> Result<Self, WriteError> {
        Ok(WriteProtocol {
            kind: WriteKind::from_bits(b & Self::KIND_MASK)?,
            no_fin: b & Self::NO_FIN != 0,
            h2_stream_end: b & Self::H2_STREAM_END != 0,
        })
    }

    /// Same modifier flags, different kind. How a stashed or draining
    /// write recovers the FIN semantics of the action that caused it.
    #[inline]
    pub(crate) const fn with_kind(self, kind: WriteKind) -> Self {
        WriteProtocol { kind, ..self }
    }
}

/// Per-connection send ceilings, the embedder's protocol hints.
#[derive(Debug, Clone, Copy, Default)]
pub struct Limits {
    /// Preferred bytes per wire packet; unset means "whatever the
    /// receive buffer or the service scratch suggests".
    pub tx_packet_size: Option<usize>,
    pub rx_buffer_size: usize,
}

impl Limits {
    pub(crate) fn tx_cap(&self, serv_buf_size: usize) -> usize {
        let base = match self.tx_packet_size {
            Some(n) if n > 0 => n,
            _ => self.rx_buffer_size.max(serv_buf_size),
        };
        base + HEADROOM + 4
    }
}

/// Timeout the embedder's scheduler should arm for this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingTimeout {
    /// A file fragment is in flight.
    HttpContent,
    /// Websocket keepalive window restarted.
    WsPingPong,
}

/// Verdict of [`Conn::flush_pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending.
    Idle,
    /// Residue fully delivered; fresh writes may proceed.
    Done,
    /// Still pending; writable re-armed.
    Partial,
    /// Flush-before-close finished: tear the connection down.
    CloseNow,
}

/// Websocket framing substate, write direction.
#[derive(Debug)]
pub(crate) struct WsTx {
    /// A frame head went out but its payload is not fully acknowledged
    /// yet; no new head may be generated.
    pub inside_frame: bool,
    /// The bytes on the wire are still the caller's own buffer.
    pub clean_buffer: bool,
    pub mask: [u8; 4],
    pub mask_idx: u32,
    pub ietf_spec_revision: u8,
    /// An extension owes more output for the current action.
    pub tx_draining_ext: bool,
    pub tx_draining_stashed_wp: WriteProtocol,
    /// An extension consumed input without producing output; the
    /// write kind is parked here until it emits.
    pub stashed_write_pending: bool,
    pub stashed_write_kind: WriteKind,
}

impl Default for WsTx {
    fn default() -> Self {
        WsTx {
            inside_frame: false,
            clean_buffer: true,
            mask: [0; 4],
            mask_idx: 0,
            ietf_spec_revision: 13,
            tx_draining_ext: false,
            tx_draining_stashed_wp: WriteProtocol::new(WriteKind::Continuation),
            stashed_write_pending: false,
            stashed_write_kind: WriteKind::Continuation,
        }
    }
}

/// Http/2 stream substate, write direction.
#[derive(Debug)]
pub struct H2Tx {
    pub(crate) my_sid: u32,
    pub(crate) send_end_stream: bool,
    pub(crate) credit: TxCredit,
}

impl H2Tx {
    pub fn new(sid: u32, credit: i32) -> Self {
        H2Tx {
            my_sid: sid & 0x7fff_ffff,
            send_end_stream: false,
            credit: TxCredit::new(credit),
        }
    }

    #[inline]
    pub fn stream_id(&self) -> u32 { self.my_sid }

    /// True once END_STREAM went out (or was committed to).
    #[inline]
    pub fn end_stream_sent(&self) -> bool { self.send_end_stream }

    #[inline]
    pub fn tx_credit(&self) -> usize { self.credit.get() }

    /// Apply a WINDOW_UPDATE from the peer.
    #[inline]
    pub fn replenish(&mut self, n: u32) { self.credit.replenish(n) }
}

/// One endpoint connection, generic over its transport.
pub struct Conn<T> {
    pub(crate) id: ConnId,
    pub(crate) mode: Mode,
    pub(crate) state: State,
    pub(crate) raw: RawTx<T>,
    pub(crate) limits: Limits,
    pub(crate) ws: WsTx,
    pub(crate) h2: Option<H2Tx>,
    pub(crate) http: HttpTx,
    pub(crate) exts: Vec<Box<dyn Extension>>,
    pub(crate) packet_sender: Option<Box<dyn PacketSender>>,
    pub(crate) hooks: Option<Box<dyn Hooks>>,
    /// Writes delegate to the parent connection's protocol.
    pub(crate) parent_carries_io: bool,
    pub(crate) tx_total: u64,
    pub(crate) pending_timeout: Option<PendingTimeout>,
}

impl<T: Transport> Conn<T> {
    pub fn new(ctx: &mut Context, mode: Mode, transport: T) -> Self {
        let state = if mode.carries_ws() {
            State::WsEstablished
        } else {
            State::Http
        };
        Conn {
            id: ctx.alloc_id(),
            mode,
            state,
            raw: RawTx::new(transport),
            limits: Limits::default(),
            ws: WsTx::default(),
            h2: mode.uses_h2().then(|| H2Tx::new(0, 0)),
            http: HttpTx::default(),
            exts: Vec::new(),
            packet_sender: None,
            hooks: None,
            parent_carries_io: false,
            tx_total: 0,
            pending_timeout: None,
        }
    }

    #[inline]
    pub fn id(&self) -> ConnId { self.id }

    #[inline]
    pub fn mode(&self) -> Mode { self.mode }

    #[inline]
    pub fn state(&self) -> State { self.state }

    pub fn set_state(&mut self, state: State) { self.state = state }

    /// Shortcut into the flush-then-close phase.
    pub fn begin_close_flush(&mut self) { self.state = State::FlushingSendBeforeClose }

    pub fn set_limits(&mut self, limits: Limits) { self.limits = limits }

    pub fn add_extension(&mut self, ext: Box<dyn Extension>) { self.exts.push(ext) }

    pub fn set_packet_sender(&mut self, sender: Box<dyn PacketSender>) {
        self.packet_sender = Some(sender);
    }

    pub fn set_hooks(&mut self, hooks: Box<dyn Hooks>) { self.hooks = Some(hooks) }

    pub fn set_parent_carries_io(&mut self, v: bool) { self.parent_carries_io = v }

    /// Attach the http/2 stream identity and its initial send window.
    pub fn set_h2_stream(&mut self, sid: u32, credit: i32) {
        self.h2 = Some(H2Tx::new(sid, credit));
    }

    #[inline]
    pub fn h2(&self) -> Option<&H2Tx> { self.h2.as_ref() }

    #[inline]
    pub fn h2_mut(&mut self) -> Option<&mut H2Tx> { self.h2.as_mut() }

    #[inline]
    pub fn http_mut(&mut self) -> &mut HttpTx { &mut self.http }

    #[inline]
    pub fn http(&self) -> &HttpTx { &self.http }

    /// Payload bytes this connection has accepted so far.
    #[inline]
    pub fn tx_total(&self) -> u64 { self.tx_total }

    /// Timeout the scheduler should (re)arm, if any.
    #[inline]
    pub fn pending_timeout(&self) -> Option<PendingTimeout> { self.pending_timeout }

    #[inline]
    pub fn socket_is_permanently_unusable(&self) -> bool { self.raw.unusable }

    /// The transport refused bytes or residue is queued: producing
    /// more right now is pointless.
    #[inline]
    pub fn send_pipe_choked(&self) -> bool {
        self.raw.trunc.has_residue() || self.raw.blocking_send
    }

    /// The pipeline asked to be called back when writable.
    #[inline]
    pub fn wants_writable(&self) -> bool { self.raw.wants_writable }

    pub fn take_writable_request(&mut self) -> bool {
        std::mem::take(&mut self.raw.wants_writable)
    }

    /// The event loop calls this once per delivered writable event,
    /// before residue flush and the user callback. Resets the
    /// one-write-per-cycle latch.
    pub fn writable_event_begin(&mut self) {
        self.raw.could_have_pending = false;
        self.raw.blocking_send = false;
    }

    /// Redeliver pending residue ahead of any fresh payload.
    pub fn flush_pending(&mut self, ctx: &mut Context) -> Result<FlushOutcome, Error> {
        let flushing = self.state == State::FlushingSendBeforeClose;
        let outcome = match self.raw.drain(ctx.stats(), flushing)? {
            Drain::Idle => FlushOutcome::Idle,
            Drain::Done => FlushOutcome::Done,
            Drain::Partial => FlushOutcome::Partial,
            Drain::FlushedClose => FlushOutcome::CloseNow,
        };

        if matches!(outcome, FlushOutcome::Done | FlushOutcome::CloseNow) {
            // last byte of the frame acknowledged
            self.ws.inside_frame = false;

            // a fully flushed close frame moves the handshake forward
            if self.state == State::WaitingToSendCloseNotification {
                self.state = State::AwaitingCloseAck;
            }
        }

        Ok(outcome)
    }

    #[inline]
    pub fn transport(&self) -> &T { &self.raw.transport }

    #[inline]
    pub fn transport_mut(&mut self) -> &mut T { &mut self.raw.transport }
}
