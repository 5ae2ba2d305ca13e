use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use wirepump::error::WriteError;
use wirepump::{Conn, Context, Error, ExtFatal, Extension, Mode, NonBlocking, PacketSender,
               PacketTx, TxChunk, TxPass, WriteKind, WriteProtocol, HEADROOM};

struct Sink {
    buf: Vec<u8>,
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
}

fn conn(ctx: &mut Context, mode: Mode) -> Conn<NonBlocking<Sink>> {
    Conn::new(ctx, mode, NonBlocking(Sink { buf: Vec::new() }))
}

fn payload(data: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; HEADROOM + data.len()];
    buf[HEADROOM..].copy_from_slice(data);
    buf
}

fn wire<'a>(c: &'a Conn<NonBlocking<Sink>>) -> &'a [u8] { &c.transport().as_ref().buf }

/// Emits half of each input per writable pass, like a compressor
/// that limits its output block size.
#[derive(Default)]
struct Splitter {
    stash: Vec<u8>,
    out: Vec<u8>,
}

impl Extension for Splitter {
    fn payload_tx<'a>(
        &'a mut self,
        chunk: TxChunk<'a>,
        _wp: WriteProtocol,
    ) -> Result<TxPass<'a>, ExtFatal> {
        if self.stash.is_empty() {
            let data = chunk.payload().to_vec();
            let half = data.len() / 2;
            self.stash = data[half..].to_vec();
            self.out = vec![0u8; HEADROOM];
            self.out.extend_from_slice(&data[..half]);
            Ok(TxPass {
                chunk: TxChunk::with_headroom(&mut self.out),
                more: true,
                rsv: 0,
            })
        } else {
            self.out = vec![0u8; HEADROOM];
            let rest = std::mem::take(&mut self.stash);
            self.out.extend_from_slice(&rest);
            Ok(TxPass {
                chunk: TxChunk::with_headroom(&mut self.out),
                more: false,
                rsv: 0,
            })
        }
    }
}

/// Consumes its first input whole and emits nothing until asked
/// again.
#[derive(Default)]
struct Eater {
    stash: Vec<u8>,
    out: Vec<u8>,
}

impl Extension for Eater {
    fn payload_tx<'a>(
        &'a mut self,
        chunk: TxChunk<'a>,
        _wp: WriteProtocol,
    ) -> Result<TxPass<'a>, ExtFatal> {
        self.out = vec![0u8; HEADROOM];
        if self.stash.is_empty() && chunk.payload_len() > 0 {
            self.stash = chunk.payload().to_vec();
        } else {
            let held = std::mem::take(&mut self.stash);
            self.out.extend_from_slice(&held);
        }
        Ok(TxPass {
            chunk: TxChunk::with_headroom(&mut self.out),
            more: false,
            rsv: 0,
        })
    }
}

struct RsvTagger;

impl Extension for RsvTagger {
    fn payload_tx<'a>(
        &'a mut self,
        chunk: TxChunk<'a>,
        _wp: WriteProtocol,
    ) -> Result<TxPass<'a>, ExtFatal> {
        Ok(TxPass {
            chunk,
            more: false,
            rsv: 0x40,
        })
    }
}

#[test]
fn draining_extension_suppresses_fin_then_continues() {
    let mut ctx = Context::new(4096, 5);
    let mut c = conn(&mut ctx, Mode::WsServer);
    c.add_extension(Box::new(Splitter::default()));

    let mut buf = payload(b"abcdefgh");
    let n = c
        .write(&mut ctx, &mut buf, WriteProtocol::new(WriteKind::Text))
        .unwrap();
    assert_eq!(n, 8);

    // intermediate fragment: TEXT opcode, FIN suppressed
    assert_eq!(wire(&c), b"\x01\x04abcd");
    assert_eq!(ctx.drainings(), &[c.id()]);
    assert!(c.wants_writable());

    // next writable pass is forced to CONTINUATION and drains the rest
    c.writable_event_begin();
    let mut buf = payload(b"");
    c.write(&mut ctx, &mut buf, WriteProtocol::new(WriteKind::Text))
        .unwrap();
    assert_eq!(&wire(&c)[6..], b"\x80\x04efgh");
    assert!(ctx.drainings().is_empty());
}

#[test]
fn extension_that_eats_input_parks_the_write_kind() {
    let mut ctx = Context::new(4096, 5);
    let mut c = conn(&mut ctx, Mode::WsServer);
    c.add_extension(Box::new(Eater::default()));

    let mut buf = payload(b"xyz");
    let n = c
        .write(&mut ctx, &mut buf, WriteProtocol::new(WriteKind::Binary))
        .unwrap();

    // custody taken, nothing on the wire yet
    assert_eq!(n, 3);
    assert!(wire(&c).is_empty());

    // when the extension finally emits, the frame recovers the
    // BINARY opcode even though the caller resumed with CONTINUATION
    c.writable_event_begin();
    let mut buf = payload(b"");
    c.write(&mut ctx, &mut buf, WriteProtocol::new(WriteKind::Continuation))
        .unwrap();
    assert_eq!(wire(&c), b"\x82\x03xyz");
}

#[test]
fn control_frames_bypass_the_chain() {
    let mut ctx = Context::new(4096, 5);
    let mut c = conn(&mut ctx, Mode::WsServer);
    c.add_extension(Box::new(Splitter::default()));

    let mut buf = payload(b"alive?");
    let n = c
        .write(&mut ctx, &mut buf, WriteProtocol::new(WriteKind::Ping))
        .unwrap();
    assert_eq!(n, 6);

    // untouched, unfragmented, no draining entered
    assert_eq!(wire(&c), b"\x89\x06alive?");
    assert!(ctx.drainings().is_empty());
}

#[test]
fn extension_rsv_bits_reach_the_frame_head() {
    let mut ctx = Context::new(4096, 5);
    let mut c = conn(&mut ctx, Mode::WsServer);
    c.add_extension(Box::new(RsvTagger));

    let mut buf = payload(b"hi");
    c.write(&mut ctx, &mut buf, WriteProtocol::new(WriteKind::Text))
        .unwrap();
    assert_eq!(wire(&c)[0], 0x80 | 0x40 | 0x01);
}

struct Claimer {
    seen: Rc<RefCell<Vec<u8>>>,
    take: usize,
}

impl PacketSender for Claimer {
    fn packet_tx(&mut self, buf: &[u8]) -> Result<PacketTx, ExtFatal> {
        self.seen.borrow_mut().extend_from_slice(buf);
        Ok(PacketTx::Handled(self.take.min(buf.len())))
    }
}

#[test]
fn packet_sender_takes_over_the_wire() {
    let mut ctx = Context::new(4096, 5);
    let mut c = conn(&mut ctx, Mode::WsServer);
    let seen = Rc::new(RefCell::new(Vec::new()));
    c.set_packet_sender(Box::new(Claimer {
        seen: seen.clone(),
        take: usize::MAX,
    }));

    let mut buf = payload(b"hello");
    let n = c
        .write(&mut ctx, &mut buf, WriteProtocol::new(WriteKind::Text))
        .unwrap();
    assert_eq!(n, 5);

    // the sender saw the framed packet, the socket saw nothing
    assert_eq!(&*seen.borrow(), b"\x81\x05hello");
    assert!(wire(&c).is_empty());
}

#[test]
fn packet_sender_short_claim_leaves_residue() {
    let mut ctx = Context::new(4096, 5);
    let mut c = conn(&mut ctx, Mode::WsServer);
    let seen = Rc::new(RefCell::new(Vec::new()));
    c.set_packet_sender(Box::new(Claimer {
        seen: seen.clone(),
        take: 3,
    }));

    let mut buf = payload(b"hello");
    let n = c
        .write(&mut ctx, &mut buf, WriteProtocol::new(WriteKind::Text))
        .unwrap();
    assert_eq!(n, 5);
    assert!(c.send_pipe_choked());

    // the unclaimed tail drains to the real transport
    c.writable_event_begin();
    c.flush_pending(&mut ctx).unwrap();
    assert_eq!(wire(&c), b"ello");
}

struct Broken;

impl Extension for Broken {
    fn payload_tx<'a>(
        &'a mut self,
        _chunk: TxChunk<'a>,
        _wp: WriteProtocol,
    ) -> Result<TxPass<'a>, ExtFatal> {
        Err(ExtFatal)
    }
}

#[test]
fn extension_abort_is_fatal_to_the_write() {
    let mut ctx = Context::new(4096, 5);
    let mut c = conn(&mut ctx, Mode::WsServer);
    c.add_extension(Box::new(Broken));

    let mut buf = payload(b"doomed");
    let err = c.write(&mut ctx, &mut buf, WriteProtocol::new(WriteKind::Text));
    assert!(matches!(err, Err(Error::Write(WriteError::ExtensionFatal))));
    assert!(wire(&c).is_empty());
}
