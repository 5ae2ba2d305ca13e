// #![warn(missing_docs)]

//! Outbound write pipeline for websocket / http/1.1 / http/2 endpoints.
//!
//! The crate owns everything between "the application has a payload"
//! and "bytes reached the non-blocking transport": RFC 6455 framing,
//! http/2 DATA/HEADERS wrapping, payload-transforming extensions,
//! client-side masking, per-call packet ceilings, partial-send
//! buffering, and the chunked/range-aware static file pump.
//!
//! The event loop, TLS handshakes, header parsing and extension
//! implementations live outside; they reach the pipeline through the
//! [`Transport`], [`Extension`], [`Hooks`] and [`VfsFile`] traits.

pub mod conn;
pub mod context;
pub mod error;
pub mod ext;
pub mod frame;
pub mod h2;
pub mod http;
pub mod transport;

pub use conn::{Conn, FlushOutcome, Limits, Mode, PendingTimeout, State, WriteKind, WriteProtocol};
pub use context::{ConnId, Context, Stats};
pub use error::Error;
pub use ext::{ExtFatal, Extension, PacketSender, PacketTx, TxChunk, TxPass};
pub use http::{Completion, FragmentOutcome, Hooks, HtmlArgs, VfsFile, WritePassthru};
pub use transport::{NonBlocking, Transport, TxAttempt};

/// Headroom every caller buffer reserves in front of its payload.
///
/// Frame headers are built in place inside this gap, so a single
/// buffer reaches the transport without copying. 24 bytes cover the
/// worst stack: a 9 byte http/2 frame header followed by a 14 byte
/// websocket frame header.
pub const HEADROOM: usize = 24;
