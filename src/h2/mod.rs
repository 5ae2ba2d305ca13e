//! Http/2 framing, write side.
//!
//! [RFC-9113 Section 4](https://datatracker.ietf.org/doc/html/rfc9113#section-4)

pub mod credit;
pub mod frame;

pub use credit::TxCredit;
pub use frame::{FrameHeader, FrameKind, FRAME_HEADER_LEN};
pub use frame::{FLAG_END_HEADERS, FLAG_END_STREAM};
