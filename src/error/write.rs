use std::fmt::{Display, Formatter};

/// Errors raised by the write pipeline itself.
///
/// `Transport` is the only fatal kind; the rest reject the current
/// call and leave the connection usable.
#[derive(Debug)]
pub enum WriteError {
    /// Two writes within one writable cycle, or a write issued from
    /// outside the writable callback.
    IllegalReentry,

    /// A fresh write arrived while the partial-send buffer still
    /// holds bytes. The pending residue must drain first.
    PendingResidue,

    /// The caller's buffer does not reserve the required headroom.
    InsufficientHeadroom,

    /// Payload length does not fit the accounting type.
    PayloadOverflow,

    /// The wire byte does not name a known write kind.
    UnknownWriteKind(u8),

    /// An extension callback reported a fatal condition.
    ExtensionFatal,

    /// A protocol hook reported a fatal condition.
    HookFatal,

    /// The file pump was driven without an open file.
    FileUnavailable,

    /// The transport failed; the socket is permanently unusable.
    Transport(std::io::Error),
}

impl Display for WriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use WriteError::*;
        match self {
            IllegalReentry => write!(f, "Back-to-back write in one writable cycle"),
            PendingResidue => write!(f, "Write refused while partial send pending"),
            InsufficientHeadroom => write!(f, "Buffer lacks frame-header headroom"),
            PayloadOverflow => write!(f, "Payload length overflows accounting"),
            UnknownWriteKind(b) => write!(f, "Unknown write kind byte 0x{:02x}", b),
            ExtensionFatal => write!(f, "Extension reported fatal error"),
            HookFatal => write!(f, "Protocol hook reported fatal error"),
            FileUnavailable => write!(f, "No open file for the fragment pump"),
            Transport(e) => write!(f, "Transport error: {}", e),
        }
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WriteError::Transport(e) => Some(e),
            _ => None,
        }
    }
}
