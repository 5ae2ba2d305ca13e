use std::fmt::{Display, Formatter};

#[derive(Debug, PartialEq, Eq)]
pub enum FrameError {
    NotEnoughCapacity,

    PayloadTooLong,

    UnsupportedRevision,
}

impl Display for FrameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use FrameError::*;
        match self {
            NotEnoughCapacity => write!(f, "Not enough space to write to"),
            PayloadTooLong => write!(f, "Payload length exceeds 63 bits"),
            UnsupportedRevision => write!(f, "Unsupported websocket protocol revision"),
        }
    }
}

// use default impl
impl std::error::Error for FrameError {}
