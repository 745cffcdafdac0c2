use crate::Message;
use std::collections::BTreeMap;

/// String key/value pairs sent alongside call setup
pub type Metadata = BTreeMap<String, String>;

pub(crate) const TAG_OPEN: u8 = 0x01;
pub(crate) const TAG_READY: u8 = 0x02;
pub(crate) const TAG_REJECT: u8 = 0x03;
pub(crate) const TAG_MESSAGE: u8 = 0x04;
pub(crate) const TAG_END: u8 = 0x05;
pub(crate) const TAG_ABORT: u8 = 0x06;

/// One unit on the wire
///
/// A call starts with the client sending `Open` and the server answering
/// `Ready` or `Reject`. Afterwards both sides exchange `Message` frames
/// independently and each direction is terminated by its own `End`. A
/// server whose handler fails sends `Abort` instead of `End`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Call setup sent by the client
    Open { method: String, metadata: Metadata },
    /// Server accepted the call
    Ready,
    /// Server refused the call
    Reject { reason: String },
    /// Application payload
    Message(Message),
    /// Sender finished its direction (half-close)
    End,
    /// Server handler failed; no further frames follow
    Abort { reason: String },
}

impl Frame {
    pub(crate) fn tag(&self) -> u8 {
        match self {
            Frame::Open { .. } => TAG_OPEN,
            Frame::Ready => TAG_READY,
            Frame::Reject { .. } => TAG_REJECT,
            Frame::Message(_) => TAG_MESSAGE,
            Frame::End => TAG_END,
            Frame::Abort { .. } => TAG_ABORT,
        }
    }

    /// Short name used in logs and error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Open { .. } => "open",
            Frame::Ready => "ready",
            Frame::Reject { .. } => "reject",
            Frame::Message(_) => "message",
            Frame::End => "end",
            Frame::Abort { .. } => "abort",
        }
    }
}
