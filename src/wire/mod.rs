//! Framing for echo calls on top of a byte stream
//!
//! Message serialization is intentionally minimal: message text travels as
//! raw UTF-8 inside a length-prefixed frame.

pub mod codec;
pub mod frame;

pub use codec::{DEFAULT_MAX_FRAME_SIZE, FrameCodec};
pub use frame::{Frame, Metadata};
