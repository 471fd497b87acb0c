//! Transport layer
//!
//! Length-prefixed framing over any async byte stream, plus typed
//! helpers that compose framing with envelope encoding.
//!
//! Wire format: `[4-byte length as u32 big-endian] + [payload]`.

mod frame;

pub use frame::{read_frame, read_message, write_frame, write_message, FrameError};
