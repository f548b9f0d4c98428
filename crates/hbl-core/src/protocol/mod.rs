//! Protocol module - wire formats for both bootloader links.

pub mod constants;
pub mod frame;
pub mod header;

pub use constants::*;
pub use frame::{FrameCodec, FramingError, decode_frame, encode_frame};
pub use header::{HeaderError, TxHeader};
