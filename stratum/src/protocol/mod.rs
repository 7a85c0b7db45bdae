pub mod codec;
pub mod messages;

pub use codec::{decode, encode, LineBuffer};
pub use messages::{Message, ResultCode};

/// Hard cap on a single wire line, terminator included.
pub const MAX_LINE_SIZE: usize = 4096;
