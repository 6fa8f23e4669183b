#![deny(unsafe_code)]

//! Wire-level vocabulary shared by every fathom crate.
//!
//! This crate owns the pieces of the format that do not depend on a schema:
//! presence markers, alignment, the transaction header, epitaphs, status codes,
//! handles and their rights, and the [`Limits`] every message must respect.

mod handle;
mod header;
mod limits;
mod message;
mod status;

pub use handle::*;
pub use header::*;
pub use limits::*;
pub use message::*;
pub use status::*;

/// Every out-of-line object starts on this boundary.
pub const ALIGNMENT: usize = 8;

/// Presence marker for an out-of-line object that follows.
pub const ALLOC_PRESENT: u64 = u64::MAX;

/// Presence marker for an absent out-of-line object.
pub const ALLOC_ABSENT: u64 = 0;

/// Inline word for a present handle.
pub const HANDLE_PRESENT: u32 = u32::MAX;

/// Inline word for an absent handle.
pub const HANDLE_ABSENT: u32 = 0;

/// Size of an envelope.
pub const ENVELOPE_SIZE: usize = 8;

/// Largest value stored directly inside an envelope.
pub const ENVELOPE_INLINE_MAX: usize = 4;

/// Envelope flag: the value is stored inline.
pub const ENVELOPE_INLINED: u16 = 0x0001;

/// Round `offset` up to the next multiple of [`ALIGNMENT`].
#[inline]
pub const fn align8(offset: usize) -> usize {
    (offset + (ALIGNMENT - 1)) & !(ALIGNMENT - 1)
}
