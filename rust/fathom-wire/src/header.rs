//! The transaction header prefixed to every message.
//!
//! ```text
//! offset  size  field
//!      0     4  txid (u32)
//!      4     2  at-rest flags
//!      6     1  dynamic flags
//!      7     1  magic number
//!      8     8  ordinal (u64)
//! ```
//!
//! All fields are little-endian.

use std::fmt;

use bytes::{Buf, BufMut};

/// Size of the transaction header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Magic number of the only wire revision this crate speaks.
pub const MAGIC_NUMBER: u8 = 1;

/// Ordinal reserved for epitaph messages.
pub const EPITAPH_ORDINAL: u64 = 0xffff_ffff_ffff_ffff;

/// Largest transaction id a client allocates for two-way calls.
pub const MAX_TXID: u32 = 0x7fff_ffff;

bitflags::bitflags! {
    /// Flags describing how the body is encoded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AtRestFlags: u16 {
        const USE_V2_WIRE_FORMAT = 0x0002;
    }
}

bitflags::bitflags! {
    /// Flags describing how the message should be handled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DynamicFlags: u8 {
        /// The method is flexible; an unknown ordinal may be tolerated.
        const FLEXIBLE = 0x80;
    }
}

/// Errors from parsing or validating a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    /// Fewer than [`HEADER_SIZE`] bytes were available.
    MalformedHeader { len: usize },
    /// The magic number does not match [`MAGIC_NUMBER`].
    IncompatibleWireFormat { magic: u8 },
    /// An epitaph body was not exactly eight bytes with zero padding.
    MalformedEpitaph { len: usize },
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderError::MalformedHeader { len } => {
                write!(f, "malformed header: {len} bytes, need {HEADER_SIZE}")
            }
            HeaderError::IncompatibleWireFormat { magic } => {
                write!(f, "incompatible wire format: magic number {magic:#04x}")
            }
            HeaderError::MalformedEpitaph { len } => {
                write!(f, "malformed epitaph body of {len} bytes")
            }
        }
    }
}

impl std::error::Error for HeaderError {}

/// A decoded transaction header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHeader {
    pub tx_id: u32,
    pub at_rest_flags: AtRestFlags,
    pub dynamic_flags: DynamicFlags,
    pub magic_number: u8,
    pub ordinal: u64,
}

impl TransactionHeader {
    /// A header for the current wire revision.
    pub fn new(tx_id: u32, ordinal: u64, dynamic_flags: DynamicFlags) -> Self {
        Self {
            tx_id,
            at_rest_flags: AtRestFlags::USE_V2_WIRE_FORMAT,
            dynamic_flags,
            magic_number: MAGIC_NUMBER,
            ordinal,
        }
    }

    /// Header for an epitaph.
    pub fn epitaph() -> Self {
        Self::new(0, EPITAPH_ORDINAL, DynamicFlags::empty())
    }

    pub fn is_compatible(&self) -> bool {
        self.magic_number == MAGIC_NUMBER
    }

    pub fn is_epitaph(&self) -> bool {
        self.ordinal == EPITAPH_ORDINAL
    }

    /// True for one-way requests and events.
    pub fn is_unsolicited(&self) -> bool {
        self.tx_id == 0
    }

    pub fn is_flexible(&self) -> bool {
        self.dynamic_flags.contains(DynamicFlags::FLEXIBLE)
    }

    /// Fail with [`HeaderError::IncompatibleWireFormat`] on a magic mismatch.
    pub fn validate_wire_format(&self) -> Result<(), HeaderError> {
        if self.is_compatible() {
            Ok(())
        } else {
            Err(HeaderError::IncompatibleWireFormat {
                magic: self.magic_number,
            })
        }
    }

    /// Append the encoded header to `buf`.
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.tx_id);
        buf.put_u16_le(self.at_rest_flags.bits());
        buf.put_u8(self.dynamic_flags.bits());
        buf.put_u8(self.magic_number);
        buf.put_u64_le(self.ordinal);
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        self.encode_into(&mut &mut out[..]);
        out
    }
}

/// Split a message into its header and body.
///
/// Only the length is checked here. Callers decide when to enforce the magic
/// number with [`TransactionHeader::validate_wire_format`], so that a
/// mismatched reply can still be routed to the call it belongs to.
pub fn decode_transaction_header(bytes: &[u8]) -> Result<(TransactionHeader, &[u8]), HeaderError> {
    if bytes.len() < HEADER_SIZE {
        return Err(HeaderError::MalformedHeader { len: bytes.len() });
    }
    let (mut head, body) = bytes.split_at(HEADER_SIZE);
    let tx_id = head.get_u32_le();
    let at_rest_flags = AtRestFlags::from_bits_retain(head.get_u16_le());
    let dynamic_flags = DynamicFlags::from_bits_retain(head.get_u8());
    let magic_number = head.get_u8();
    let ordinal = head.get_u64_le();
    Ok((
        TransactionHeader {
            tx_id,
            at_rest_flags,
            dynamic_flags,
            magic_number,
            ordinal,
        },
        body,
    ))
}
