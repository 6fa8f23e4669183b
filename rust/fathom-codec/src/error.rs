use std::fmt;

use fathom_wire::{HandleCheckError, ObjectType, Rights};

/// Errors produced while encoding a value.
///
/// Any handles the value carried are closed when encoding fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The value's variant does not fit the declared type.
    TypeMismatch {
        expected: String,
        found: &'static str,
    },
    /// `Value::Null` for a type that is not nullable.
    NonNullableAbsent { ty: String },
    StringTooLong { len: usize, max: u32 },
    VectorTooLong { len: usize, max: u32 },
    ArrayLengthMismatch { expected: u32, found: usize },
    FieldCountMismatch {
        decl: String,
        expected: usize,
        found: usize,
    },
    /// A known variant names an ordinal the union does not declare.
    UnknownUnionMember { decl: String, ordinal: u64 },
    /// Unknown data cannot be written into a strict union.
    StrictUnionUnknown { decl: String, ordinal: u64 },
    ZeroUnionOrdinal { decl: String },
    /// A known field names an ordinal the table does not declare, or an
    /// unknown field collides with a declared one.
    UnknownTableField { decl: String, ordinal: u64 },
    /// Unknown data whose bytes could not have come off the wire.
    InvalidUnknownData { len: usize, inlined: bool },
    TooManyHandles { max: usize },
    MessageTooLarge { size: usize, max: usize },
    ExceededMaxDepth { max: usize },
    Handle(HandleCheckError),
    UnknownType(String),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::TypeMismatch { expected, found } => {
                write!(f, "cannot encode {found} value as {expected}")
            }
            EncodeError::NonNullableAbsent { ty } => write!(f, "{ty} is not nullable"),
            EncodeError::StringTooLong { len, max } => {
                write!(f, "string of {len} bytes exceeds bound {max}")
            }
            EncodeError::VectorTooLong { len, max } => {
                write!(f, "vector of {len} elements exceeds bound {max}")
            }
            EncodeError::ArrayLengthMismatch { expected, found } => {
                write!(f, "array needs {expected} elements, got {found}")
            }
            EncodeError::FieldCountMismatch {
                decl,
                expected,
                found,
            } => write!(f, "{decl} has {expected} fields, got {found}"),
            EncodeError::UnknownUnionMember { decl, ordinal } => {
                write!(f, "union {decl} has no member with ordinal {ordinal}")
            }
            EncodeError::StrictUnionUnknown { decl, ordinal } => write!(
                f,
                "strict union {decl} cannot carry unknown ordinal {ordinal}"
            ),
            EncodeError::ZeroUnionOrdinal { decl } => write!(f, "union {decl} with ordinal 0"),
            EncodeError::UnknownTableField { decl, ordinal } => {
                write!(f, "table {decl} cannot encode field {ordinal}")
            }
            EncodeError::InvalidUnknownData { len, inlined } => write!(
                f,
                "unknown data of {len} bytes (inlined: {inlined}) is not encodable"
            ),
            EncodeError::TooManyHandles { max } => write!(f, "more than {max} handles"),
            EncodeError::MessageTooLarge { size, max } => {
                write!(f, "message of {size} bytes exceeds {max}")
            }
            EncodeError::ExceededMaxDepth { max } => {
                write!(f, "out-of-line nesting exceeds depth {max}")
            }
            EncodeError::Handle(err) => write!(f, "handle check failed: {err}"),
            EncodeError::UnknownType(name) => write!(f, "unknown type {name}"),
        }
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EncodeError::Handle(err) => Some(err),
            _ => None,
        }
    }
}

impl From<HandleCheckError> for EncodeError {
    fn from(err: HandleCheckError) -> Self {
        EncodeError::Handle(err)
    }
}

/// Errors produced while decoding bytes and handles.
///
/// Every handle handed to the decoder is closed when decoding fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    OutOfBounds { offset: usize, len: usize },
    NonZeroPadding { offset: usize },
    /// Bytes left over after the last out-of-line object.
    ExtraBytes { count: usize },
    ExtraHandles { count: usize },
    MissingHandle,
    InvalidBoolean(u8),
    InvalidUtf8,
    InvalidPresence(u64),
    InvalidHandlePresence(u32),
    NonNullableAbsent { ty: String },
    StringTooLong { len: u64, max: u32 },
    VectorTooLong { len: u64, max: u32 },
    /// A union carried ordinal 0 with a non-empty envelope.
    ZeroUnionOrdinal,
    /// A strict union carried an ordinal it does not declare.
    StrictUnionUnknownField { decl: String, ordinal: u64 },
    EmptyUnionEnvelope { ordinal: u64 },
    InvalidEnvelopeFlags(u16),
    /// The inline bit disagrees with the size of the envelope's value.
    InvalidInlineBit { ordinal: u64 },
    InvalidNumBytes(u32),
    EnvelopeBytesMismatch { declared: u32, consumed: usize },
    EnvelopeHandlesMismatch { declared: u16, consumed: usize },
    ExceededMaxDepth { max: usize },
    TooManyHandles { count: usize, max: usize },
    MessageTooLarge { size: usize, max: usize },
    IncorrectHandleType {
        expected: ObjectType,
        actual: ObjectType,
    },
    MissingRequiredHandleRights { required: Rights, actual: Rights },
    UnknownType(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::OutOfBounds { offset, len } => {
                write!(f, "read of {len} bytes at offset {offset} is out of bounds")
            }
            DecodeError::NonZeroPadding { offset } => {
                write!(f, "non-zero padding at offset {offset}")
            }
            DecodeError::ExtraBytes { count } => write!(f, "{count} trailing bytes"),
            DecodeError::ExtraHandles { count } => write!(f, "{count} unclaimed handles"),
            DecodeError::MissingHandle => write!(f, "handle slot present but no handle left"),
            DecodeError::InvalidBoolean(b) => write!(f, "invalid boolean byte {b:#04x}"),
            DecodeError::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            DecodeError::InvalidPresence(v) => write!(f, "invalid presence marker {v:#x}"),
            DecodeError::InvalidHandlePresence(v) => {
                write!(f, "invalid handle presence marker {v:#x}")
            }
            DecodeError::NonNullableAbsent { ty } => {
                write!(f, "absent value for non-nullable {ty}")
            }
            DecodeError::StringTooLong { len, max } => {
                write!(f, "string of {len} bytes exceeds bound {max}")
            }
            DecodeError::VectorTooLong { len, max } => {
                write!(f, "vector of {len} elements exceeds bound {max}")
            }
            DecodeError::ZeroUnionOrdinal => write!(f, "union ordinal 0 with a present envelope"),
            DecodeError::StrictUnionUnknownField { decl, ordinal } => {
                write!(f, "strict union {decl} has unknown ordinal {ordinal}")
            }
            DecodeError::EmptyUnionEnvelope { ordinal } => {
                write!(f, "union variant {ordinal} has an empty envelope")
            }
            DecodeError::InvalidEnvelopeFlags(flags) => {
                write!(f, "invalid envelope flags {flags:#06x}")
            }
            DecodeError::InvalidInlineBit { ordinal } => {
                write!(f, "envelope for ordinal {ordinal} has the wrong inline bit")
            }
            DecodeError::InvalidNumBytes(n) => {
                write!(f, "envelope size {n} is not a multiple of 8")
            }
            DecodeError::EnvelopeBytesMismatch { declared, consumed } => write!(
                f,
                "envelope declares {declared} bytes, value used {consumed}"
            ),
            DecodeError::EnvelopeHandlesMismatch { declared, consumed } => write!(
                f,
                "envelope declares {declared} handles, value used {consumed}"
            ),
            DecodeError::ExceededMaxDepth { max } => {
                write!(f, "out-of-line nesting exceeds depth {max}")
            }
            DecodeError::TooManyHandles { count, max } => {
                write!(f, "{count} handles exceed limit {max}")
            }
            DecodeError::MessageTooLarge { size, max } => {
                write!(f, "message of {size} bytes exceeds {max}")
            }
            DecodeError::IncorrectHandleType { expected, actual } => {
                write!(f, "expected handle of type {expected:?}, got {actual:?}")
            }
            DecodeError::MissingRequiredHandleRights { required, actual } => {
                write!(f, "handle rights {actual:?} lack required {required:?}")
            }
            DecodeError::UnknownType(name) => write!(f, "unknown type {name}"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<HandleCheckError> for DecodeError {
    fn from(err: HandleCheckError) -> Self {
        match err {
            HandleCheckError::IncorrectType { expected, actual } => {
                DecodeError::IncorrectHandleType { expected, actual }
            }
            HandleCheckError::MissingRights { required, actual } => {
                DecodeError::MissingRequiredHandleRights { required, actual }
            }
        }
    }
}
