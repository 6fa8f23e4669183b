use std::fmt;

use fathom_hash::OrdinalError;

/// Errors raised while building, loading or querying a library.
#[derive(Debug)]
pub enum SchemaError {
    /// Two declarations share a name.
    DuplicateDecl(String),
    /// Two members of one declaration share a name.
    DuplicateMember { decl: String, member: String },
    /// A union or table member has ordinal zero.
    ZeroOrdinal { decl: String, member: String },
    /// Two members of one union or table share an ordinal.
    DuplicateOrdinal { decl: String, ordinal: u64 },
    /// A type references a declaration that does not exist.
    UnresolvedIdentifier(String),
    /// An array declared with no elements.
    ZeroLengthArray(String),
    /// A struct contains itself inline, so its size is infinite.
    InfiniteRecursion(String),
    /// A payload names something other than a struct.
    PayloadNotStruct { method: String, payload: String },
    /// Two methods of one protocol share a name.
    DuplicateMethod { protocol: String, method: String },
    /// Two methods of one protocol share an ordinal.
    DuplicateMethodOrdinal { protocol: String, ordinal: u64 },
    /// A method's payloads disagree with its kind.
    InvalidMethodShape { protocol: String, method: String },
    /// Layout recorded in a loaded library differs from the computed one.
    LayoutMismatch(String),
    /// The named protocol does not exist.
    UnknownProtocol(String),
    Ordinal(OrdinalError),
    Json(serde_json::Error),
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::DuplicateDecl(name) => write!(f, "duplicate declaration {name}"),
            SchemaError::DuplicateMember { decl, member } => {
                write!(f, "duplicate member {member} in {decl}")
            }
            SchemaError::ZeroOrdinal { decl, member } => {
                write!(f, "member {member} of {decl} has ordinal 0")
            }
            SchemaError::DuplicateOrdinal { decl, ordinal } => {
                write!(f, "ordinal {ordinal} used twice in {decl}")
            }
            SchemaError::UnresolvedIdentifier(name) => write!(f, "unresolved identifier {name}"),
            SchemaError::ZeroLengthArray(ty) => write!(f, "{ty} must have at least one element"),
            SchemaError::InfiniteRecursion(name) => {
                write!(f, "{name} contains itself without indirection")
            }
            SchemaError::PayloadNotStruct { method, payload } => {
                write!(f, "payload {payload} of method {method} is not a struct")
            }
            SchemaError::DuplicateMethod { protocol, method } => {
                write!(f, "duplicate method {method} in protocol {protocol}")
            }
            SchemaError::DuplicateMethodOrdinal { protocol, ordinal } => write!(
                f,
                "method ordinal {ordinal:#x} used twice in protocol {protocol}"
            ),
            SchemaError::InvalidMethodShape { protocol, method } => {
                write!(f, "payloads of {protocol}.{method} do not match its kind")
            }
            SchemaError::LayoutMismatch(name) => write!(
                f,
                "recorded layout of {name} does not match computed layout"
            ),
            SchemaError::UnknownProtocol(name) => write!(f, "unknown protocol {name}"),
            SchemaError::Ordinal(err) => write!(f, "ordinal derivation failed: {err}"),
            SchemaError::Json(err) => write!(f, "invalid library JSON: {err}"),
        }
    }
}

impl std::error::Error for SchemaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SchemaError::Ordinal(err) => Some(err),
            SchemaError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<OrdinalError> for SchemaError {
    fn from(err: OrdinalError) -> Self {
        SchemaError::Ordinal(err)
    }
}

impl From<serde_json::Error> for SchemaError {
    fn from(err: serde_json::Error) -> Self {
        SchemaError::Json(err)
    }
}
