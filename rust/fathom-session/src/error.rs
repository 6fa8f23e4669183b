use std::fmt;

use fathom_codec::{DecodeError, EncodeError};
use fathom_schema::MethodKind;
use fathom_wire::{HeaderError, Status};

use crate::TransportError;

/// Errors surfaced by proxies, request streams and responders.
///
/// Decode and encode failures belong to the single call or request they
/// occurred in; they never poison other outstanding transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Fewer bytes than a transaction header.
    MalformedHeader { len: usize },
    /// The header's magic number names another wire revision.
    IncompatibleWireFormat { magic: u8 },
    MalformedEpitaph { len: usize },
    /// No method of the protocol has this ordinal.
    UnknownOrdinal { ordinal: u64, protocol_name: String },
    /// No method of the protocol has this name.
    UnknownMethod {
        method: String,
        protocol_name: String,
    },
    /// The method exists but is not of the kind the operation needs, e.g.
    /// `call` on a one-way method.
    InvalidMethodKind { method: String, kind: MethodKind },
    /// A two-way request with txid 0, or a one-way request with a txid.
    InvalidRequestTxid { tx_id: u32, ordinal: u64 },
    Encode(EncodeError),
    Decode(DecodeError),
    /// The transport closed without an epitaph.
    PeerClosed { protocol_name: String },
    /// The server closed the channel with an epitaph.
    ClientChannelClosed {
        status: Status,
        protocol_name: String,
    },
    ClientWrite(TransportError),
    ServerRequestRead(TransportError),
    ServerResponseWrite(TransportError),
    /// A transitional method was called but the server does not implement it.
    TransitionalMethodUnimplemented {
        method: String,
        protocol_name: String,
    },
    /// A synchronous call's deadline elapsed first.
    TimedOut,
    /// A response future was polled after it resolved.
    PollAfterCompletion,
}

impl Error {
    /// True when the channel is gone and no further traffic is possible.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Error::PeerClosed { .. } | Error::ClientChannelClosed { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MalformedHeader { len } => write!(f, "malformed header: {len} bytes"),
            Error::IncompatibleWireFormat { magic } => {
                write!(f, "incompatible wire format: magic number {magic:#04x}")
            }
            Error::MalformedEpitaph { len } => write!(f, "malformed epitaph body of {len} bytes"),
            Error::UnknownOrdinal {
                ordinal,
                protocol_name,
            } => write!(
                f,
                "unknown ordinal {ordinal:#x} for protocol {protocol_name}"
            ),
            Error::UnknownMethod {
                method,
                protocol_name,
            } => write!(f, "protocol {protocol_name} has no method {method}"),
            Error::InvalidMethodKind { method, kind } => {
                write!(f, "method {method} is {kind:?}")
            }
            Error::InvalidRequestTxid { tx_id, ordinal } => write!(
                f,
                "invalid txid {tx_id} for request with ordinal {ordinal:#x}"
            ),
            Error::Encode(err) => write!(f, "encode error: {err}"),
            Error::Decode(err) => write!(f, "decode error: {err}"),
            Error::PeerClosed { protocol_name } => {
                write!(f, "peer of {protocol_name} closed the channel")
            }
            Error::ClientChannelClosed {
                status,
                protocol_name,
            } => write!(f, "{protocol_name} channel closed with epitaph {status}"),
            Error::ClientWrite(err) => write!(f, "client write failed: {err}"),
            Error::ServerRequestRead(err) => write!(f, "server read failed: {err}"),
            Error::ServerResponseWrite(err) => write!(f, "server write failed: {err}"),
            Error::TransitionalMethodUnimplemented {
                method,
                protocol_name,
            } => write!(
                f,
                "transitional method {protocol_name}.{method} is not implemented"
            ),
            Error::TimedOut => write!(f, "timed out"),
            Error::PollAfterCompletion => write!(f, "response future polled after completion"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Encode(err) => Some(err),
            Error::Decode(err) => Some(err),
            Error::ClientWrite(err)
            | Error::ServerRequestRead(err)
            | Error::ServerResponseWrite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EncodeError> for Error {
    fn from(err: EncodeError) -> Self {
        Error::Encode(err)
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Error::Decode(err)
    }
}

impl From<HeaderError> for Error {
    fn from(err: HeaderError) -> Self {
        match err {
            HeaderError::MalformedHeader { len } => Error::MalformedHeader { len },
            HeaderError::IncompatibleWireFormat { magic } => {
                Error::IncompatibleWireFormat { magic }
            }
            HeaderError::MalformedEpitaph { len } => Error::MalformedEpitaph { len },
        }
    }
}
