//! The transport contract.
//!
//! A transport moves whole messages (bytes plus handles) in order, in both
//! directions, without merging or splitting them. Reads never block: callers
//! use [`Transport::try_read`] and park on [`Transport::poll_readable`] (async)
//! or [`Transport::wait_readable`] (threads) when nothing is queued.

use std::fmt;
use std::task::{Context, Poll};
use std::time::Instant;

use fathom_wire::MessageBuf;

/// Result of a non-blocking read.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Nothing queued yet.
    Pending,
    Ready(MessageBuf),
    /// The peer is gone and every queued message has been read.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    PeerClosed,
    MessageTooLarge { size: usize, max: usize },
    TooManyHandles { count: usize, max: usize },
    /// Any other failure of the underlying medium.
    Other(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::PeerClosed => write!(f, "peer closed"),
            TransportError::MessageTooLarge { size, max } => {
                write!(f, "message of {size} bytes exceeds {max}")
            }
            TransportError::TooManyHandles { count, max } => {
                write!(f, "{count} handles exceed limit {max}")
            }
            TransportError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// A bidirectional, message-preserving, ordered channel endpoint.
pub trait Transport: Send + Sync + 'static {
    /// Queue a message for the peer. On error the message is dropped and its
    /// handles closed.
    fn write(&self, msg: MessageBuf) -> Result<(), TransportError>;

    fn try_read(&self) -> Result<ReadOutcome, TransportError>;

    /// Ready once a read would not return [`ReadOutcome::Pending`]. Registers
    /// the task to be woken otherwise.
    fn poll_readable(&self, cx: &mut Context<'_>) -> Poll<()>;

    /// Block until readable or `deadline`. Returns false on timeout.
    fn wait_readable(&self, deadline: Option<Instant>) -> bool;

    /// Close this end. Queued inbound messages are dropped.
    fn close(&self);

    fn is_closed(&self) -> bool;
}
