#![deny(unsafe_code)]

//! Client and server runtime for fathom protocols.
//!
//! - [`ProtocolBinding`] indexes one protocol of a library by ordinal and name.
//! - [`Proxy`] and [`SynchronousProxy`] issue calls and correlate replies by
//!   transaction id; [`EventStream`] delivers server events.
//! - [`RequestStream`] yields decoded [`Request`]s; [`Responder`] and
//!   [`ControlHandle`] send replies, events, epitaphs and shutdowns.
//! - [`Dispatcher`] maps methods to handlers.
//!
//! Everything runs over a [`Transport`]; [`mem::Channel`] is the in-process
//! implementation.

mod binding;
mod client;
mod dispatch;
mod error;
pub mod mem;
mod server;
mod transport;

pub use binding::*;
pub use client::*;
pub use dispatch::*;
pub use error::*;
pub use server::*;
pub use transport::*;
