#![deny(unsafe_code)]

//! Wire format and bindings runtime for schema-described protocols.
//!
//! A [`schema::Library`] describes types and protocols; [`codec`] turns
//! values of those types into bytes and handles and back; [`session`] runs
//! clients and servers over a transport.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use fathom::prelude::*;
//!
//! let mut builder = LibraryBuilder::new("example.echo");
//! builder
//!     .add_protocol("Echo")
//!     .two_way("Say", [("text", Type::string())], [("text", Type::string())]);
//! let binding = ProtocolBinding::new(Arc::new(builder.build().unwrap()), "Echo").unwrap();
//!
//! let (client_end, server_end) = Channel::create();
//! let proxy = SynchronousProxy::new(client_end, binding.clone());
//! let _stream = RequestStream::new(server_end, binding);
//! assert!(!proxy.is_closed());
//! ```

pub use fathom_codec as codec;
pub use fathom_hash as hash;
pub use fathom_schema as schema;
pub use fathom_session as session;
pub use fathom_wire as wire;

pub use fathom_session::{Error, mem::Channel};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use fathom::prelude::*;
/// ```
pub mod prelude {
    pub use fathom_codec::{TableValue, UnionValue, Value};
    pub use fathom_schema::{Library, LibraryBuilder, NO_PARAMS, Strictness, Type};
    pub use fathom_session::mem::Channel;
    pub use fathom_session::{
        ControlHandle, Dispatcher, Error, Event, ProtocolBinding, Proxy, Request, RequestStream,
        Responder, SynchronousProxy, Transport,
    };
    pub use fathom_wire::{Handle, HandleInfo, Limits, ObjectType, Rights, Status};
}
