#![deny(unsafe_code)]

//! Schema-driven codec for fathom.
//!
//! Values are dynamically typed ([`Value`]) and shaped by a [`Library`]
//! declaration during [`encode`] and [`decode`]. Both directions enforce the
//! same rules: 8-byte aligned out-of-line objects in depth-first order, zeroed
//! padding, bounded strings and vectors, the message [`Limits`], and handle
//! type and rights checks.
//!
//! # Example
//!
//! ```
//! use fathom_codec::{Value, decode, encode};
//! use fathom_schema::{LibraryBuilder, Type};
//!
//! let mut builder = LibraryBuilder::new("example.points");
//! builder
//!     .add_struct("Point")
//!     .member("x", Type::i32())
//!     .member("y", Type::i32());
//! let library = builder.build().unwrap();
//!
//! let point = Value::Struct(vec![Value::I32(3), Value::I32(-4)]);
//! let (bytes, handles) = encode(&library, "Point", point).unwrap();
//! assert_eq!(bytes.len(), 8);
//!
//! let back = decode(&library, "Point", &bytes, handles).unwrap();
//! assert_eq!(back, Value::Struct(vec![Value::I32(3), Value::I32(-4)]));
//! ```
//!
//! [`Library`]: fathom_schema::Library
//! [`Limits`]: fathom_wire::Limits

mod decoder;
mod encoder;
mod error;
mod message;
mod value;

pub use decoder::*;
pub use encoder::*;
pub use error::*;
pub use message::*;
pub use value::*;
