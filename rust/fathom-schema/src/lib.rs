#![deny(unsafe_code)]

//! Type model for fathom.
//!
//! A [`Library`] is an immutable, validated graph of struct, union and table
//! declarations plus the protocols that use them. Every layout fact the codec
//! needs (member offsets, inline sizes, handle counts) and every method
//! ordinal is computed once here and read everywhere else.
//!
//! Libraries are built with [`LibraryBuilder`] or loaded from their JSON form
//! with [`Library::from_json_str`].

mod builder;
mod decl;
mod error;
mod layout;
mod library;
mod types;

pub use builder::*;
pub use decl::*;
pub use error::*;
pub use layout::{BOX_INLINE_SIZE, HANDLE_INLINE_SIZE, HEADER_INLINE_SIZE};
pub use library::*;
pub use types::*;
