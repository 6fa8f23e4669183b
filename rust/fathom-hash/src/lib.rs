#![deny(unsafe_code)]

//! Method identity for fathom protocols.
//!
//! Every method is identified on the wire by a 64-bit ordinal derived from its
//! fully-qualified name `library/Protocol.method`. The derivation is a pure
//! function of that name so that independently generated bindings agree
//! without coordinating.
//!
//! # Example
//!
//! ```rust
//! use fathom_hash::method_ordinal;
//!
//! let ordinal = method_ordinal("example.echo", "Echo", "EchoString").unwrap();
//! assert_ne!(ordinal, 0);
//! assert_eq!(ordinal >> 63, 0);
//! ```

use std::fmt;

/// Mask applied to the raw hash. The high bit is reserved for system use.
pub const ORDINAL_MASK: u64 = 0x7fff_ffff_ffff_ffff;

/// Errors produced while deriving an ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrdinalError {
    /// Library, protocol, or method name was empty.
    EmptyName,
    /// A name contained a character that would make the full path ambiguous.
    InvalidName(String),
    /// A selector containing `/` was not of the form `library/Protocol.method`.
    MalformedSelector(String),
    /// The hash of the name collapsed to zero, which is reserved.
    Zero(String),
}

impl fmt::Display for OrdinalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrdinalError::EmptyName => {
                write!(f, "library, protocol and method names must be non-empty")
            }
            OrdinalError::InvalidName(name) => write!(f, "invalid name component: {name:?}"),
            OrdinalError::MalformedSelector(sel) => write!(
                f,
                "selector {sel:?} must have the form library/Protocol.method"
            ),
            OrdinalError::Zero(path) => write!(f, "ordinal for {path:?} hashes to zero"),
        }
    }
}

impl std::error::Error for OrdinalError {}

/// Build the fully-qualified method path `library/Protocol.method`.
pub fn method_path(library: &str, protocol: &str, method: &str) -> Result<String, OrdinalError> {
    if library.is_empty() || protocol.is_empty() || method.is_empty() {
        return Err(OrdinalError::EmptyName);
    }
    if library.contains('/') {
        return Err(OrdinalError::InvalidName(library.to_owned()));
    }
    for part in [protocol, method] {
        if part.contains(['/', '.']) {
            return Err(OrdinalError::InvalidName(part.to_owned()));
        }
    }
    Ok(format!("{library}/{protocol}.{method}"))
}

/// Hash a fully-qualified path into an ordinal.
///
/// Takes the first eight bytes of the BLAKE3 digest as a little-endian
/// integer and clears the high bit.
pub fn ordinal_for_path(path: &str) -> Result<u64, OrdinalError> {
    let digest = blake3::hash(path.as_bytes());
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&digest.as_bytes()[..8]);
    let ordinal = u64::from_le_bytes(raw) & ORDINAL_MASK;
    if ordinal == 0 {
        return Err(OrdinalError::Zero(path.to_owned()));
    }
    Ok(ordinal)
}

/// Derive the ordinal of `library/protocol.method`.
pub fn method_ordinal(library: &str, protocol: &str, method: &str) -> Result<u64, OrdinalError> {
    ordinal_for_path(&method_path(library, protocol, method)?)
}

/// Derive an ordinal from a selector override.
///
/// A selector containing `/` names the full path and is hashed verbatim.
/// Otherwise it stands in for the method name within `library/protocol`.
pub fn selector_ordinal(
    library: &str,
    protocol: &str,
    selector: &str,
) -> Result<u64, OrdinalError> {
    if selector.contains('/') {
        validate_full_selector(selector)?;
        return ordinal_for_path(selector);
    }
    method_ordinal(library, protocol, selector)
}

fn validate_full_selector(selector: &str) -> Result<(), OrdinalError> {
    let malformed = || OrdinalError::MalformedSelector(selector.to_owned());
    let (library, rest) = selector.split_once('/').ok_or_else(malformed)?;
    let (protocol, method) = rest.split_once('.').ok_or_else(malformed)?;
    if library.is_empty() || protocol.is_empty() || method.is_empty() {
        return Err(malformed());
    }
    if method.contains(['/', '.']) || protocol.contains('/') {
        return Err(malformed());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinal_is_deterministic() {
        let a = method_ordinal("example.echo", "Echo", "EchoString").unwrap();
        let b = method_ordinal("example.echo", "Echo", "EchoString").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn ordinal_matches_manual_digest() {
        let digest = blake3::hash(b"example.echo/Echo.EchoString");
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&digest.as_bytes()[..8]);
        let expected = u64::from_le_bytes(raw) & ORDINAL_MASK;
        assert_eq!(
            method_ordinal("example.echo", "Echo", "EchoString").unwrap(),
            expected
        );
    }

    #[test]
    fn ordinal_high_bit_is_clear() {
        for method in ["A", "B", "Frobinate", "Ping", "Pong", "Watch", "Close"] {
            let ordinal = method_ordinal("lib", "Proto", method).unwrap();
            assert_eq!(ordinal & !ORDINAL_MASK, 0, "high bit set for {method}");
        }
    }

    #[test]
    fn distinct_methods_get_distinct_ordinals() {
        let a = method_ordinal("lib", "Proto", "Get").unwrap();
        let b = method_ordinal("lib", "Proto", "Set").unwrap();
        let c = method_ordinal("lib", "Other", "Get").unwrap();
        let d = method_ordinal("lib2", "Proto", "Get").unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn selector_without_slash_replaces_method_name() {
        assert_eq!(
            selector_ordinal("lib", "Proto", "Renamed").unwrap(),
            method_ordinal("lib", "Proto", "Renamed").unwrap()
        );
    }

    #[test]
    fn selector_with_slash_is_used_verbatim() {
        assert_eq!(
            selector_ordinal("lib", "Proto", "other.lib/Moved.Method").unwrap(),
            ordinal_for_path("other.lib/Moved.Method").unwrap()
        );
    }

    #[test]
    fn malformed_selector_is_rejected() {
        assert!(matches!(
            selector_ordinal("lib", "Proto", "nolib/"),
            Err(OrdinalError::MalformedSelector(_))
        ));
        assert!(matches!(
            selector_ordinal("lib", "Proto", "/Proto.method"),
            Err(OrdinalError::MalformedSelector(_))
        ));
    }

    #[test]
    fn empty_and_ambiguous_names_are_rejected() {
        assert_eq!(method_ordinal("", "P", "m"), Err(OrdinalError::EmptyName));
        assert!(matches!(
            method_ordinal("lib", "P.Q", "m"),
            Err(OrdinalError::InvalidName(_))
        ));
        assert!(matches!(
            method_ordinal("lib/x", "P", "m"),
            Err(OrdinalError::InvalidName(_))
        ));
    }
}
