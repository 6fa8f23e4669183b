use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::layout::{BOX_INLINE_SIZE, HANDLE_INLINE_SIZE, HEADER_INLINE_SIZE, resolve};
use crate::{DeclKind, ProtocolDecl, SchemaError, Type, TypeDecl, TypeShape};

/// The serialized form of a library.
///
/// Layout fields (`offset`, `padding`, `shape`, `is_resource`) may be omitted;
/// when present they must agree with the computed layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryIr {
    pub name: String,
    #[serde(default)]
    pub decls: Vec<TypeDecl>,
    #[serde(default)]
    pub protocols: Vec<ProtocolDecl>,
}

/// Size and alignment of a type's inline form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeLayout {
    pub size: usize,
    pub alignment: usize,
}

/// A validated, immutable set of declarations.
#[derive(Debug, Clone)]
pub struct Library {
    ir: LibraryIr,
    decl_index: HashMap<String, usize>,
    protocol_index: HashMap<String, usize>,
}

impl Library {
    /// Validate `ir`, fill in any missing layout, and index it.
    pub fn from_ir(ir: LibraryIr) -> Result<Self, SchemaError> {
        let computed = resolve(ir.clone())?;
        for (recorded, computed) in ir.decls.iter().zip(&computed.decls) {
            if recorded.shape != TypeShape::default() && recorded != computed {
                return Err(SchemaError::LayoutMismatch(recorded.name.clone()));
            }
        }
        tracing::debug!(
            library = %computed.name,
            decls = computed.decls.len(),
            protocols = computed.protocols.len(),
            "library loaded"
        );
        Ok(Self::index(computed))
    }

    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        Self::from_ir(serde_json::from_str(json)?)
    }

    pub fn from_json_slice(json: &[u8]) -> Result<Self, SchemaError> {
        Self::from_ir(serde_json::from_slice(json)?)
    }

    /// Serialize with all layout fields populated.
    pub fn to_json(&self) -> Result<String, SchemaError> {
        Ok(serde_json::to_string_pretty(&self.ir)?)
    }

    pub(crate) fn index(ir: LibraryIr) -> Self {
        let decl_index = ir
            .decls
            .iter()
            .enumerate()
            .map(|(i, decl)| (decl.name.clone(), i))
            .collect();
        let protocol_index = ir
            .protocols
            .iter()
            .enumerate()
            .map(|(i, protocol)| (protocol.name.clone(), i))
            .collect();
        Self {
            ir,
            decl_index,
            protocol_index,
        }
    }

    pub fn name(&self) -> &str {
        &self.ir.name
    }

    pub fn decls(&self) -> &[TypeDecl] {
        &self.ir.decls
    }

    pub fn protocols(&self) -> &[ProtocolDecl] {
        &self.ir.protocols
    }

    pub fn ir(&self) -> &LibraryIr {
        &self.ir
    }

    pub fn lookup(&self, name: &str) -> Option<&TypeDecl> {
        self.decl_index.get(name).map(|&i| &self.ir.decls[i])
    }

    /// Like [`Library::lookup`], but unknown names are an error.
    pub fn decl(&self, name: &str) -> Result<&TypeDecl, SchemaError> {
        self.lookup(name)
            .ok_or_else(|| SchemaError::UnresolvedIdentifier(name.to_owned()))
    }

    pub fn protocol(&self, name: &str) -> Result<&ProtocolDecl, SchemaError> {
        self.protocol_index
            .get(name)
            .map(|&i| &self.ir.protocols[i])
            .ok_or_else(|| SchemaError::UnknownProtocol(name.to_owned()))
    }

    /// Inline size and alignment of `ty`.
    pub fn layout_of(&self, ty: &Type) -> Result<TypeLayout, SchemaError> {
        let (size, alignment) = match ty {
            Type::Primitive { subtype } => (subtype.size(), subtype.size()),
            Type::String { .. } | Type::Vector { .. } => (HEADER_INLINE_SIZE, 8),
            Type::Handle { .. } => (HANDLE_INLINE_SIZE, HANDLE_INLINE_SIZE),
            Type::Array { len: 0, .. } => {
                return Err(SchemaError::ZeroLengthArray(ty.to_string()));
            }
            Type::Array { element, len } => {
                let elem = self.layout_of(element)?;
                return Ok(TypeLayout {
                    size: elem.size * *len as usize,
                    alignment: elem.alignment,
                });
            }
            Type::Identifier { name, nullable } => {
                let decl = self.decl(name)?;
                match (&decl.kind, nullable) {
                    (DeclKind::Struct { .. }, true) => (BOX_INLINE_SIZE, 8),
                    (DeclKind::Struct { .. }, false) => {
                        (decl.shape.inline_size, decl.shape.alignment)
                    }
                    (DeclKind::Union { .. } | DeclKind::Table { .. }, _) => (HEADER_INLINE_SIZE, 8),
                }
            }
        };
        Ok(TypeLayout {
            size: size as usize,
            alignment: alignment as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LibraryBuilder, Strictness};

    fn sample() -> Library {
        let mut builder = LibraryBuilder::new("example.shapes");
        builder
            .add_struct("Point")
            .member("x", Type::i32())
            .member("y", Type::i32());
        builder
            .add_union("Shape", Strictness::Flexible)
            .member(1, "point", Type::named("Point"))
            .member(2, "radius", Type::f64());
        builder.build().unwrap()
    }

    #[test]
    fn json_round_trip_preserves_layout() {
        let lib = sample();
        let json = lib.to_json().unwrap();
        let loaded = Library::from_json_str(&json).unwrap();
        assert_eq!(loaded.ir(), lib.ir());
    }

    #[test]
    fn json_without_layout_is_completed() {
        let json = r#"{
            "name": "example.min",
            "decls": [
                { "name": "Pair", "kind": "struct", "members": [
                    { "name": "a", "type": { "kind": "primitive", "subtype": "uint8" } },
                    { "name": "b", "type": { "kind": "primitive", "subtype": "uint64" } }
                ] }
            ]
        }"#;
        let lib = Library::from_json_str(json).unwrap();
        let pair = lib.decl("Pair").unwrap();
        let members = pair.struct_members().unwrap();
        assert_eq!(members[0].offset, 0);
        assert_eq!(members[0].padding, 7);
        assert_eq!(members[1].offset, 8);
        assert_eq!(pair.shape.inline_size, 16);
        assert!(pair.shape.has_padding);
    }

    #[test]
    fn tampered_layout_is_rejected() {
        let lib = sample();
        let mut ir = lib.ir().clone();
        if let DeclKind::Struct { members } = &mut ir.decls[0].kind {
            members[1].offset = 5;
        }
        assert!(matches!(
            Library::from_ir(ir),
            Err(SchemaError::LayoutMismatch(name)) if name == "Point"
        ));
    }

    #[test]
    fn layout_of_identifiers() {
        let lib = sample();
        assert_eq!(
            lib.layout_of(&Type::named("Point")).unwrap(),
            TypeLayout {
                size: 8,
                alignment: 4
            }
        );
        let boxed = lib.layout_of(&Type::named("Point").optional()).unwrap();
        assert_eq!(boxed.size, 8);
        assert_eq!(lib.layout_of(&Type::named("Shape")).unwrap().size, 16);
        assert!(lib.layout_of(&Type::named("Missing")).is_err());
        assert!(matches!(
            lib.layout_of(&Type::array(Type::u32(), 0)),
            Err(SchemaError::ZeroLengthArray(_))
        ));
    }
}
