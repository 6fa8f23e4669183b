//! Programmatic construction of a [`Library`].
//!
//! # Example
//!
//! ```rust
//! use fathom_schema::{LibraryBuilder, Type};
//!
//! let mut builder = LibraryBuilder::new("example.echo");
//! builder
//!     .add_protocol("Echo")
//!     .two_way("EchoString", [("value", Type::string())], [("response", Type::string())])
//!     .event("OnReady", [("generation", Type::u32())]);
//! let library = builder.build().unwrap();
//! let echo = library.protocol("Echo").unwrap();
//! assert_eq!(echo.methods.len(), 2);
//! ```

use fathom_hash::{method_ordinal, selector_ordinal};

use crate::layout::resolve;
use crate::{
    DeclKind, Library, LibraryIr, Method, MethodKind, ProtocolDecl, SchemaError, Strictness,
    StructMember, TableMember, Type, TypeDecl, TypeShape, UnionMember,
};

/// Parameter list of a method that takes or returns nothing.
pub const NO_PARAMS: [(&str, Type); 0] = [];

/// Builds a library declaration by declaration.
///
/// Layout, `is_resource` and method ordinals are computed by
/// [`LibraryBuilder::build`]; nothing is validated before then.
#[derive(Debug)]
pub struct LibraryBuilder {
    name: String,
    decls: Vec<TypeDecl>,
    protocols: Vec<PendingProtocol>,
}

#[derive(Debug)]
struct PendingProtocol {
    name: String,
    methods: Vec<PendingMethod>,
}

#[derive(Debug)]
struct PendingMethod {
    name: String,
    kind: MethodKind,
    request: Vec<(String, Type)>,
    response: Vec<(String, Type)>,
    is_transitional: bool,
    strictness: Strictness,
    selector: Option<String>,
    ordinal: Option<u64>,
}

fn empty_decl(name: &str, kind: DeclKind) -> TypeDecl {
    TypeDecl {
        name: name.to_owned(),
        kind,
        is_resource: false,
        shape: TypeShape::default(),
    }
}

fn params<N: Into<String>>(list: impl IntoIterator<Item = (N, Type)>) -> Vec<(String, Type)> {
    list.into_iter()
        .map(|(name, ty)| (name.into(), ty))
        .collect()
}

fn upper_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl LibraryBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            decls: Vec::new(),
            protocols: Vec::new(),
        }
    }

    pub fn add_struct(&mut self, name: &str) -> StructBuilder<'_> {
        self.decls.push(empty_decl(
            name,
            DeclKind::Struct {
                members: Vec::new(),
            },
        ));
        let index = self.decls.len() - 1;
        StructBuilder {
            decl: &mut self.decls[index],
        }
    }

    pub fn add_union(&mut self, name: &str, strictness: Strictness) -> UnionBuilder<'_> {
        self.decls.push(empty_decl(
            name,
            DeclKind::Union {
                members: Vec::new(),
                strictness,
            },
        ));
        let index = self.decls.len() - 1;
        UnionBuilder {
            decl: &mut self.decls[index],
        }
    }

    pub fn add_table(&mut self, name: &str) -> TableBuilder<'_> {
        self.decls.push(empty_decl(
            name,
            DeclKind::Table {
                members: Vec::new(),
            },
        ));
        let index = self.decls.len() - 1;
        TableBuilder {
            decl: &mut self.decls[index],
        }
    }

    pub fn add_protocol(&mut self, name: &str) -> ProtocolBuilder<'_> {
        self.protocols.push(PendingProtocol {
            name: name.to_owned(),
            methods: Vec::new(),
        });
        let index = self.protocols.len() - 1;
        ProtocolBuilder {
            protocol: &mut self.protocols[index],
        }
    }

    /// Synthesize payload structs, derive ordinals, lay out and validate.
    pub fn build(self) -> Result<Library, SchemaError> {
        let LibraryBuilder {
            name,
            mut decls,
            protocols,
        } = self;

        let mut resolved = Vec::with_capacity(protocols.len());
        for protocol in protocols {
            let mut methods = Vec::with_capacity(protocol.methods.len());
            for method in protocol.methods {
                let ordinal = match (method.ordinal, &method.selector) {
                    (Some(ordinal), _) => ordinal,
                    (None, Some(selector)) => selector_ordinal(&name, &protocol.name, selector)?,
                    (None, None) => method_ordinal(&name, &protocol.name, &method.name)?,
                };
                let stem = format!("{}{}", protocol.name, upper_first(&method.name));
                let mut payload = |suffix: &str, fields: Vec<(String, Type)>| {
                    if fields.is_empty() {
                        return None;
                    }
                    let payload_name = format!("{stem}{suffix}");
                    let members = fields
                        .into_iter()
                        .map(|(name, ty)| StructMember {
                            name,
                            ty,
                            offset: 0,
                            padding: 0,
                        })
                        .collect();
                    decls.push(empty_decl(&payload_name, DeclKind::Struct { members }));
                    Some(payload_name)
                };
                let (request, response) = match method.kind {
                    MethodKind::Event => (None, payload("Event", method.response)),
                    MethodKind::OneWay => (payload("Request", method.request), None),
                    MethodKind::TwoWay => (
                        payload("Request", method.request),
                        payload("Response", method.response),
                    ),
                };
                methods.push(Method {
                    name: method.name,
                    ordinal,
                    kind: method.kind,
                    request,
                    response,
                    is_transitional: method.is_transitional,
                    strictness: method.strictness,
                });
            }
            resolved.push(ProtocolDecl {
                name: protocol.name,
                methods,
            });
        }

        let ir = resolve(LibraryIr {
            name,
            decls,
            protocols: resolved,
        })?;
        Ok(Library::index(ir))
    }
}

/// Adds members to a struct; see [`LibraryBuilder::add_struct`].
pub struct StructBuilder<'a> {
    decl: &'a mut TypeDecl,
}

impl StructBuilder<'_> {
    pub fn member(&mut self, name: &str, ty: Type) -> &mut Self {
        if let DeclKind::Struct { members } = &mut self.decl.kind {
            members.push(StructMember {
                name: name.to_owned(),
                ty,
                offset: 0,
                padding: 0,
            });
        }
        self
    }
}

/// Adds members to a union; see [`LibraryBuilder::add_union`].
pub struct UnionBuilder<'a> {
    decl: &'a mut TypeDecl,
}

impl UnionBuilder<'_> {
    pub fn member(&mut self, ordinal: u64, name: &str, ty: Type) -> &mut Self {
        if let DeclKind::Union { members, .. } = &mut self.decl.kind {
            members.push(UnionMember {
                ordinal,
                name: name.to_owned(),
                ty,
            });
        }
        self
    }
}

/// Adds members to a table; see [`LibraryBuilder::add_table`].
pub struct TableBuilder<'a> {
    decl: &'a mut TypeDecl,
}

impl TableBuilder<'_> {
    pub fn member(&mut self, ordinal: u64, name: &str, ty: Type) -> &mut Self {
        if let DeclKind::Table { members } = &mut self.decl.kind {
            members.push(TableMember {
                ordinal,
                name: name.to_owned(),
                ty,
            });
        }
        self
    }
}

/// Adds methods to a protocol; see [`LibraryBuilder::add_protocol`].
///
/// Modifiers such as [`ProtocolBuilder::transitional`] apply to the most
/// recently added method.
pub struct ProtocolBuilder<'a> {
    protocol: &'a mut PendingProtocol,
}

impl ProtocolBuilder<'_> {
    fn push(
        &mut self,
        name: &str,
        kind: MethodKind,
        request: Vec<(String, Type)>,
        response: Vec<(String, Type)>,
    ) -> &mut Self {
        self.protocol.methods.push(PendingMethod {
            name: name.to_owned(),
            kind,
            request,
            response,
            is_transitional: false,
            strictness: Strictness::Strict,
            selector: None,
            ordinal: None,
        });
        self
    }

    pub fn two_way<N: Into<String>, M: Into<String>>(
        &mut self,
        name: &str,
        request: impl IntoIterator<Item = (N, Type)>,
        response: impl IntoIterator<Item = (M, Type)>,
    ) -> &mut Self {
        self.push(name, MethodKind::TwoWay, params(request), params(response))
    }

    pub fn one_way<N: Into<String>>(
        &mut self,
        name: &str,
        request: impl IntoIterator<Item = (N, Type)>,
    ) -> &mut Self {
        self.push(name, MethodKind::OneWay, params(request), Vec::new())
    }

    pub fn event<N: Into<String>>(
        &mut self,
        name: &str,
        payload: impl IntoIterator<Item = (N, Type)>,
    ) -> &mut Self {
        self.push(name, MethodKind::Event, Vec::new(), params(payload))
    }

    pub fn transitional(&mut self) -> &mut Self {
        if let Some(method) = self.protocol.methods.last_mut() {
            method.is_transitional = true;
        }
        self
    }

    pub fn flexible(&mut self) -> &mut Self {
        if let Some(method) = self.protocol.methods.last_mut() {
            method.strictness = Strictness::Flexible;
        }
        self
    }

    /// Derive the ordinal from `selector` instead of the method name.
    pub fn selector(&mut self, selector: &str) -> &mut Self {
        if let Some(method) = self.protocol.methods.last_mut() {
            method.selector = Some(selector.to_owned());
        }
        self
    }

    /// Use an explicit ordinal.
    pub fn ordinal(&mut self, ordinal: u64) -> &mut Self {
        if let Some(method) = self.protocol.methods.last_mut() {
            method.ordinal = Some(ordinal);
        }
        self
    }
}
