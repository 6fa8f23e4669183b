use serde::{Deserialize, Serialize};

use crate::{Strictness, Type};

/// Wire-layout metadata of a declaration.
///
/// Out-of-line sizes and handle counts saturate at `u32::MAX` for unbounded
/// or recursive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeShape {
    pub inline_size: u32,
    pub alignment: u32,
    pub depth: u32,
    pub max_handles: u32,
    pub max_out_of_line: u32,
    pub has_padding: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructMember {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
    #[serde(default)]
    pub offset: u32,
    /// Bytes of padding between the end of this member and the next.
    #[serde(default)]
    pub padding: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnionMember {
    pub ordinal: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
}

/// Table fields are optional by construction; absence is an empty envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMember {
    pub ordinal: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeclKind {
    Struct {
        members: Vec<StructMember>,
    },
    Union {
        members: Vec<UnionMember>,
        #[serde(default)]
        strictness: Strictness,
    },
    Table {
        members: Vec<TableMember>,
    },
}

/// A struct, union or table declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    #[serde(flatten)]
    pub kind: DeclKind,
    /// Whether any value of this type can carry a handle.
    #[serde(default)]
    pub is_resource: bool,
    #[serde(default)]
    pub shape: TypeShape,
}

impl TypeDecl {
    pub fn struct_members(&self) -> Option<&[StructMember]> {
        match &self.kind {
            DeclKind::Struct { members } => Some(members),
            _ => None,
        }
    }

    /// Members and strictness, if this is a union.
    pub fn union_members(&self) -> Option<(&[UnionMember], Strictness)> {
        match &self.kind {
            DeclKind::Union {
                members,
                strictness,
            } => Some((members, *strictness)),
            _ => None,
        }
    }

    pub fn table_members(&self) -> Option<&[TableMember]> {
        match &self.kind {
            DeclKind::Table { members } => Some(members),
            _ => None,
        }
    }

    pub fn union_member(&self, ordinal: u64) -> Option<&UnionMember> {
        self.union_members()?
            .0
            .iter()
            .find(|member| member.ordinal == ordinal)
    }

    pub fn table_member(&self, ordinal: u64) -> Option<&TableMember> {
        self.table_members()?
            .iter()
            .find(|member| member.ordinal == ordinal)
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            DeclKind::Struct { .. } => "struct",
            DeclKind::Union { .. } => "union",
            DeclKind::Table { .. } => "table",
        }
    }
}

/// Direction and reply shape of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    /// Client to server, no reply.
    OneWay,
    /// Client to server with a correlated reply.
    TwoWay,
    /// Server to client, unsolicited.
    Event,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    pub ordinal: u64,
    pub kind: MethodKind,
    /// Struct carrying the request parameters; `None` means no parameters.
    #[serde(default)]
    pub request: Option<String>,
    /// Struct carrying the response or event parameters.
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub is_transitional: bool,
    #[serde(default)]
    pub strictness: Strictness,
}

impl Method {
    pub fn has_request(&self) -> bool {
        self.kind != MethodKind::Event
    }

    pub fn has_response(&self) -> bool {
        self.kind != MethodKind::OneWay
    }

    /// Payload struct sent by the client, if any.
    pub fn request_payload(&self) -> Option<&str> {
        self.request.as_deref()
    }

    /// Payload struct sent by the server, if any.
    pub fn response_payload(&self) -> Option<&str> {
        self.response.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDecl {
    pub name: String,
    pub methods: Vec<Method>,
}

impl ProtocolDecl {
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|method| method.name == name)
    }

    pub fn method_by_ordinal(&self, ordinal: u64) -> Option<&Method> {
        self.methods.iter().find(|method| method.ordinal == ordinal)
    }
}
