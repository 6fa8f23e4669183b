use std::fmt;

use fathom_wire::{ObjectType, Rights};
use serde::{Deserialize, Serialize};

/// Fixed-width scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveSubtype {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
}

impl PrimitiveSubtype {
    /// Size in bytes, which is also the alignment.
    pub fn size(self) -> u32 {
        match self {
            PrimitiveSubtype::Bool | PrimitiveSubtype::Int8 | PrimitiveSubtype::Uint8 => 1,
            PrimitiveSubtype::Int16 | PrimitiveSubtype::Uint16 => 2,
            PrimitiveSubtype::Int32 | PrimitiveSubtype::Uint32 | PrimitiveSubtype::Float32 => 4,
            PrimitiveSubtype::Int64 | PrimitiveSubtype::Uint64 | PrimitiveSubtype::Float64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimitiveSubtype::Bool => "bool",
            PrimitiveSubtype::Int8 => "int8",
            PrimitiveSubtype::Int16 => "int16",
            PrimitiveSubtype::Int32 => "int32",
            PrimitiveSubtype::Int64 => "int64",
            PrimitiveSubtype::Uint8 => "uint8",
            PrimitiveSubtype::Uint16 => "uint16",
            PrimitiveSubtype::Uint32 => "uint32",
            PrimitiveSubtype::Uint64 => "uint64",
            PrimitiveSubtype::Float32 => "float32",
            PrimitiveSubtype::Float64 => "float64",
        }
    }
}

/// Extensibility mode of a union.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    #[default]
    Strict,
    Flexible,
}

impl Strictness {
    pub fn is_flexible(self) -> bool {
        self == Strictness::Flexible
    }
}

/// A reference to a type, as it appears in a member or parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Type {
    Primitive {
        subtype: PrimitiveSubtype,
    },
    String {
        #[serde(default)]
        max_len: Option<u32>,
        #[serde(default)]
        nullable: bool,
    },
    Vector {
        element: Box<Type>,
        #[serde(default)]
        max_len: Option<u32>,
        #[serde(default)]
        nullable: bool,
    },
    Array {
        element: Box<Type>,
        len: u32,
    },
    Handle {
        #[serde(default)]
        object_type: ObjectType,
        #[serde(default)]
        rights: Rights,
        #[serde(default)]
        nullable: bool,
    },
    /// A struct, union or table declared in the same library.
    Identifier {
        name: String,
        #[serde(default)]
        nullable: bool,
    },
}

impl Type {
    pub fn primitive(subtype: PrimitiveSubtype) -> Self {
        Type::Primitive { subtype }
    }

    pub fn bool() -> Self {
        Type::primitive(PrimitiveSubtype::Bool)
    }

    pub fn u8() -> Self {
        Type::primitive(PrimitiveSubtype::Uint8)
    }

    pub fn u16() -> Self {
        Type::primitive(PrimitiveSubtype::Uint16)
    }

    pub fn u32() -> Self {
        Type::primitive(PrimitiveSubtype::Uint32)
    }

    pub fn u64() -> Self {
        Type::primitive(PrimitiveSubtype::Uint64)
    }

    pub fn i8() -> Self {
        Type::primitive(PrimitiveSubtype::Int8)
    }

    pub fn i16() -> Self {
        Type::primitive(PrimitiveSubtype::Int16)
    }

    pub fn i32() -> Self {
        Type::primitive(PrimitiveSubtype::Int32)
    }

    pub fn i64() -> Self {
        Type::primitive(PrimitiveSubtype::Int64)
    }

    pub fn f32() -> Self {
        Type::primitive(PrimitiveSubtype::Float32)
    }

    pub fn f64() -> Self {
        Type::primitive(PrimitiveSubtype::Float64)
    }

    /// Unbounded, non-nullable string.
    pub fn string() -> Self {
        Type::String {
            max_len: None,
            nullable: false,
        }
    }

    pub fn bounded_string(max_len: u32) -> Self {
        Type::String {
            max_len: Some(max_len),
            nullable: false,
        }
    }

    pub fn vector(element: Type) -> Self {
        Type::Vector {
            element: Box::new(element),
            max_len: None,
            nullable: false,
        }
    }

    pub fn bounded_vector(element: Type, max_len: u32) -> Self {
        Type::Vector {
            element: Box::new(element),
            max_len: Some(max_len),
            nullable: false,
        }
    }

    pub fn array(element: Type, len: u32) -> Self {
        Type::Array {
            element: Box::new(element),
            len,
        }
    }

    pub fn handle(object_type: ObjectType, rights: Rights) -> Self {
        Type::Handle {
            object_type,
            rights,
            nullable: false,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Type::Identifier {
            name: name.into(),
            nullable: false,
        }
    }

    /// The nullable form of this type. Primitives and arrays are unchanged.
    pub fn optional(mut self) -> Self {
        match &mut self {
            Type::String { nullable, .. }
            | Type::Vector { nullable, .. }
            | Type::Handle { nullable, .. }
            | Type::Identifier { nullable, .. } => *nullable = true,
            Type::Primitive { .. } | Type::Array { .. } => {}
        }
        self
    }

    pub fn is_nullable(&self) -> bool {
        match self {
            Type::String { nullable, .. }
            | Type::Vector { nullable, .. }
            | Type::Handle { nullable, .. }
            | Type::Identifier { nullable, .. } => *nullable,
            Type::Primitive { .. } | Type::Array { .. } => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = if self.is_nullable() { "?" } else { "" };
        match self {
            Type::Primitive { subtype } => write!(f, "{}", subtype.name()),
            Type::String { max_len, .. } => match max_len {
                Some(n) => write!(f, "string:{n}{suffix}"),
                None => write!(f, "string{suffix}"),
            },
            Type::Vector {
                element, max_len, ..
            } => match max_len {
                Some(n) => write!(f, "vector<{element}>:{n}{suffix}"),
                None => write!(f, "vector<{element}>{suffix}"),
            },
            Type::Array { element, len } => write!(f, "array<{element}, {len}>"),
            Type::Handle { object_type, .. } => write!(f, "handle<{object_type:?}>{suffix}"),
            Type::Identifier { name, .. } => write!(f, "{name}{suffix}"),
        }
    }
}
