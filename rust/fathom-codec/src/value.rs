use std::collections::BTreeMap;

use fathom_wire::HandleInfo;

/// A dynamically typed value, shaped by a schema type during encode/decode.
///
/// Struct fields are positional, in declaration order. Handles are owned, so
/// dropping a value closes every handle it carries.
#[derive(Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Vector(Vec<Value>),
    Array(Vec<Value>),
    Handle(HandleInfo),
    /// Absent nullable string, vector, handle, boxed struct or union.
    Null,
    Struct(Vec<Value>),
    Union(UnionValue),
    Table(TableValue),
}

/// Raw envelope contents the schema does not recognize.
#[derive(Debug, PartialEq, Default)]
pub struct UnknownData {
    /// Out-of-line bytes, or the four inline bytes when `inlined` is set.
    pub bytes: Vec<u8>,
    pub handles: Vec<HandleInfo>,
    pub inlined: bool,
}

impl UnknownData {
    /// Close every handle and discard the bytes.
    pub fn close(self) {
        drop(self);
    }
}

#[derive(Debug, PartialEq)]
pub enum UnionValue {
    Known { ordinal: u64, value: Box<Value> },
    /// A variant of a flexible union that this schema does not know.
    Unknown { ordinal: u64, data: UnknownData },
}

impl UnionValue {
    pub fn ordinal(&self) -> u64 {
        match self {
            UnionValue::Known { ordinal, .. } | UnionValue::Unknown { ordinal, .. } => *ordinal,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, UnionValue::Unknown { .. })
    }
}

/// A table field the schema does not recognize, kept for re-encoding.
#[derive(Debug, PartialEq)]
pub struct UnknownField {
    pub ordinal: u64,
    pub data: UnknownData,
}

#[derive(Debug, PartialEq, Default)]
pub struct TableValue {
    pub fields: BTreeMap<u64, Value>,
    pub unknown: Vec<UnknownField>,
}

impl TableValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, ordinal: u64, value: Value) -> Self {
        self.fields.insert(ordinal, value);
        self
    }

    pub fn get(&self, ordinal: u64) -> Option<&Value> {
        self.fields.get(&ordinal)
    }
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn union(ordinal: u64, value: Value) -> Self {
        Value::Union(UnionValue::Known {
            ordinal,
            value: Box::new(value),
        })
    }

    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::I8(_) => "int8",
            Value::I16(_) => "int16",
            Value::I32(_) => "int32",
            Value::I64(_) => "int64",
            Value::U8(_) => "uint8",
            Value::U16(_) => "uint16",
            Value::U32(_) => "uint32",
            Value::U64(_) => "uint64",
            Value::F32(_) => "float32",
            Value::F64(_) => "float64",
            Value::String(_) => "string",
            Value::Vector(_) => "vector",
            Value::Array(_) => "array",
            Value::Handle(_) => "handle",
            Value::Null => "null",
            Value::Struct(_) => "struct",
            Value::Union(_) => "union",
            Value::Table(_) => "table",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::U8(v) => Some(v.into()),
            Value::U16(v) => Some(v.into()),
            Value::U32(v) => Some(v.into()),
            Value::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::I8(v) => Some(v.into()),
            Value::I16(v) => Some(v.into()),
            Value::I32(v) => Some(v.into()),
            Value::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_handle(self) -> Option<HandleInfo> {
        match self {
            Value::Handle(info) => Some(info),
            _ => None,
        }
    }

    pub fn into_fields(self) -> Option<Vec<Value>> {
        match self {
            Value::Struct(fields) => Some(fields),
            _ => None,
        }
    }
}
