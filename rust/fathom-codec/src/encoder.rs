//! Value to wire encoding.
//!
//! The primary object is written at offset 0. Out-of-line objects are
//! appended depth-first in the order they are reached, each starting on an
//! 8-byte boundary, and every byte not written by a value stays zero.

use fathom_schema::{DeclKind, Library, Strictness, Type, TypeDecl};
use fathom_wire::{
    ALLOC_ABSENT, ALLOC_PRESENT, ENVELOPE_INLINE_MAX, ENVELOPE_INLINED, HANDLE_ABSENT,
    HANDLE_PRESENT, HandleInfo, Limits, align8,
};

use crate::{EncodeError, TableValue, UnionValue, UnknownData, Value};

/// Encode `value` as an instance of the declaration `type_name`.
pub fn encode(
    library: &Library,
    type_name: &str,
    value: Value,
) -> Result<(Vec<u8>, Vec<HandleInfo>), EncodeError> {
    encode_with_limits(library, type_name, value, Limits::default())
}

pub fn encode_with_limits(
    library: &Library,
    type_name: &str,
    value: Value,
    limits: Limits,
) -> Result<(Vec<u8>, Vec<HandleInfo>), EncodeError> {
    let mut encoder = Encoder::new(library, limits);
    encoder.encode_top(type_name, value)?;
    Ok((encoder.buf, encoder.handles))
}

struct Encoder<'a> {
    library: &'a Library,
    limits: Limits,
    buf: Vec<u8>,
    handles: Vec<HandleInfo>,
    depth: usize,
}

impl<'a> Encoder<'a> {
    fn new(library: &'a Library, limits: Limits) -> Self {
        Self {
            library,
            limits,
            buf: Vec::new(),
            handles: Vec::new(),
            depth: 0,
        }
    }

    fn decl(&self, name: &str) -> Result<&'a TypeDecl, EncodeError> {
        self.library
            .lookup(name)
            .ok_or_else(|| EncodeError::UnknownType(name.to_owned()))
    }

    fn size_of(&self, ty: &Type) -> Result<usize, EncodeError> {
        self.library
            .layout_of(ty)
            .map(|layout| layout.size)
            .map_err(|_| EncodeError::UnknownType(ty.to_string()))
    }

    fn encode_top(&mut self, type_name: &str, value: Value) -> Result<(), EncodeError> {
        let decl = self.decl(type_name)?;
        let offset = self.alloc(decl.shape.inline_size as usize)?;
        self.encode_decl(decl, false, value, offset)
    }

    /// Reserve `size` bytes (rounded up to 8) at the end of the buffer.
    fn alloc(&mut self, size: usize) -> Result<usize, EncodeError> {
        let offset = self.buf.len();
        let end = offset
            .checked_add(align8(size))
            .filter(|&end| end <= self.limits.max_message_bytes)
            .ok_or(EncodeError::MessageTooLarge {
                size: offset.saturating_add(size),
                max: self.limits.max_message_bytes,
            })?;
        self.buf.resize(end, 0);
        Ok(offset)
    }

    fn enter(&mut self) -> Result<(), EncodeError> {
        self.depth += 1;
        if self.depth > self.limits.max_depth {
            return Err(EncodeError::ExceededMaxDepth {
                max: self.limits.max_depth,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) {
        self.buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn push_handle(&mut self, info: HandleInfo) -> Result<(), EncodeError> {
        if self.handles.len() >= self.limits.max_message_handles {
            return Err(EncodeError::TooManyHandles {
                max: self.limits.max_message_handles,
            });
        }
        self.handles.push(info);
        Ok(())
    }

    fn mismatch(ty: &Type, value: &Value) -> EncodeError {
        EncodeError::TypeMismatch {
            expected: ty.to_string(),
            found: value.kind(),
        }
    }

    fn encode_value(&mut self, ty: &Type, value: Value, offset: usize) -> Result<(), EncodeError> {
        match ty {
            Type::Primitive { .. } => self.encode_primitive(ty, value, offset),
            Type::String { max_len, nullable } => match value {
                Value::String(s) => {
                    if let Some(max) = *max_len
                        && s.len() > max as usize
                    {
                        return Err(EncodeError::StringTooLong { len: s.len(), max });
                    }
                    self.write_vector_header(offset, s.len());
                    self.enter()?;
                    let out = self.alloc(s.len())?;
                    self.write(out, s.as_bytes());
                    self.leave();
                    Ok(())
                }
                Value::Null if *nullable => Ok(()),
                Value::Null => Err(EncodeError::NonNullableAbsent { ty: ty.to_string() }),
                other => Err(Self::mismatch(ty, &other)),
            },
            Type::Vector {
                element,
                max_len,
                nullable,
            } => match value {
                Value::Vector(items) => {
                    if let Some(max) = *max_len
                        && items.len() > max as usize
                    {
                        return Err(EncodeError::VectorTooLong {
                            len: items.len(),
                            max,
                        });
                    }
                    self.write_vector_header(offset, items.len());
                    let size = self.size_of(element)?;
                    self.enter()?;
                    let out = self.alloc(size * items.len())?;
                    for (i, item) in items.into_iter().enumerate() {
                        self.encode_value(element, item, out + i * size)?;
                    }
                    self.leave();
                    Ok(())
                }
                Value::Null if *nullable => Ok(()),
                Value::Null => Err(EncodeError::NonNullableAbsent { ty: ty.to_string() }),
                other => Err(Self::mismatch(ty, &other)),
            },
            Type::Array { element, len } => match value {
                Value::Array(items) => {
                    if items.len() != *len as usize {
                        return Err(EncodeError::ArrayLengthMismatch {
                            expected: *len,
                            found: items.len(),
                        });
                    }
                    let size = self.size_of(element)?;
                    for (i, item) in items.into_iter().enumerate() {
                        self.encode_value(element, item, offset + i * size)?;
                    }
                    Ok(())
                }
                other => Err(Self::mismatch(ty, &other)),
            },
            Type::Handle {
                object_type,
                rights,
                nullable,
            } => match value {
                Value::Handle(mut info) => {
                    info.conform(*object_type, *rights)?;
                    self.write(offset, &HANDLE_PRESENT.to_le_bytes());
                    self.push_handle(info)
                }
                Value::Null if *nullable => {
                    self.write(offset, &HANDLE_ABSENT.to_le_bytes());
                    Ok(())
                }
                Value::Null => Err(EncodeError::NonNullableAbsent { ty: ty.to_string() }),
                other => Err(Self::mismatch(ty, &other)),
            },
            Type::Identifier { name, nullable } => {
                let decl = self.decl(name)?;
                self.encode_decl(decl, *nullable, value, offset)
            }
        }
    }

    fn write_vector_header(&mut self, offset: usize, count: usize) {
        self.write(offset, &(count as u64).to_le_bytes());
        self.write(offset + 8, &ALLOC_PRESENT.to_le_bytes());
    }

    fn encode_primitive(
        &mut self,
        ty: &Type,
        value: Value,
        offset: usize,
    ) -> Result<(), EncodeError> {
        use fathom_schema::PrimitiveSubtype as P;
        let Type::Primitive { subtype } = ty else {
            return Err(Self::mismatch(ty, &value));
        };
        match (subtype, value) {
            (P::Bool, Value::Bool(v)) => self.write(offset, &[u8::from(v)]),
            (P::Int8, Value::I8(v)) => self.write(offset, &v.to_le_bytes()),
            (P::Int16, Value::I16(v)) => self.write(offset, &v.to_le_bytes()),
            (P::Int32, Value::I32(v)) => self.write(offset, &v.to_le_bytes()),
            (P::Int64, Value::I64(v)) => self.write(offset, &v.to_le_bytes()),
            (P::Uint8, Value::U8(v)) => self.write(offset, &v.to_le_bytes()),
            (P::Uint16, Value::U16(v)) => self.write(offset, &v.to_le_bytes()),
            (P::Uint32, Value::U32(v)) => self.write(offset, &v.to_le_bytes()),
            (P::Uint64, Value::U64(v)) => self.write(offset, &v.to_le_bytes()),
            (P::Float32, Value::F32(v)) => self.write(offset, &v.to_le_bytes()),
            (P::Float64, Value::F64(v)) => self.write(offset, &v.to_le_bytes()),
            (_, other) => return Err(Self::mismatch(ty, &other)),
        }
        Ok(())
    }

    fn encode_decl(
        &mut self,
        decl: &'a TypeDecl,
        nullable: bool,
        value: Value,
        offset: usize,
    ) -> Result<(), EncodeError> {
        match (&decl.kind, value) {
            (DeclKind::Struct { .. }, Value::Null) if nullable => {
                self.write(offset, &ALLOC_ABSENT.to_le_bytes());
                Ok(())
            }
            (DeclKind::Struct { .. }, Value::Struct(fields)) if nullable => {
                self.write(offset, &ALLOC_PRESENT.to_le_bytes());
                self.enter()?;
                let out = self.alloc(decl.shape.inline_size as usize)?;
                self.encode_struct(decl, fields, out)?;
                self.leave();
                Ok(())
            }
            (DeclKind::Struct { .. }, Value::Struct(fields)) => {
                self.encode_struct(decl, fields, offset)
            }
            (DeclKind::Union { .. }, Value::Union(union)) => self.encode_union(decl, union, offset),
            (DeclKind::Union { .. }, Value::Null) if nullable => Ok(()),
            (DeclKind::Table { .. }, Value::Table(table)) => self.encode_table(decl, table, offset),
            (_, Value::Null) => Err(EncodeError::NonNullableAbsent {
                ty: decl.name.clone(),
            }),
            (_, other) => Err(EncodeError::TypeMismatch {
                expected: format!("{} {}", decl.kind_name(), decl.name),
                found: other.kind(),
            }),
        }
    }

    fn encode_struct(
        &mut self,
        decl: &'a TypeDecl,
        fields: Vec<Value>,
        offset: usize,
    ) -> Result<(), EncodeError> {
        let members = decl.struct_members().unwrap_or_default();
        if fields.len() != members.len() {
            return Err(EncodeError::FieldCountMismatch {
                decl: decl.name.clone(),
                expected: members.len(),
                found: fields.len(),
            });
        }
        for (member, field) in members.iter().zip(fields) {
            self.encode_value(&member.ty, field, offset + member.offset as usize)?;
        }
        Ok(())
    }

    fn encode_union(
        &mut self,
        decl: &'a TypeDecl,
        union: UnionValue,
        offset: usize,
    ) -> Result<(), EncodeError> {
        let strictness = decl
            .union_members()
            .map_or(Strictness::Strict, |(_, strictness)| strictness);
        match union {
            UnionValue::Known { ordinal, value } => {
                let member = decl
                    .union_member(ordinal)
                    .ok_or_else(|| EncodeError::UnknownUnionMember {
                        decl: decl.name.clone(),
                        ordinal,
                    })?;
                self.write(offset, &ordinal.to_le_bytes());
                self.encode_envelope(&member.ty, *value, offset + 8)
            }
            UnionValue::Unknown { ordinal, data } => {
                if !strictness.is_flexible() {
                    return Err(EncodeError::StrictUnionUnknown {
                        decl: decl.name.clone(),
                        ordinal,
                    });
                }
                if ordinal == 0 {
                    return Err(EncodeError::ZeroUnionOrdinal {
                        decl: decl.name.clone(),
                    });
                }
                if decl.union_member(ordinal).is_some() {
                    return Err(EncodeError::UnknownUnionMember {
                        decl: decl.name.clone(),
                        ordinal,
                    });
                }
                self.write(offset, &ordinal.to_le_bytes());
                self.encode_unknown_envelope(data, offset + 8)
            }
        }
    }

    fn encode_table(
        &mut self,
        decl: &'a TypeDecl,
        mut table: TableValue,
        offset: usize,
    ) -> Result<(), EncodeError> {
        for &ordinal in table.fields.keys() {
            if decl.table_member(ordinal).is_none() {
                return Err(EncodeError::UnknownTableField {
                    decl: decl.name.clone(),
                    ordinal,
                });
            }
        }
        let mut unknown = std::mem::take(&mut table.unknown);
        unknown.sort_by_key(|field| field.ordinal);
        for field in &unknown {
            if field.ordinal == 0
                || decl.table_member(field.ordinal).is_some()
                || table.fields.contains_key(&field.ordinal)
            {
                return Err(EncodeError::UnknownTableField {
                    decl: decl.name.clone(),
                    ordinal: field.ordinal,
                });
            }
        }

        let max_ordinal = table
            .fields
            .keys()
            .copied()
            .chain(unknown.iter().map(|field| field.ordinal))
            .max()
            .unwrap_or(0);
        self.write(offset, &max_ordinal.to_le_bytes());
        self.write(offset + 8, &ALLOC_PRESENT.to_le_bytes());

        self.enter()?;
        let count = usize::try_from(max_ordinal).map_err(|_| EncodeError::MessageTooLarge {
            size: usize::MAX,
            max: self.limits.max_message_bytes,
        })?;
        let envelopes = self.alloc(count.saturating_mul(fathom_wire::ENVELOPE_SIZE))?;
        let mut unknown = unknown.into_iter().peekable();
        for ordinal in 1..=max_ordinal {
            let env = envelopes + (ordinal as usize - 1) * fathom_wire::ENVELOPE_SIZE;
            if let Some(value) = table.fields.remove(&ordinal) {
                let member = decl
                    .table_member(ordinal)
                    .ok_or_else(|| EncodeError::UnknownTableField {
                        decl: decl.name.clone(),
                        ordinal,
                    })?;
                self.encode_envelope(&member.ty, value, env)?;
            } else if let Some(field) = unknown.next_if(|field| field.ordinal == ordinal) {
                self.encode_unknown_envelope(field.data, env)?;
            }
        }
        self.leave();
        Ok(())
    }

    /// Write `value` into the envelope at `env`, inline if it fits.
    fn encode_envelope(&mut self, ty: &Type, value: Value, env: usize) -> Result<(), EncodeError> {
        let size = self.size_of(ty)?;
        let handles_before = self.handles.len();
        self.enter()?;
        let (num_bytes, flags) = if size <= ENVELOPE_INLINE_MAX {
            self.encode_value(ty, value, env)?;
            (None, ENVELOPE_INLINED)
        } else {
            let start = self.buf.len();
            let out = self.alloc(size)?;
            self.encode_value(ty, value, out)?;
            (Some((self.buf.len() - start) as u32), 0)
        };
        self.leave();
        if let Some(num_bytes) = num_bytes {
            self.write(env, &num_bytes.to_le_bytes());
        }
        let num_handles = (self.handles.len() - handles_before) as u16;
        self.write(env + 4, &num_handles.to_le_bytes());
        self.write(env + 6, &flags.to_le_bytes());
        Ok(())
    }

    fn encode_unknown_envelope(
        &mut self,
        data: UnknownData,
        env: usize,
    ) -> Result<(), EncodeError> {
        let UnknownData {
            bytes,
            handles,
            inlined,
        } = data;
        let valid = if inlined {
            bytes.len() == ENVELOPE_INLINE_MAX
        } else {
            !bytes.is_empty() && bytes.len() % 8 == 0 && u32::try_from(bytes.len()).is_ok()
        };
        if !valid || handles.len() > u16::MAX as usize {
            return Err(EncodeError::InvalidUnknownData {
                len: bytes.len(),
                inlined,
            });
        }
        let num_handles = handles.len() as u16;
        for info in handles {
            self.push_handle(info)?;
        }
        if inlined {
            self.write(env, &bytes);
            self.write(env + 6, &ENVELOPE_INLINED.to_le_bytes());
        } else {
            let out = self.alloc(bytes.len())?;
            self.write(out, &bytes);
            self.write(env, &(bytes.len() as u32).to_le_bytes());
        }
        self.write(env + 4, &num_handles.to_le_bytes());
        Ok(())
    }
}
