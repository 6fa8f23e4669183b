//! Wire to value decoding.
//!
//! The decoder walks the primary object and claims out-of-line objects in
//! the same depth-first order the encoder produced them. Every byte must be
//! accounted for, padding must be zero, and every handle must be claimed.
//! Handles are owned by the decoder until they land in a value, so any error
//! closes all of them.

use std::collections::BTreeMap;

use fathom_schema::{DeclKind, Library, Type, TypeDecl};
use fathom_wire::{
    ALIGNMENT, ALLOC_ABSENT, ALLOC_PRESENT, ENVELOPE_INLINE_MAX, ENVELOPE_INLINED, ENVELOPE_SIZE,
    HANDLE_ABSENT, HANDLE_PRESENT, HandleInfo, Limits,
};

use crate::{DecodeError, TableValue, UnionValue, UnknownData, UnknownField, Value};

/// Decode `bytes` and `handles` as an instance of the declaration `type_name`.
pub fn decode(
    library: &Library,
    type_name: &str,
    bytes: &[u8],
    handles: Vec<HandleInfo>,
) -> Result<Value, DecodeError> {
    decode_with_limits(library, type_name, bytes, handles, Limits::default())
}

pub fn decode_with_limits(
    library: &Library,
    type_name: &str,
    bytes: &[u8],
    handles: Vec<HandleInfo>,
    limits: Limits,
) -> Result<Value, DecodeError> {
    if bytes.len() > limits.max_message_bytes {
        return Err(DecodeError::MessageTooLarge {
            size: bytes.len(),
            max: limits.max_message_bytes,
        });
    }
    if handles.len() > limits.max_message_handles {
        return Err(DecodeError::TooManyHandles {
            count: handles.len(),
            max: limits.max_message_handles,
        });
    }
    let mut decoder = Decoder {
        library,
        limits,
        bytes,
        next_out_of_line: 0,
        handles: handles.into_iter(),
        handles_taken: 0,
        depth: 0,
    };
    let value = decoder.decode_top(type_name)?;
    if decoder.next_out_of_line != bytes.len() {
        return Err(DecodeError::ExtraBytes {
            count: bytes.len() - decoder.next_out_of_line,
        });
    }
    let leftover = decoder.handles.len();
    if leftover > 0 {
        return Err(DecodeError::ExtraHandles { count: leftover });
    }
    Ok(value)
}

/// Envelope header words.
#[derive(Debug, Clone, Copy)]
struct Envelope {
    num_bytes: u32,
    num_handles: u16,
    flags: u16,
}

impl Envelope {
    fn is_absent(&self) -> bool {
        self.num_bytes == 0 && self.num_handles == 0 && self.flags == 0
    }

    fn is_inlined(&self) -> bool {
        self.flags & ENVELOPE_INLINED != 0
    }
}

struct Decoder<'a, 'b> {
    library: &'a Library,
    limits: Limits,
    bytes: &'b [u8],
    next_out_of_line: usize,
    handles: std::vec::IntoIter<HandleInfo>,
    handles_taken: usize,
    depth: usize,
}

impl<'a> Decoder<'a, '_> {
    fn decl(&self, name: &str) -> Result<&'a TypeDecl, DecodeError> {
        self.library
            .lookup(name)
            .ok_or_else(|| DecodeError::UnknownType(name.to_owned()))
    }

    fn size_of(&self, ty: &Type) -> Result<usize, DecodeError> {
        self.library
            .layout_of(ty)
            .map(|layout| layout.size)
            .map_err(|_| DecodeError::UnknownType(ty.to_string()))
    }

    fn decode_top(&mut self, type_name: &str) -> Result<Value, DecodeError> {
        let decl = self.decl(type_name)?;
        let offset = self.claim(decl.shape.inline_size as usize)?;
        self.decode_decl(decl, false, offset)
    }

    fn slice(&self, offset: usize, len: usize) -> Result<&[u8], DecodeError> {
        offset
            .checked_add(len)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or(DecodeError::OutOfBounds { offset, len })
    }

    fn read<const N: usize>(&self, offset: usize) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.slice(offset, N)?);
        Ok(out)
    }

    fn read_u16(&self, offset: usize) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.read(offset)?))
    }

    fn read_u32(&self, offset: usize) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.read(offset)?))
    }

    fn read_u64(&self, offset: usize) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.read(offset)?))
    }

    fn check_zero(&self, offset: usize, len: usize) -> Result<(), DecodeError> {
        let bytes = self.slice(offset, len)?;
        match bytes.iter().position(|&b| b != 0) {
            Some(i) => Err(DecodeError::NonZeroPadding { offset: offset + i }),
            None => Ok(()),
        }
    }

    /// Claim the next out-of-line object of `size` bytes.
    fn claim(&mut self, size: usize) -> Result<usize, DecodeError> {
        let offset = self.next_out_of_line;
        let end = size
            .checked_add(ALIGNMENT - 1)
            .map(|padded| padded & !(ALIGNMENT - 1))
            .and_then(|padded| offset.checked_add(padded))
            .filter(|&end| end <= self.bytes.len())
            .ok_or(DecodeError::OutOfBounds { offset, len: size })?;
        self.check_zero(offset + size, end - offset - size)?;
        self.next_out_of_line = end;
        Ok(offset)
    }

    fn enter(&mut self) -> Result<(), DecodeError> {
        self.depth += 1;
        if self.depth > self.limits.max_depth {
            return Err(DecodeError::ExceededMaxDepth {
                max: self.limits.max_depth,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn take_handle(&mut self) -> Result<HandleInfo, DecodeError> {
        let info = self.handles.next().ok_or(DecodeError::MissingHandle)?;
        self.handles_taken += 1;
        Ok(info)
    }

    fn decode_value(&mut self, ty: &Type, offset: usize) -> Result<Value, DecodeError> {
        match ty {
            Type::Primitive { .. } => self.decode_primitive(ty, offset),
            Type::String { max_len, nullable } => {
                let Some(len) = self.read_vector_header(ty, offset, *nullable)? else {
                    return Ok(Value::Null);
                };
                if let Some(max) = *max_len
                    && len > u64::from(max)
                {
                    return Err(DecodeError::StringTooLong { len, max });
                }
                let len = usize::try_from(len).map_err(|_| DecodeError::OutOfBounds {
                    offset: self.next_out_of_line,
                    len: usize::MAX,
                })?;
                self.enter()?;
                let out = self.claim(len)?;
                let text = std::str::from_utf8(self.slice(out, len)?)
                    .map_err(|_| DecodeError::InvalidUtf8)?
                    .to_owned();
                self.leave();
                Ok(Value::String(text))
            }
            Type::Vector {
                element,
                max_len,
                nullable,
            } => {
                let Some(count) = self.read_vector_header(ty, offset, *nullable)? else {
                    return Ok(Value::Null);
                };
                if let Some(max) = *max_len
                    && count > u64::from(max)
                {
                    return Err(DecodeError::VectorTooLong { len: count, max });
                }
                let size = self.size_of(element)?;
                let (count, total) = usize::try_from(count)
                    .ok()
                    .and_then(|count| Some((count, count.checked_mul(size)?)))
                    .ok_or(DecodeError::OutOfBounds {
                        offset: self.next_out_of_line,
                        len: usize::MAX,
                    })?;
                self.enter()?;
                let out = self.claim(total)?;
                let mut items = Vec::with_capacity(count);
                for i in 0..count {
                    items.push(self.decode_value(element, out + i * size)?);
                }
                self.leave();
                Ok(Value::Vector(items))
            }
            Type::Array { element, len } => {
                let size = self.size_of(element)?;
                let mut items = Vec::with_capacity(*len as usize);
                for i in 0..*len as usize {
                    items.push(self.decode_value(element, offset + i * size)?);
                }
                Ok(Value::Array(items))
            }
            Type::Handle {
                object_type,
                rights,
                nullable,
            } => match self.read_u32(offset)? {
                HANDLE_PRESENT => {
                    let mut info = self.take_handle()?;
                    info.conform(*object_type, *rights)?;
                    Ok(Value::Handle(info))
                }
                HANDLE_ABSENT if *nullable => Ok(Value::Null),
                HANDLE_ABSENT => Err(DecodeError::NonNullableAbsent { ty: ty.to_string() }),
                other => Err(DecodeError::InvalidHandlePresence(other)),
            },
            Type::Identifier { name, nullable } => {
                let decl = self.decl(name)?;
                self.decode_decl(decl, *nullable, offset)
            }
        }
    }

    /// Returns the element count, or `None` for an absent nullable value.
    fn read_vector_header(
        &self,
        ty: &Type,
        offset: usize,
        nullable: bool,
    ) -> Result<Option<u64>, DecodeError> {
        let count = self.read_u64(offset)?;
        match self.read_u64(offset + 8)? {
            ALLOC_PRESENT => Ok(Some(count)),
            ALLOC_ABSENT if count != 0 => Err(DecodeError::InvalidPresence(ALLOC_ABSENT)),
            ALLOC_ABSENT if nullable => Ok(None),
            ALLOC_ABSENT => Err(DecodeError::NonNullableAbsent { ty: ty.to_string() }),
            other => Err(DecodeError::InvalidPresence(other)),
        }
    }

    fn decode_primitive(&self, ty: &Type, offset: usize) -> Result<Value, DecodeError> {
        use fathom_schema::PrimitiveSubtype as P;
        let Type::Primitive { subtype } = ty else {
            return Err(DecodeError::UnknownType(ty.to_string()));
        };
        Ok(match subtype {
            P::Bool => match self.read::<1>(offset)?[0] {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => return Err(DecodeError::InvalidBoolean(other)),
            },
            P::Int8 => Value::I8(i8::from_le_bytes(self.read(offset)?)),
            P::Int16 => Value::I16(i16::from_le_bytes(self.read(offset)?)),
            P::Int32 => Value::I32(i32::from_le_bytes(self.read(offset)?)),
            P::Int64 => Value::I64(i64::from_le_bytes(self.read(offset)?)),
            P::Uint8 => Value::U8(u8::from_le_bytes(self.read(offset)?)),
            P::Uint16 => Value::U16(u16::from_le_bytes(self.read(offset)?)),
            P::Uint32 => Value::U32(u32::from_le_bytes(self.read(offset)?)),
            P::Uint64 => Value::U64(u64::from_le_bytes(self.read(offset)?)),
            P::Float32 => Value::F32(f32::from_le_bytes(self.read(offset)?)),
            P::Float64 => Value::F64(f64::from_le_bytes(self.read(offset)?)),
        })
    }

    fn decode_decl(
        &mut self,
        decl: &'a TypeDecl,
        nullable: bool,
        offset: usize,
    ) -> Result<Value, DecodeError> {
        match &decl.kind {
            DeclKind::Struct { .. } if nullable => match self.read_u64(offset)? {
                ALLOC_ABSENT => Ok(Value::Null),
                ALLOC_PRESENT => {
                    self.enter()?;
                    let out = self.claim(decl.shape.inline_size as usize)?;
                    let value = self.decode_struct(decl, out)?;
                    self.leave();
                    Ok(value)
                }
                other => Err(DecodeError::InvalidPresence(other)),
            },
            DeclKind::Struct { .. } => self.decode_struct(decl, offset),
            DeclKind::Union { .. } => self.decode_union(decl, nullable, offset),
            DeclKind::Table { .. } => self.decode_table(decl, offset),
        }
    }

    fn decode_struct(&mut self, decl: &'a TypeDecl, offset: usize) -> Result<Value, DecodeError> {
        let members = decl.struct_members().unwrap_or_default();
        if members.is_empty() {
            // The single byte of an empty struct must be zero.
            self.check_zero(offset, 1)?;
            return Ok(Value::Struct(Vec::new()));
        }
        let mut fields = Vec::with_capacity(members.len());
        for member in members {
            let at = offset + member.offset as usize;
            fields.push(self.decode_value(&member.ty, at)?);
            if member.padding > 0 {
                let size = self.size_of(&member.ty)?;
                self.check_zero(at + size, member.padding as usize)?;
            }
        }
        Ok(Value::Struct(fields))
    }

    fn read_envelope(&self, offset: usize) -> Result<Envelope, DecodeError> {
        let envelope = Envelope {
            num_bytes: self.read_u32(offset)?,
            num_handles: self.read_u16(offset + 4)?,
            flags: self.read_u16(offset + 6)?,
        };
        if envelope.flags & !ENVELOPE_INLINED != 0 {
            return Err(DecodeError::InvalidEnvelopeFlags(envelope.flags));
        }
        Ok(envelope)
    }

    fn decode_union(
        &mut self,
        decl: &'a TypeDecl,
        nullable: bool,
        offset: usize,
    ) -> Result<Value, DecodeError> {
        let ordinal = self.read_u64(offset)?;
        let envelope = self.read_envelope(offset + 8)?;
        if ordinal == 0 {
            if !envelope.is_absent() {
                return Err(DecodeError::ZeroUnionOrdinal);
            }
            return if nullable {
                Ok(Value::Null)
            } else {
                Err(DecodeError::NonNullableAbsent {
                    ty: decl.name.clone(),
                })
            };
        }
        if envelope.is_absent() {
            return Err(DecodeError::EmptyUnionEnvelope { ordinal });
        }
        if let Some(member) = decl.union_member(ordinal) {
            let value = self.decode_envelope(&member.ty, ordinal, envelope, offset + 8)?;
            return Ok(Value::union(ordinal, value));
        }
        let flexible = decl
            .union_members()
            .is_some_and(|(_, strictness)| strictness.is_flexible());
        if !flexible {
            tracing::debug!(union = %decl.name, ordinal, "strict union rejected unknown ordinal");
            return Err(DecodeError::StrictUnionUnknownField {
                decl: decl.name.clone(),
                ordinal,
            });
        }
        let data = self.decode_unknown_envelope(envelope, offset + 8)?;
        Ok(Value::Union(UnionValue::Unknown { ordinal, data }))
    }

    fn decode_table(&mut self, decl: &'a TypeDecl, offset: usize) -> Result<Value, DecodeError> {
        let max_ordinal = self.read_u64(offset)?;
        match self.read_u64(offset + 8)? {
            ALLOC_PRESENT => {}
            ALLOC_ABSENT => {
                return Err(DecodeError::NonNullableAbsent {
                    ty: decl.name.clone(),
                });
            }
            other => return Err(DecodeError::InvalidPresence(other)),
        }
        let envelopes_len = usize::try_from(max_ordinal)
            .ok()
            .and_then(|count| count.checked_mul(ENVELOPE_SIZE))
            .ok_or(DecodeError::OutOfBounds {
                offset: self.next_out_of_line,
                len: usize::MAX,
            })?;
        self.enter()?;
        let envelopes = self.claim(envelopes_len)?;
        let mut table = TableValue {
            fields: BTreeMap::new(),
            unknown: Vec::new(),
        };
        for ordinal in 1..=max_ordinal {
            let at = envelopes + (ordinal as usize - 1) * ENVELOPE_SIZE;
            let envelope = self.read_envelope(at)?;
            if envelope.is_absent() {
                continue;
            }
            if let Some(member) = decl.table_member(ordinal) {
                let value = self.decode_envelope(&member.ty, ordinal, envelope, at)?;
                table.fields.insert(ordinal, value);
                continue;
            }
            let data = self.decode_unknown_envelope(envelope, at)?;
            if data.handles.is_empty() {
                table.unknown.push(UnknownField { ordinal, data });
            } else {
                tracing::trace!(
                    table = %decl.name,
                    ordinal,
                    handles = data.handles.len(),
                    "closing handles of unknown table field"
                );
                data.close();
            }
        }
        self.leave();
        Ok(Value::Table(table))
    }

    fn decode_envelope(
        &mut self,
        ty: &Type,
        ordinal: u64,
        envelope: Envelope,
        at: usize,
    ) -> Result<Value, DecodeError> {
        let size = self.size_of(ty)?;
        let fits_inline = size <= ENVELOPE_INLINE_MAX;
        if fits_inline != envelope.is_inlined() {
            return Err(DecodeError::InvalidInlineBit { ordinal });
        }
        let handles_before = self.handles_taken;
        self.enter()?;
        let value = if fits_inline {
            let value = self.decode_value(ty, at)?;
            self.check_zero(at + size, ENVELOPE_INLINE_MAX - size)?;
            value
        } else {
            let start = self.next_out_of_line;
            let out = self.claim(size)?;
            let value = self.decode_value(ty, out)?;
            let consumed = self.next_out_of_line - start;
            if consumed != envelope.num_bytes as usize {
                return Err(DecodeError::EnvelopeBytesMismatch {
                    declared: envelope.num_bytes,
                    consumed,
                });
            }
            value
        };
        self.leave();
        let consumed = self.handles_taken - handles_before;
        if consumed != envelope.num_handles as usize {
            return Err(DecodeError::EnvelopeHandlesMismatch {
                declared: envelope.num_handles,
                consumed,
            });
        }
        Ok(value)
    }

    /// Capture an envelope the schema does not describe, byte for byte.
    fn decode_unknown_envelope(
        &mut self,
        envelope: Envelope,
        at: usize,
    ) -> Result<UnknownData, DecodeError> {
        let bytes = if envelope.is_inlined() {
            self.slice(at, ENVELOPE_INLINE_MAX)?.to_vec()
        } else {
            let len = envelope.num_bytes as usize;
            if len == 0 || len % 8 != 0 {
                return Err(DecodeError::InvalidNumBytes(envelope.num_bytes));
            }
            let out = self.claim(len)?;
            self.slice(out, len)?.to_vec()
        };
        let mut handles = Vec::with_capacity(envelope.num_handles as usize);
        for _ in 0..envelope.num_handles {
            handles.push(self.take_handle()?);
        }
        Ok(UnknownData {
            bytes,
            handles,
            inlined: envelope.is_inlined(),
        })
    }
}
