//! Layout computation and validation.
//!
//! Struct members are placed in declaration order at their natural alignment;
//! a struct's size is rounded up to its alignment and an empty struct occupies
//! one byte. Unions, tables, strings and vectors have fixed 16-byte inline
//! forms, so only direct inline containment can make a size infinite.

use std::collections::{HashMap, HashSet};

use fathom_wire::align8;

use crate::{DeclKind, LibraryIr, MethodKind, SchemaError, Type, TypeDecl, TypeShape};

/// Inline size of strings, vectors, unions and tables.
pub const HEADER_INLINE_SIZE: u32 = 16;

/// Inline size of a boxed (nullable) struct reference.
pub const BOX_INLINE_SIZE: u32 = 8;

/// Inline size of a handle slot.
pub const HANDLE_INLINE_SIZE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Metrics {
    depth: u32,
    max_handles: u32,
    max_out_of_line: u32,
}

impl Metrics {
    const ZERO: Metrics = Metrics {
        depth: 0,
        max_handles: 0,
        max_out_of_line: 0,
    };

    const UNBOUNDED: Metrics = Metrics {
        depth: u32::MAX,
        max_handles: u32::MAX,
        max_out_of_line: u32::MAX,
    };
}

fn align_to(offset: u32, alignment: u32) -> u32 {
    offset.div_ceil(alignment) * alignment
}

fn align8_u32(n: u32) -> u32 {
    u32::try_from(align8(n as usize)).unwrap_or(u32::MAX)
}

struct Resolver<'a> {
    decls: &'a [TypeDecl],
    index: HashMap<&'a str, usize>,
    inline: Vec<Option<(u32, u32)>>,
    visiting: Vec<bool>,
    /// (offset, padding) per struct member, filled as structs are laid out.
    offsets: Vec<Vec<(u32, u32)>>,
    padded: Vec<bool>,
}

impl<'a> Resolver<'a> {
    fn new(decls: &'a [TypeDecl]) -> Result<Self, SchemaError> {
        let mut index = HashMap::with_capacity(decls.len());
        for (i, decl) in decls.iter().enumerate() {
            if index.insert(decl.name.as_str(), i).is_some() {
                return Err(SchemaError::DuplicateDecl(decl.name.clone()));
            }
        }
        Ok(Self {
            decls,
            index,
            inline: vec![None; decls.len()],
            visiting: vec![false; decls.len()],
            offsets: vec![Vec::new(); decls.len()],
            padded: vec![false; decls.len()],
        })
    }

    fn lookup(&self, name: &str) -> Result<usize, SchemaError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| SchemaError::UnresolvedIdentifier(name.to_owned()))
    }

    fn check_members(&self, decl: &TypeDecl) -> Result<(), SchemaError> {
        let mut names = HashSet::new();
        let mut ordinals = HashSet::new();
        let mut check = |name: &str, ordinal: Option<u64>| {
            if !names.insert(name.to_owned()) {
                return Err(SchemaError::DuplicateMember {
                    decl: decl.name.clone(),
                    member: name.to_owned(),
                });
            }
            if let Some(ordinal) = ordinal {
                if ordinal == 0 {
                    return Err(SchemaError::ZeroOrdinal {
                        decl: decl.name.clone(),
                        member: name.to_owned(),
                    });
                }
                if !ordinals.insert(ordinal) {
                    return Err(SchemaError::DuplicateOrdinal {
                        decl: decl.name.clone(),
                        ordinal,
                    });
                }
            }
            Ok(())
        };
        match &decl.kind {
            DeclKind::Struct { members } => {
                for member in members {
                    check(&member.name, None)?;
                    self.check_type(&member.ty)?;
                }
            }
            DeclKind::Union { members, .. } => {
                for member in members {
                    check(&member.name, Some(member.ordinal))?;
                    self.check_type(&member.ty)?;
                }
            }
            DeclKind::Table { members } => {
                for member in members {
                    check(&member.name, Some(member.ordinal))?;
                    self.check_type(&member.ty)?;
                }
            }
        }
        Ok(())
    }

    fn check_type(&self, ty: &Type) -> Result<(), SchemaError> {
        match ty {
            Type::Array { len: 0, .. } => Err(SchemaError::ZeroLengthArray(ty.to_string())),
            Type::Vector { element, .. } | Type::Array { element, .. } => self.check_type(element),
            Type::Identifier { name, .. } => self.lookup(name).map(|_| ()),
            Type::Primitive { .. } | Type::String { .. } | Type::Handle { .. } => Ok(()),
        }
    }

    /// (size, alignment) of a type's inline form.
    fn type_inline(&mut self, ty: &Type) -> Result<(u32, u32), SchemaError> {
        Ok(match ty {
            Type::Primitive { subtype } => (subtype.size(), subtype.size()),
            Type::String { .. } | Type::Vector { .. } => (HEADER_INLINE_SIZE, 8),
            Type::Handle { .. } => (HANDLE_INLINE_SIZE, HANDLE_INLINE_SIZE),
            Type::Array { element, len } => {
                let (size, align) = self.type_inline(element)?;
                (size.saturating_mul(*len), align)
            }
            Type::Identifier { name, nullable } => {
                let idx = self.lookup(name)?;
                let decls = self.decls;
                match (&decls[idx].kind, nullable) {
                    (DeclKind::Struct { .. }, true) => (BOX_INLINE_SIZE, 8),
                    (DeclKind::Struct { .. }, false) => self.decl_inline(idx)?,
                    (DeclKind::Union { .. } | DeclKind::Table { .. }, _) => (HEADER_INLINE_SIZE, 8),
                }
            }
        })
    }

    fn decl_inline(&mut self, idx: usize) -> Result<(u32, u32), SchemaError> {
        if let Some(layout) = self.inline[idx] {
            return Ok(layout);
        }
        let decls = self.decls;
        let decl = &decls[idx];
        let layout = match &decl.kind {
            DeclKind::Union { .. } | DeclKind::Table { .. } => (HEADER_INLINE_SIZE, 8),
            DeclKind::Struct { members } => {
                if self.visiting[idx] {
                    return Err(SchemaError::InfiniteRecursion(decl.name.clone()));
                }
                self.visiting[idx] = true;
                let mut placed: Vec<(u32, u32)> = Vec::with_capacity(members.len());
                let mut offset = 0u32;
                let mut alignment = 1u32;
                let mut padded = false;
                for member in members {
                    let (size, align) = self.type_inline(&member.ty)?;
                    let start = align_to(offset, align);
                    if let Some((_, padding)) = placed.last_mut() {
                        *padding = start - offset;
                    }
                    padded |= self.type_padded(&member.ty);
                    placed.push((start, 0));
                    offset = start.saturating_add(size);
                    alignment = alignment.max(align);
                }
                let size = if members.is_empty() {
                    1
                } else {
                    align_to(offset, alignment)
                };
                if let Some((_, padding)) = placed.last_mut() {
                    *padding = size - offset;
                }
                padded |= placed.iter().any(|(_, padding)| *padding > 0);
                self.visiting[idx] = false;
                self.offsets[idx] = placed;
                self.padded[idx] = padded;
                (size, alignment)
            }
        };
        self.inline[idx] = Some(layout);
        Ok(layout)
    }

    fn type_padded(&self, ty: &Type) -> bool {
        match ty {
            Type::Array { element, .. } => self.type_padded(element),
            Type::Identifier {
                name,
                nullable: false,
            } => match self.index.get(name.as_str()) {
                Some(&idx) => self.padded[idx],
                None => false,
            },
            _ => false,
        }
    }

    fn type_metrics(&mut self, ty: &Type, stack: &mut Vec<usize>) -> Result<Metrics, SchemaError> {
        Ok(match ty {
            Type::Primitive { .. } => Metrics::ZERO,
            Type::Handle { .. } => Metrics {
                max_handles: 1,
                ..Metrics::ZERO
            },
            Type::String { max_len, .. } => Metrics {
                depth: 1,
                max_handles: 0,
                max_out_of_line: max_len.map_or(u32::MAX, align8_u32),
            },
            Type::Vector {
                element, max_len, ..
            } => {
                let elem = self.type_metrics(element, stack)?;
                let (elem_size, _) = self.type_inline(element)?;
                match max_len {
                    Some(n) => Metrics {
                        depth: elem.depth.saturating_add(1),
                        max_handles: n.saturating_mul(elem.max_handles),
                        max_out_of_line: align8_u32(n.saturating_mul(elem_size))
                            .saturating_add(n.saturating_mul(elem.max_out_of_line)),
                    },
                    None => Metrics {
                        depth: elem.depth.saturating_add(1),
                        max_handles: if elem.max_handles == 0 { 0 } else { u32::MAX },
                        max_out_of_line: u32::MAX,
                    },
                }
            }
            Type::Array { element, len } => {
                let elem = self.type_metrics(element, stack)?;
                Metrics {
                    depth: elem.depth,
                    max_handles: len.saturating_mul(elem.max_handles),
                    max_out_of_line: len.saturating_mul(elem.max_out_of_line),
                }
            }
            Type::Identifier { name, nullable } => {
                let idx = self.lookup(name)?;
                let inner = self.decl_metrics(idx, stack)?;
                let decls = self.decls;
                match (&decls[idx].kind, nullable) {
                    (DeclKind::Struct { .. }, true) => {
                        let (size, _) = self.decl_inline(idx)?;
                        Metrics {
                            depth: inner.depth.saturating_add(1),
                            max_handles: inner.max_handles,
                            max_out_of_line: align8_u32(size).saturating_add(inner.max_out_of_line),
                        }
                    }
                    _ => inner,
                }
            }
        })
    }

    fn decl_metrics(&mut self, idx: usize, stack: &mut Vec<usize>) -> Result<Metrics, SchemaError> {
        if stack.contains(&idx) {
            return Ok(Metrics::UNBOUNDED);
        }
        stack.push(idx);
        let decls = self.decls;
        let metrics = match &decls[idx].kind {
            DeclKind::Struct { members } => {
                let mut total = Metrics::ZERO;
                for member in members {
                    let m = self.type_metrics(&member.ty, stack)?;
                    total.depth = total.depth.max(m.depth);
                    total.max_handles = total.max_handles.saturating_add(m.max_handles);
                    total.max_out_of_line = total.max_out_of_line.saturating_add(m.max_out_of_line);
                }
                total
            }
            DeclKind::Union {
                members,
                strictness,
            } => {
                let mut total = Metrics::ZERO;
                for member in members {
                    let m = self.type_metrics(&member.ty, stack)?;
                    let (size, _) = self.type_inline(&member.ty)?;
                    let envelope = if size as usize <= fathom_wire::ENVELOPE_INLINE_MAX {
                        m.max_out_of_line
                    } else {
                        align8_u32(size).saturating_add(m.max_out_of_line)
                    };
                    total.depth = total.depth.max(m.depth);
                    total.max_handles = total.max_handles.max(m.max_handles);
                    total.max_out_of_line = total.max_out_of_line.max(envelope);
                }
                total.depth = total.depth.saturating_add(1);
                if strictness.is_flexible() {
                    total.max_handles = u32::MAX;
                    total.max_out_of_line = u32::MAX;
                }
                total
            }
            DeclKind::Table { members } => {
                let mut depth = 0u32;
                for member in members {
                    depth = depth.max(self.type_metrics(&member.ty, stack)?.depth);
                }
                Metrics {
                    depth: depth.saturating_add(2),
                    max_handles: u32::MAX,
                    max_out_of_line: u32::MAX,
                }
            }
        };
        stack.pop();
        Ok(metrics)
    }

    fn contains_handle(&self, ty: &Type, seen: &mut HashSet<usize>) -> bool {
        match ty {
            Type::Handle { .. } => true,
            Type::Vector { element, .. } | Type::Array { element, .. } => {
                self.contains_handle(element, seen)
            }
            Type::Identifier { name, .. } => match self.index.get(name.as_str()) {
                Some(&idx) => self.decl_contains_handle(idx, seen),
                None => false,
            },
            Type::Primitive { .. } | Type::String { .. } => false,
        }
    }

    fn decl_contains_handle(&self, idx: usize, seen: &mut HashSet<usize>) -> bool {
        if !seen.insert(idx) {
            return false;
        }
        match &self.decls[idx].kind {
            DeclKind::Struct { members } => {
                members.iter().any(|m| self.contains_handle(&m.ty, seen))
            }
            DeclKind::Union { members, .. } => {
                members.iter().any(|m| self.contains_handle(&m.ty, seen))
            }
            DeclKind::Table { members } => {
                members.iter().any(|m| self.contains_handle(&m.ty, seen))
            }
        }
    }
}

/// Validate a library and fill in every computed layout field.
///
/// Offsets, padding, shapes and `is_resource` flags already present in `ir`
/// are overwritten.
pub(crate) fn resolve(mut ir: LibraryIr) -> Result<LibraryIr, SchemaError> {
    let mut computed = Vec::with_capacity(ir.decls.len());
    {
        let mut resolver = Resolver::new(&ir.decls)?;
        for decl in &ir.decls {
            resolver.check_members(decl)?;
        }
        for idx in 0..ir.decls.len() {
            resolver.decl_inline(idx)?;
        }
        for idx in 0..ir.decls.len() {
            let metrics = resolver.decl_metrics(idx, &mut Vec::new())?;
            let (inline_size, alignment) = resolver.decl_inline(idx)?;
            let is_resource = resolver.decl_contains_handle(idx, &mut HashSet::new());
            let padded = match ir.decls[idx].kind {
                DeclKind::Struct { .. } => resolver.padded[idx],
                DeclKind::Union { .. } | DeclKind::Table { .. } => true,
            };
            computed.push((
                TypeShape {
                    inline_size,
                    alignment,
                    depth: metrics.depth,
                    max_handles: metrics.max_handles,
                    max_out_of_line: metrics.max_out_of_line,
                    has_padding: padded,
                },
                is_resource,
                std::mem::take(&mut resolver.offsets[idx]),
            ));
        }
    }

    for (decl, (shape, is_resource, offsets)) in ir.decls.iter_mut().zip(computed) {
        decl.shape = shape;
        decl.is_resource = is_resource;
        if let DeclKind::Struct { members } = &mut decl.kind {
            for (member, (offset, padding)) in members.iter_mut().zip(offsets) {
                member.offset = offset;
                member.padding = padding;
            }
        }
    }

    check_protocols(&ir)?;
    Ok(ir)
}

fn check_protocols(ir: &LibraryIr) -> Result<(), SchemaError> {
    let structs: HashSet<&str> = ir
        .decls
        .iter()
        .filter(|decl| matches!(decl.kind, DeclKind::Struct { .. }))
        .map(|decl| decl.name.as_str())
        .collect();
    let all: HashSet<&str> = ir.decls.iter().map(|decl| decl.name.as_str()).collect();

    let mut protocol_names = HashSet::new();
    for protocol in &ir.protocols {
        if !protocol_names.insert(protocol.name.as_str()) || all.contains(protocol.name.as_str()) {
            return Err(SchemaError::DuplicateDecl(protocol.name.clone()));
        }
        let mut names = HashSet::new();
        let mut ordinals = HashSet::new();
        for method in &protocol.methods {
            if !names.insert(method.name.as_str()) {
                return Err(SchemaError::DuplicateMethod {
                    protocol: protocol.name.clone(),
                    method: method.name.clone(),
                });
            }
            if method.ordinal == 0 || method.ordinal == fathom_wire::EPITAPH_ORDINAL {
                return Err(SchemaError::Ordinal(fathom_hash::OrdinalError::Zero(format!(
                    "{}.{}",
                    protocol.name, method.name
                ))));
            }
            if !ordinals.insert(method.ordinal) {
                return Err(SchemaError::DuplicateMethodOrdinal {
                    protocol: protocol.name.clone(),
                    ordinal: method.ordinal,
                });
            }
            let shape_ok = match method.kind {
                MethodKind::OneWay => method.response.is_none(),
                MethodKind::Event => method.request.is_none(),
                MethodKind::TwoWay => true,
            };
            if !shape_ok {
                return Err(SchemaError::InvalidMethodShape {
                    protocol: protocol.name.clone(),
                    method: method.name.clone(),
                });
            }
            for payload in [&method.request, &method.response].into_iter().flatten() {
                if !all.contains(payload.as_str()) {
                    return Err(SchemaError::UnresolvedIdentifier(payload.clone()));
                }
                if !structs.contains(payload.as_str()) {
                    return Err(SchemaError::PayloadNotStruct {
                        method: method.name.clone(),
                        payload: payload.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}
