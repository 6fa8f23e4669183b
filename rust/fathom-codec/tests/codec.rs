use fathom_codec::{
    DecodeError, EncodeError, TableValue, UnionValue, UnknownData, Value, decode,
    decode_with_limits, encode, encode_with_limits,
};
use fathom_schema::{Library, LibraryBuilder, Strictness, Type};
use fathom_wire::{Handle, HandleCheckError, HandleInfo, Limits, ObjectType, Rights};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn library() -> Library {
    let mut builder = LibraryBuilder::new("test.codec");
    builder
        .add_struct("Point")
        .member("x", Type::i32())
        .member("y", Type::i32());
    builder.add_struct("Flag").member("b", Type::bool());
    builder
        .add_struct("Text")
        .member("s", Type::bounded_string(4));
    builder
        .add_struct("Pair")
        .member("h", Type::handle(ObjectType::Vmo, Rights::READ))
        .member("b", Type::bool());
    builder
        .add_struct("Node")
        .member("value", Type::u32())
        .member("next", Type::named("Node").optional());
    builder
        .add_struct("Rows")
        .member("rows", Type::vector(Type::array(Type::u8(), 3)));
    builder
        .add_union("Strict", Strictness::Strict)
        .member(1, "a", Type::u32())
        .member(2, "b", Type::string());
    builder
        .add_union("Flex", Strictness::Flexible)
        .member(1, "a", Type::u32());
    builder
        .add_table("Settings")
        .member(1, "enabled", Type::bool())
        .member(2, "name", Type::string());
    builder.build().unwrap()
}

/// The same `Settings` table as a newer peer would declare it.
fn newer_library() -> Library {
    let mut builder = LibraryBuilder::new("test.codec");
    builder
        .add_table("Settings")
        .member(1, "enabled", Type::bool())
        .member(2, "name", Type::string())
        .member(3, "extra", Type::u64())
        .member(
            4,
            "token",
            Type::handle(ObjectType::Event, Rights::SAME_RIGHTS),
        );
    builder.build().unwrap()
}

fn vmo(rights: Rights) -> (HandleInfo, fathom_wire::HandleWatch) {
    let (handle, watch) = Handle::with_watch();
    (HandleInfo::new(handle, ObjectType::Vmo, rights), watch)
}

fn chain(len: u32) -> Value {
    (0..len).rev().fold(Value::Null, |next, value| {
        Value::Struct(vec![Value::U32(value), next])
    })
}

#[test]
fn struct_is_little_endian_and_padded_to_eight() {
    let lib = library();
    let (bytes, handles) = encode(
        &lib,
        "Point",
        Value::Struct(vec![Value::I32(1), Value::I32(-1)]),
    )
    .unwrap();
    assert_eq!(bytes, [1, 0, 0, 0, 0xff, 0xff, 0xff, 0xff]);
    assert!(handles.is_empty());

    let (bytes, _) = encode(&lib, "Flag", Value::Struct(vec![Value::Bool(true)])).unwrap();
    assert_eq!(bytes, [1, 0, 0, 0, 0, 0, 0, 0]);
}

#[test]
fn linked_list_round_trips() {
    let lib = library();
    let (bytes, handles) = encode(&lib, "Node", chain(3)).unwrap();
    // three 16-byte nodes, two of them out of line
    assert_eq!(bytes.len(), 48);
    assert_eq!(decode(&lib, "Node", &bytes, handles).unwrap(), chain(3));
}

#[test]
fn vector_of_arrays_keeps_every_element() {
    let lib = library();
    let row = |base: u8| Value::Array((base..base + 3).map(Value::U8).collect());
    let rows = Value::Struct(vec![Value::Vector(vec![row(1), row(4)])]);
    let (bytes, _) = encode(&lib, "Rows", rows).unwrap();
    // vector header, then two 3-byte rows padded to 8
    assert_eq!(bytes.len(), 16 + 8);
    assert_eq!(&bytes[..8], &2u64.to_le_bytes());
    assert_eq!(&bytes[16..24], &[1, 2, 3, 4, 5, 6, 0, 0]);

    let expected = Value::Struct(vec![Value::Vector(vec![row(1), row(4)])]);
    assert_eq!(decode(&lib, "Rows", &bytes, Vec::new()).unwrap(), expected);
}

#[test]
fn strict_union_rejects_unknown_ordinal() {
    init_tracing();
    let lib = library();
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&99u64.to_le_bytes());
    bytes.extend_from_slice(&5u32.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());

    let err = decode(&lib, "Strict", &bytes, Vec::new()).unwrap_err();
    assert_eq!(
        err,
        DecodeError::StrictUnionUnknownField {
            decl: "Strict".into(),
            ordinal: 99
        }
    );

    let err = encode(
        &lib,
        "Strict",
        Value::Union(UnionValue::Unknown {
            ordinal: 99,
            data: UnknownData {
                bytes: vec![5, 0, 0, 0],
                handles: Vec::new(),
                inlined: true,
            },
        }),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        EncodeError::StrictUnionUnknown { ordinal: 99, .. }
    ));
}

#[test]
fn strict_union_out_of_line_member_counts_bytes() {
    let lib = library();
    let value = Value::union(2, Value::string("hello"));
    let (bytes, handles) = encode(&lib, "Strict", value).unwrap();
    // 16 union + 16 string header + 8 padded text
    assert_eq!(bytes.len(), 40);
    assert_eq!(&bytes[8..12], &24u32.to_le_bytes());
    assert_eq!(&bytes[14..16], &[0, 0]);
    assert_eq!(
        decode(&lib, "Strict", &bytes, handles).unwrap(),
        Value::union(2, Value::string("hello"))
    );
}

#[test]
fn envelope_inline_bit_must_match_size() {
    let lib = library();
    let (mut bytes, _) = encode(&lib, "Strict", Value::union(1, Value::U32(5))).unwrap();
    assert_eq!(&bytes[14..16], &[1, 0]);
    bytes[14] = 0;
    assert_eq!(
        decode(&lib, "Strict", &bytes, Vec::new()),
        Err(DecodeError::InvalidInlineBit { ordinal: 1 })
    );
}

#[test]
fn absent_union_needs_nullable_and_empty_envelope() {
    let lib = library();
    assert_eq!(
        decode(&lib, "Strict", &[0; 16], Vec::new()),
        Err(DecodeError::NonNullableAbsent {
            ty: "Strict".into()
        })
    );
    let mut bytes = [0u8; 16];
    bytes[8] = 1;
    assert_eq!(
        decode(&lib, "Strict", &bytes, Vec::new()),
        Err(DecodeError::ZeroUnionOrdinal)
    );
}

#[test]
fn flexible_union_keeps_unknown_variant_with_handles() {
    init_tracing();
    let lib = library();
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&99u64.to_le_bytes());
    bytes.extend_from_slice(&u32::MAX.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    let (info, watch) = vmo(Rights::READ);

    let value = decode(&lib, "Flex", &bytes, vec![info]).unwrap();
    let Value::Union(UnionValue::Unknown { ordinal, data }) = value else {
        panic!("expected unknown variant, got {value:?}");
    };
    assert_eq!(ordinal, 99);
    assert!(data.inlined);
    assert_eq!(data.handles.len(), 1);
    assert!(!watch.is_closed());

    // The unknown variant re-encodes to the same bytes and handles.
    let unknown = Value::Union(UnionValue::Unknown { ordinal, data });
    let (again, handles) = encode(&lib, "Flex", unknown).unwrap();
    assert_eq!(again, bytes);
    assert_eq!(handles.len(), 1);
    assert!(!watch.is_closed());

    let data = UnknownData {
        bytes: Vec::new(),
        handles,
        inlined: false,
    };
    data.close();
    assert!(watch.is_closed());
}

#[test]
fn table_skips_absent_fields() {
    let lib = library();
    let table = TableValue::new().with(2, Value::string("abc"));
    let (bytes, handles) = encode(&lib, "Settings", Value::Table(table)).unwrap();
    assert_eq!(&bytes[..8], &2u64.to_le_bytes());
    // envelope 1 is absent
    assert_eq!(&bytes[16..24], &[0; 8]);

    let Value::Table(table) = decode(&lib, "Settings", &bytes, handles).unwrap() else {
        panic!("expected table");
    };
    assert_eq!(table.get(1), None);
    assert_eq!(table.get(2), Some(&Value::string("abc")));
}

#[test]
fn table_unknown_field_reencodes_byte_identically() {
    let newer = newer_library();
    let table = TableValue::new()
        .with(1, Value::Bool(true))
        .with(3, Value::U64(0xdead_beef));
    let (bytes, handles) = encode(&newer, "Settings", Value::Table(table)).unwrap();
    assert!(handles.is_empty());

    let older = library();
    let Value::Table(table) = decode(&older, "Settings", &bytes, Vec::new()).unwrap() else {
        panic!("expected table");
    };
    assert_eq!(table.get(1), Some(&Value::Bool(true)));
    assert_eq!(table.unknown.len(), 1);
    assert_eq!(table.unknown[0].ordinal, 3);
    assert!(!table.unknown[0].data.inlined);
    assert_eq!(table.unknown[0].data.bytes, 0xdead_beefu64.to_le_bytes());

    let (again, _) = encode(&older, "Settings", Value::Table(table)).unwrap();
    assert_eq!(again, bytes);
}

#[test]
fn table_unknown_field_with_handles_is_closed() {
    init_tracing();
    let newer = newer_library();
    let (handle, watch) = Handle::with_watch();
    let token = HandleInfo::new(handle, ObjectType::Event, Rights::BASIC);
    let table = TableValue::new()
        .with(1, Value::Bool(false))
        .with(4, Value::Handle(token));
    let (bytes, handles) = encode(&newer, "Settings", Value::Table(table)).unwrap();
    assert_eq!(handles.len(), 1);

    let older = library();
    let Value::Table(table) = decode(&older, "Settings", &bytes, handles).unwrap() else {
        panic!("expected table");
    };
    assert_eq!(table.get(1), Some(&Value::Bool(false)));
    assert!(table.unknown.is_empty());
    assert!(watch.is_closed());
}

#[test]
fn nonzero_padding_is_rejected() {
    let lib = library();
    let (mut bytes, _) = encode(&lib, "Flag", Value::Struct(vec![Value::Bool(true)])).unwrap();
    bytes[3] = 1;
    assert_eq!(
        decode(&lib, "Flag", &bytes, Vec::new()),
        Err(DecodeError::NonZeroPadding { offset: 3 })
    );
}

#[test]
fn invalid_boolean_is_rejected() {
    let lib = library();
    assert_eq!(
        decode(&lib, "Flag", &[2, 0, 0, 0, 0, 0, 0, 0], Vec::new()),
        Err(DecodeError::InvalidBoolean(2))
    );
}

#[test]
fn truncated_and_oversized_inputs_are_rejected() {
    let lib = library();
    let (bytes, _) = encode(
        &lib,
        "Point",
        Value::Struct(vec![Value::I32(1), Value::I32(2)]),
    )
    .unwrap();
    assert_eq!(
        decode(&lib, "Point", &bytes[..4], Vec::new()),
        Err(DecodeError::OutOfBounds { offset: 0, len: 8 })
    );

    let mut longer = bytes.clone();
    longer.extend_from_slice(&[0; 8]);
    assert_eq!(
        decode(&lib, "Point", &longer, Vec::new()),
        Err(DecodeError::ExtraBytes { count: 8 })
    );

    let (info, watch) = vmo(Rights::READ);
    assert_eq!(
        decode(&lib, "Point", &bytes, vec![info]),
        Err(DecodeError::ExtraHandles { count: 1 })
    );
    assert!(watch.is_closed());
}

#[test]
fn strings_are_bounded_and_utf8() {
    let lib = library();
    let err = encode(&lib, "Text", Value::Struct(vec![Value::string("abcde")])).unwrap_err();
    assert_eq!(err, EncodeError::StringTooLong { len: 5, max: 4 });

    let (bytes, _) = encode(&lib, "Text", Value::Struct(vec![Value::string("ab")])).unwrap();
    assert_eq!(bytes.len(), 24);

    let mut bad = bytes.clone();
    bad[16] = 0xff;
    assert_eq!(
        decode(&lib, "Text", &bad, Vec::new()),
        Err(DecodeError::InvalidUtf8)
    );

    let mut long = bytes.clone();
    long[0] = 5;
    assert_eq!(
        decode(&lib, "Text", &long, Vec::new()),
        Err(DecodeError::StringTooLong { len: 5, max: 4 })
    );
}

#[test]
fn failed_decode_closes_every_handle() {
    let lib = library();
    let (first, first_watch) = vmo(Rights::READ);
    let (bytes, handles) = encode(
        &lib,
        "Pair",
        Value::Struct(vec![Value::Handle(first), Value::Bool(true)]),
    )
    .unwrap();
    assert_eq!(&bytes[..4], &[0xff; 4]);

    let mut bytes = bytes;
    bytes[4] = 7;
    let (extra, extra_watch) = vmo(Rights::READ);
    let mut handles = handles;
    handles.push(extra);

    assert_eq!(
        decode(&lib, "Pair", &bytes, handles),
        Err(DecodeError::InvalidBoolean(7))
    );
    assert!(first_watch.is_closed());
    assert!(extra_watch.is_closed());
}

#[test]
fn handle_rights_are_reduced_to_declaration() {
    let lib = library();
    let (info, _watch) = vmo(Rights::READ | Rights::WRITE);
    let (bytes, handles) = encode(
        &lib,
        "Pair",
        Value::Struct(vec![Value::Handle(info), Value::Bool(false)]),
    )
    .unwrap();
    assert_eq!(handles[0].rights, Rights::READ);

    let mut fields = decode(&lib, "Pair", &bytes, handles)
        .unwrap()
        .into_fields()
        .unwrap();
    let info = fields.remove(0).into_handle().unwrap();
    assert_eq!(info.object_type, ObjectType::Vmo);
    assert_eq!(info.rights, Rights::READ);
}

#[test]
fn handle_type_and_rights_are_checked() {
    let lib = library();
    let bytes = [0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0];

    let (handle, watch) = Handle::with_watch();
    let channel = HandleInfo::new(handle, ObjectType::Channel, Rights::READ);
    assert_eq!(
        decode(&lib, "Pair", &bytes, vec![channel]),
        Err(DecodeError::IncorrectHandleType {
            expected: ObjectType::Vmo,
            actual: ObjectType::Channel
        })
    );
    assert!(watch.is_closed());

    let (write_only, _) = vmo(Rights::WRITE);
    assert_eq!(
        decode(&lib, "Pair", &bytes, vec![write_only]),
        Err(DecodeError::MissingRequiredHandleRights {
            required: Rights::READ,
            actual: Rights::WRITE
        })
    );

    let (handle, _) = Handle::with_watch();
    let channel = HandleInfo::new(handle, ObjectType::Channel, Rights::READ);
    let err = encode(
        &lib,
        "Pair",
        Value::Struct(vec![Value::Handle(channel), Value::Bool(false)]),
    )
    .unwrap_err();
    assert_eq!(
        err,
        EncodeError::Handle(HandleCheckError::IncorrectType {
            expected: ObjectType::Vmo,
            actual: ObjectType::Channel
        })
    );
}

#[test]
fn missing_handle_is_rejected() {
    let lib = library();
    let bytes = [0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0];
    assert_eq!(
        decode(&lib, "Pair", &bytes, Vec::new()),
        Err(DecodeError::MissingHandle)
    );
}

#[test]
fn nesting_depth_is_limited() {
    let lib = library();
    let limits = Limits::default().with_max_depth(2);

    encode_with_limits(&lib, "Node", chain(3), limits).unwrap();
    let err = encode_with_limits(&lib, "Node", chain(4), limits).unwrap_err();
    assert_eq!(err, EncodeError::ExceededMaxDepth { max: 2 });

    let (bytes, handles) = encode(&lib, "Node", chain(4)).unwrap();
    assert_eq!(
        decode_with_limits(&lib, "Node", &bytes, handles, limits),
        Err(DecodeError::ExceededMaxDepth { max: 2 })
    );
}

#[test]
fn message_size_is_limited() {
    let lib = library();
    let limits = Limits::default().with_max_message_bytes(16);
    let err = encode_with_limits(&lib, "Node", chain(2), limits).unwrap_err();
    assert!(matches!(err, EncodeError::MessageTooLarge { max: 16, .. }));

    let (bytes, handles) = encode(&lib, "Node", chain(2)).unwrap();
    assert_eq!(
        decode_with_limits(&lib, "Node", &bytes, handles, limits),
        Err(DecodeError::MessageTooLarge { size: 32, max: 16 })
    );
}

#[test]
fn mismatched_values_are_rejected() {
    let lib = library();
    let err = encode(&lib, "Point", Value::Struct(vec![Value::I32(1)])).unwrap_err();
    assert_eq!(
        err,
        EncodeError::FieldCountMismatch {
            decl: "Point".into(),
            expected: 2,
            found: 1
        }
    );

    let err = encode(
        &lib,
        "Point",
        Value::Struct(vec![Value::U32(1), Value::I32(2)]),
    )
    .unwrap_err();
    assert_eq!(
        err,
        EncodeError::TypeMismatch {
            expected: "int32".into(),
            found: "uint32"
        }
    );
}
