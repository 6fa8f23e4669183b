//! Whole messages: a transaction header followed by a payload body.

use fathom_schema::Library;
use fathom_wire::{HEADER_SIZE, HandleInfo, Limits, MessageBuf, TransactionHeader};

use crate::{DecodeError, EncodeError, Value, decode_with_limits, encode_with_limits};

/// Limits for a body that shares the message with a header.
fn body_limits(limits: Limits) -> Limits {
    limits.with_max_message_bytes(limits.max_message_bytes.saturating_sub(HEADER_SIZE))
}

/// Encode `args` as the payload struct `payload` and prefix `header`.
///
/// A method without parameters has no payload; its body is empty and `args`
/// must be too.
pub fn encode_message(
    library: &Library,
    header: &TransactionHeader,
    payload: Option<&str>,
    args: Vec<Value>,
    limits: Limits,
) -> Result<MessageBuf, EncodeError> {
    let (body, handles) = match payload {
        Some(name) => encode_with_limits(library, name, Value::Struct(args), body_limits(limits))?,
        None if args.is_empty() => (Vec::new(), Vec::new()),
        None => {
            return Err(EncodeError::FieldCountMismatch {
                decl: "(empty payload)".to_owned(),
                expected: 0,
                found: args.len(),
            });
        }
    };
    Ok(MessageBuf::from_parts(header, &body, handles))
}

/// Decode a message body (the bytes after the header) into payload fields.
pub fn decode_message_body(
    library: &Library,
    payload: Option<&str>,
    body: &[u8],
    handles: Vec<HandleInfo>,
    limits: Limits,
) -> Result<Vec<Value>, DecodeError> {
    let Some(name) = payload else {
        if !body.is_empty() {
            return Err(DecodeError::ExtraBytes { count: body.len() });
        }
        if !handles.is_empty() {
            return Err(DecodeError::ExtraHandles {
                count: handles.len(),
            });
        }
        return Ok(Vec::new());
    };
    match decode_with_limits(library, name, body, handles, body_limits(limits))? {
        Value::Struct(fields) => Ok(fields),
        _ => Err(DecodeError::UnknownType(name.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use fathom_schema::{LibraryBuilder, NO_PARAMS, Type};
    use fathom_wire::{DynamicFlags, decode_transaction_header};

    use super::*;

    fn library() -> Library {
        let mut builder = LibraryBuilder::new("test.echo");
        builder
            .add_protocol("Echo")
            .two_way(
                "Say",
                [("text", Type::string())],
                [("reply", Type::string())],
            )
            .one_way("Ping", NO_PARAMS);
        builder.build().unwrap()
    }

    #[test]
    fn message_carries_header_and_body() {
        let lib = library();
        let header = TransactionHeader::new(7, 42, DynamicFlags::empty());
        let msg = encode_message(
            &lib,
            &header,
            Some("EchoSayRequest"),
            vec![Value::string("hi")],
            Limits::default(),
        )
        .unwrap();
        // header + string header + padded "hi"
        assert_eq!(msg.len(), HEADER_SIZE + 16 + 8);

        let (decoded, body) = decode_transaction_header(&msg.bytes).unwrap();
        assert_eq!(decoded, header);
        let fields = decode_message_body(
            &lib,
            Some("EchoSayRequest"),
            body,
            Vec::new(),
            Limits::default(),
        )
        .unwrap();
        assert_eq!(fields, vec![Value::string("hi")]);
    }

    #[test]
    fn empty_payload_has_empty_body() {
        let lib = library();
        let header = TransactionHeader::new(0, 9, DynamicFlags::empty());
        let msg = encode_message(&lib, &header, None, Vec::new(), Limits::default()).unwrap();
        assert_eq!(msg.len(), HEADER_SIZE);

        assert_eq!(
            decode_message_body(&lib, None, &[0; 8], Vec::new(), Limits::default()),
            Err(DecodeError::ExtraBytes { count: 8 })
        );
    }

    #[test]
    fn header_counts_against_message_limit() {
        let lib = library();
        let header = TransactionHeader::new(1, 42, DynamicFlags::empty());
        // 16 header + 16 string header + 8 bytes of text = 40
        let limits = Limits::default().with_max_message_bytes(39);
        let err = encode_message(
            &lib,
            &header,
            Some("EchoSayRequest"),
            vec![Value::string("12345678")],
            limits,
        )
        .unwrap_err();
        assert!(matches!(err, EncodeError::MessageTooLarge { .. }));

        let limits = Limits::default().with_max_message_bytes(40);
        encode_message(
            &lib,
            &header,
            Some("EchoSayRequest"),
            vec![Value::string("12345678")],
            limits,
        )
        .unwrap();
    }
}
