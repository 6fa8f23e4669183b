use bytes::{BufMut, Bytes, BytesMut};

use crate::{HEADER_SIZE, HandleInfo, HeaderError, Status, TransactionHeader};

/// Bytes and handles of one transport message.
#[derive(Debug, Default)]
pub struct MessageBuf {
    pub bytes: Bytes,
    pub handles: Vec<HandleInfo>,
}

impl MessageBuf {
    pub fn new(bytes: impl Into<Bytes>, handles: Vec<HandleInfo>) -> Self {
        Self {
            bytes: bytes.into(),
            handles,
        }
    }

    /// Assemble a message from a header and an encoded body.
    pub fn from_parts(header: &TransactionHeader, body: &[u8], handles: Vec<HandleInfo>) -> Self {
        let mut bytes = BytesMut::with_capacity(HEADER_SIZE + body.len());
        header.encode_into(&mut bytes);
        bytes.put_slice(body);
        Self {
            bytes: bytes.freeze(),
            handles,
        }
    }

    /// Build an epitaph message carrying `status`.
    pub fn epitaph(status: Status) -> Self {
        let mut bytes = BytesMut::with_capacity(HEADER_SIZE + 8);
        TransactionHeader::epitaph().encode_into(&mut bytes);
        bytes.put_i32_le(status.into_raw());
        bytes.put_u32_le(0);
        Self {
            bytes: bytes.freeze(),
            handles: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn split(self) -> (Bytes, Vec<HandleInfo>) {
        (self.bytes, self.handles)
    }
}

/// Decode the body of an epitaph message.
pub fn decode_epitaph_body(body: &[u8]) -> Result<Status, HeaderError> {
    if body.len() != 8 || body[4..] != [0, 0, 0, 0] {
        return Err(HeaderError::MalformedEpitaph { len: body.len() });
    }
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&body[..4]);
    Ok(Status::from_raw(i32::from_le_bytes(raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EPITAPH_ORDINAL, decode_transaction_header};

    #[test]
    fn epitaph_wire_form() {
        let msg = MessageBuf::epitaph(Status::PEER_CLOSED);
        assert_eq!(msg.len(), HEADER_SIZE + 8);
        let (header, body) = decode_transaction_header(&msg.bytes).unwrap();
        assert_eq!(header.tx_id, 0);
        assert_eq!(header.ordinal, EPITAPH_ORDINAL);
        assert_eq!(body, &[0xe8, 0xff, 0xff, 0xff, 0, 0, 0, 0]);
        assert_eq!(decode_epitaph_body(body), Ok(Status::PEER_CLOSED));
    }

    #[test]
    fn epitaph_with_bad_padding_is_rejected() {
        assert_eq!(
            decode_epitaph_body(&[0, 0, 0, 0, 1, 0, 0, 0]),
            Err(HeaderError::MalformedEpitaph { len: 8 })
        );
        assert_eq!(
            decode_epitaph_body(&[0, 0, 0, 0]),
            Err(HeaderError::MalformedEpitaph { len: 4 })
        );
    }
}
