use std::collections::HashMap;
use std::sync::Arc;

use fathom_codec::{Value, decode_message_body, encode_message};
use fathom_schema::{Library, Method, MethodKind, SchemaError, Strictness};
use fathom_wire::{DynamicFlags, HandleInfo, Limits, MessageBuf, TransactionHeader};

use crate::Error;

/// One protocol of a library, indexed for dispatch.
///
/// Methods live in an arena in declaration order; ordinals and names map to
/// their position. Built once per protocol and shared by every proxy and
/// request stream that speaks it.
#[derive(Debug, Clone)]
pub struct ProtocolBinding {
    inner: Arc<BindingInner>,
}

#[derive(Debug)]
struct BindingInner {
    library: Arc<Library>,
    protocol_name: String,
    methods: Vec<Method>,
    by_ordinal: HashMap<u64, usize>,
    by_name: HashMap<String, usize>,
    limits: Limits,
}

impl ProtocolBinding {
    pub fn new(library: Arc<Library>, protocol: &str) -> Result<Self, SchemaError> {
        Self::with_limits(library, protocol, Limits::default())
    }

    pub fn with_limits(
        library: Arc<Library>,
        protocol: &str,
        limits: Limits,
    ) -> Result<Self, SchemaError> {
        let decl = library.protocol(protocol)?;
        let methods = decl.methods.clone();
        let by_ordinal = methods
            .iter()
            .enumerate()
            .map(|(index, method)| (method.ordinal, index))
            .collect();
        let by_name = methods
            .iter()
            .enumerate()
            .map(|(index, method)| (method.name.clone(), index))
            .collect();
        tracing::debug!(protocol, methods = methods.len(), "bound protocol");
        Ok(Self {
            inner: Arc::new(BindingInner {
                protocol_name: decl.name.clone(),
                library,
                methods,
                by_ordinal,
                by_name,
                limits,
            }),
        })
    }

    pub fn protocol_name(&self) -> &str {
        &self.inner.protocol_name
    }

    pub fn library(&self) -> &Library {
        &self.inner.library
    }

    pub fn limits(&self) -> Limits {
        self.inner.limits
    }

    pub fn methods(&self) -> &[Method] {
        &self.inner.methods
    }

    /// Position of the method with `ordinal` in [`ProtocolBinding::methods`].
    pub fn index_of(&self, ordinal: u64) -> Option<usize> {
        self.inner.by_ordinal.get(&ordinal).copied()
    }

    pub fn lookup(&self, ordinal: u64) -> Result<&Method, Error> {
        self.index_of(ordinal)
            .map(|index| &self.inner.methods[index])
            .ok_or_else(|| Error::UnknownOrdinal {
                ordinal,
                protocol_name: self.inner.protocol_name.clone(),
            })
    }

    pub fn method(&self, name: &str) -> Result<&Method, Error> {
        self.method_index(name)
            .map(|index| &self.inner.methods[index])
    }

    pub(crate) fn method_index(&self, name: &str) -> Result<usize, Error> {
        self.inner
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownMethod {
                method: name.to_owned(),
                protocol_name: self.inner.protocol_name.clone(),
            })
    }

    /// Index of `name`, which must be of `kind`.
    pub(crate) fn method_of_kind(&self, name: &str, kind: MethodKind) -> Result<usize, Error> {
        let index = self.method_index(name)?;
        let method = &self.inner.methods[index];
        if method.kind != kind {
            return Err(Error::InvalidMethodKind {
                method: method.name.clone(),
                kind: method.kind,
            });
        }
        Ok(index)
    }

    pub(crate) fn method_at(&self, index: usize) -> &Method {
        &self.inner.methods[index]
    }

    pub(crate) fn header_for(&self, index: usize, tx_id: u32) -> TransactionHeader {
        let method = &self.inner.methods[index];
        let flags = match method.strictness {
            Strictness::Flexible => DynamicFlags::FLEXIBLE,
            Strictness::Strict => DynamicFlags::empty(),
        };
        TransactionHeader::new(tx_id, method.ordinal, flags)
    }

    /// Encode the request (client to server) of method `index`.
    pub(crate) fn encode_request(
        &self,
        index: usize,
        tx_id: u32,
        args: Vec<Value>,
    ) -> Result<MessageBuf, Error> {
        let header = self.header_for(index, tx_id);
        let payload = self.inner.methods[index].request_payload();
        let limits = self.limits();
        let msg = encode_message(self.library(), &header, payload, args, limits)?;
        Ok(msg)
    }

    /// Encode a response or event (server to client) of method `index`.
    pub(crate) fn encode_response(
        &self,
        index: usize,
        tx_id: u32,
        values: Vec<Value>,
    ) -> Result<MessageBuf, Error> {
        let header = self.header_for(index, tx_id);
        let payload = self.inner.methods[index].response_payload();
        let limits = self.limits();
        let msg = encode_message(self.library(), &header, payload, values, limits)?;
        Ok(msg)
    }

    pub(crate) fn decode_request(
        &self,
        index: usize,
        body: &[u8],
        handles: Vec<HandleInfo>,
    ) -> Result<Vec<Value>, Error> {
        let payload = self.inner.methods[index].request_payload();
        let limits = self.limits();
        let values = decode_message_body(self.library(), payload, body, handles, limits)?;
        Ok(values)
    }

    pub(crate) fn decode_response(
        &self,
        index: usize,
        body: &[u8],
        handles: Vec<HandleInfo>,
    ) -> Result<Vec<Value>, Error> {
        let payload = self.inner.methods[index].response_payload();
        let limits = self.limits();
        let values = decode_message_body(self.library(), payload, body, handles, limits)?;
        Ok(values)
    }
}
