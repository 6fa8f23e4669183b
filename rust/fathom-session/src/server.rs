//! Server runtime.
//!
//! A [`RequestStream`] owns the server end of a transport. Each inbound
//! message becomes a [`Request`]; two-way requests carry a [`Responder`] that
//! must be consumed exactly once. The connection moves through
//! [`ConnectionState::Active`], [`ConnectionState::ShuttingDown`] and
//! [`ConnectionState::Closed`]; shutdown is requested through a
//! [`ControlHandle`] (or by dropping a responder) and takes effect on the
//! stream's next poll, which writes any pending epitaph and closes the
//! transport.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use fathom_codec::Value;
use fathom_schema::{Method, MethodKind};
use fathom_wire::{MessageBuf, Status, decode_transaction_header};
use futures_core::{FusedStream, Stream};
use futures_util::task::AtomicWaker;
use parking_lot::Mutex;

use crate::{Error, ProtocolBinding, ReadOutcome, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    /// Shutdown was requested; the stream closes on its next poll.
    ShuttingDown,
    Closed,
}

#[derive(Debug, Default)]
struct ServerState {
    shutdown: bool,
    epitaph: Option<Status>,
}

struct ServerInner {
    transport: Box<dyn Transport>,
    binding: ProtocolBinding,
    state: Mutex<ServerState>,
    waker: AtomicWaker,
}

impl ServerInner {
    fn shutdown(&self, epitaph: Option<Status>) {
        {
            let mut state = self.state.lock();
            if epitaph.is_some() {
                state.epitaph = epitaph;
            }
            if !state.shutdown {
                tracing::debug!(
                    protocol = self.binding.protocol_name(),
                    ?epitaph,
                    "shutdown requested"
                );
                state.shutdown = true;
            }
        }
        self.waker.wake();
    }

    fn is_shutting_down(&self) -> bool {
        self.state.lock().shutdown
    }

    fn write(&self, msg: MessageBuf) -> Result<(), Error> {
        self.transport
            .write(msg)
            .map_err(Error::ServerResponseWrite)
    }

    fn handle_message(self: &Arc<Self>, msg: MessageBuf) -> Result<Request, Error> {
        let (bytes, handles) = msg.split();
        let (header, body) = decode_transaction_header(&bytes)?;
        header.validate_wire_format()?;

        let binding = &self.binding;
        let Some(index) = binding
            .index_of(header.ordinal)
            .filter(|&index| binding.method_at(index).kind != MethodKind::Event)
        else {
            tracing::debug!(
                ordinal = header.ordinal,
                flexible = header.is_flexible(),
                protocol = binding.protocol_name(),
                "request with unknown ordinal"
            );
            return Err(Error::UnknownOrdinal {
                ordinal: header.ordinal,
                protocol_name: binding.protocol_name().to_owned(),
            });
        };

        let method = binding.method_at(index);
        let _span = tracing::debug_span!(
            "request",
            method = %method.name,
            tx_id = header.tx_id,
            protocol = binding.protocol_name()
        )
        .entered();
        let two_way = method.kind == MethodKind::TwoWay;
        if two_way == header.is_unsolicited() {
            return Err(Error::InvalidRequestTxid {
                tx_id: header.tx_id,
                ordinal: header.ordinal,
            });
        }
        let args = binding.decode_request(index, body, handles)?;
        tracing::debug!("request decoded");

        let control = ControlHandle {
            inner: self.clone(),
        };
        let responder = two_way.then(|| Responder {
            control: control.clone(),
            index,
            tx_id: header.tx_id,
            consumed: false,
        });
        Ok(Request {
            binding: binding.clone(),
            index,
            tx_id: header.tx_id,
            args,
            responder,
            control,
        })
    }
}

/// Stream of inbound requests for one protocol.
pub struct RequestStream {
    inner: Arc<ServerInner>,
    closed: bool,
}

impl RequestStream {
    pub fn new(transport: impl Transport, binding: ProtocolBinding) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                transport: Box::new(transport),
                binding,
                state: Mutex::new(ServerState::default()),
                waker: AtomicWaker::new(),
            }),
            closed: false,
        }
    }

    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle {
            inner: self.inner.clone(),
        }
    }

    pub fn binding(&self) -> &ProtocolBinding {
        &self.inner.binding
    }

    pub fn state(&self) -> ConnectionState {
        if self.closed {
            ConnectionState::Closed
        } else if self.inner.is_shutting_down() {
            ConnectionState::ShuttingDown
        } else {
            ConnectionState::Active
        }
    }

    /// Write the pending epitaph, if any, and release the transport.
    fn close(&mut self) {
        let epitaph = self.inner.state.lock().epitaph.take();
        if let Some(status) = epitaph {
            match self.inner.write(MessageBuf::epitaph(status)) {
                Ok(()) => tracing::debug!(%status, "epitaph sent"),
                Err(err) => tracing::debug!(%status, %err, "epitaph not delivered"),
            }
        }
        self.inner.transport.close();
        self.closed = true;
        tracing::debug!(
            protocol = self.inner.binding.protocol_name(),
            "request stream closed"
        );
    }
}

impl Stream for RequestStream {
    type Item = Result<Request, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.closed {
            panic!(
                "request stream of {} polled after it closed",
                this.inner.binding.protocol_name()
            );
        }
        this.inner.waker.register(cx.waker());
        loop {
            if this.inner.is_shutting_down() {
                this.close();
                return Poll::Ready(None);
            }
            match this.inner.transport.try_read() {
                Ok(ReadOutcome::Ready(msg)) => {
                    return Poll::Ready(Some(this.inner.handle_message(msg)));
                }
                Ok(ReadOutcome::Closed) => {
                    tracing::debug!("peer closed the request stream");
                    this.close();
                    return Poll::Ready(None);
                }
                Ok(ReadOutcome::Pending) => {
                    if this.inner.transport.poll_readable(cx).is_pending() {
                        return Poll::Pending;
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "server read failed");
                    this.inner.shutdown(None);
                    return Poll::Ready(Some(Err(Error::ServerRequestRead(err))));
                }
            }
        }
    }
}

impl Drop for RequestStream {
    fn drop(&mut self) {
        if !self.closed && self.inner.is_shutting_down() {
            self.close();
        }
    }
}

impl FusedStream for RequestStream {
    fn is_terminated(&self) -> bool {
        self.closed
    }
}

/// A decoded inbound request.
pub struct Request {
    binding: ProtocolBinding,
    index: usize,
    tx_id: u32,
    args: Vec<Value>,
    responder: Option<Responder>,
    control: ControlHandle,
}

impl Request {
    pub fn method(&self) -> &Method {
        self.binding.method_at(self.index)
    }

    pub fn method_name(&self) -> &str {
        &self.method().name
    }

    pub fn ordinal(&self) -> u64 {
        self.method().ordinal
    }

    /// Transaction id of the request; 0 for one-way methods.
    pub fn tx_id(&self) -> u32 {
        self.tx_id
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn is_two_way(&self) -> bool {
        self.responder.is_some()
    }

    pub fn control_handle(&self) -> &ControlHandle {
        &self.control
    }

    pub fn take_responder(&mut self) -> Option<Responder> {
        self.responder.take()
    }

    pub fn into_parts(self) -> (Vec<Value>, Option<Responder>, ControlHandle) {
        (self.args, self.responder, self.control)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method_name())
            .field("ordinal", &self.ordinal())
            .field("tx_id", &self.tx_id)
            .field("args", &self.args)
            .field("two_way", &self.is_two_way())
            .finish()
    }
}

/// Sends the single reply to a two-way request.
///
/// Dropping a responder without calling [`Responder::send`],
/// [`Responder::send_no_shutdown_on_err`] or
/// [`Responder::drop_without_shutdown`] shuts the connection down, since the
/// caller would otherwise wait forever.
pub struct Responder {
    control: ControlHandle,
    index: usize,
    tx_id: u32,
    consumed: bool,
}

impl Responder {
    /// Reply with `values`. Any failure shuts the connection down.
    pub fn send(mut self, values: Vec<Value>) -> Result<(), Error> {
        self.consumed = true;
        let result = self.reply(values);
        if result.is_err() {
            self.control.shutdown();
        }
        result
    }

    /// Reply with `values`, leaving the connection up on failure.
    pub fn send_no_shutdown_on_err(mut self, values: Vec<Value>) -> Result<(), Error> {
        self.consumed = true;
        self.reply(values)
    }

    /// Give up on replying without shutting the connection down.
    pub fn drop_without_shutdown(mut self) {
        self.consumed = true;
    }

    pub fn control_handle(&self) -> &ControlHandle {
        &self.control
    }

    pub fn tx_id(&self) -> u32 {
        self.tx_id
    }

    pub fn ordinal(&self) -> u64 {
        self.control.inner.binding.method_at(self.index).ordinal
    }

    fn reply(&self, values: Vec<Value>) -> Result<(), Error> {
        let inner = &self.control.inner;
        let msg = inner
            .binding
            .encode_response(self.index, self.tx_id, values)?;
        inner.write(msg)?;
        tracing::trace!(tx_id = self.tx_id, "response sent");
        Ok(())
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("tx_id", &self.tx_id)
            .field("ordinal", &self.ordinal())
            .finish()
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if !self.consumed {
            tracing::warn!(
                tx_id = self.tx_id,
                method = %self.control.inner.binding.method_at(self.index).name,
                "responder dropped without a reply, shutting down"
            );
            self.control.shutdown();
        }
    }
}

/// Connection-level operations, shareable across tasks.
#[derive(Clone)]
pub struct ControlHandle {
    inner: Arc<ServerInner>,
}

impl ControlHandle {
    /// Move the connection to [`ConnectionState::ShuttingDown`].
    pub fn shutdown(&self) {
        self.inner.shutdown(None);
    }

    /// Shut down, delivering `status` to the peer before the transport closes.
    pub fn shutdown_with_epitaph(&self, status: Status) {
        self.inner.shutdown(Some(status));
    }

    pub fn send_event(&self, method: &str, values: Vec<Value>) -> Result<(), Error> {
        let index = self
            .inner
            .binding
            .method_of_kind(method, MethodKind::Event)?;
        let msg = self.inner.binding.encode_response(index, 0, values)?;
        self.inner.write(msg)?;
        tracing::trace!(method, "event sent");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.transport.is_closed()
    }
}

impl fmt::Debug for ControlHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlHandle")
            .field("protocol", &self.inner.binding.protocol_name())
            .finish()
    }
}
