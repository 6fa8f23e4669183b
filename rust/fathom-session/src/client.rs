//! Client runtime: transaction correlation, events, and the two proxy flavors.
//!
//! Both [`Proxy`] and [`SynchronousProxy`] sit on the same [`ClientInner`]:
//! an interest table keyed by transaction id, an event queue, and the
//! terminal state of the channel. Whoever happens to be waiting reads from
//! the transport and routes every message it sees, so a reply read by one
//! caller is handed to the caller it belongs to.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use fathom_codec::Value;
use fathom_schema::MethodKind;
use fathom_wire::{MAX_TXID, MessageBuf, Status, decode_epitaph_body, decode_transaction_header};
use futures_core::{FusedStream, Stream};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::{Error, ProtocolBinding, ReadOutcome, Transport, TransportError};

/// Abandoned calls remembered so their late replies are dropped quietly.
const MAX_DISCARDED: usize = 1024;

/// An event delivered by the server.
#[derive(Debug, PartialEq)]
pub struct Event {
    pub ordinal: u64,
    pub method: String,
    pub values: Vec<Value>,
}

#[derive(Debug)]
enum Interest {
    Waiting { waker: Option<Waker> },
    Received(MessageBuf),
    /// The caller gave up; a late reply is dropped quietly.
    Discard,
}

#[derive(Debug, Clone, Copy)]
enum Closed {
    Peer,
    Epitaph(Status),
}

#[derive(Debug, Default)]
struct ClientState {
    interests: HashMap<u32, Interest>,
    /// Transaction ids marked [`Interest::Discard`], oldest first.
    discarded: VecDeque<u32>,
    last_txid: u32,
    events: VecDeque<MessageBuf>,
    event_waker: Option<Waker>,
    event_stream_taken: bool,
    epitaph_reported: bool,
    closed: Option<Closed>,
    /// A thread is blocked in `wait_readable` on behalf of everyone.
    reading: bool,
}

struct ClientInner {
    transport: Box<dyn Transport>,
    binding: ProtocolBinding,
    state: Mutex<ClientState>,
    routed: Condvar,
}

impl ClientInner {
    fn new(transport: Box<dyn Transport>, binding: ProtocolBinding) -> Self {
        Self {
            transport,
            binding,
            state: Mutex::new(ClientState::default()),
            routed: Condvar::new(),
        }
    }

    fn closed_error(&self, closed: Closed) -> Error {
        let protocol_name = self.binding.protocol_name().to_owned();
        match closed {
            Closed::Peer => Error::PeerClosed { protocol_name },
            Closed::Epitaph(status) => Error::ClientChannelClosed {
                status,
                protocol_name,
            },
        }
    }

    fn write_error(&self, state: &ClientState, err: TransportError) -> Error {
        match (state.closed, err) {
            (Some(closed), _) => self.closed_error(closed),
            (None, TransportError::PeerClosed) => self.closed_error(Closed::Peer),
            (None, err) => Error::ClientWrite(err),
        }
    }

    /// Next free transaction id in `1..=MAX_TXID`.
    fn allocate_txid(state: &mut ClientState) -> u32 {
        loop {
            state.last_txid = if state.last_txid >= MAX_TXID {
                1
            } else {
                state.last_txid + 1
            };
            if !state.interests.contains_key(&state.last_txid) {
                return state.last_txid;
            }
        }
    }

    /// Register a two-way call and write its request.
    fn start_call(&self, method: &str, args: Vec<Value>) -> Result<(usize, u32), Error> {
        let index = self.binding.method_of_kind(method, MethodKind::TwoWay)?;
        let mut state = self.state.lock();
        if let Some(closed) = state.closed {
            return Err(self.closed_error(closed));
        }
        let tx_id = Self::allocate_txid(&mut state);
        let msg = self.binding.encode_request(index, tx_id, args)?;
        state
            .interests
            .insert(tx_id, Interest::Waiting { waker: None });
        if let Err(err) = self.transport.write(msg) {
            state.interests.remove(&tx_id);
            return Err(self.write_error(&state, err));
        }
        tracing::trace!(method, tx_id, "call sent");
        Ok((index, tx_id))
    }

    fn send_one_way(&self, method: &str, args: Vec<Value>) -> Result<(), Error> {
        let index = self.binding.method_of_kind(method, MethodKind::OneWay)?;
        let msg = self.binding.encode_request(index, 0, args)?;
        let state = self.state.lock();
        if let Some(closed) = state.closed {
            return Err(self.closed_error(closed));
        }
        self.transport
            .write(msg)
            .map_err(|err| self.write_error(&state, err))
    }

    /// Hand a freshly read message to whoever is waiting for it.
    fn route(&self, state: &mut ClientState, msg: MessageBuf) {
        let header = match decode_transaction_header(&msg.bytes) {
            Ok((header, body)) if header.is_epitaph() => {
                let status = match decode_epitaph_body(body) {
                    Ok(status) => status,
                    Err(err) => {
                        tracing::warn!(%err, "malformed epitaph");
                        Status::INTERNAL
                    }
                };
                tracing::debug!(
                    protocol = self.binding.protocol_name(),
                    %status,
                    "epitaph received"
                );
                self.mark_closed(state, Closed::Epitaph(status));
                return;
            }
            Ok((header, _)) => header,
            Err(err) => {
                tracing::warn!(%err, "dropping message with malformed header");
                return;
            }
        };

        if header.tx_id == 0 {
            tracing::trace!(ordinal = header.ordinal, "event queued");
            state.events.push_back(msg);
            if let Some(waker) = state.event_waker.take() {
                waker.wake();
            }
            self.routed.notify_all();
            return;
        }

        match state.interests.remove(&header.tx_id) {
            Some(Interest::Waiting { waker }) => {
                tracing::trace!(
                    tx_id = header.tx_id,
                    ordinal = header.ordinal,
                    "response routed"
                );
                state
                    .interests
                    .insert(header.tx_id, Interest::Received(msg));
                if let Some(waker) = waker {
                    waker.wake();
                }
                self.routed.notify_all();
            }
            Some(Interest::Discard) => {
                tracing::trace!(tx_id = header.tx_id, "discarding reply to abandoned call");
            }
            Some(received @ Interest::Received(_)) => {
                tracing::warn!(tx_id = header.tx_id, "duplicate reply dropped");
                state.interests.insert(header.tx_id, received);
            }
            None => {
                tracing::warn!(
                    tx_id = header.tx_id,
                    ordinal = header.ordinal,
                    "reply for unknown txid dropped"
                );
            }
        }
    }

    fn mark_closed(&self, state: &mut ClientState, closed: Closed) {
        if state.closed.is_none() {
            tracing::debug!(
                protocol = self.binding.protocol_name(),
                ?closed,
                "client channel closed"
            );
            state.closed = Some(closed);
        }
        for interest in state.interests.values_mut() {
            if let Interest::Waiting { waker } = interest
                && let Some(waker) = waker.take()
            {
                waker.wake();
            }
        }
        if let Some(waker) = state.event_waker.take() {
            waker.wake();
        }
        self.routed.notify_all();
    }

    /// Read whatever is queued. Returns false once nothing more will arrive.
    fn drain(&self, state: &mut ClientState) -> bool {
        while state.closed.is_none() {
            match self.transport.try_read() {
                Ok(ReadOutcome::Ready(msg)) => self.route(state, msg),
                Ok(ReadOutcome::Pending) => return true,
                Ok(ReadOutcome::Closed) => self.mark_closed(state, Closed::Peer),
                Err(err) => {
                    tracing::warn!(%err, "client read failed");
                    self.mark_closed(state, Closed::Peer);
                }
            }
        }
        false
    }

    /// Poll until `take` yields. `park` stores the task's waker where the
    /// router will find it.
    fn poll_until<T>(
        &self,
        cx: &mut Context<'_>,
        mut take: impl FnMut(&Self, &mut ClientState) -> Option<T>,
        park: impl FnOnce(&mut ClientState, Waker),
    ) -> Poll<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(out) = take(self, &mut state) {
                return Poll::Ready(out);
            }
            if !self.drain(&mut state) {
                continue;
            }
            if let Some(out) = take(self, &mut state) {
                return Poll::Ready(out);
            }
            if self.transport.poll_readable(cx).is_pending() {
                park(&mut state, cx.waker().clone());
                return Poll::Pending;
            }
        }
    }

    /// Block until `take` yields or `deadline` passes. One waiter at a time
    /// reads the transport; the others sleep until it routes something.
    fn wait_until<T>(
        &self,
        deadline: Option<Instant>,
        mut take: impl FnMut(&Self, &mut ClientState) -> Option<T>,
    ) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(out) = take(self, &mut state) {
                return Some(out);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return None;
            }
            if state.reading {
                match deadline {
                    Some(deadline) => {
                        self.routed.wait_until(&mut state, deadline);
                    }
                    None => self.routed.wait(&mut state),
                }
                continue;
            }
            if !self.drain(&mut state) {
                continue;
            }
            if let Some(out) = take(self, &mut state) {
                return Some(out);
            }
            state.reading = true;
            MutexGuard::unlocked(&mut state, || self.transport.wait_readable(deadline));
            state.reading = false;
            self.drain(&mut state);
            // Let a follower take over reading if this caller is done.
            self.routed.notify_all();
        }
    }

    /// `take` for the reply to `tx_id`.
    fn take_reply(&self, state: &mut ClientState, tx_id: u32) -> Option<Result<MessageBuf, Error>> {
        if matches!(state.interests.get(&tx_id), Some(Interest::Received(_)))
            && let Some(Interest::Received(msg)) = state.interests.remove(&tx_id)
        {
            return Some(Ok(msg));
        }
        if let Some(closed) = state.closed {
            state.interests.remove(&tx_id);
            return Some(Err(self.closed_error(closed)));
        }
        None
    }

    /// `take` for the next event. `None` inside means the stream is over.
    fn take_event(&self, state: &mut ClientState) -> Option<Option<Result<MessageBuf, Error>>> {
        if let Some(msg) = state.events.pop_front() {
            return Some(Some(Ok(msg)));
        }
        match state.closed {
            Some(closed @ Closed::Epitaph(_)) if !state.epitaph_reported => {
                state.epitaph_reported = true;
                Some(Some(Err(self.closed_error(closed))))
            }
            Some(_) => Some(None),
            None => None,
        }
    }

    /// Forget a call whose caller went away.
    ///
    /// While the channel is open the transaction id stays reserved so a late
    /// reply is dropped quietly. Only the newest [`MAX_DISCARDED`] abandoned
    /// calls are remembered; a reply to an older one is dropped as unknown.
    fn abandon(&self, tx_id: u32) {
        let mut state = self.state.lock();
        match state.interests.get(&tx_id) {
            Some(Interest::Waiting { .. }) if state.closed.is_none() => {
                Self::discard(&mut state, tx_id);
            }
            Some(_) => {
                state.interests.remove(&tx_id);
            }
            None => {}
        }
    }

    fn discard(state: &mut ClientState, tx_id: u32) {
        state.interests.insert(tx_id, Interest::Discard);
        state.discarded.push_back(tx_id);
        while state.discarded.len() > MAX_DISCARDED {
            let Some(oldest) = state.discarded.pop_front() else {
                break;
            };
            if matches!(state.interests.get(&oldest), Some(Interest::Discard)) {
                tracing::trace!(tx_id = oldest, "forgetting abandoned call");
                state.interests.remove(&oldest);
            }
        }
    }

    fn decode_reply(&self, index: usize, msg: MessageBuf) -> Result<Vec<Value>, Error> {
        let (bytes, handles) = msg.split();
        let (header, body) = decode_transaction_header(&bytes)?;
        header.validate_wire_format()?;
        let method = self.binding.method_at(index);
        if header.ordinal != method.ordinal {
            return Err(Error::UnknownOrdinal {
                ordinal: header.ordinal,
                protocol_name: self.binding.protocol_name().to_owned(),
            });
        }
        self.binding.decode_response(index, body, handles)
    }

    fn decode_event(&self, msg: MessageBuf) -> Result<Event, Error> {
        let (bytes, handles) = msg.split();
        let (header, body) = decode_transaction_header(&bytes)?;
        header.validate_wire_format()?;
        let binding = &self.binding;
        let index = binding
            .index_of(header.ordinal)
            .filter(|&index| binding.method_at(index).kind == MethodKind::Event)
            .ok_or_else(|| Error::UnknownOrdinal {
                ordinal: header.ordinal,
                protocol_name: binding.protocol_name().to_owned(),
            })?;
        let values = binding.decode_response(index, body, handles)?;
        Ok(Event {
            ordinal: header.ordinal,
            method: binding.method_at(index).name.clone(),
            values,
        })
    }
}

/// Asynchronous client for one protocol over one transport.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use fathom_codec::Value;
/// use fathom_schema::{LibraryBuilder, Type};
/// use fathom_session::{Proxy, ProtocolBinding, mem::Channel};
///
/// let mut builder = LibraryBuilder::new("example.echo");
/// builder
///     .add_protocol("Echo")
///     .two_way("Say", [("text", Type::string())], [("text", Type::string())]);
/// let binding = ProtocolBinding::new(Arc::new(builder.build().unwrap()), "Echo").unwrap();
///
/// let (client_end, _server_end) = Channel::create();
/// let proxy = Proxy::new(client_end, binding);
/// let reply = proxy.call("Say", vec![Value::string("hello")]);
/// # drop(reply);
/// ```
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ClientInner>,
}

impl Proxy {
    pub fn new(transport: impl Transport, binding: ProtocolBinding) -> Self {
        Self {
            inner: Arc::new(ClientInner::new(Box::new(transport), binding)),
        }
    }

    pub fn binding(&self) -> &ProtocolBinding {
        &self.inner.binding
    }

    /// Send a two-way request. The returned future resolves with the
    /// response's values; dropping it abandons the call.
    pub fn call(&self, method: &str, args: Vec<Value>) -> QueryResponseFut {
        let outcome = self.inner.start_call(method, args);
        QueryResponseFut {
            inner: self.inner.clone(),
            state: match outcome {
                Ok((index, tx_id)) => FutState::Pending { index, tx_id },
                Err(err) => FutState::Failed(err),
            },
        }
    }

    /// Like [`Proxy::call`], failing with [`Error::TimedOut`] after `timeout`.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Vec<Value>, Error> {
        tokio::time::timeout(timeout, self.call(method, args))
            .await
            .map_err(|_| Error::TimedOut)?
    }

    /// Send a one-way request.
    pub fn send(&self, method: &str, args: Vec<Value>) -> Result<(), Error> {
        self.inner.send_one_way(method, args)
    }

    /// Take the stream of server events.
    ///
    /// # Panics
    ///
    /// If the stream was already taken; only one consumer may own it.
    pub fn take_event_stream(&self) -> EventStream {
        let mut state = self.inner.state.lock();
        if state.event_stream_taken {
            panic!(
                "event stream of {} was already taken",
                self.inner.binding.protocol_name()
            );
        }
        state.event_stream_taken = true;
        EventStream {
            inner: self.inner.clone(),
            terminated: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed.is_some() || self.inner.transport.is_closed()
    }
}

enum FutState {
    Pending { index: usize, tx_id: u32 },
    Failed(Error),
    Done,
}

/// Future returned by [`Proxy::call`].
pub struct QueryResponseFut {
    inner: Arc<ClientInner>,
    state: FutState,
}

impl QueryResponseFut {
    /// Transaction id of the call, if its request was written.
    pub fn tx_id(&self) -> Option<u32> {
        match self.state {
            FutState::Pending { tx_id, .. } => Some(tx_id),
            _ => None,
        }
    }
}

impl Future for QueryResponseFut {
    type Output = Result<Vec<Value>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let (index, tx_id) = match std::mem::replace(&mut this.state, FutState::Done) {
            FutState::Pending { index, tx_id } => (index, tx_id),
            FutState::Failed(err) => return Poll::Ready(Err(err)),
            FutState::Done => return Poll::Ready(Err(Error::PollAfterCompletion)),
        };
        let polled = this.inner.poll_until(
            cx,
            |inner, state| inner.take_reply(state, tx_id),
            |state, waker| {
                if let Some(Interest::Waiting { waker: slot }) = state.interests.get_mut(&tx_id) {
                    *slot = Some(waker);
                }
            },
        );
        match polled {
            Poll::Ready(Ok(msg)) => Poll::Ready(this.inner.decode_reply(index, msg)),
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => {
                this.state = FutState::Pending { index, tx_id };
                Poll::Pending
            }
        }
    }
}

impl Drop for QueryResponseFut {
    fn drop(&mut self) {
        if let FutState::Pending { tx_id, .. } = self.state {
            self.inner.abandon(tx_id);
        }
    }
}

/// Stream of decoded events, from [`Proxy::take_event_stream`].
///
/// Ends when the channel closes. An epitaph is yielded once as
/// [`Error::ClientChannelClosed`] before the end.
pub struct EventStream {
    inner: Arc<ClientInner>,
    terminated: bool,
}

impl Stream for EventStream {
    type Item = Result<Event, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }
        let polled = this.inner.poll_until(
            cx,
            |inner, state| inner.take_event(state),
            |state, waker| state.event_waker = Some(waker),
        );
        Poll::Ready(match std::task::ready!(polled) {
            Some(Ok(msg)) => Some(this.inner.decode_event(msg)),
            Some(Err(err)) => Some(Err(err)),
            None => {
                this.terminated = true;
                None
            }
        })
    }
}

impl FusedStream for EventStream {
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

/// Blocking client for one protocol over one transport.
///
/// Any number of threads may call concurrently; replies are matched to
/// callers by transaction id regardless of arrival order.
#[derive(Clone)]
pub struct SynchronousProxy {
    inner: Arc<ClientInner>,
}

impl SynchronousProxy {
    pub fn new(transport: impl Transport, binding: ProtocolBinding) -> Self {
        Self {
            inner: Arc::new(ClientInner::new(Box::new(transport), binding)),
        }
    }

    pub fn binding(&self) -> &ProtocolBinding {
        &self.inner.binding
    }

    /// Send a two-way request and block for its response. `None` waits
    /// forever.
    pub fn call(
        &self,
        method: &str,
        args: Vec<Value>,
        deadline: Option<Instant>,
    ) -> Result<Vec<Value>, Error> {
        let _span = tracing::debug_span!(
            "sync_call",
            method,
            protocol = self.inner.binding.protocol_name()
        )
        .entered();
        let (index, tx_id) = self.inner.start_call(method, args)?;
        match self
            .inner
            .wait_until(deadline, |inner, state| inner.take_reply(state, tx_id))
        {
            Some(reply) => self.inner.decode_reply(index, reply?),
            None => {
                tracing::debug!(tx_id, "sync call timed out");
                self.inner.abandon(tx_id);
                Err(Error::TimedOut)
            }
        }
    }

    pub fn send(&self, method: &str, args: Vec<Value>) -> Result<(), Error> {
        self.inner.send_one_way(method, args)
    }

    /// Block until the next event, the channel closing, or `deadline`.
    pub fn wait_for_event(&self, deadline: Option<Instant>) -> Result<Event, Error> {
        match self
            .inner
            .wait_until(deadline, |inner, state| inner.take_event(state))
        {
            Some(Some(event)) => self.inner.decode_event(event?),
            Some(None) => {
                let closed = self.inner.state.lock().closed.unwrap_or(Closed::Peer);
                Err(self.inner.closed_error(closed))
            }
            None => Err(Error::TimedOut),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed.is_some() || self.inner.transport.is_closed()
    }
}
