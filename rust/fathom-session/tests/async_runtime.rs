use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use fathom_codec::{Value, encode_message};
use fathom_schema::{LibraryBuilder, NO_PARAMS, Type};
use fathom_session::mem::Channel;
use fathom_session::{
    ConnectionState, Dispatcher, Error, Event, ProtocolBinding, Proxy, ReadOutcome, Request,
    RequestStream, Transport, TransportError,
};
use fathom_wire::{
    DynamicFlags, Limits, MessageBuf, Status, TransactionHeader, decode_transaction_header,
};
use futures_util::StreamExt;
use parking_lot::Mutex;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn binding() -> ProtocolBinding {
    let mut builder = LibraryBuilder::new("test.echo");
    builder
        .add_protocol("Echo")
        .two_way(
            "Say",
            [("text", Type::string())],
            [("text", Type::string())],
        )
        .one_way("Ping", NO_PARAMS)
        .event("OnPing", [("count", Type::u32())])
        .two_way("Legacy", NO_PARAMS, NO_PARAMS)
        .transitional();
    ProtocolBinding::new(Arc::new(builder.build().unwrap()), "Echo").unwrap()
}

fn pair() -> (Proxy, RequestStream) {
    let (client_end, server_end) = Channel::create();
    (
        Proxy::new(client_end, binding()),
        RequestStream::new(server_end, binding()),
    )
}

fn ordinal(name: &str) -> u64 {
    binding().method(name).unwrap().ordinal
}

fn say(text: &str) -> Vec<Value> {
    vec![Value::string(text)]
}

fn echo_dispatcher() -> Dispatcher {
    let mut dispatcher = Dispatcher::new(binding());
    dispatcher
        .on("Say", |request: Request| {
            let (args, responder, _) = request.into_parts();
            match responder {
                Some(responder) => responder.send(args),
                None => Ok(()),
            }
        })
        .unwrap();
    dispatcher
}

/// Encode a Say reply by hand, as a misbehaving server would.
fn raw_reply(tx_id: u32, ordinal: u64, magic: u8) -> MessageBuf {
    let binding = binding();
    let mut header = TransactionHeader::new(tx_id, ordinal, DynamicFlags::empty());
    header.magic_number = magic;
    encode_message(
        binding.library(),
        &header,
        Some("EchoSayResponse"),
        say("raw"),
        Limits::default(),
    )
    .unwrap()
}

/// A message with no body.
fn bare(header: &TransactionHeader) -> MessageBuf {
    MessageBuf::from_parts(header, &[], Vec::new())
}

fn read_tx_id(channel: &Channel) -> u32 {
    match channel.try_read().unwrap() {
        ReadOutcome::Ready(msg) => decode_transaction_header(&msg.bytes).unwrap().0.tx_id,
        other => panic!("expected a request, got {other:?}"),
    }
}

#[tokio::test]
async fn call_round_trips_through_dispatcher() {
    init_tracing();
    let (proxy, stream) = pair();
    let server = tokio::spawn(async move { echo_dispatcher().serve(stream).await });

    assert_eq!(proxy.call("Say", say("hello")).await.unwrap(), say("hello"));
    assert_eq!(proxy.call("Say", say("again")).await.unwrap(), say("again"));

    drop(proxy);
    server.await.unwrap().unwrap();
}

/// Collects formatted log output in memory.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn requests_are_traced_with_method_and_txid() {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let (proxy, mut stream) = pair();
    let reply = proxy.call("Say", say("traced"));
    let tx_id = reply.tx_id().unwrap();
    let request = stream.next().await.unwrap().unwrap();
    assert_eq!(request.tx_id(), tx_id);
    echo_dispatcher().dispatch(request).unwrap();
    assert_eq!(reply.await.unwrap(), say("traced"));

    let output = String::from_utf8(captured.0.lock().clone()).unwrap();
    let request_span = format!("request{{method=Say tx_id={tx_id}");
    let dispatch_span = format!("dispatch{{method=Say tx_id={tx_id}");
    assert!(output.contains(&request_span), "{output}");
    assert!(output.contains(&dispatch_span), "{output}");
    assert!(output.contains("protocol="));
}

#[tokio::test]
async fn dropped_responder_shuts_connection_down() {
    init_tracing();
    let (proxy, mut stream) = pair();
    let reply = proxy.call("Say", say("anyone?"));

    let request = stream.next().await.unwrap().unwrap();
    assert!(request.is_two_way());
    assert_eq!(stream.state(), ConnectionState::Active);

    drop(request);
    assert_eq!(stream.state(), ConnectionState::ShuttingDown);
    assert!(stream.next().await.is_none());
    assert_eq!(stream.state(), ConnectionState::Closed);

    assert_eq!(
        reply.await,
        Err(Error::PeerClosed {
            protocol_name: "Echo".into()
        })
    );
}

#[tokio::test]
async fn drop_without_shutdown_keeps_serving() {
    let (proxy, mut stream) = pair();
    let _abandoned = proxy.call("Say", say("ignored"));
    let mut request = stream.next().await.unwrap().unwrap();
    request.take_responder().unwrap().drop_without_shutdown();
    drop(request);
    assert_eq!(stream.state(), ConnectionState::Active);

    proxy.send("Ping", Vec::new()).unwrap();
    let ping = stream.next().await.unwrap().unwrap();
    assert_eq!(ping.method_name(), "Ping");
    assert!(!ping.is_two_way());
}

#[tokio::test]
async fn peer_closure_resolves_pending_call() {
    let (client_end, server_end) = Channel::create();
    let proxy = Proxy::new(client_end, binding());
    let reply = proxy.call("Say", say("hello"));
    drop(server_end);

    assert_eq!(
        reply.await,
        Err(Error::PeerClosed {
            protocol_name: "Echo".into()
        })
    );
    assert!(proxy.is_closed());
    assert!(matches!(
        proxy.call("Say", say("late")).await,
        Err(Error::PeerClosed { .. })
    ));
}

#[tokio::test]
async fn request_with_wrong_magic_is_rejected_and_stream_continues() {
    let (client_end, server_end) = Channel::create();
    let mut stream = RequestStream::new(server_end, binding());

    let mut header = TransactionHeader::new(0, ordinal("Ping"), DynamicFlags::empty());
    header.magic_number = 2;
    client_end.write(bare(&header)).unwrap();
    assert_eq!(
        stream.next().await.unwrap().unwrap_err(),
        Error::IncompatibleWireFormat { magic: 2 }
    );

    let header = TransactionHeader::new(0, ordinal("Ping"), DynamicFlags::empty());
    client_end.write(bare(&header)).unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap().method_name(), "Ping");
}

#[tokio::test]
async fn unknown_ordinal_is_an_item_not_the_end() {
    init_tracing();
    let (client_end, server_end) = Channel::create();
    let mut stream = RequestStream::new(server_end, binding());

    let header = TransactionHeader::new(0, 0xdead, DynamicFlags::FLEXIBLE);
    client_end.write(bare(&header)).unwrap();
    assert_eq!(
        stream.next().await.unwrap().unwrap_err(),
        Error::UnknownOrdinal {
            ordinal: 0xdead,
            protocol_name: "Echo".into()
        }
    );

    // An event ordinal is not a request either.
    let header = TransactionHeader::new(0, ordinal("OnPing"), DynamicFlags::empty());
    client_end.write(bare(&header)).unwrap();
    assert!(matches!(
        stream.next().await.unwrap(),
        Err(Error::UnknownOrdinal { .. })
    ));

    let header = TransactionHeader::new(0, ordinal("Ping"), DynamicFlags::empty());
    client_end.write(bare(&header)).unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap().method_name(), "Ping");
    assert_eq!(stream.state(), ConnectionState::Active);
}

#[tokio::test]
async fn request_txid_must_match_method_kind() {
    let (client_end, server_end) = Channel::create();
    let mut stream = RequestStream::new(server_end, binding());

    let header = TransactionHeader::new(5, ordinal("Ping"), DynamicFlags::empty());
    client_end.write(bare(&header)).unwrap();
    assert_eq!(
        stream.next().await.unwrap().unwrap_err(),
        Error::InvalidRequestTxid {
            tx_id: 5,
            ordinal: ordinal("Ping")
        }
    );
}

#[tokio::test]
async fn reply_with_wrong_magic_fails_only_that_call() {
    let (client_end, server_end) = Channel::create();
    let proxy = Proxy::new(client_end, binding());

    let first = proxy.call("Say", say("one"));
    let second = proxy.call("Say", say("two"));
    let first_tx = read_tx_id(&server_end);
    let second_tx = read_tx_id(&server_end);

    let mismatched = raw_reply(first_tx, ordinal("Say"), 2);
    let matching = raw_reply(second_tx, ordinal("Say"), 1);
    server_end.write(mismatched).unwrap();
    server_end.write(matching).unwrap();

    assert_eq!(first.await, Err(Error::IncompatibleWireFormat { magic: 2 }));
    assert_eq!(second.await.unwrap(), say("raw"));
}

#[tokio::test]
async fn reply_with_wrong_ordinal_fails_the_call() {
    let (client_end, server_end) = Channel::create();
    let proxy = Proxy::new(client_end, binding());

    let reply = proxy.call("Say", say("one"));
    let tx_id = read_tx_id(&server_end);
    server_end.write(raw_reply(tx_id, 0xbad, 1)).unwrap();

    assert_eq!(
        reply.await,
        Err(Error::UnknownOrdinal {
            ordinal: 0xbad,
            protocol_name: "Echo".into()
        })
    );
}

#[tokio::test]
async fn dropped_future_discards_late_reply() {
    init_tracing();
    let (proxy, mut stream) = pair();

    let abandoned = proxy.call("Say", say("first"));
    let abandoned_tx = abandoned.tx_id().unwrap();
    drop(abandoned);
    let kept = proxy.call("Say", say("second"));
    assert_ne!(kept.tx_id(), Some(abandoned_tx));

    for _ in 0..2 {
        let (args, responder, _) = stream.next().await.unwrap().unwrap().into_parts();
        responder.unwrap().send(args).unwrap();
    }
    assert_eq!(kept.await.unwrap(), say("second"));
    let third = proxy.call("Say", say("third"));
    assert_eq!(third.tx_id(), Some(abandoned_tx + 2));
}

#[tokio::test]
async fn events_reach_the_event_stream() {
    let (proxy, stream) = pair();
    let mut events = proxy.take_event_stream();
    let control = stream.control_handle();

    control.send_event("OnPing", vec![Value::U32(3)]).unwrap();
    control.send_event("OnPing", vec![Value::U32(4)]).unwrap();

    assert_eq!(
        events.next().await.unwrap().unwrap(),
        Event {
            ordinal: ordinal("OnPing"),
            method: "OnPing".into(),
            values: vec![Value::U32(3)],
        }
    );
    let event = events.next().await.unwrap().unwrap();
    assert_eq!(event.values, vec![Value::U32(4)]);

    assert!(matches!(
        control.send_event("Say", say("nope")),
        Err(Error::InvalidMethodKind { .. })
    ));

    drop(control);
    drop(stream);
    assert!(events.next().await.is_none());
    assert!(events.next().await.is_none());
}

#[test]
#[should_panic(expected = "already taken")]
fn event_stream_can_only_be_taken_once() {
    let (proxy, _stream) = pair();
    let _events = proxy.take_event_stream();
    let _again = proxy.take_event_stream();
}

#[tokio::test]
async fn epitaph_reaches_pending_calls_and_events() {
    init_tracing();
    let (proxy, mut stream) = pair();
    let mut events = proxy.take_event_stream();
    let reply = proxy.call("Say", say("hello"));

    let control = stream.control_handle();
    control.shutdown_with_epitaph(Status::UNAVAILABLE);
    assert_eq!(stream.state(), ConnectionState::ShuttingDown);
    assert!(stream.next().await.is_none());

    let closed = Error::ClientChannelClosed {
        status: Status::UNAVAILABLE,
        protocol_name: "Echo".into(),
    };
    assert_eq!(reply.await, Err(closed.clone()));
    assert_eq!(events.next().await.unwrap().unwrap_err(), closed);
    assert!(events.next().await.is_none());
    assert_eq!(proxy.call("Say", say("late")).await, Err(closed));
}

#[tokio::test]
async fn transitional_method_without_handler() {
    let (proxy, mut stream) = pair();
    let dispatcher = echo_dispatcher();
    let _pending = proxy.call("Legacy", Vec::new());

    let request = stream.next().await.unwrap().unwrap();
    assert_eq!(
        dispatcher.dispatch(request),
        Err(Error::TransitionalMethodUnimplemented {
            method: "Legacy".into(),
            protocol_name: "Echo".into()
        })
    );
    assert_eq!(stream.state(), ConnectionState::Active);
}

#[tokio::test]
async fn call_with_timeout_gives_up() {
    let (proxy, _stream) = pair();
    assert_eq!(
        proxy
            .call_with_timeout("Say", say("slow"), Duration::from_millis(20))
            .await,
        Err(Error::TimedOut)
    );
}

#[tokio::test]
async fn calling_a_one_way_method_is_rejected() {
    let (proxy, _stream) = pair();
    assert!(matches!(
        proxy.call("Ping", Vec::new()).await,
        Err(Error::InvalidMethodKind { .. })
    ));
    assert!(matches!(
        proxy.send("Nope", Vec::new()),
        Err(Error::UnknownMethod { .. })
    ));
}

#[tokio::test]
async fn response_future_resolves_once() {
    let (proxy, _stream) = pair();
    let mut reply = proxy.call("Ping", Vec::new());
    assert!((&mut reply).await.is_err());
    assert_eq!((&mut reply).await, Err(Error::PollAfterCompletion));
}

/// A transport whose reads always fail.
struct Broken;

impl Transport for Broken {
    fn write(&self, _msg: MessageBuf) -> Result<(), TransportError> {
        Err(TransportError::Other("broken".into()))
    }

    fn try_read(&self) -> Result<ReadOutcome, TransportError> {
        Err(TransportError::Other("broken".into()))
    }

    fn poll_readable(&self, _cx: &mut Context<'_>) -> Poll<()> {
        Poll::Ready(())
    }

    fn wait_readable(&self, _deadline: Option<Instant>) -> bool {
        true
    }

    fn close(&self) {}

    fn is_closed(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn read_failure_ends_the_stream() {
    let mut stream = RequestStream::new(Broken, binding());
    assert_eq!(
        stream.next().await.unwrap().unwrap_err(),
        Error::ServerRequestRead(TransportError::Other("broken".into()))
    );
    assert!(stream.next().await.is_none());
    assert_eq!(stream.state(), ConnectionState::Closed);
}
