use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fathom_codec::Value;
use fathom_schema::{LibraryBuilder, NO_PARAMS, Type};
use fathom_session::mem::Channel;
use fathom_session::{Error, ProtocolBinding, RequestStream, SynchronousProxy};
use fathom_wire::Status;
use futures_util::StreamExt;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn binding() -> ProtocolBinding {
    let mut builder = LibraryBuilder::new("test.sync");
    builder
        .add_protocol("Echo")
        .two_way(
            "Say",
            [("text", Type::string())],
            [("text", Type::string())],
        )
        .one_way("Ping", NO_PARAMS)
        .event("OnPing", [("count", Type::u32())]);
    ProtocolBinding::new(Arc::new(builder.build().unwrap()), "Echo").unwrap()
}

fn pair() -> (SynchronousProxy, RequestStream) {
    let (client_end, server_end) = Channel::create();
    (
        SynchronousProxy::new(client_end, binding()),
        RequestStream::new(server_end, binding()),
    )
}

fn soon() -> Option<Instant> {
    Some(Instant::now() + Duration::from_secs(5))
}

#[test]
fn concurrent_callers_get_their_own_replies() {
    init_tracing();
    let (proxy, mut stream) = pair();

    // Collect both requests, then answer them newest first.
    let server = thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let mut pending = Vec::new();
            while pending.len() < 2 {
                let (args, responder, _) = stream.next().await.unwrap().unwrap().into_parts();
                pending.push((args, responder.unwrap()));
            }
            for (args, responder) in pending.into_iter().rev() {
                responder.send(args).unwrap();
            }
            stream
        })
    });

    let callers: Vec<_> = ["first", "second"]
        .into_iter()
        .map(|text| {
            let proxy = proxy.clone();
            thread::spawn(move || proxy.call("Say", vec![Value::string(text)], soon()))
        })
        .collect();
    let replies: Vec<_> = callers
        .into_iter()
        .map(|caller| caller.join().unwrap())
        .collect();

    assert_eq!(replies[0], Ok(vec![Value::string("first")]));
    assert_eq!(replies[1], Ok(vec![Value::string("second")]));
    let _stream = server.join().unwrap();
}

#[test]
fn deadline_passes_without_reply() {
    let (proxy, _stream) = pair();
    let deadline = Some(Instant::now() + Duration::from_millis(20));
    assert_eq!(
        proxy.call("Say", vec![Value::string("slow")], deadline),
        Err(Error::TimedOut)
    );
    assert!(!proxy.is_closed());
}

#[test]
fn peer_closure_wakes_blocked_caller() {
    let (proxy, stream) = pair();
    let caller = {
        let proxy = proxy.clone();
        let args = vec![Value::string("hello")];
        thread::spawn(move || proxy.call("Say", args, None))
    };
    thread::sleep(Duration::from_millis(20));
    drop(stream);

    assert_eq!(
        caller.join().unwrap(),
        Err(Error::PeerClosed {
            protocol_name: "Echo".into()
        })
    );
    assert!(proxy.is_closed());
}

#[test]
fn events_and_epitaph() {
    let (proxy, mut stream) = pair();
    let control = stream.control_handle();
    control.send_event("OnPing", vec![Value::U32(7)]).unwrap();

    let event = proxy.wait_for_event(soon()).unwrap();
    assert_eq!(event.method, "OnPing");
    assert_eq!(event.values, vec![Value::U32(7)]);
    assert_eq!(
        proxy.wait_for_event(Some(Instant::now() + Duration::from_millis(10))),
        Err(Error::TimedOut)
    );

    control.shutdown_with_epitaph(Status::NOT_SUPPORTED);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    assert!(runtime.block_on(stream.next()).is_none());

    let closed = Error::ClientChannelClosed {
        status: Status::NOT_SUPPORTED,
        protocol_name: "Echo".into(),
    };
    assert_eq!(proxy.wait_for_event(soon()), Err(closed.clone()));
    let late = proxy.call("Say", vec![Value::string("late")], soon());
    assert_eq!(late, Err(closed.clone()));
    assert_eq!(proxy.send("Ping", Vec::new()), Err(closed));
}
