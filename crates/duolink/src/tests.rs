//! Tests for the registry, the inbound dispatcher and the peer, driven by hand.

use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use duopack::Decoder;
use duopack::Encoder;
use duorpc::CallEncoder;
use duorpc::CallResponse;
use duorpc::CallKind;
use duorpc::Failure;
use duorpc::FailureKind;
use duorpc::ObjectRef;
use duorpc::ReplyOkEncoder;
use duorpc::RpcFrame;
use duorpc::Shape;
use duorpc::Signature;
use duorpc::Value;
use duorpc::args;
use duorpc::decode_any_vals;
use duorpc::encode_vals_to_bytes;

use crate::bridge::Bridge;
use crate::dispatch::Dispatcher;
use crate::dispatch::IncomingCall;
use crate::error::BuildError;
use crate::error::CallError;
use crate::error::RegistryError;
use crate::objects::LiveObjects;
use crate::registry::Callable;
use crate::registry::CallableKind;
use crate::registry::Function;
use crate::registry::Methods;
use crate::registry::Registry;
use crate::registry::RegistryBuilder;
use crate::result::CallResult;
use crate::transport::DuplexChannelTransport;
use crate::transport::Transport;
use crate::transport::TransportError;

struct Counter {
    value: AtomicI64,
}

impl Counter {
    fn new(start: i64) -> Self {
        Self { value: AtomicI64::new(start) }
    }

    fn incr(&self, by: i64) -> i64 {
        self.value.fetch_add(by, Ordering::SeqCst) + by
    }

    fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }
}

fn counter_class(builder: RegistryBuilder) -> RegistryBuilder {
    builder.class(
        "Counter",
        |start: i64| Box::new(Counter::new(start)),
        Methods::new()
            .method("incr", |c: &Counter, by: i64| c.incr(by))
            .method("get", |c: &Counter| c.get())
            .method("boom", |_: &Counter| -> i64 { panic!("counter exploded") }),
    )
}

fn sample_registry() -> Registry {
    Registry::builder()
        .function("add", |a: i64, b: i64| a + b)
        .function("divide", |a: i64, b: i64| (a / b, a % b))
        .function("nothing", || ())
        .function("fail", || -> Result<i64, String> { Err("no luck".to_string()) })
        .function("panics", || -> i64 { panic!("deliberate") })
        .install(counter_class)
        .class("Maybe", |ok: bool| ok.then(|| Box::new(Counter::new(0))), Methods::<Counter>::new())
        .build()
        .expect("sample registry")
}

fn dispatcher() -> Dispatcher {
    Dispatcher::new(Arc::new(sample_registry()), Arc::new(LiveObjects::new()))
}

fn incoming(
    kind: CallKind,
    target: &str,
    object: Option<ObjectRef>,
    args: Vec<Value>,
) -> IncomingCall {
    IncomingCall {
        kind,
        target: target.to_string(),
        object,
        args: encode_vals_to_bytes(&args).expect("encode args"),
    }
}

fn serve(
    d: &Dispatcher,
    kind: CallKind,
    target: &str,
    object: Option<ObjectRef>,
    args: Vec<Value>,
) -> CallResponse {
    d.on_incoming_call(&incoming(kind, target, object, args))
}

fn expect_failure(response: CallResponse, kind: FailureKind) -> Failure {
    match response {
        Err(failure) => {
            assert_eq!(failure.kind, kind, "unexpected failure: {}", failure);
            failure
        }
        Ok(values) => panic!("expected {:?} failure, got {:?}", kind, values),
    }
}

fn construct(d: &Dispatcher, class: &str, args: Vec<Value>) -> ObjectRef {
    match serve(&d, CallKind::New, class, None, args) {
        Ok(values) => match values.as_slice() {
            [Value::Object(r)] => *r,
            other => panic!("constructor returned {:?}", other),
        },
        Err(failure) => panic!("construction failed: {}", failure),
    }
}

#[test]
fn test_register_reports_duplicate_name() {
    let mut builder = Registry::builder();
    let f = || Callable::Function(Function::new(Signature::new([]), |_| Ok(vec![])));

    builder.register("ping", f()).unwrap();
    let err = builder.register("ping", f()).unwrap_err();

    let expected =
        RegistryError::DuplicateName { kind: CallableKind::Function, name: "ping".into() };
    assert_eq!(err, expected);
}

#[test]
fn test_fluent_duplicate_surfaces_at_build() {
    let err = Registry::builder()
        .function("add", |a: i64, b: i64| a + b)
        .function("add", |a: f64, b: f64| a + b)
        .build()
        .unwrap_err();

    assert!(matches!(
        err,
        RegistryError::DuplicateName { kind: CallableKind::Function, ref name } if name == "add"
    ));
}

#[test]
fn test_duplicate_method_rejected() {
    let err = Registry::builder()
        .class(
            "Counter",
            |start: i64| Box::new(Counter::new(start)),
            Methods::new()
                .method("get", |c: &Counter| c.get())
                .method("get", |c: &Counter| c.get() * 2),
        )
        .build()
        .unwrap_err();

    let expected = RegistryError::DuplicateMethod { class: "Counter".into(), method: "get".into() };
    assert_eq!(err, expected);
}

#[test]
fn test_functions_and_classes_have_separate_namespaces() {
    let registry = Registry::builder()
        .function("Counter", || 1i64)
        .install(counter_class)
        .build()
        .unwrap();

    assert!(registry.contains(CallableKind::Function, "Counter"));
    assert!(registry.contains(CallableKind::Constructor, "Counter"));
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_lookup_unknown_name() {
    let registry = sample_registry();
    let err = registry.lookup(CallableKind::Function, "missing").unwrap_err();
    let expected = RegistryError::NotFound { kind: CallableKind::Function, name: "missing".into() };
    assert_eq!(err, expected);
    assert_eq!(registry.names(CallableKind::Constructor), vec!["Counter", "Maybe"]);
}

#[test]
fn test_typed_signature_from_closure() {
    let registry = sample_registry();
    let add = registry.function("add").unwrap();
    assert_eq!(add.signature(), &Signature::new([Shape::Int, Shape::Int]));
}

#[test]
fn test_dispatch_function() {
    let d = dispatcher();
    let out = serve(&d, CallKind::Function, "add", None, args![2, 3]).unwrap();
    assert_eq!(out, vec![Value::Int(5)]);

    let out = serve(&d, CallKind::Function, "divide", None, args![17, 5]).unwrap();
    assert_eq!(out, vec![Value::Int(3), Value::Int(2)]);

    let out = serve(&d, CallKind::Function, "nothing", None, args![]).unwrap();
    assert!(out.is_empty());
}

#[test]
fn test_dispatch_unknown_function() {
    let d = dispatcher();
    let response = serve(&d, CallKind::Function, "nope", None, args![]);
    let failure = expect_failure(response, FailureKind::NotFound);
    assert!(failure.message.contains("nope"));
}

#[test]
fn test_dispatch_rejects_wrong_argument_shape() {
    let d = dispatcher();
    let response = serve(&d, CallKind::Function, "add", None, args![2, "three"]);
    expect_failure(response, FailureKind::Decode);
    expect_failure(serve(&d, CallKind::Function, "add", None, args![2]), FailureKind::Decode);
    // floats are never coerced to ints
    expect_failure(serve(&d, CallKind::Function, "add", None, args![2.0, 3]), FailureKind::Decode);
}

#[test]
fn test_dispatch_catches_panic() {
    let d = dispatcher();
    let response = serve(&d, CallKind::Function, "panics", None, args![]);
    let failure = expect_failure(response, FailureKind::Panic);
    assert!(failure.message.contains("deliberate"));

    // the dispatcher keeps serving
    let out = serve(&d, CallKind::Function, "add", None, args![1, 1]).unwrap();
    assert_eq!(out, vec![Value::Int(2)]);
}

#[test]
fn test_dispatch_raised_error() {
    let d = dispatcher();
    let response = serve(&d, CallKind::Function, "fail", None, args![]);
    let failure = expect_failure(response, FailureKind::Raised);
    assert_eq!(failure.message, "no luck");
}

#[test]
fn test_object_lifecycle() {
    let d = dispatcher();
    let counter = construct(&d, "Counter", args![10]);
    assert!(d.objects().contains(counter));

    let out = serve(&d, CallKind::Method, "incr", Some(counter), args![5]).unwrap();
    assert_eq!(out, vec![Value::Int(15)]);
    let out = serve(&d, CallKind::Method, "get", Some(counter), args![]).unwrap();
    assert_eq!(out, vec![Value::Int(15)]);

    let out = serve(&d, CallKind::Close, "", Some(counter), args![]).unwrap();
    assert!(out.is_empty());
    assert!(d.objects().is_empty());

    expect_failure(serve(&d, CallKind::Method, "get", Some(counter), args![]), FailureKind::Stale);
    expect_failure(serve(&d, CallKind::Close, "", Some(counter), args![]), FailureKind::Stale);
}

#[test]
fn test_distinct_references() {
    let d = dispatcher();
    let a = construct(&d, "Counter", args![1]);
    let b = construct(&d, "Counter", args![2]);
    assert_ne!(a, b);
    assert_eq!(d.objects().len(), 2);
}

#[test]
fn test_method_panic_keeps_object_alive() {
    let d = dispatcher();
    let counter = construct(&d, "Counter", args![3]);
    expect_failure(serve(&d, CallKind::Method, "boom", Some(counter), args![]), FailureKind::Panic);
    let out = serve(&d, CallKind::Method, "get", Some(counter), args![]).unwrap();
    assert_eq!(out, vec![Value::Int(3)]);
}

#[test]
fn test_unknown_method() {
    let d = dispatcher();
    let counter = construct(&d, "Counter", args![0]);
    let response = serve(&d, CallKind::Method, "reset", Some(counter), args![]);
    let failure = expect_failure(response, FailureKind::NotFound);
    assert!(failure.message.contains("reset"));
}

#[test]
fn test_constructor_without_instance() {
    let d = dispatcher();
    expect_failure(serve(&d, CallKind::New, "Maybe", None, args![false]), FailureKind::Raised);
    assert!(d.objects().is_empty());
    construct(&d, "Maybe", args![true]);
}

#[test]
fn test_method_without_object_is_protocol_failure() {
    let d = dispatcher();
    expect_failure(serve(&d, CallKind::Method, "get", None, args![]), FailureKind::Protocol);
}

#[test]
fn test_method_call_racing_close() {
    let d = dispatcher();

    for _ in 0..32 {
        let counter = construct(&d, "Counter", args![0]);
        std::thread::scope(|s| {
            let caller = s.spawn(|| {
                (0..200)
                    .map(|_| serve(&d, CallKind::Method, "incr", Some(counter), args![1]))
                    .collect::<Vec<_>>()
            });
            let closer = s.spawn(|| {
                std::thread::yield_now();
                serve(&d, CallKind::Close, "", Some(counter), args![])
            });

            assert_eq!(closer.join().unwrap(), Ok(vec![]));

            // once a call sees the object gone, no later call finds it again
            let mut gone = false;
            for response in caller.join().unwrap() {
                match response {
                    Ok(values) => {
                        assert!(!gone, "object answered after it was seen closed");
                        assert!(matches!(values.as_slice(), [Value::Int(n)] if *n > 0));
                    }
                    Err(failure) => {
                        assert_eq!(failure.kind, FailureKind::Stale, "{}", failure);
                        gone = true;
                    }
                }
            }
        });
    }

    assert!(d.objects().is_empty());
}

#[test]
fn test_live_objects_stale_versus_unknown() {
    let d = dispatcher();
    let counter = construct(&d, "Counter", args![0]);
    d.objects().remove(counter).unwrap();

    assert_eq!(d.objects().get(counter).err().map(|f| f.kind), Some(FailureKind::Stale));
    let forged = d.objects().get(ObjectRef(9_999));
    assert_eq!(forged.err().map(|f| f.kind), Some(FailureKind::NotFound));
    assert_eq!(d.objects().get(ObjectRef(0)).err().map(|f| f.kind), Some(FailureKind::NotFound));
}

#[test]
fn test_resolved_result_collapses_values() {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let none = CallResult::resolved(Ok(vec![]), rt.handle().clone());
    assert_eq!(none.get().unwrap(), Value::Unit);
    assert!(none.is_resolved());
    assert_eq!(none.seq(), None);

    let one = CallResult::resolved(Ok(vec![Value::Int(4)]), rt.handle().clone());
    assert_eq!(one.get_as::<i64>().unwrap(), 4);
    assert_eq!(crate::result::get::<i64>(&one).unwrap(), 4);

    let two = CallResult::resolved(Ok(vec![Value::Int(4), Value::Int(1)]), rt.handle().clone());
    assert_eq!(two.get_as::<(i64, i64)>().unwrap(), (4, 1));
    assert_eq!(two.get_all().unwrap().len(), 2);
}

#[test]
fn test_resolved_result_reports_type_mismatch() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let result = CallResult::resolved(Ok(vec![Value::Str("x".into())]), rt.handle().clone());
    assert!(matches!(result.get_as::<i64>(), Err(CallError::TypeMismatch { .. })));
    // the value itself is still readable
    assert_eq!(result.get().unwrap(), Value::Str("x".into()));
}

#[test]
#[should_panic(expected = "call failed")]
fn test_must_get_panics_on_failure() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let result = CallResult::resolved(Err(CallError::Cancelled), rt.handle().clone());
    result.must_get();
}

#[test]
fn test_connect_without_runtime() {
    let (a, _b) = DuplexChannelTransport::pair();
    let err = Bridge::builder("lonely").connect(Box::new(a)).unwrap_err();
    assert!(matches!(err, BuildError::NoRuntime));
}

/// Hand-driven far end of a bridge.
struct FarEnd {
    rt: tokio::runtime::Runtime,
    transport: DuplexChannelTransport,
}

impl FarEnd {
    fn connect(registry: Registry) -> (Self, Bridge) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (near, far) = DuplexChannelTransport::pair();
        let bridge = Bridge::builder("near")
            .registry(registry)
            .runtime(rt.handle().clone())
            .connect(Box::new(near))
            .unwrap();
        (Self { rt, transport: far }, bridge)
    }

    fn send(&self, bytes: &[u8]) {
        self.rt.block_on(self.transport.send(bytes)).unwrap();
    }

    fn recv(&self) -> Vec<u8> {
        let frame = self.rt.block_on(async {
            tokio::time::timeout(Duration::from_secs(5), self.transport.recv()).await
        });
        frame.expect("frame in time").unwrap().expect("stream open")
    }
}

#[test]
fn test_serves_call_from_raw_frame() {
    let (far, _bridge) = FarEnd::connect(sample_registry());
    let call_args = args![20, 22];
    let call = CallEncoder::new(42, CallKind::Function, "add", None, &call_args);
    let call = call.to_bytes().unwrap();
    far.send(&call);

    let reply = far.recv();
    let mut dec = Decoder::new(&reply);
    match RpcFrame::decode(&mut dec).unwrap() {
        RpcFrame::Reply(reply) => {
            assert_eq!(reply.seq, 42);
            let values = decode_any_vals(reply.status.unwrap()).unwrap();
            assert_eq!(values, vec![Value::Int(42)]);
        }
        RpcFrame::Call(_) => panic!("expected a reply"),
    }
}

#[test]
fn test_malformed_call_gets_protocol_failure() {
    let (far, bridge) = FarEnd::connect(sample_registry());

    let mut enc = Encoder::new();
    enc.variant_begin("Call").unwrap();
    enc.map_begin().unwrap();
    enc.variant_begin("seq").unwrap();
    enc.u64(7).unwrap();
    enc.variant_end().unwrap();
    enc.variant_begin("kind").unwrap();
    enc.variant_begin("teleport").unwrap();
    enc.unit().unwrap();
    enc.variant_end().unwrap();
    enc.variant_end().unwrap();
    enc.map_end().unwrap();
    enc.variant_end().unwrap();
    far.send(&enc.into_bytes().unwrap());

    let reply = far.recv();
    let mut dec = Decoder::new(&reply);
    match RpcFrame::decode(&mut dec).unwrap() {
        RpcFrame::Reply(reply) => {
            assert_eq!(reply.seq, 7);
            assert_eq!(reply.status.err().map(|f| f.kind), Some(FailureKind::Protocol));
        }
        RpcFrame::Call(_) => panic!("expected a reply"),
    }
    assert!(!bridge.is_closed());
}

#[test]
fn test_stray_reply_is_ignored() {
    let (far, bridge) = FarEnd::connect(sample_registry());
    far.send(&ReplyOkEncoder::new(999, &[Value::Int(1)]).to_bytes().unwrap());

    // still serving afterwards
    far.send(&CallEncoder::new(1, CallKind::Function, "nothing", None, &[]).to_bytes().unwrap());
    let reply = far.recv();
    assert_eq!(duorpc::decode_seq(&reply).unwrap(), 1);
    assert!(!bridge.is_closed());
}

#[test]
fn test_garbage_frame_fails_pending_calls() {
    let (far, bridge) = FarEnd::connect(Registry::default());

    let pending = bridge.call_function("slow", args![]);
    // the call goes out before the garbage arrives
    let _ = far.recv();
    far.send(&[0xff, 0x00, 0x13]);

    assert!(matches!(pending.get(), Err(CallError::Protocol(_))));
    assert!(bridge.is_closed());
    assert!(matches!(bridge.call_function("later", args![]).get(), Err(CallError::Transport(_))));
}

#[test]
fn test_reply_routes_to_matching_call() {
    let (far, bridge) = FarEnd::connect(Registry::default());

    let first = bridge.call_function("first", args![]);
    let second = bridge.call_function("second", args![]);
    let seq_first = duorpc::decode_seq(&far.recv()).unwrap();
    let seq_second = duorpc::decode_seq(&far.recv()).unwrap();
    assert_eq!(first.seq(), Some(seq_first));
    assert_eq!(second.seq(), Some(seq_second));

    // answered out of order
    far.send(&ReplyOkEncoder::new(seq_second, &[Value::Str("two".into())]).to_bytes().unwrap());
    far.send(&ReplyOkEncoder::new(seq_first, &[Value::Str("one".into())]).to_bytes().unwrap());

    assert_eq!(first.get_as::<String>().unwrap(), "one");
    assert_eq!(second.get_as::<String>().unwrap(), "two");
}

#[test]
fn test_cancel_then_late_reply() {
    let (far, bridge) = FarEnd::connect(Registry::default());

    let call = bridge.call_function("slow", args![]);
    let seq = duorpc::decode_seq(&far.recv()).unwrap();
    assert!(call.cancel());
    assert!(matches!(call.get(), Err(CallError::Cancelled)));

    far.send(&ReplyOkEncoder::new(seq, &[Value::Int(1)]).to_bytes().unwrap());
    // still cancelled; the late reply was dropped
    assert!(matches!(call.get(), Err(CallError::Cancelled)));
    assert!(!call.cancel());
}

#[test]
fn test_oversized_frame_fails_only_that_call() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (near, far) = DuplexChannelTransport::pair();
    let bridge = Bridge::builder("near")
        .runtime(rt.handle().clone())
        .connect(Box::new(near.with_max_frame(256)))
        .unwrap();

    let big = bridge.call_function("store", vec![Value::Bytes(vec![0; 1024])]);
    assert!(matches!(big.get(), Err(CallError::Transport(TransportError::PayloadTooLarge))));

    // the connection survives
    let small = bridge.call_function("store", vec![Value::Bytes(vec![0; 8])]);
    let seq = rt
        .block_on(far.recv())
        .unwrap()
        .map(|frame| duorpc::decode_seq(&frame).unwrap())
        .expect("small frame delivered");
    assert_eq!(small.seq(), Some(seq));
    assert!(!bridge.is_closed());
}
