//! Shared fixtures: a sample host export set and connected bridge pairs.

#![allow(dead_code)]

use std::sync::Mutex;

use duolink::Bridge;
use duolink::DuplexChannelTransport;
use duolink::Failure;
use duolink::FromValue;
use duolink::IntoResults;
use duolink::IntoValue;
use duolink::Methods;
use duolink::Registry;
use duolink::RegistryBuilder;
use duolink::Shape;
use duolink::Value;

/// Two connected bridges on a private runtime. The runtime is declared last
/// so the bridges are dropped while it still runs.
pub struct Pair {
    pub host: Bridge,
    pub peer: Bridge,
    pub rt: tokio::runtime::Runtime,
}

pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("Failed to create runtime")
}

pub fn connect(host: Registry, peer: Registry) -> Pair {
    duolink::telemetry::init();
    let rt = runtime();
    let (a, b) = DuplexChannelTransport::pair();
    let host = Bridge::builder("host")
        .registry(host)
        .runtime(rt.handle().clone())
        .connect(Box::new(a))
        .expect("Failed to connect host");
    let peer = Bridge::builder("peer")
        .registry(peer)
        .runtime(rt.handle().clone())
        .connect(Box::new(b))
        .expect("Failed to connect peer");
    Pair { host, peer, rt }
}

/// A pair where only the host exports anything.
pub fn host_pair() -> Pair {
    connect(host_registry(), Registry::default())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl FromValue for Point {
    fn shape() -> Shape {
        Shape::map(Shape::Int)
    }

    fn from_value(value: Value) -> duorpc::Result<Self> {
        let coord = |name: &str| match value.field(name) {
            Some(Value::Int(n)) => Ok(*n),
            Some(other) => Err(duorpc::Error::TypeMismatch {
                expected: "int".into(),
                found: other.kind().into(),
            }),
            None => Err(duorpc::Error::ProtocolViolation(format!("point without '{}'", name))),
        };
        Ok(Point { x: coord("x")?, y: coord("y")? })
    }
}

impl IntoValue for Point {
    fn into_value(self) -> Value {
        Value::Map(vec![("x".into(), Value::Int(self.x)), ("y".into(), Value::Int(self.y))])
    }
}

impl IntoResults for Point {
    fn into_results(self) -> Result<Vec<Value>, Failure> {
        Ok(vec![self.into_value()])
    }
}

pub struct Counter {
    value: Mutex<i64>,
}

impl Counter {
    pub fn new(start: i64) -> Self {
        Self { value: Mutex::new(start) }
    }

    pub fn incr(&self, by: i64) -> i64 {
        let mut value = self.value.lock().unwrap();
        *value += by;
        *value
    }

    pub fn get(&self) -> i64 {
        *self.value.lock().unwrap()
    }
}

pub fn counter_class(builder: RegistryBuilder) -> RegistryBuilder {
    builder.class(
        "Counter",
        |start: i64| Box::new(Counter::new(start)),
        Methods::new()
            .method("incr", |c: &Counter, by: i64| c.incr(by))
            .method("get", |c: &Counter| c.get()),
    )
}

pub fn arithmetic(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .function("Divide", |a: i64, b: i64| -> Result<(i64, i64), String> {
            if b == 0 {
                return Err("division by zero".into());
            }
            Ok((a / b, a % b))
        })
        .function("NoReturnVal", |_: String| ())
        .function("Add2Points", |a: Point, b: Point| Point { x: a.x + b.x, y: a.y + b.y })
        .function("Echo", |s: String| s)
        .function("Explode", || -> i64 { panic!("kaboom") })
}

pub fn host_registry() -> Registry {
    Registry::builder().install(arithmetic).install(counter_class).build().expect("host registry")
}

/// Polls `check` until it holds or five seconds pass.
pub fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    check()
}
