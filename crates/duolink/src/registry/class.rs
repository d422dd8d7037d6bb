//! Classes: method tables and the objects bound to them.

use std::collections::HashMap;
use std::sync::Arc;

use duorpc::CallResponse;
use duorpc::Failure;
use duorpc::FailureKind;
use duorpc::Signature;
use duorpc::Value;

use crate::registry::IntoMethod;

/// A live instance the dispatcher can call methods on.
///
/// Methods take `&self`. An object that mutates state keeps it behind
/// interior mutability, so the live-object table never holds a lock while
/// user code runs.
pub trait RemoteObject: Send + Sync {
    fn class_name(&self) -> &str;

    /// Parameter shapes of `method`, or `None` if the object has no such method.
    fn signature(&self, method: &str) -> Option<&Signature>;

    fn invoke(&self, method: &str, args: Vec<Value>) -> CallResponse;
}

type MethodBody<T> = dyn Fn(&T, Vec<Value>) -> CallResponse + Send + Sync;

struct Method<T> {
    signature: Signature,
    body: Box<MethodBody<T>>,
}

/// The methods instances of one class answer, by name.
pub struct Methods<T> {
    table: HashMap<String, Method<T>>,
    duplicate: Option<String>,
}

impl<T> Default for Methods<T> {
    fn default() -> Self {
        Self { table: HashMap::new(), duplicate: None }
    }
}

impl<T: Send + Sync + 'static> Methods<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a typed method, e.g. `|c: &Counter, n: i64| c.incr(n)`.
    pub fn method<Args, M>(self, name: impl Into<String>, m: M) -> Self
    where
        M: IntoMethod<T, Args>,
    {
        let body = move |this: &T, args: Vec<Value>| m.apply_to(this, args);
        self.insert(name.into(), M::signature(), Box::new(body))
    }

    /// Adds a method that works on raw values against an explicit signature.
    pub fn raw_method<F>(self, name: impl Into<String>, signature: Signature, f: F) -> Self
    where
        F: Fn(&T, Vec<Value>) -> CallResponse + Send + Sync + 'static,
    {
        self.insert(name.into(), signature, Box::new(f))
    }

    fn insert(mut self, name: String, signature: Signature, body: Box<MethodBody<T>>) -> Self {
        if self.table.contains_key(&name) {
            self.duplicate.get_or_insert(name);
        } else {
            self.table.insert(name, Method { signature, body });
        }
        self
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Freezes the table for sharing, handing back the first duplicated name.
    pub(crate) fn seal(mut self) -> (Arc<Self>, Option<String>) {
        let duplicate = self.duplicate.take();
        (Arc::new(self), duplicate)
    }
}

/// An instance paired with its class's method table.
struct Bound<T> {
    class: Arc<str>,
    instance: Box<T>,
    methods: Arc<Methods<T>>,
}

impl<T: Send + Sync + 'static> RemoteObject for Bound<T> {
    fn class_name(&self) -> &str {
        &self.class
    }

    fn signature(&self, method: &str) -> Option<&Signature> {
        self.methods.table.get(method).map(|m| &m.signature)
    }

    fn invoke(&self, method: &str, args: Vec<Value>) -> CallResponse {
        match self.methods.table.get(method) {
            Some(m) => (m.body)(self.instance.as_ref(), args),
            None => Err(Failure::new(
                FailureKind::NotFound,
                format!("class '{}' has no method '{}'", self.class, method),
            )),
        }
    }
}

pub(crate) fn bind<T: Send + Sync + 'static>(
    class: Arc<str>,
    instance: Box<T>,
    methods: Arc<Methods<T>>,
) -> Arc<dyn RemoteObject> {
    Arc::new(Bound { class, instance, methods })
}
