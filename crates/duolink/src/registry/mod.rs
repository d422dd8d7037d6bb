//! # Registry
//!
//! The table of everything this side exposes to the other runtime: named
//! functions and named classes (constructors plus their method tables).
//!
//! ## Lifecycle
//!
//! - **Startup**: a `RegistryBuilder` collects callables. Name collisions are
//!   configuration errors; `build()` fails fast on the first one.
//! - **Serving**: the built `Registry` is immutable and shared as `Arc<Registry>`.
//!   Lookups take `&self` and never lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use duorpc::CallResponse;
use duorpc::Failure;
use duorpc::Signature;
use duorpc::Value;

use crate::error::RegistryError;

mod adapt;
mod class;

pub use adapt::ConstructorOutput;
pub use adapt::IntoConstructor;
pub use adapt::IntoFunction;
pub use adapt::IntoMethod;
pub use class::Methods;
pub use class::RemoteObject;

pub type Result<T> = std::result::Result<T, RegistryError>;

/// The two namespaces a name can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallableKind {
    Function,
    Constructor,
}

impl fmt::Display for CallableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function => write!(f, "function"),
            Self::Constructor => write!(f, "constructor"),
        }
    }
}

/// Outcome of a constructor: the instance to store in the live-object table.
pub type Constructed = std::result::Result<Arc<dyn RemoteObject>, Failure>;

type FunctionBody = dyn Fn(Vec<Value>) -> CallResponse + Send + Sync;
type ConstructorBody = dyn Fn(Vec<Value>) -> Constructed + Send + Sync;

/// A registered function.
pub struct Function {
    signature: Signature,
    body: Box<FunctionBody>,
}

impl Function {
    pub fn new<F>(signature: Signature, body: F) -> Self
    where
        F: Fn(Vec<Value>) -> CallResponse + Send + Sync + 'static,
    {
        Self { signature, body: Box::new(body) }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Runs the function on already-decoded arguments.
    pub fn call(&self, args: Vec<Value>) -> CallResponse {
        (self.body)(args)
    }
}

/// A registered class factory.
pub struct Constructor {
    signature: Signature,
    body: Box<ConstructorBody>,
}

impl Constructor {
    pub fn new<F>(signature: Signature, body: F) -> Self
    where
        F: Fn(Vec<Value>) -> Constructed + Send + Sync + 'static,
    {
        Self { signature, body: Box::new(body) }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Builds a fresh instance from already-decoded arguments.
    pub fn construct(&self, args: Vec<Value>) -> Constructed {
        (self.body)(args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function").field("signature", &self.signature).finish_non_exhaustive()
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor").field("signature", &self.signature).finish_non_exhaustive()
    }
}

/// One executable unit, tagged with its kind.
#[derive(Debug)]
pub enum Callable {
    Function(Function),
    Constructor(Constructor),
}

impl Callable {
    pub fn kind(&self) -> CallableKind {
        match self {
            Self::Function(_) => CallableKind::Function,
            Self::Constructor(_) => CallableKind::Constructor,
        }
    }

    pub fn signature(&self) -> &Signature {
        match self {
            Self::Function(f) => f.signature(),
            Self::Constructor(c) => c.signature(),
        }
    }
}

/// A group of exports installed together, e.g. one application module.
///
/// Any `FnOnce(RegistryBuilder) -> RegistryBuilder` is a group.
pub trait Exports {
    fn export(self, builder: RegistryBuilder) -> RegistryBuilder;
}

impl<F> Exports for F
where
    F: FnOnce(RegistryBuilder) -> RegistryBuilder,
{
    fn export(self, builder: RegistryBuilder) -> RegistryBuilder {
        self(builder)
    }
}

/// Immutable name → callable table.
#[derive(Default)]
pub struct Registry {
    functions: HashMap<String, Callable>,
    constructors: HashMap<String, Callable>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    fn table(&self, kind: CallableKind) -> &HashMap<String, Callable> {
        match kind {
            CallableKind::Function => &self.functions,
            CallableKind::Constructor => &self.constructors,
        }
    }

    pub fn lookup(&self, kind: CallableKind, name: &str) -> Result<&Callable> {
        self.table(kind)
            .get(name)
            .ok_or_else(|| RegistryError::NotFound { kind, name: name.to_string() })
    }

    pub fn function(&self, name: &str) -> Result<&Function> {
        match self.lookup(CallableKind::Function, name)? {
            Callable::Function(f) => Ok(f),
            Callable::Constructor(_) => Err(RegistryError::NotFound {
                kind: CallableKind::Function,
                name: name.to_string(),
            }),
        }
    }

    pub fn constructor(&self, name: &str) -> Result<&Constructor> {
        match self.lookup(CallableKind::Constructor, name)? {
            Callable::Constructor(c) => Ok(c),
            Callable::Function(_) => Err(RegistryError::NotFound {
                kind: CallableKind::Constructor,
                name: name.to_string(),
            }),
        }
    }

    pub fn contains(&self, kind: CallableKind, name: &str) -> bool {
        self.table(kind).contains_key(name)
    }

    /// Registered names of one kind, sorted.
    pub fn names(&self, kind: CallableKind) -> Vec<&str> {
        let mut names: Vec<&str> = self.table(kind).keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len() + self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("functions", &self.names(CallableKind::Function))
            .field("constructors", &self.names(CallableKind::Constructor))
            .finish()
    }
}

/// Collects callables at startup.
///
/// `register` reports a collision immediately. The fluent helpers remember the
/// first collision and report it from `build()`, so a whole declaration chain
/// can be written without intermediate error handling.
#[derive(Default)]
pub struct RegistryBuilder {
    registry: Registry,
    error: Option<RegistryError>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one callable under `name`. Its kind is taken from the callable.
    pub fn register(&mut self, name: impl Into<String>, callable: Callable) -> Result<()> {
        let name = name.into();
        let kind = callable.kind();
        let table = match kind {
            CallableKind::Function => &mut self.registry.functions,
            CallableKind::Constructor => &mut self.registry.constructors,
        };
        if table.contains_key(&name) {
            return Err(RegistryError::DuplicateName { kind, name });
        }
        table.insert(name, callable);
        Ok(())
    }

    fn register_deferred(mut self, name: impl Into<String>, callable: Callable) -> Self {
        if let Err(e) = self.register(name, callable) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Registers a typed function; argument shapes come from the parameter types.
    pub fn function<Args, F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: IntoFunction<Args>,
    {
        let signature = F::signature();
        let function = Function::new(signature, move |args| f.apply(args));
        self.register_deferred(name, Callable::Function(function))
    }

    /// Registers a function that works on raw values against an explicit signature.
    pub fn raw_function<F>(self, name: impl Into<String>, signature: Signature, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> CallResponse + Send + Sync + 'static,
    {
        self.register_deferred(name, Callable::Function(Function::new(signature, f)))
    }

    /// Registers a class: a typed constructor and the methods its instances answer.
    pub fn class<T, Args, C>(self, name: impl Into<String>, ctor: C, methods: Methods<T>) -> Self
    where
        T: Send + Sync + 'static,
        C: IntoConstructor<T, Args>,
    {
        let name = name.into();
        let (methods, duplicate) = methods.seal();
        let builder = match duplicate {
            Some(method) => {
                self.defer(RegistryError::DuplicateMethod { class: name.clone(), method })
            }
            None => self,
        };

        let class_name: Arc<str> = Arc::from(name.as_str());
        let constructor = Constructor::new(C::signature(), move |args: Vec<Value>| -> Constructed {
            let instance = ctor.construct(args)?;
            Ok(class::bind(class_name.clone(), instance, methods.clone()))
        });
        builder.register_deferred(name, Callable::Constructor(constructor))
    }

    /// Registers a constructor that builds its own `RemoteObject`.
    pub fn raw_constructor<F>(self, name: impl Into<String>, signature: Signature, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Constructed + Send + Sync + 'static,
    {
        self.register_deferred(name, Callable::Constructor(Constructor::new(signature, f)))
    }

    /// Installs one declarative group of exports.
    pub fn install(self, group: impl Exports) -> Self {
        group.export(self)
    }

    fn defer(mut self, e: RegistryError) -> Self {
        self.error.get_or_insert(e);
        self
    }

    pub fn build(self) -> Result<Registry> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.registry),
        }
    }
}
