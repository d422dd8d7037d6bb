//! # Value Domain
//!
//! The dynamic representation both runtimes agree on. Neither side shares a
//! type system with the other, so everything crossing the boundary is a
//! `Value`, optionally checked against a `Shape`.

use std::fmt;

/// Opaque identifier for one live object owned by the runtime that created it.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectRef(pub u64);

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj-{}", self.0)
    }
}

/// A boundary-neutral value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// No payload; also stands in for "none".
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Named fields in declaration order (records, structs, string-keyed maps).
    Map(Vec<(String, Value)>),
    Object(ObjectRef),
}

impl Value {
    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }

    /// Looks up a field of a `Map` value by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

/// What a parameter accepts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Shape {
    Any,
    Unit,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    List(Box<Shape>),
    /// String-keyed fields whose values all have the inner shape.
    Map(Box<Shape>),
    Object,
    /// `Unit` or the inner shape.
    Optional(Box<Shape>),
}

impl Shape {
    pub fn list(inner: Shape) -> Self {
        Shape::List(Box::new(inner))
    }

    pub fn map(inner: Shape) -> Self {
        Shape::Map(Box::new(inner))
    }

    pub fn optional(inner: Shape) -> Self {
        Shape::Optional(Box::new(inner))
    }

    /// Structural check of an already-decoded value.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Shape::Any, _) => true,
            (Shape::Unit, Value::Unit) => true,
            (Shape::Bool, Value::Bool(_)) => true,
            (Shape::Int, Value::Int(_)) => true,
            (Shape::Float, Value::Float(_)) => true,
            (Shape::Str, Value::Str(_)) => true,
            (Shape::Bytes, Value::Bytes(_)) => true,
            (Shape::Object, Value::Object(_)) => true,
            (Shape::List(inner), Value::List(items)) => items.iter().all(|v| inner.accepts(v)),
            (Shape::Map(inner), Value::Map(fields)) => fields.iter().all(|(_, v)| inner.accepts(v)),
            (Shape::Optional(_), Value::Unit) => true,
            (Shape::Optional(inner), v) => inner.accepts(v),
            _ => false,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Any => write!(f, "any"),
            Shape::Unit => write!(f, "unit"),
            Shape::Bool => write!(f, "bool"),
            Shape::Int => write!(f, "int"),
            Shape::Float => write!(f, "float"),
            Shape::Str => write!(f, "str"),
            Shape::Bytes => write!(f, "bytes"),
            Shape::List(inner) => write!(f, "list<{}>", inner),
            Shape::Map(inner) => write!(f, "map<{}>", inner),
            Shape::Object => write!(f, "object"),
            Shape::Optional(inner) => write!(f, "optional<{}>", inner),
        }
    }
}

/// Parameter metadata for one callable: enough for the codec to decode its arguments.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Shape>,
    /// Shape of zero or more trailing arguments.
    pub variadic: Option<Shape>,
}

impl Signature {
    pub fn new(params: impl IntoIterator<Item = Shape>) -> Self {
        Self { params: params.into_iter().collect(), variadic: None }
    }

    /// Accepts any number of arguments of any shape.
    pub fn any() -> Self {
        Self { params: Vec::new(), variadic: Some(Shape::Any) }
    }

    pub fn variadic(mut self, shape: Shape) -> Self {
        self.variadic = Some(shape);
        self
    }

    /// Shape expected at argument position `idx`, if the position is allowed at all.
    pub fn shape_at(&self, idx: usize) -> Option<&Shape> {
        self.params.get(idx).or(self.variadic.as_ref())
    }

    pub fn accepts_count(&self, n: usize) -> bool {
        match self.variadic {
            Some(_) => n >= self.params.len(),
            None => n == self.params.len(),
        }
    }

    /// Human-readable arity, e.g. `"2"` or `"at least 1"`.
    pub fn arity(&self) -> String {
        match self.variadic {
            Some(_) => format!("at least {}", self.params.len()),
            None => self.params.len().to_string(),
        }
    }
}
