//! # Conversions
//!
//! Checked movement between `Value` and ordinary Rust types.
//!
//! - `FromValue`: inspects the variant tag and fails with `TypeMismatch`
//!   instead of coercing. Narrow integers are range checked.
//! - `IntoValue`: infallible widening into the value domain.
//! - `IntoResults`: how a callable's return becomes an ordered result list.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt::Display;

use crate::error::Error;
use crate::error::Failure;
use crate::error::Result;
use crate::value::ObjectRef;
use crate::value::Shape;
use crate::value::Value;

/// A Rust type that can be read out of a `Value`.
pub trait FromValue: Sized {
    /// The shape an argument of this type must have on the wire.
    fn shape() -> Shape;

    fn from_value(value: Value) -> Result<Self>;
}

/// A Rust type that can be turned into a `Value`.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

/// The ordered results produced by a callable's return value.
pub trait IntoResults {
    fn into_results(self) -> std::result::Result<Vec<Value>, Failure>;
}

fn mismatch(expected: impl Into<String>, found: &Value) -> Error {
    Error::TypeMismatch { expected: expected.into(), found: found.kind().into() }
}

// ---- Value itself ----

impl FromValue for Value {
    fn shape() -> Shape {
        Shape::Any
    }

    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

// ---- scalars ----

impl FromValue for () {
    fn shape() -> Shape {
        Shape::Unit
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Unit => Ok(()),
            other => Err(mismatch("unit", &other)),
        }
    }
}

impl FromValue for bool {
    fn shape() -> Shape {
        Shape::Bool
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch("bool", &other)),
        }
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl FromValue for i64 {
    fn shape() -> Shape {
        Shape::Int
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int(v) => Ok(v),
            other => Err(mismatch("int", &other)),
        }
    }
}

impl IntoValue for i64 {
    fn into_value(self) -> Value {
        Value::Int(self)
    }
}

macro_rules! impl_narrow_int {
    ($($ty:ty),*) => {$(
        impl FromValue for $ty {
            fn shape() -> Shape {
                Shape::Int
            }

            fn from_value(value: Value) -> Result<Self> {
                match value {
                    Value::Int(v) => <$ty>::try_from(v).map_err(|_| Error::TypeMismatch {
                        expected: stringify!($ty).into(),
                        found: format!("int {}", v),
                    }),
                    other => Err(mismatch(stringify!($ty), &other)),
                }
            }
        }

        impl IntoValue for $ty {
            fn into_value(self) -> Value {
                Value::Int(i64::from(self))
            }
        }
    )*};
}

impl_narrow_int!(i8, i16, i32, u8, u16, u32);

// u64 widens past i64, so it only reads.
impl FromValue for u64 {
    fn shape() -> Shape {
        Shape::Int
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int(v) => u64::try_from(v).map_err(|_| Error::TypeMismatch {
                expected: "u64".into(),
                found: format!("int {}", v),
            }),
            other => Err(mismatch("u64", &other)),
        }
    }
}

impl FromValue for f64 {
    fn shape() -> Shape {
        Shape::Float
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float(v) => Ok(v),
            other => Err(mismatch("float", &other)),
        }
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl FromValue for String {
    fn shape() -> Shape {
        Shape::Str
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(mismatch("str", &other)),
        }
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Str(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Str(self.to_string())
    }
}

impl FromValue for ObjectRef {
    fn shape() -> Shape {
        Shape::Object
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(r) => Ok(r),
            other => Err(mismatch("object", &other)),
        }
    }
}

impl IntoValue for ObjectRef {
    fn into_value(self) -> Value {
        Value::Object(self)
    }
}

// ---- containers ----

impl<T: FromValue> FromValue for Vec<T> {
    fn shape() -> Shape {
        Shape::list(T::shape())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(mismatch(Self::shape().to_string(), &other)),
        }
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(IntoValue::into_value).collect())
    }
}

/// `Unit` reads as `None`.
impl<T: FromValue> FromValue for Option<T> {
    fn shape() -> Shape {
        Shape::optional(T::shape())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Unit => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Unit,
        }
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn shape() -> Shape {
        Shape::map(T::shape())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Map(fields) => {
                fields.into_iter().map(|(k, v)| T::from_value(v).map(|v| (k, v))).collect()
            }
            other => Err(mismatch(Self::shape().to_string(), &other)),
        }
    }
}

impl<T: IntoValue> IntoValue for BTreeMap<String, T> {
    fn into_value(self) -> Value {
        Value::Map(self.into_iter().map(|(k, v)| (k, v.into_value())).collect())
    }
}

impl<T: FromValue> FromValue for HashMap<String, T> {
    fn shape() -> Shape {
        Shape::map(T::shape())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Map(fields) => {
                fields.into_iter().map(|(k, v)| T::from_value(v).map(|v| (k, v))).collect()
            }
            other => Err(mismatch(Self::shape().to_string(), &other)),
        }
    }
}

/// Fields are sorted by key so the wire order is stable.
impl<T: IntoValue> IntoValue for HashMap<String, T> {
    fn into_value(self) -> Value {
        let mut fields: Vec<_> = self.into_iter().map(|(k, v)| (k, v.into_value())).collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        Value::Map(fields)
    }
}

// ---- tuples ----

macro_rules! impl_tuple {
    ($len:expr; $($name:ident),+) => {
        impl<$($name: FromValue),+> FromValue for ($($name,)+) {
            fn shape() -> Shape {
                Shape::list(Shape::Any)
            }

            fn from_value(value: Value) -> Result<Self> {
                match value {
                    Value::List(items) if items.len() == $len => {
                        let mut items = items.into_iter();
                        Ok(($(
                            $name::from_value(items.next().ok_or_else(|| Error::ArityMismatch {
                                expected: $len.to_string(),
                                found: 0,
                            })?)?,
                        )+))
                    }
                    Value::List(items) => Err(Error::ArityMismatch {
                        expected: $len.to_string(),
                        found: items.len(),
                    }),
                    other => Err(mismatch("list", &other)),
                }
            }
        }

        impl<$($name: IntoValue),+> IntoValue for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_value(self) -> Value {
                let ($($name,)+) = self;
                Value::List(vec![$($name.into_value()),+])
            }
        }

        impl<$($name: IntoValue),+> IntoResults for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_results(self) -> std::result::Result<Vec<Value>, Failure> {
                let ($($name,)+) = self;
                Ok(vec![$($name.into_value()),+])
            }
        }
    };
}

impl_tuple!(2; A, B);
impl_tuple!(3; A, B, C);
impl_tuple!(4; A, B, C, D);

// ---- results ----

impl IntoResults for () {
    fn into_results(self) -> std::result::Result<Vec<Value>, Failure> {
        Ok(Vec::new())
    }
}

macro_rules! impl_single_result {
    ($($ty:ty),*) => {$(
        impl IntoResults for $ty {
            fn into_results(self) -> std::result::Result<Vec<Value>, Failure> {
                Ok(vec![self.into_value()])
            }
        }
    )*};
}

impl_single_result!(
    Value, bool, i8, i16, i32, i64, u8, u16, u32, f64, String, &'static str, ObjectRef
);

impl<T: IntoValue> IntoResults for Vec<T> {
    fn into_results(self) -> std::result::Result<Vec<Value>, Failure> {
        Ok(vec![self.into_value()])
    }
}

impl<T: IntoValue> IntoResults for Option<T> {
    fn into_results(self) -> std::result::Result<Vec<Value>, Failure> {
        Ok(vec![self.into_value()])
    }
}

impl<T: IntoValue> IntoResults for BTreeMap<String, T> {
    fn into_results(self) -> std::result::Result<Vec<Value>, Failure> {
        Ok(vec![self.into_value()])
    }
}

impl<T: IntoValue> IntoResults for HashMap<String, T> {
    fn into_results(self) -> std::result::Result<Vec<Value>, Failure> {
        Ok(vec![self.into_value()])
    }
}

/// An `Err` becomes a `Raised` failure carrying the error's message.
impl<T: IntoResults, E: Display> IntoResults for std::result::Result<T, E> {
    fn into_results(self) -> std::result::Result<Vec<Value>, Failure> {
        match self {
            Ok(v) => v.into_results(),
            Err(e) => Err(Failure::raised(e.to_string())),
        }
    }
}
