//! Typed adapters: plain Rust closures and fns become registry entries.
//!
//! Each trait is implemented for `Fn` types of arity 0 through 6. Parameter
//! shapes come from `FromValue::shape()`, and the return value goes through
//! `IntoResults`.

use std::fmt::Display;

use duorpc::CallResponse;
use duorpc::Failure;
use duorpc::FailureKind;
use duorpc::FromValue;
use duorpc::IntoResults;
use duorpc::Signature;
use duorpc::Value;

/// A typed function usable with `RegistryBuilder::function`.
pub trait IntoFunction<Args>: Send + Sync + 'static {
    fn signature() -> Signature;
    fn apply(&self, args: Vec<Value>) -> CallResponse;
}

/// A typed class factory usable with `RegistryBuilder::class`.
pub trait IntoConstructor<T, Args>: Send + Sync + 'static {
    fn signature() -> Signature;
    fn construct(&self, args: Vec<Value>) -> Result<Box<T>, Failure>;
}

/// A typed method usable with `Methods::method`.
pub trait IntoMethod<T, Args>: Send + Sync + 'static {
    fn signature() -> Signature;
    fn apply_to(&self, this: &T, args: Vec<Value>) -> CallResponse;
}

/// What a constructor may return.
///
/// `None` means "no usable instance" and is reported as a `Raised` failure.
pub trait ConstructorOutput<T> {
    fn into_instance(self) -> Result<Box<T>, Failure>;
}

impl<T> ConstructorOutput<T> for Box<T> {
    fn into_instance(self) -> Result<Box<T>, Failure> {
        Ok(self)
    }
}

impl<T> ConstructorOutput<T> for Option<Box<T>> {
    fn into_instance(self) -> Result<Box<T>, Failure> {
        self.ok_or_else(|| Failure::raised("constructor returned no instance"))
    }
}

impl<T, E: Display> ConstructorOutput<T> for Result<Box<T>, E> {
    fn into_instance(self) -> Result<Box<T>, Failure> {
        self.map_err(|e| Failure::raised(e.to_string()))
    }
}

/// Pulls the next argument and converts it.
///
/// The codec has already checked arity and shapes, so a failure here is a
/// range check (e.g. 300 into a `u8`).
fn next_arg<A: FromValue>(args: &mut std::vec::IntoIter<Value>) -> Result<A, Failure> {
    let value = args
        .next()
        .ok_or_else(|| Failure::new(FailureKind::Decode, "missing argument"))?;
    A::from_value(value).map_err(|e| Failure::decode(&e))
}

macro_rules! impl_adapters {
    ($($arg:ident $val:ident),*) => {
        impl<F, R, $($arg,)*> IntoFunction<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: IntoResults,
            $($arg: FromValue,)*
        {
            fn signature() -> Signature {
                Signature::new(vec![$($arg::shape()),*])
            }

            #[allow(unused_mut, unused_variables)]
            fn apply(&self, args: Vec<Value>) -> CallResponse {
                let mut args = args.into_iter();
                $(let $val = next_arg::<$arg>(&mut args)?;)*
                (self)($($val),*).into_results()
            }
        }

        impl<F, C, T, $($arg,)*> IntoConstructor<T, ($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> C + Send + Sync + 'static,
            C: ConstructorOutput<T>,
            $($arg: FromValue,)*
        {
            fn signature() -> Signature {
                Signature::new(vec![$($arg::shape()),*])
            }

            #[allow(unused_mut, unused_variables)]
            fn construct(&self, args: Vec<Value>) -> Result<Box<T>, Failure> {
                let mut args = args.into_iter();
                $(let $val = next_arg::<$arg>(&mut args)?;)*
                (self)($($val),*).into_instance()
            }
        }

        impl<F, R, T, $($arg,)*> IntoMethod<T, ($($arg,)*)> for F
        where
            F: Fn(&T, $($arg),*) -> R + Send + Sync + 'static,
            R: IntoResults,
            $($arg: FromValue,)*
        {
            fn signature() -> Signature {
                Signature::new(vec![$($arg::shape()),*])
            }

            #[allow(unused_mut, unused_variables)]
            fn apply_to(&self, this: &T, args: Vec<Value>) -> CallResponse {
                let mut args = args.into_iter();
                $(let $val = next_arg::<$arg>(&mut args)?;)*
                (self)(this, $($val),*).into_results()
            }
        }
    };
}

impl_adapters!();
impl_adapters!(A1 a1);
impl_adapters!(A1 a1, A2 a2);
impl_adapters!(A1 a1, A2 a2, A3 a3);
impl_adapters!(A1 a1, A2 a2, A3 a3, A4 a4);
impl_adapters!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
impl_adapters!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);
