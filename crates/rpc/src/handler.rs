//! Method implementations and their registration.
//!
//! Any `Fn(A1, .., An) -> impl Future<Output = HandlerResult<R>>` with
//! `n <= 8`, deserializable arguments and a serializable return value is a
//! [`Handler`]. Arguments are taken positionally from the call's `args` array:
//! a missing trailing argument is read as `null`, so `Option<T>` parameters are
//! optional, and surplus arguments are ignored.

use anyhow::Context;
use futures::future;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// What a method implementation returns.
pub type HandlerResult<T> = anyhow::Result<T>;

/// Boxed, sendable future.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Type-erased method implementation, as stored in the registry.
pub(crate) type BoxedHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<HandlerResult<Value>> + Send + Sync>;

/// A callable that can be registered as a remote method.
///
/// `Args` is the tuple of parameter types; it only exists so closures of every
/// arity can implement this trait.
pub trait Handler<Args>: Send + Sync + 'static {
    /// Decode `args` positionally and run the implementation.
    fn call(&self, args: Vec<Value>) -> BoxFuture<HandlerResult<Value>>;
}

/// Reads arguments off the `args` array one position at a time.
struct Positional {
    args: std::vec::IntoIter<Value>,
    index: usize,
}

impl Positional {
    fn new(args: Vec<Value>) -> Self {
        Self {
            args: args.into_iter(),
            index: 0,
        }
    }

    fn next<T: DeserializeOwned>(&mut self) -> HandlerResult<T> {
        let index = self.index;
        self.index += 1;

        let value = self.args.next().unwrap_or(Value::Null);
        serde_json::from_value(value).with_context(|| format!("invalid argument at position {index}"))
    }
}

fn finish<Fut, R>(fut: Fut) -> BoxFuture<HandlerResult<Value>>
where
    Fut: Future<Output = HandlerResult<R>> + Send + 'static,
    R: Serialize + Send + 'static,
{
    Box::pin(async move {
        let value = fut.await?;
        serde_json::to_value(value).context("failed to serialize return value")
    })
}

macro_rules! impl_handler {
    ($($ty:ident),*) => {
        impl<F, Fut, R, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = HandlerResult<R>> + Send + 'static,
            R: Serialize + Send + 'static,
            $($ty: DeserializeOwned,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(&self, args: Vec<Value>) -> BoxFuture<HandlerResult<Value>> {
                let mut args = Positional::new(args);
                $(
                    let $ty = match args.next::<$ty>() {
                        Ok(value) => value,
                        Err(e) => return Box::pin(future::ready(Err(e))),
                    };
                )*

                finish((self)($($ty),*))
            }
        }
    };
}

impl_handler!();
impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);
impl_handler!(T1, T2, T3, T4, T5, T6, T7);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8);

pub(crate) fn boxed<Args, H>(handler: H) -> BoxedHandler
where
    H: Handler<Args>,
{
    Arc::new(move |args| handler.call(args))
}

/// Box a handler that receives every argument, decoded into `T`.
pub(crate) fn boxed_variadic<T, F, Fut, R>(handler: F) -> BoxedHandler
where
    T: DeserializeOwned,
    F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<R>> + Send + 'static,
    R: Serialize + Send + 'static,
{
    Arc::new(move |args: Vec<Value>| -> BoxFuture<HandlerResult<Value>> {
        let decoded = args
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                serde_json::from_value(value)
                    .with_context(|| format!("invalid argument at position {index}"))
            })
            .collect::<HandlerResult<Vec<T>>>();

        match decoded {
            Ok(values) => finish(handler(values)),
            Err(e) => Box::pin(future::ready(Err(e))),
        }
    })
}

/// Explicit list of `(name, bound handler)` pairs registered together.
///
/// Built by hand or generated by [`remote_api!`](crate::remote_api), then
/// handed to [`Dispatcher::register_instance`](crate::Dispatcher::register_instance).
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: Vec<(String, BoxedHandler)>,
}

impl MethodTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method.
    #[must_use]
    pub fn method<Args, H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        H: Handler<Args>,
    {
        self.methods.push((name.into(), boxed(handler)));
        self
    }

    /// Add a method that receives all of its arguments as one `Vec<T>`.
    #[must_use]
    pub fn variadic<T, F, Fut, R>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<R>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        self.methods.push((name.into(), boxed_variadic(handler)));
        self
    }

    /// Number of methods in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the table has no methods.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Method names, in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|(name, _)| name.as_str())
    }

    pub(crate) fn into_entries(self) -> Vec<(String, BoxedHandler)> {
        self.methods
    }
}

impl Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
