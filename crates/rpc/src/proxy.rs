//! Method-call syntax over an [`Invoker`].
//!
//! [`Proxy::method`] names a remote method without touching the channel; only
//! [`RemoteMethod::call`] and [`RemoteMethod::call_raw`] post anything. Both
//! consume the handle, so `proxy.method("m").call(..)` can be spawned.

use crate::config::CallOptions;
use crate::error::{InvokeError, InvokeResult};
use crate::invoker::Invoker;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use webview_channel::Channel;

/// Positional arguments for a remote call.
pub trait IntoArgs {
    /// Encode into the call's `args` array.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Codec`] if an argument cannot be serialized.
    fn into_args(self) -> InvokeResult<Vec<Value>>;
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> InvokeResult<Vec<Value>> {
        Ok(self)
    }
}

fn encode<T: Serialize>(value: T) -> InvokeResult<Value> {
    serde_json::to_value(value).map_err(|e| InvokeError::Codec(e.to_string()))
}

macro_rules! impl_into_args {
    ($($ty:ident),*) => {
        impl<$($ty: Serialize,)*> IntoArgs for ($($ty,)*) {
            #[allow(non_snake_case)]
            fn into_args(self) -> InvokeResult<Vec<Value>> {
                let ($($ty,)*) = self;
                Ok(vec![$(encode($ty)?),*])
            }
        }
    };
}

impl_into_args!();
impl_into_args!(T1);
impl_into_args!(T1, T2);
impl_into_args!(T1, T2, T3);
impl_into_args!(T1, T2, T3, T4);
impl_into_args!(T1, T2, T3, T4, T5);
impl_into_args!(T1, T2, T3, T4, T5, T6);
impl_into_args!(T1, T2, T3, T4, T5, T6, T7);
impl_into_args!(T1, T2, T3, T4, T5, T6, T7, T8);

/// Dynamic proxy: any method name becomes a callable handle.
pub struct Proxy<C: Channel> {
    invoker: Arc<Invoker<C>>,
}

impl<C: Channel> Proxy<C> {
    /// Wrap an invoker.
    #[must_use]
    pub const fn new(invoker: Arc<Invoker<C>>) -> Self {
        Self { invoker }
    }

    /// Handle for the remote method `name`. Performs no I/O.
    #[must_use]
    pub fn method(&self, name: impl Into<String>) -> RemoteMethod<C> {
        RemoteMethod {
            invoker: Arc::clone(&self.invoker),
            name: name.into(),
            options: CallOptions::default(),
        }
    }

    /// The invoker calls go through.
    #[must_use]
    pub const fn invoker(&self) -> &Arc<Invoker<C>> {
        &self.invoker
    }
}

impl<C: Channel> Clone for Proxy<C> {
    fn clone(&self) -> Self {
        Self {
            invoker: Arc::clone(&self.invoker),
        }
    }
}

impl<C: Channel> Debug for Proxy<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("pending_calls", &self.invoker.pending_calls())
            .finish()
    }
}

/// A named remote method, ready to be called.
pub struct RemoteMethod<C: Channel> {
    invoker: Arc<Invoker<C>>,
    name: String,
    options: CallOptions,
}

impl<C: Channel> RemoteMethod<C> {
    /// Method name as sent on the wire.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Use `timeout` instead of the invoker's default.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.with_timeout(timeout);
        self
    }

    /// Call the method and decode the result into `R`.
    ///
    /// Arguments are encoded before the returned future is first polled, so
    /// the future owns everything it needs and can be spawned or joined.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Codec`] if the arguments cannot be encoded or the
    /// result does not decode into `R`, otherwise whatever the invoker returns.
    pub fn call<R>(
        self,
        args: impl IntoArgs,
    ) -> impl Future<Output = InvokeResult<R>> + Send + 'static
    where
        R: DeserializeOwned + 'static,
    {
        self.call_encoded(args.into_args())
    }

    // Kept apart from `call` so the future does not carry the argument type.
    async fn call_encoded<R>(self, args: InvokeResult<Vec<Value>>) -> InvokeResult<R>
    where
        R: DeserializeOwned,
    {
        let name = self.name.clone();
        let value = self.call_raw(args?).await?;

        serde_json::from_value(value)
            .map_err(|e| InvokeError::Codec(format!("unexpected result from '{name}': {e}")))
    }

    /// Call the method with pre-encoded arguments.
    ///
    /// # Errors
    ///
    /// Same as [`Invoker::invoke`].
    pub async fn call_raw(self, args: Vec<Value>) -> InvokeResult<Value> {
        self.invoker
            .invoke_with_options(&self.name, args, self.options)
            .await
    }
}

impl<C: Channel> Debug for RemoteMethod<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMethod")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_tuple_args_are_positional() {
        assert_eq!(().into_args().unwrap(), Vec::<Value>::new());
        assert_eq!((4,).into_args().unwrap(), vec![json!(4)]);
        assert_eq!(
            ("a", 2, Some(true), None::<u8>).into_args().unwrap(),
            vec![json!("a"), json!(2), json!(true), Value::Null]
        );
    }

    #[test]
    fn test_unserializable_arg_is_codec_error() {
        // JSON object keys must be strings
        let mut map = BTreeMap::new();
        map.insert(vec![1u8], 1);

        assert!(matches!((map,).into_args(), Err(InvokeError::Codec(_))));
    }
}
