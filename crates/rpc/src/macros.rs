/// Declare a remote interface once and get both sides of it.
///
/// ```ignore
/// remote_api! {
///     /// Host services exposed to the UI.
///     pub trait Models => ModelsClient {
///         fn list() -> Vec<String>;
///         fn load(name: String, quantized: Option<bool>) -> bool;
///         fn unload(name: String) -> () as "models:unload";
///     }
/// }
/// ```
///
/// expands to
///
/// - an `async_trait` trait `Models` whose methods return
///   [`HandlerResult`](crate::HandlerResult). The host implements it and
///   registers an instance with
///   `dispatcher.register_instance(Arc::new(impl).into_method_table())`;
/// - a client struct `ModelsClient<C>` wrapping a [`Proxy`](crate::Proxy),
///   with one `async fn` per method returning
///   [`InvokeResult`](crate::InvokeResult).
///
/// Methods go on the wire under their Rust name unless `as "name"` says
/// otherwise. Nothing checks that the host registered a method the client
/// calls; a mismatch surfaces when the call is made.
#[macro_export]
macro_rules! remote_api {
    (
        $(#[$attr:meta])*
        $vis:vis trait $api:ident => $client:ident {
            $(
                $(#[$method_attr:meta])*
                fn $method:ident ( $($arg:ident : $ty:ty),* $(,)? ) -> $ret:ty $(as $wire:literal)? ;
            )*
        }
    ) => {
        $(#[$attr])*
        #[$crate::__private::async_trait]
        $vis trait $api: Send + Sync + 'static {
            $(
                $(#[$method_attr])*
                async fn $method(&self, $($arg: $ty),*) -> $crate::HandlerResult<$ret>;
            )*

            /// Bind every method of this instance, under its wire name.
            fn into_method_table(self: ::std::sync::Arc<Self>) -> $crate::MethodTable
            where
                Self: Sized,
            {
                $crate::MethodTable::new()
                    $(
                        .method($crate::__channel_name!($method $(, $wire)?), {
                            let this = ::std::sync::Arc::clone(&self);
                            move |$($arg: $ty),*| {
                                let this = ::std::sync::Arc::clone(&this);
                                async move { this.$method($($arg),*).await }
                            }
                        })
                    )*
            }
        }

        #[doc = concat!("Typed client for [`", stringify!($api), "`].")]
        $vis struct $client<C: $crate::Channel> {
            proxy: $crate::Proxy<C>,
        }

        impl<C: $crate::Channel> $client<C> {
            /// Wrap a proxy.
            #[must_use]
            pub const fn new(proxy: $crate::Proxy<C>) -> Self {
                Self { proxy }
            }

            /// The underlying dynamic proxy.
            #[must_use]
            pub const fn proxy(&self) -> &$crate::Proxy<C> {
                &self.proxy
            }

            $(
                $(#[$method_attr])*
                pub async fn $method(&self, $($arg: $ty),*) -> $crate::InvokeResult<$ret> {
                    self.proxy
                        .method($crate::__channel_name!($method $(, $wire)?))
                        .call(($($arg,)*))
                        .await
                }
            )*
        }

        impl<C: $crate::Channel> ::std::clone::Clone for $client<C> {
            fn clone(&self) -> Self {
                Self {
                    proxy: ::std::clone::Clone::clone(&self.proxy),
                }
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __channel_name {
    ($method:ident) => {
        ::std::stringify!($method)
    };
    ($method:ident, $wire:literal) => {
        $wire
    };
}

#[cfg(test)]
mod tests {
    use crate::{Dispatcher, HandlerResult};
    use async_trait::async_trait;
    use std::sync::Arc;
    use webview_channel_memory::MemoryChannel;

    crate::remote_api! {
        trait Greeter => GreeterClient {
            fn hello(name: String) -> String;
            fn shout(name: String, times: Option<u8>) -> String as "greeter:shout";
            fn silence() -> ();
        }
    }

    struct English;

    #[async_trait]
    impl Greeter for English {
        async fn hello(&self, name: String) -> HandlerResult<String> {
            Ok(format!("Hello, {name}"))
        }

        async fn shout(&self, name: String, times: Option<u8>) -> HandlerResult<String> {
            Ok(name.to_uppercase().repeat(usize::from(times.unwrap_or(1))))
        }

        async fn silence(&self) -> HandlerResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_method_table_uses_wire_names() {
        let table = Arc::new(English).into_method_table();

        assert_eq!(
            table.names().collect::<Vec<_>>(),
            vec!["hello", "greeter:shout", "silence"]
        );
    }

    #[test]
    fn test_register_instance_from_trait() {
        let (host, _ui) = MemoryChannel::pair();
        let dispatcher = Dispatcher::new(host);

        assert_eq!(
            dispatcher.register_instance(Arc::new(English).into_method_table()),
            3
        );
        assert!(dispatcher.is_registered("greeter:shout"));
        assert!(!dispatcher.is_registered("shout"));
    }
}
