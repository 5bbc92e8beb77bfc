//! A host and a UI talking over an in-memory channel.
//!
//! Run with `RUST_LOG=debug` to watch envelopes being correlated.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use webview_channel_memory::MemoryChannel;
use webview_rpc::{Dispatcher, HandlerResult, Invoker, InvokerConfig, remote_api};

remote_api! {
    /// What the host exposes to the UI.
    pub trait Host => HostClient {
        fn ping() -> String;
        fn add(a: i64, b: i64) -> i64;
        fn divide(a: f64, b: f64) -> f64;
    }
}

struct HostImpl;

#[async_trait::async_trait]
impl Host for HostImpl {
    async fn ping(&self) -> HandlerResult<String> {
        Ok("pong".to_string())
    }

    async fn add(&self, a: i64, b: i64) -> HandlerResult<i64> {
        Ok(a + b)
    }

    async fn divide(&self, a: f64, b: f64) -> HandlerResult<f64> {
        anyhow::ensure!(b != 0.0, "division by zero");
        Ok(a / b)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let (host_end, ui_end) = MemoryChannel::pair();

    let dispatcher = Arc::new(Dispatcher::new(host_end));
    dispatcher.register_instance(Arc::new(HostImpl).into_method_table());
    dispatcher.start()?;

    let invoker = Arc::new(Invoker::with_config(
        ui_end,
        InvokerConfig::default().with_timeout(Duration::from_secs(2)),
    ));
    invoker.start()?;

    let host = HostClient::new(invoker.proxy());

    info!("ping -> {}", host.ping().await?);
    info!("add(2, 3) -> {}", host.add(2, 3).await?);

    match host.divide(1.0, 0.0).await {
        Ok(value) => info!("divide(1, 0) -> {value}"),
        Err(e) => info!("divide(1, 0) failed: {e}"),
    }

    match invoker.invoke("shutdown", vec![]).await {
        Ok(value) => info!("shutdown -> {value}"),
        Err(e) => info!("shutdown failed: {e}"),
    }

    Ok(())
}
