//! Plugins and interceptors.
//!
//! This example shows how to:
//! - Rewrite outgoing requests with a client-wide interceptor
//! - Observe the request lifecycle with a plugin
//! - Unregister a plugin and read its state
//!
//! Run with: `cargo run --example plugins`

use async_trait::async_trait;
use convoy::plugin::HookResult;
use convoy::transport::OutgoingRequest;
use convoy::{Client, Error, Interceptor, Plugin, Request, Response};
use http::HeaderValue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Tags every request with a correlation header.
struct Correlation;

#[async_trait]
impl Interceptor for Correlation {
    async fn on_request(&self, request: &mut OutgoingRequest) -> convoy::Result<()> {
        request
            .headers
            .insert("x-correlation-id", HeaderValue::from_static("demo-42"));
        Ok(())
    }
}

/// Counts finished calls and logs failures.
#[derive(Default)]
struct Stats {
    completed: AtomicUsize,
    failed: AtomicUsize,
}

#[async_trait]
impl Plugin for Stats {
    fn name(&self) -> &str {
        "stats"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    async fn on_request_start(&self, request: &Request) -> HookResult {
        tracing::info!(fingerprint = %request.fingerprint(), "Starting");
        Ok(())
    }

    async fn on_request_complete(&self, _request: &Request, response: &Response) -> HookResult {
        self.completed.fetch_add(1, Ordering::Relaxed);
        tracing::info!(status = response.status.as_u16(), cached = response.from_cache, "Done");
        Ok(())
    }

    async fn on_request_error(&self, _request: &Request, error: &Error) -> HookResult {
        self.failed.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(kind = %error.kind(), "Failed");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("convoy=info,plugins=info")
        .init();

    let client = Client::builder()
        .base_url("https://jsonplaceholder.typicode.com")?
        .build()?;

    client.add_interceptor(Arc::new(Correlation));
    let stats = Arc::new(Stats::default());
    client.register_plugin(stats.clone()).await?;

    for info in client.plugins() {
        println!("Plugin {} v{} ({:?})", info.name, info.version, info.state);
    }

    client.execute(Request::get("/todos/1").build()?).await?;
    if let Err(e) = client.execute(Request::get("/does-not-exist").build()?).await {
        println!("Expected failure: {}", e);
    }

    println!(
        "Completed: {}, failed: {}",
        stats.completed.load(Ordering::Relaxed),
        stats.failed.load(Ordering::Relaxed)
    );

    client.unregister_plugin("stats").await?;
    println!("State after unregister: {:?}", client.plugin_state("stats"));

    client.shutdown().await;
    Ok(())
}
