//! Priority lanes, coalescing and caching.
//!
//! This example shows how to:
//! - Submit requests with different priorities
//! - Share one transport call between identical concurrent requests
//! - Serve repeat calls from the cache
//! - Inspect the engine with `status()`
//!
//! Run with: `cargo run --example priority_and_cache`

use convoy::{CachePolicy, Client, Error, Priority, Request};
use std::time::Duration;

fn todo(id: u32, priority: Priority) -> Result<Request, Error> {
    Request::get(format!("/todos/{}", id))
        .priority(priority)
        .cache(CachePolicy::enabled(Duration::from_secs(30)))
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("convoy=debug,priority_and_cache=info")
        .init();

    let client = Client::builder()
        .base_url("https://jsonplaceholder.typicode.com")?
        .pacing(Duration::from_millis(50))
        .build()?;

    println!("=== Mixed priorities ===");
    let requests = vec![
        todo(1, Priority::Low)?,
        todo(2, Priority::Normal)?,
        todo(3, Priority::High)?,
        todo(4, Priority::Critical)?,
    ];
    for (i, result) in client.execute_batch(requests).await?.into_iter().enumerate() {
        match result {
            Ok(response) => println!("#{} -> {} in {:?}", i, response.status, response.latency),
            Err(e) => println!("#{} -> {}", i, e),
        }
    }

    println!("\n=== Coalescing ===");
    client.clear_cache();
    let (a, b) = tokio::join!(
        client.execute(todo(5, Priority::Normal)?),
        client.execute(todo(5, Priority::Normal)?)
    );
    println!("Both succeeded: {}", a.is_ok() && b.is_ok());

    println!("\n=== Cache ===");
    let cached = client.execute(todo(5, Priority::Normal)?).await?;
    println!("Served from cache: {}", cached.from_cache);

    let status = client.status();
    println!(
        "In flight: {}, queued: {}, cache entries: {}",
        status.in_flight,
        status.queued.total(),
        status.cache_size
    );

    Ok(())
}
