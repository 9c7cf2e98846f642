//! # Convoy - client-side HTTP request orchestration
//!
//! Convoy sits between application code and an HTTP transport. Every call
//! passes through one engine that caches responses with a TTL, coalesces
//! identical in-flight requests onto a single transport call, schedules work
//! across priority lanes, runs plugin and interceptor hooks, and classifies
//! every failure into a small closed taxonomy.
//!
//! ## Quick Start
//!
//! ```no_run
//! use convoy::{CachePolicy, Client, Priority, Request, RetryStrategy};
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize)]
//! struct CreateUser {
//!     name: String,
//! }
//!
//! #[derive(Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), convoy::Error> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com")?
//!         .timeout(Duration::from_secs(30))
//!         .retry_strategy(RetryStrategy::ExponentialBackoff {
//!             initial_delay: Duration::from_millis(100),
//!             max_delay: Duration::from_secs(10),
//!             max_retries: 3,
//!             jitter: true,
//!         })
//!         .build()?;
//!
//!     // Cached for a minute, served ahead of normal traffic.
//!     let request = Request::get("/users/123")
//!         .priority(Priority::High)
//!         .cache(CachePolicy::enabled(Duration::from_secs(60)))
//!         .build()?;
//!     let user = client.execute_as::<User>(request).await?;
//!     println!("User: {} in {:?}", user.data.name, user.latency);
//!
//!     let created = client
//!         .post::<_, User>("/users", &CreateUser { name: "Alice".to_string() })
//!         .await?;
//!     println!("Created user with ID: {}", created.data.id);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Batches
//!
//! ```no_run
//! use convoy::{Client, Request};
//!
//! # async fn example(client: Client) -> Result<(), convoy::Error> {
//! let requests = (1..=10)
//!     .map(|id| Request::get(format!("/items/{}", id)).build())
//!     .collect::<Result<Vec<_>, _>>()?;
//!
//! // At most three transport calls in flight at a time, results in input order.
//! for result in client.execute_concurrent(requests, 3).await? {
//!     match result {
//!         Ok(response) => println!("{}", response.text()),
//!         Err(e) => eprintln!("{} failed: {}", e.kind(), e),
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Retry Strategies
//!
//! Retries happen inside one logical execution, so coalesced callers share
//! them:
//!
//! ```no_run
//! use convoy::{Client, RetryStrategy, retry::{RetryOn5xx, RetryOnTimeout, OrPredicate}};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), convoy::Error> {
//! let client = Client::builder()
//!     .base_url("https://api.example.com")?
//!     .retry_strategy(RetryStrategy::Linear {
//!         delay: Duration::from_millis(500),
//!         max_retries: 2,
//!     })
//!     .retry_predicate(Box::new(OrPredicate::new(vec![
//!         Box::new(RetryOn5xx),
//!         Box::new(RetryOnTimeout),
//!     ])))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod classify;
mod client;
mod config;
mod error;
pub mod plugin;
mod request;
mod response;
pub mod retry;
mod scheduler;
pub mod transport;

pub use client::{AcceptStatus, Client, ClientBuilder, ClientStatus};
pub use config::ClientConfig;
pub use error::{Error, ErrorKind, Result};
pub use plugin::{Interceptor, Plugin, PluginInfo, PluginState};
pub use request::{CachePolicy, Priority, Request, RequestBuilder};
pub use response::Response;
pub use retry::{RetryPredicate, RetryStrategy};
pub use scheduler::LaneCounts;
pub use transport::{ReqwestTransport, Transport, TransportError};
