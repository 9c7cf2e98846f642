//! Basic example demonstrating simple GET and POST requests.
//!
//! This example shows how to:
//! - Create a client with a base URL and a default header
//! - Make GET requests with query parameters
//! - Make POST requests with a JSON body
//! - Access response data and metadata
//!
//! Run with: `cargo run --example basic_call`

use convoy::{Client, Error, Request};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Post {
    #[serde(rename = "userId")]
    user_id: u32,
    id: u32,
    title: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct NewPost {
    title: String,
    body: String,
    #[serde(rename = "userId")]
    user_id: u32,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("convoy=debug,basic_call=info")
        .init();

    let client = Client::builder()
        .base_url("https://jsonplaceholder.typicode.com")?
        .default_header("User-Agent", "convoy-demo/0.1")?
        .timeout(Duration::from_secs(10))
        .build()?;

    println!("=== GET /posts/1 ===");
    let post = client.get::<Post>("/posts/1").await?;
    println!("Status: {}", post.status);
    println!("Latency: {:?}", post.latency);
    println!("Title: {}", post.data.title);

    println!("\n=== GET /posts?userId=1 ===");
    let request = Request::get("/posts").param("userId", 1).build()?;
    println!("Fingerprint: {}", request.fingerprint());
    let posts = client.execute_as::<Vec<Post>>(request).await?;
    println!("User 1 has {} posts", posts.data.len());

    println!("\n=== POST /posts ===");
    let new_post = NewPost {
        title: "Hello from convoy".to_string(),
        body: "Posted through the request engine.".to_string(),
        user_id: 1,
    };
    let created = client.post::<_, Post>("/posts", &new_post).await?;
    println!("Created post {} with status {}", created.data.id, created.status);

    Ok(())
}
